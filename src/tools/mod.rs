//! Model-facing command layer over the scheduler.
//!
//! Exposes five operations (`cron_list`, `cron_add`, `cron_remove`,
//! `cron_update`, `cron_run`) as structured commands with JSON-schema
//! definitions. Every operation validates its arguments and returns a
//! rendered text block; validation failures come back as an error result
//! with a `错误: ` prefix.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::TimeZone;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::channel::{ChannelId, ChannelSelector};
use crate::core::job::{
    Job, JobDraft, JobPatch, Payload, Schedule, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS,
};
use crate::core::types::JobId;
use crate::executor::ExecutionReport;
use crate::scheduler::CronScheduler;

pub const TOOL_CRON_LIST: &str = "cron_list";
pub const TOOL_CRON_ADD: &str = "cron_add";
pub const TOOL_CRON_REMOVE: &str = "cron_remove";
pub const TOOL_CRON_UPDATE: &str = "cron_update";
pub const TOOL_CRON_RUN: &str = "cron_run";

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

/// What an operation hands back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub is_error: bool,
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            is_error: true,
            content: vec![ContentBlock::Text {
                text: format!("错误: {message}"),
            }],
        }
    }

    /// All text content joined, for assertions and logging.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|ContentBlock::Text { text }| text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Name, description, and parameter schema for one operation.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    #[serde(default)]
    include_disabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddArgs {
    name: String,
    schedule_type: String,
    #[serde(default)]
    at_ms: Option<i64>,
    #[serde(default)]
    every_ms: Option<i64>,
    #[serde(default)]
    every_value: Option<i64>,
    #[serde(default)]
    every_unit: Option<String>,
    #[serde(default)]
    expr: Option<String>,
    #[serde(default)]
    tz: Option<String>,
    #[serde(default)]
    payload_kind: Option<String>,
    message: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    deliver: Option<bool>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    delete_after_run: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveArgs {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateArgs {
    job_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    schedule_type: Option<String>,
    #[serde(default)]
    at_ms: Option<i64>,
    #[serde(default)]
    every_ms: Option<i64>,
    #[serde(default)]
    every_value: Option<i64>,
    #[serde(default)]
    every_unit: Option<String>,
    #[serde(default)]
    expr: Option<String>,
    #[serde(default)]
    tz: Option<String>,
    #[serde(default)]
    payload_kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    deliver: Option<bool>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    delete_after_run: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunArgs {
    job_id: String,
}

/// The cron tool: five operations dispatched by name.
pub struct CronTool {
    scheduler: Arc<CronScheduler>,
}

impl CronTool {
    pub fn new(scheduler: Arc<CronScheduler>) -> Self {
        Self { scheduler }
    }

    /// Definitions for all five operations, in a model-consumable shape.
    pub fn definitions() -> Vec<ToolDefinition> {
        let channel_values: Vec<&str> = ChannelId::ALL
            .iter()
            .map(|c| c.as_str())
            .chain(std::iter::once("last"))
            .collect();

        vec![
            ToolDefinition {
                name: TOOL_CRON_LIST,
                description: "List scheduled cron jobs.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "includeDisabled": {
                            "type": "boolean",
                            "description": "Include disabled jobs in the listing."
                        }
                    }
                }),
            },
            ToolDefinition {
                name: TOOL_CRON_ADD,
                description: "Add a scheduled job. scheduleType selects the schedule shape; payloadKind selects what runs (defaults to agentTurn).",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Human label for the job." },
                        "scheduleType": { "type": "string", "enum": ["at", "every", "cron"] },
                        "atMs": { "type": "integer", "description": "Fire instant in epoch ms (scheduleType=at)." },
                        "everyMs": { "type": "integer", "description": "Interval in ms (scheduleType=every)." },
                        "everyValue": { "type": "integer", "description": "Interval magnitude, used with everyUnit." },
                        "everyUnit": { "type": "string", "enum": ["seconds", "minutes", "hours", "days"] },
                        "expr": { "type": "string", "description": "5- or 6-field cron expression (scheduleType=cron)." },
                        "tz": { "type": "string", "description": "IANA timezone for cron evaluation." },
                        "payloadKind": { "type": "string", "enum": ["systemEvent", "agentTurn"] },
                        "message": { "type": "string", "description": "Event text or agent prompt." },
                        "model": { "type": "string" },
                        "timeoutSeconds": { "type": "integer", "minimum": 1, "maximum": 600 },
                        "deliver": { "type": "boolean", "description": "Deliver agent output to a channel." },
                        "channel": { "type": "string", "enum": channel_values },
                        "to": { "type": "string", "description": "Recipient id on the channel." },
                        "enabled": { "type": "boolean" },
                        "deleteAfterRun": { "type": "boolean" }
                    },
                    "required": ["name", "scheduleType", "message"]
                }),
            },
            ToolDefinition {
                name: TOOL_CRON_REMOVE,
                description: "Remove a cron job by id.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" }
                    },
                    "required": ["jobId"]
                }),
            },
            ToolDefinition {
                name: TOOL_CRON_UPDATE,
                description: "Update a cron job. Only provided fields change; schedule and payload are replaced whole when their fields are given.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" },
                        "name": { "type": "string" },
                        "enabled": { "type": "boolean" },
                        "scheduleType": { "type": "string", "enum": ["at", "every", "cron"] },
                        "atMs": { "type": "integer" },
                        "everyMs": { "type": "integer" },
                        "everyValue": { "type": "integer" },
                        "everyUnit": { "type": "string", "enum": ["seconds", "minutes", "hours", "days"] },
                        "expr": { "type": "string" },
                        "tz": { "type": "string" },
                        "payloadKind": { "type": "string", "enum": ["systemEvent", "agentTurn"] },
                        "message": { "type": "string" },
                        "model": { "type": "string" },
                        "timeoutSeconds": { "type": "integer", "minimum": 1, "maximum": 600 },
                        "deliver": { "type": "boolean" },
                        "channel": { "type": "string" },
                        "to": { "type": "string" },
                        "deleteAfterRun": { "type": "boolean" }
                    },
                    "required": ["jobId"]
                }),
            },
            ToolDefinition {
                name: TOOL_CRON_RUN,
                description: "Run a cron job immediately, outside its schedule.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "jobId": { "type": "string" }
                    },
                    "required": ["jobId"]
                }),
            },
        ]
    }

    /// Dispatch an operation by name.
    pub async fn dispatch(&self, name: &str, args: Value) -> ToolResult {
        match name {
            TOOL_CRON_LIST => self.cron_list(args).await,
            TOOL_CRON_ADD => self.cron_add(args).await,
            TOOL_CRON_REMOVE => self.cron_remove(args).await,
            TOOL_CRON_UPDATE => self.cron_update(args).await,
            TOOL_CRON_RUN => self.cron_run(args).await,
            other => ToolResult::error(format!("unknown tool: {other}")),
        }
    }

    pub async fn cron_list(&self, args: Value) -> ToolResult {
        let args: ListArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(format!("invalid arguments: {e}")),
        };

        let jobs = self.scheduler.list(args.include_disabled).await;
        if jobs.is_empty() {
            return ToolResult::text("No cron jobs.");
        }

        let mut out = format!("Cron jobs ({}):\n", jobs.len());
        for job in &jobs {
            let _ = writeln!(out, "{}", render_job_line(job));
        }
        ToolResult::text(out.trim_end().to_string())
    }

    pub async fn cron_add(&self, args: Value) -> ToolResult {
        let args: AddArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(format!("invalid arguments: {e}")),
        };

        let schedule = match build_schedule(
            &args.schedule_type,
            args.at_ms,
            args.every_ms,
            args.every_value,
            args.every_unit.as_deref(),
            args.expr.as_deref(),
            args.tz.as_deref(),
        ) {
            Ok(schedule) => schedule,
            Err(message) => return ToolResult::error(message),
        };

        let payload = match build_payload(
            args.payload_kind.as_deref().unwrap_or("agentTurn"),
            args.message,
            args.model,
            args.timeout_seconds,
            args.deliver.unwrap_or(false),
            args.channel.as_deref(),
            args.to,
        ) {
            Ok(payload) => payload,
            Err(message) => return ToolResult::error(message),
        };

        let draft = JobDraft {
            name: args.name,
            schedule,
            payload,
            enabled: args.enabled,
            delete_after_run: args.delete_after_run.unwrap_or(false),
        };

        match self.scheduler.add(draft).await {
            Ok(job) => ToolResult::text(format!(
                "Added job {}\n{}",
                job.id,
                render_job_line(&job)
            )),
            Err(e) => ToolResult::error(e),
        }
    }

    pub async fn cron_remove(&self, args: Value) -> ToolResult {
        let args: RemoveArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(format!("invalid arguments: {e}")),
        };

        let id = JobId::new(args.job_id);
        match self.scheduler.remove(&id).await {
            Ok(true) => ToolResult::text(format!("Removed job {id}")),
            Ok(false) => ToolResult::error(format!("job not found: {id}")),
            Err(e) => ToolResult::error(e),
        }
    }

    pub async fn cron_update(&self, args: Value) -> ToolResult {
        let args: UpdateArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(format!("invalid arguments: {e}")),
        };

        let schedule = match &args.schedule_type {
            Some(schedule_type) => match build_schedule(
                schedule_type,
                args.at_ms,
                args.every_ms,
                args.every_value,
                args.every_unit.as_deref(),
                args.expr.as_deref(),
                args.tz.as_deref(),
            ) {
                Ok(schedule) => Some(schedule),
                Err(message) => return ToolResult::error(message),
            },
            None => None,
        };

        let payload = if args.payload_kind.is_some() || args.message.is_some() {
            let Some(message) = args.message else {
                return ToolResult::error("message is required when replacing the payload");
            };
            match build_payload(
                args.payload_kind.as_deref().unwrap_or("agentTurn"),
                message,
                args.model,
                args.timeout_seconds,
                args.deliver.unwrap_or(false),
                args.channel.as_deref(),
                args.to,
            ) {
                Ok(payload) => Some(payload),
                Err(message) => return ToolResult::error(message),
            }
        } else {
            None
        };

        let patch = JobPatch {
            name: args.name,
            enabled: args.enabled,
            schedule,
            payload,
            delete_after_run: args.delete_after_run,
        };

        let id = JobId::new(args.job_id);
        match self.scheduler.update(&id, patch).await {
            Ok(job) => ToolResult::text(format!(
                "Updated job {}\n{}",
                job.id,
                render_job_line(&job)
            )),
            Err(e) => ToolResult::error(e),
        }
    }

    pub async fn cron_run(&self, args: Value) -> ToolResult {
        let args: RunArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return ToolResult::error(format!("invalid arguments: {e}")),
        };

        let id = JobId::new(args.job_id);
        match self.scheduler.run(&id).await {
            Ok(report) => ToolResult::text(render_report(&id, &report)),
            Err(e) => ToolResult::error(e),
        }
    }
}

fn build_schedule(
    schedule_type: &str,
    at_ms: Option<i64>,
    every_ms: Option<i64>,
    every_value: Option<i64>,
    every_unit: Option<&str>,
    expr: Option<&str>,
    tz: Option<&str>,
) -> Result<Schedule, String> {
    match schedule_type {
        "at" => {
            let at_ms = at_ms.ok_or("atMs is required for scheduleType=at")?;
            Ok(Schedule::At { at_ms })
        }
        "every" => {
            let every_ms = match (every_ms, every_value, every_unit) {
                (Some(ms), _, _) => ms,
                (None, Some(value), Some(unit)) => {
                    let factor = match unit {
                        "seconds" => 1_000,
                        "minutes" => 60_000,
                        "hours" => 3_600_000,
                        "days" => 86_400_000,
                        other => {
                            return Err(format!(
                                "everyUnit must be one of seconds, minutes, hours, days; got {other}"
                            ))
                        }
                    };
                    value.saturating_mul(factor)
                }
                _ => {
                    return Err(
                        "scheduleType=every requires everyMs or everyValue + everyUnit".to_string()
                    )
                }
            };
            if every_ms <= 0 {
                return Err(format!("interval must be positive, got {every_ms}ms"));
            }
            Ok(Schedule::Every { every_ms })
        }
        "cron" => {
            let expr = expr.ok_or("expr is required for scheduleType=cron")?;
            Ok(Schedule::Cron {
                expr: expr.to_string(),
                tz: tz.map(String::from),
            })
        }
        other => Err(format!(
            "scheduleType must be one of at, every, cron; got {other}"
        )),
    }
}

fn build_payload(
    payload_kind: &str,
    message: String,
    model: Option<String>,
    timeout_seconds: Option<u64>,
    deliver: bool,
    channel: Option<&str>,
    to: Option<String>,
) -> Result<Payload, String> {
    match payload_kind {
        "systemEvent" => Ok(Payload::SystemEvent { message }),
        "agentTurn" => {
            if let Some(timeout) = timeout_seconds {
                if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
                    return Err(format!(
                        "timeoutSeconds must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS}, got {timeout}"
                    ));
                }
            }
            let channel = match channel {
                Some(raw) => Some(
                    raw.parse::<ChannelSelector>()
                        .map_err(|e| e.to_string())?,
                ),
                None => None,
            };
            if deliver && (channel.is_none() || to.is_none()) {
                return Err("deliver=true requires both channel and to".to_string());
            }
            Ok(Payload::AgentTurn {
                message,
                model,
                timeout_seconds,
                deliver,
                channel,
                to,
            })
        }
        other => Err(format!(
            "payloadKind must be systemEvent or agentTurn; got {other}"
        )),
    }
}

fn format_ms(ms: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn describe_schedule(schedule: &Schedule) -> String {
    match schedule {
        Schedule::At { at_ms } => format!("at {}", format_ms(*at_ms)),
        Schedule::Every { every_ms } => {
            if every_ms % 1_000 == 0 {
                format!("every {}s", every_ms / 1_000)
            } else {
                format!("every {every_ms}ms")
            }
        }
        Schedule::Cron { expr, tz } => match tz {
            Some(tz) => format!("cron \"{expr}\" ({tz})"),
            None => format!("cron \"{expr}\""),
        },
    }
}

fn describe_payload(payload: &Payload) -> String {
    match payload {
        Payload::SystemEvent { .. } => "systemEvent".to_string(),
        Payload::AgentTurn {
            deliver,
            channel,
            to,
            ..
        } => {
            if *deliver {
                let channel = channel.as_ref().map(|c| c.as_str()).unwrap_or("?");
                let to = to.as_deref().unwrap_or("?");
                format!("agentTurn → {channel}:{to}")
            } else {
                "agentTurn".to_string()
            }
        }
    }
}

fn render_job_line(job: &Job) -> String {
    let state = if job.enabled { "enabled" } else { "disabled" };
    let next = job
        .state
        .next_run_at_ms
        .map(format_ms)
        .unwrap_or_else(|| "-".to_string());
    let last = match job.state.last_status {
        Some(status) => format!(", last {status}"),
        None => String::new(),
    };
    format!(
        "- {} [{}] \"{}\": {}; {}; next {}; runs {}{}",
        job.id,
        state,
        job.name,
        describe_schedule(&job.schedule),
        describe_payload(&job.payload),
        next,
        job.state.run_count,
        last
    )
}

fn render_report(id: &JobId, report: &ExecutionReport) -> String {
    let mut out = format!("Job {} ran: {}", id, report.status);
    if let Some(summary) = &report.summary {
        let _ = write!(out, "\nSummary: {summary}");
    }
    if let Some(error) = &report.error {
        let _ = write!(out, "\nError: {error}");
    }
    out
}
