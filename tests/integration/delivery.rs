//! Delivery fabric semantics: ordering, best-effort, and aborts.

use std::sync::Arc;

use async_trait::async_trait;
use mozi_cron::testing::ScriptedChannel;
use mozi_cron::{
    Channel, ChannelId, ChannelMessage, ChannelRegistry, DeliverOptions, DeliveryPayload,
    DeliveryService, DeliveryTarget, SendReceipt,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A channel that fires a cancellation token as a side effect of its
/// first successful send, simulating an abort landing mid-batch.
struct CancellingChannel {
    token: CancellationToken,
    sent: Mutex<Vec<ChannelMessage>>,
}

#[async_trait]
impl Channel for CancellingChannel {
    fn id(&self) -> ChannelId {
        ChannelId::Qq
    }

    async fn send_message(&self, message: ChannelMessage) -> SendReceipt {
        let mut sent = self.sent.lock().await;
        sent.push(message);
        if sent.len() == 1 {
            self.token.cancel();
        }
        SendReceipt::delivered(format!("m-{}", sent.len()))
    }
}

fn payloads(texts: &[&str]) -> Vec<DeliveryPayload> {
    texts.iter().map(|t| DeliveryPayload::text(*t)).collect()
}

#[tokio::test]
async fn abort_after_first_send_yields_two_results() {
    let registry = Arc::new(ChannelRegistry::new());
    let token = CancellationToken::new();
    let channel = Arc::new(CancellingChannel {
        token: token.clone(),
        sent: Mutex::new(Vec::new()),
    });
    registry.register(channel.clone()).await;

    let service = DeliveryService::new(registry);
    let target = DeliveryTarget::new(ChannelId::Qq, "u1");
    let options = DeliverOptions::best_effort().with_cancel(token);

    let results = service
        .deliver_many(&target, &payloads(&["p1", "p2", "p3"]), &options)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results[1].error.as_deref(), Some("Aborted"));
    // The in-flight send completed; nothing further was attempted.
    assert_eq!(channel.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn payloads_are_sent_strictly_in_order() {
    let registry = Arc::new(ChannelRegistry::new());
    let channel = ScriptedChannel::new(ChannelId::Feishu);
    registry.register(channel.clone()).await;

    let service = DeliveryService::new(registry);
    let target = DeliveryTarget::new(ChannelId::Feishu, "room-1");

    let results = service
        .deliver_many(
            &target,
            &payloads(&["one", "two", "three", "four"]),
            &DeliverOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    let contents: Vec<String> = channel
        .sent()
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["one", "two", "three", "four"]);
}

#[tokio::test]
async fn best_effort_with_every_send_failing_never_raises() {
    let registry = Arc::new(ChannelRegistry::new());
    let channel = ScriptedChannel::new(ChannelId::Wecom);
    for i in 0..3 {
        channel
            .push_receipt(SendReceipt::failed(format!("fail-{i}")))
            .await;
    }
    registry.register(channel.clone()).await;

    let service = DeliveryService::new(registry);
    let target = DeliveryTarget::new(ChannelId::Wecom, "u1");

    let results = service
        .deliver_many(
            &target,
            &payloads(&["a", "b", "c"]),
            &DeliverOptions::best_effort(),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| !r.success));
    assert_eq!(results[2].error.as_deref(), Some("fail-2"));
}

#[tokio::test]
async fn strict_delivery_stops_at_first_failure() {
    let registry = Arc::new(ChannelRegistry::new());
    let channel = ScriptedChannel::new(ChannelId::Webchat);
    channel.push_receipt(SendReceipt::delivered("m-1")).await;
    channel.push_receipt(SendReceipt::failed("socket closed")).await;
    registry.register(channel.clone()).await;

    let service = DeliveryService::new(registry);
    let target = DeliveryTarget::new(ChannelId::Webchat, "u1");

    let err = service
        .deliver_many(
            &target,
            &payloads(&["a", "b", "c"]),
            &DeliverOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("socket closed"));
    assert_eq!(channel.sent().await.len(), 2);
}
