//! # Replay Attacks
//!
//! An attacker with read access to the bus captures signed envelopes and
//! publishes them again, on the producer channel or straight onto the
//! relay-to-relay channel.

#[cfg(test)]
mod tests {
    use crate::harness::{Fleet, CHANNEL};
    use relay_bus::{fanout_channel, MessageBus};
    use relay_types::{Event, EventType};

    fn message(content: &str) -> Event {
        Event::builder(EventType::NewMessage)
            .in_room("vault")
            .field("content", content)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_captured_envelope_replayed_later() {
        let fleet = Fleet::start(2).await;
        let mut victim = fleet.node(1).connect(Some("victim"));
        victim.join("vault").await;

        let captured = fleet.publish(message("transfer approved")).await;
        assert_eq!(
            victim.recv().await.to_value()["data"]["content"],
            "transfer approved"
        );

        for _ in 0..5 {
            fleet.publish_envelope(&captured).await;
        }
        fleet.settle().await;
        assert!(victim.drain().is_empty());
        assert_eq!(fleet.store().claims(), 1);
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_replay_burst_races_first_delivery() {
        let fleet = Fleet::start(3).await;
        let mut victim = fleet.node(0).connect(Some("victim"));
        victim.join("vault").await;

        let envelope = fleet.signer().sign(message("race"));
        let raw = envelope.to_json_bytes().unwrap();
        let publishes = (0..10).map(|_| fleet.publish_raw(raw.clone()));
        futures::future::join_all(publishes).await;

        assert_eq!(victim.recv().await.to_value()["data"]["content"], "race");
        fleet.settle().await;
        assert!(victim.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_replay_injected_on_fanout_channel() {
        let fleet = Fleet::start(2).await;
        let mut victim = fleet.node(0).connect(Some("victim"));
        victim.join("vault").await;

        let captured = fleet.publish(message("once only")).await;
        victim.recv().await;

        // Skips the shared claim; the per-process dedupe still holds.
        let raw = captured.to_json_bytes().unwrap();
        for _ in 0..3 {
            fleet
                .bus()
                .publish(&fanout_channel(CHANNEL), raw.clone().into())
                .await
                .unwrap();
        }
        fleet.settle().await;
        assert!(victim.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_on_fanout_channel_does_not_stall_relay() {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("vault").await;

        fleet
            .bus()
            .publish(&fanout_channel(CHANNEL), bytes::Bytes::from_static(b"\x00\xff"))
            .await
            .unwrap();
        fleet.publish(message("still alive")).await;
        assert_eq!(client.recv().await.to_value()["data"]["content"], "still alive");
        fleet.shutdown().await;
    }
}
