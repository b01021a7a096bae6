//! # Store Outage
//!
//! With the shared nonce store unreachable the fleet fails closed, and it
//! resumes on its own once the store is back.

#[cfg(test)]
mod tests {
    use crate::harness::Fleet;
    use relay_types::{Event, EventType};

    fn message(content: &str) -> Event {
        Event::builder(EventType::NewMessage)
            .in_room("r1")
            .field("content", content)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_outage_rejects_then_recovers() {
        let fleet = Fleet::start(2).await;
        let mut client = fleet.node(1).connect(Some("u1"));
        client.join("r1").await;

        fleet.store().set_up(false);
        fleet.publish(message("during outage")).await;
        fleet.settle().await;
        assert!(client.drain().is_empty());

        fleet.store().set_up(true);
        fleet.publish(message("after recovery")).await;
        assert_eq!(
            client.recv().await.to_value()["data"]["content"],
            "after recovery"
        );
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_envelope_rejected_in_outage_can_be_republished() {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("r1").await;

        fleet.store().set_up(false);
        let envelope = fleet.publish(message("retry me")).await;
        fleet.settle().await;
        assert!(client.drain().is_empty());

        // The nonce was never claimed, so a retry inside the window succeeds.
        fleet.store().set_up(true);
        fleet.publish_envelope(&envelope).await;
        assert_eq!(client.recv().await.to_value()["data"]["content"], "retry me");
        fleet.shutdown().await;
    }
}
