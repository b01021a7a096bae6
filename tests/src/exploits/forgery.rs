//! # Forgery and Tampering
//!
//! Envelopes that were never signed with the shared secret, or were edited
//! after signing.

#[cfg(test)]
mod tests {
    use crate::harness::{wire, Fleet};
    use relay_types::{Event, EventType, SharedSecret, Signer};
    use serde_json::json;

    fn message(room: &str, content: &str) -> Event {
        Event::builder(EventType::NewMessage)
            .in_room(room)
            .field("content", content)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_edited_content_is_rejected() {
        let fleet = Fleet::start(2).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("r1").await;

        let mut tampered = wire(&fleet.signer().sign(message("r1", "pay 10")));
        tampered["content"] = json!("pay 10000");
        fleet.publish_wire(&tampered).await;

        fleet.settle().await;
        assert!(client.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_redirected_room_is_rejected() {
        let fleet = Fleet::start(1).await;
        let mut eavesdropper = fleet.node(0).connect(Some("mallory"));
        eavesdropper.join("mallory-room").await;

        let mut redirected = wire(&fleet.signer().sign(message("private", "secret")));
        redirected["chatRoomId"] = json!("mallory-room");
        fleet.publish_wire(&redirected).await;

        fleet.settle().await;
        assert!(eavesdropper.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_extra_field_breaks_signature() {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("r1").await;

        let mut widened = wire(&fleet.signer().sign(message("r1", "hi")));
        widened["notifyUserIds"] = json!(["everyone"]);
        fleet.publish_wire(&widened).await;

        fleet.settle().await;
        assert!(client.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let fleet = Fleet::start(2).await;
        let mut client = fleet.node(1).connect(Some("u1"));
        client.join("r1").await;

        let attacker = Signer::new(&SharedSecret::new("guessed-secret").unwrap()).unwrap();
        let forged = attacker.sign(message("r1", "forged"));
        fleet.publish_envelope(&forged).await;

        fleet.settle().await;
        assert!(client.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_security_fields_are_rejected() {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("r1").await;

        let signed = wire(&fleet.signer().sign(message("r1", "hi")));
        for field in ["signature", "nonce", "eventTime"] {
            let mut stripped = signed.clone();
            stripped.as_object_mut().unwrap().remove(field);
            fleet.publish_wire(&stripped).await;
        }
        fleet.publish_raw(b"not json".to_vec()).await;
        fleet.publish_wire(&json!(["an", "array"])).await;

        fleet.settle().await;
        assert!(client.drain().is_empty());
        assert_eq!(fleet.store().claims(), 0);
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_signed_unknown_event_type_is_dropped() {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("r1").await;

        let event = Event::builder(EventType::parse("dropDatabase"))
            .in_room("r1")
            .build()
            .unwrap();
        fleet.publish(event).await;

        fleet.settle().await;
        assert!(client.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_sender_info_is_not_covered_by_signature() {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("r1").await;

        let mut relabelled = wire(&fleet.signer().sign(message("r1", "hi")));
        relabelled["senderInfo"] = json!({ "name": "relabelled" });
        fleet.publish_wire(&relabelled).await;

        let data = client.recv().await.to_value()["data"].clone();
        assert_eq!(data["senderInfo"]["name"], "relabelled");
        fleet.shutdown().await;
    }
}
