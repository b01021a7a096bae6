//! # Clock Attacks
//!
//! Envelopes signed with an `eventTime` outside the freshness window:
//! old captures, and future-dated ones meant to outlive their nonce record.

#[cfg(test)]
mod tests {
    use crate::harness::Fleet;
    use relay_types::{current_timestamp, generate_nonce, Event, EventType, DEFAULT_MAX_SKEW_SECS};

    fn typing() -> Event {
        Event::builder(EventType::Typing)
            .in_room("r1")
            .field("userId", "someone")
            .build()
            .unwrap()
    }

    async fn delivered_at(offset_secs: i64) -> bool {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        client.join("r1").await;

        let envelope =
            fleet
                .signer()
                .sign_at(typing(), current_timestamp() + offset_secs, generate_nonce());
        fleet.publish_envelope(&envelope).await;
        fleet.settle().await;

        let delivered = !client.drain().is_empty();
        fleet.shutdown().await;
        delivered
    }

    #[tokio::test]
    async fn test_stale_envelope_is_rejected() {
        assert!(!delivered_at(-(DEFAULT_MAX_SKEW_SECS as i64) - 30).await);
    }

    #[tokio::test]
    async fn test_future_envelope_is_rejected() {
        assert!(!delivered_at(DEFAULT_MAX_SKEW_SECS as i64 + 30).await);
    }

    #[tokio::test]
    async fn test_envelope_inside_window_is_accepted() {
        // Margin for the clock ticking during the test.
        assert!(delivered_at(-(DEFAULT_MAX_SKEW_SECS as i64) + 5).await);
        assert!(delivered_at(DEFAULT_MAX_SKEW_SECS as i64 - 5).await);
    }

    #[tokio::test]
    async fn test_stale_envelope_claims_no_nonce() {
        let fleet = Fleet::start(1).await;
        let envelope = fleet.signer().sign_at(typing(), 0, generate_nonce());
        fleet.publish_envelope(&envelope).await;
        fleet.settle().await;
        assert_eq!(fleet.store().claims(), 0);
        fleet.shutdown().await;
    }
}
