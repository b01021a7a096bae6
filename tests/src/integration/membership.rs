//! # Membership Flows
//!
//! Server-initiated joins and client typing indicators across relay processes.

#[cfg(test)]
mod tests {
    use crate::harness::Fleet;
    use relay_types::{Event, EventType, GroupKey};
    use serde_json::json;

    // =========================================================================
    // FORCE JOIN
    // =========================================================================

    #[tokio::test]
    async fn test_force_join_subscribes_live_sockets() {
        let fleet = Fleet::start(2).await;
        let mut u1_first = fleet.node(0).connect(Some("u1"));
        let mut u1_second = fleet.node(1).connect(Some("u1"));
        let mut bystander = fleet.node(1).connect(Some("u2"));

        fleet
            .publish(Event::force_join("r9", &["u1".to_string()]))
            .await;
        fleet.settle().await;

        for node in 0..2 {
            let u1_sockets = fleet
                .node(node)
                .membership()
                .members(&GroupKey::user("u1"));
            for connection in u1_sockets {
                assert!(fleet
                    .node(node)
                    .membership()
                    .is_member(connection, &GroupKey::room("r9")));
            }
        }
        // Force join itself sends nothing to clients.
        assert!(u1_first.drain().is_empty());

        fleet
            .publish(
                Event::builder(EventType::NewMessage)
                    .in_room("r9")
                    .field("content", "welcome")
                    .build()
                    .unwrap(),
            )
            .await;

        assert_eq!(u1_first.recv().await.to_value()["data"]["content"], "welcome");
        assert_eq!(u1_second.recv().await.to_value()["data"]["content"], "welcome");
        fleet.settle().await;
        assert!(bystander.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_force_join_ignores_offline_users() {
        let fleet = Fleet::start(1).await;
        fleet
            .publish(Event::force_join("r9", &["nobody".to_string()]))
            .await;
        fleet.settle().await;

        // A later connection of the same user is not retroactively joined.
        let mut late = fleet.node(0).connect(Some("nobody"));
        fleet
            .publish(Event::builder(EventType::NewMessage).in_room("r9").build().unwrap())
            .await;
        fleet.settle().await;
        assert!(late.drain().is_empty());
        fleet.shutdown().await;
    }

    // =========================================================================
    // TYPING
    // =========================================================================

    #[tokio::test]
    async fn test_typing_reaches_room_but_not_typist() {
        let fleet = Fleet::start(2).await;
        let mut typist = fleet.node(0).connect(Some("alice"));
        let mut same_user_other_tab = fleet.node(1).connect(Some("alice"));
        let mut reader = fleet.node(1).connect(Some("bob"));
        typist.join("r1").await;
        same_user_other_tab.join("r1").await;
        reader.join("r1").await;

        let reply = typist.send("clientTyping", json!({ "chatRoomId": "r1" })).await;
        assert!(reply.is_none());

        let frame = reader.recv().await.to_value();
        assert_eq!(frame["event"], "userTyping");
        assert_eq!(frame["data"]["userId"], "alice");
        assert_eq!(frame["data"]["chatRoomId"], "r1");

        typist
            .send("clientStopTyping", json!({ "chatRoomId": "r1" }))
            .await;
        assert_eq!(
            reader.recv().await.event_name().as_deref(),
            Some("userStopTyping")
        );

        fleet.settle().await;
        assert!(typist.drain().is_empty());
        assert!(same_user_other_tab.drain().is_empty());
        assert!(reader.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_anonymous_typing_is_not_published() {
        let fleet = Fleet::start(1).await;
        let mut anonymous = fleet.node(0).connect(None);
        let mut reader = fleet.node(0).connect(Some("bob"));
        anonymous.join("r1").await;
        reader.join("r1").await;

        let published = fleet.bus().events_published();
        anonymous
            .send("clientTyping", json!({ "chatRoomId": "r1" }))
            .await;
        fleet.settle().await;

        assert_eq!(fleet.bus().events_published(), published);
        assert!(reader.drain().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_numeric_room_id_from_client() {
        let fleet = Fleet::start(1).await;
        let mut client = fleet.node(0).connect(Some("u1"));
        let reply = client
            .send("joinRoom", json!({ "roomId": 42 }))
            .await
            .unwrap()
            .to_value();
        assert_eq!(reply["data"]["roomId"], "42");

        fleet
            .publish(Event::builder(EventType::EditMsg).in_room("42").build().unwrap())
            .await;
        assert_eq!(client.recv().await.event_name().as_deref(), Some("editMsg"));
        fleet.shutdown().await;
    }
}
