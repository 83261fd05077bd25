//! MeshNetwork behaviour over the in-process transport.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use meshcomm_core::{Category, MeshCommError, Message, UnjoinedPolicy, User, encode_message};
    use meshcomm_mesh::memory::MemoryHub;
    use meshcomm_mesh::{LoopState, MeshNetwork, NetworkOptions, PublishOutcome, StopReason};
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    async fn node(hub: &MemoryHub, id: &str, nickname: &str) -> MeshNetwork {
        MeshNetwork::join(
            &hub.node(id),
            nickname,
            NetworkOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    /// Poll `cond` until it holds, yielding to the dispatch loops in between.
    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn foreign_payload(content: &str, category: Category, node_id: &str) -> Vec<u8> {
        let message = Message::new(content, category, User::new("remote", node_id));
        encode_message(&message).unwrap()
    }

    // ── Join ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_join_subscribes_every_category() {
        let hub = MemoryHub::new();
        let net = node(&hub, "node-x", "alice").await;

        assert_eq!(net.joined_categories(), Category::ALL.to_vec());
        for category in Category::ALL {
            assert_eq!(hub.subscriber_count(category.topic()), 1);
        }
        assert_eq!(net.health().len(), 3);
        assert!(net.is_healthy());
        assert_eq!(net.user().nickname, "alice");
        assert_eq!(net.node_id(), "node-x");
        assert!(net.messages().is_empty());
    }

    #[tokio::test]
    async fn test_join_twice_yields_independent_networks() {
        let hub = MemoryHub::new();
        let first = node(&hub, "node-x", "alice").await;
        let second = node(&hub, "node-y", "bob").await;

        assert_ne!(first.user().id, second.user().id);
        assert_eq!(hub.subscriber_count("GENERAL"), 2);
    }

    #[tokio::test]
    async fn test_join_categories_skips_duplicates() {
        let hub = MemoryHub::new();
        let net = MeshNetwork::join_categories(
            &hub.node("node-x"),
            "alice",
            &[Category::General, Category::General],
            NetworkOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(net.joined_categories(), vec![Category::General]);
        assert_eq!(net.health().len(), 1);
        assert_eq!(hub.subscriber_count("GENERAL"), 1);
        assert_eq!(hub.subscriber_count("HELP"), 0);
    }

    #[tokio::test]
    async fn test_join_failure_aborts_without_partial_membership() {
        let hub = MemoryHub::new();
        hub.fail_joins("HELP");

        let err = MeshNetwork::join(
            &hub.node("node-x"),
            "alice",
            NetworkOptions::default(),
            CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(err, MeshCommError::Join { ref topic, .. } if topic == "HELP"));
        assert_eq!(hub.subscriber_count("EMERGENCY"), 0);
        assert_eq!(hub.subscriber_count("GENERAL"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure_aborts() {
        let hub = MemoryHub::new();
        hub.fail_subscribes("GENERAL");

        let err = MeshNetwork::join(
            &hub.node("node-x"),
            "alice",
            NetworkOptions::default(),
            CancellationToken::new(),
        )
        .await
        .err()
        .unwrap();

        assert!(matches!(err, MeshCommError::Join { ref topic, .. } if topic == "GENERAL"));
        assert!(err.to_string().contains("subscription refused"));
    }

    // ── Delivery ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_help_message_reaches_peer() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;
        let y = node(&hub, "node-y", "bob").await;

        let PublishOutcome::Sent(sent) = x.publish("help needed", Category::Help).await.unwrap()
        else {
            panic!("expected Sent");
        };

        wait_until(|| !y.messages().is_empty()).await;
        let received = y.messages();
        assert_eq!(received.len(), 1);
        let msg = &received[0];
        assert_eq!(msg.content, "help needed");
        assert_eq!(msg.category, Category::Help);
        assert_eq!(msg.sender.node_id, "node-x");
        assert_eq!(msg.sender.nickname, "alice");
        assert_eq!(msg.id, sent.id);
        assert!(uuid_like(&msg.id));
        assert_eq!(y.messages_in(Category::Help).len(), 1);
        assert!(y.messages_in(Category::General).is_empty());
    }

    fn uuid_like(id: &str) -> bool {
        id.len() == 36 && id.chars().filter(|c| *c == '-').count() == 4
    }

    #[tokio::test]
    async fn test_messages_kept_in_arrival_order() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;
        let y = node(&hub, "node-y", "bob").await;

        for content in ["A", "B", "C"] {
            x.publish(content, Category::General).await.unwrap();
        }

        wait_until(|| y.messages().len() == 3).await;
        let contents: Vec<_> = y.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_own_deliveries_are_dropped() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            x.on_message(move |m| seen.lock().push(m.content.clone()));
        }

        hub.inject("GENERAL", "node-x", foreign_payload("echo", Category::General, "node-x"));
        hub.inject("GENERAL", "node-z", foreign_payload("hello", Category::General, "node-z"));

        wait_until(|| x.messages().len() == 1).await;
        assert_eq!(x.messages()[0].content, "hello");
        assert_eq!(*seen.lock(), ["hello"]);

        let general = x
            .health()
            .into_iter()
            .find(|h| h.category == Category::General)
            .unwrap();
        assert_eq!(general.self_echo, 1);
        assert_eq!(general.accepted, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_discarded_and_loop_continues() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;

        hub.inject("EMERGENCY", "node-z", b"{not json".to_vec());
        hub.inject("EMERGENCY", "node-z", foreign_payload("fire", Category::Emergency, "node-z"));

        wait_until(|| x.messages().len() == 1).await;
        assert_eq!(x.messages()[0].content, "fire");

        let emergency = x
            .health()
            .into_iter()
            .find(|h| h.category == Category::Emergency)
            .unwrap();
        assert_eq!(emergency.malformed, 1);
        assert_eq!(emergency.state, LoopState::Running);
        assert!(x.is_healthy());
    }

    #[tokio::test]
    async fn test_snapshot_does_not_track_later_messages() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;

        x.publish("first", Category::General).await.unwrap();
        let mut snap = x.messages();
        x.publish("second", Category::General).await.unwrap();

        assert_eq!(snap.len(), 1);
        snap.clear();
        assert_eq!(x.messages().len(), 2);
    }

    // ── Observers ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_observers_called_in_registration_order() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;
        let y = node(&hub, "node-y", "bob").await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            y.on_message(move |m| seen.lock().push(format!("{tag}:{}", m.content)));
        }

        x.publish("hi", Category::General).await.unwrap();
        wait_until(|| seen.lock().len() == 2).await;
        assert_eq!(*seen.lock(), ["a:hi", "b:hi"]);
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_stop_dispatch() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;
        let y = node(&hub, "node-y", "bob").await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        y.on_message(|_| panic!("observer bug"));
        {
            let seen = Arc::clone(&seen);
            y.on_message(move |m| seen.lock().push(m.content.clone()));
        }

        x.publish("one", Category::Help).await.unwrap();
        x.publish("two", Category::Help).await.unwrap();

        wait_until(|| seen.lock().len() == 2).await;
        assert_eq!(*seen.lock(), ["one", "two"]);
        assert_eq!(y.messages().len(), 2);
        assert!(y.is_healthy());
    }

    #[tokio::test]
    async fn test_removed_observer_is_not_called() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;

        let seen = Arc::new(Mutex::new(0usize));
        let id = {
            let seen = Arc::clone(&seen);
            x.on_message(move |_| *seen.lock() += 1)
        };
        x.publish("one", Category::General).await.unwrap();
        assert!(x.remove_observer(id));
        x.publish("two", Category::General).await.unwrap();

        assert_eq!(*seen.lock(), 1);
        assert!(!x.remove_observer(id));
    }

    // ── Publish ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_local_echo_stores_and_notifies() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            x.on_message(move |m| seen.lock().push(m.id.clone()));
        }

        let PublishOutcome::Sent(sent) = x.publish("mine", Category::General).await.unwrap() else {
            panic!("expected Sent");
        };

        assert_eq!(x.messages(), vec![sent.clone()]);
        assert_eq!(*seen.lock(), vec![sent.id]);
        assert_eq!(hub.sent("GENERAL").len(), 1);
    }

    #[tokio::test]
    async fn test_without_local_echo_own_messages_are_not_stored() {
        let hub = MemoryHub::new();
        let options = NetworkOptions {
            local_echo: false,
            ..Default::default()
        };
        let x = MeshNetwork::join(&hub.node("node-x"), "alice", options, CancellationToken::new())
            .await
            .unwrap();

        x.publish("mine", Category::General).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(x.messages().is_empty());
        assert_eq!(hub.sent("GENERAL").len(), 1);
    }

    #[tokio::test]
    async fn test_unjoined_category_is_ignored() {
        let hub = MemoryHub::new();
        let x = MeshNetwork::join_categories(
            &hub.node("node-x"),
            "alice",
            &[Category::General],
            NetworkOptions::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let outcome = x.publish("lost", Category::Help).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::NotJoined(Category::Help)));
        assert!(hub.sent("HELP").is_empty());
        assert!(x.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unjoined_category_is_rejected() {
        let hub = MemoryHub::new();
        let options = NetworkOptions {
            unjoined: UnjoinedPolicy::Reject,
            ..Default::default()
        };
        let x = MeshNetwork::join_categories(
            &hub.node("node-x"),
            "alice",
            &[Category::General],
            options,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let err = x.publish("lost", Category::Emergency).await.unwrap_err();
        assert!(matches!(err, MeshCommError::NotJoined(Category::Emergency)));
        assert!(hub.sent("EMERGENCY").is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_without_local_echo() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;
        hub.fail_publishes("GENERAL");

        let err = x.publish("doomed", Category::General).await.unwrap_err();
        assert!(matches!(err, MeshCommError::Publish { ref topic, .. } if topic == "GENERAL"));
        assert!(x.messages().is_empty());
        assert!(hub.sent("GENERAL").is_empty());
    }

    // ── Lifecycle ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_closed_subscription_stops_loop() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;

        hub.close_topic("HELP");
        wait_until(|| !x.is_healthy()).await;

        for h in x.health() {
            match h.category {
                Category::Help => assert!(matches!(
                    h.state,
                    LoopState::Stopped(StopReason::TransportError(_))
                )),
                _ => assert_eq!(h.state, LoopState::Running),
            }
        }

        // Publishing on the other topics still works.
        x.publish("still here", Category::General).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_loop() {
        let hub = MemoryHub::new();
        let x = node(&hub, "node-x", "alice").await;

        x.shutdown().await;

        assert!(!x.is_healthy());
        assert!(
            x.health()
                .iter()
                .all(|h| h.state == LoopState::Stopped(StopReason::Cancelled))
        );
        assert_eq!(hub.subscriber_count("GENERAL"), 0);
    }

    #[tokio::test]
    async fn test_parent_token_cancels_loops() {
        let hub = MemoryHub::new();
        let parent = CancellationToken::new();
        let x = MeshNetwork::join(
            &hub.node("node-x"),
            "alice",
            NetworkOptions::default(),
            parent.clone(),
        )
        .await
        .unwrap();

        parent.cancel();
        wait_until(|| {
            x.health()
                .iter()
                .all(|h| h.state == LoopState::Stopped(StopReason::Cancelled))
        })
        .await;

        hub.inject("GENERAL", "node-z", foreign_payload("late", Category::General, "node-z"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(x.messages().is_empty());
    }
}
