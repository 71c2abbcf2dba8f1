//! Delivery router and push channel tests

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::bus::*;
    use crate::db::{Database, EventLog};

    fn router(settings: RouterSettings) -> Arc<DeliveryRouter> {
        Arc::new(DeliveryRouter::new(settings, EventLog::detached()))
    }

    fn default_router() -> Arc<DeliveryRouter> {
        router(RouterSettings::default())
    }

    fn rid(raw: &str) -> RecipientId {
        RecipientId::parse(raw).unwrap()
    }

    fn started(pid: u32) -> EventPayload {
        ProcessEvent::RobloxStarted(ProcessInfo {
            pid,
            name: "RobloxPlayerBeta.exe".to_string(),
        })
        .into()
    }

    fn session_started() -> EventPayload {
        SessionEvent::SessionStarted(SessionRecord {
            session_id: "kid_20261014_093000".to_string(),
            child_profile: "kid".to_string(),
            time_start: Some(Utc::now()),
            time_end: None,
            duration_seconds: 0.0,
            is_active: true,
        })
        .into()
    }

    fn limit_exceeded() -> EventPayload {
        Notification::TimeLimitExceeded(TimeLimit {
            child_profile: "kid".to_string(),
            limit_minutes: 60,
            elapsed_minutes: 61,
        })
        .into()
    }

    fn seqs(events: &[Arc<EventEnvelope>]) -> Vec<u64> {
        events.iter().map(|e| e.sequence()).collect()
    }

    fn drain_mailbox(mailbox: &mut ConnectionMailbox) -> Vec<Arc<EventEnvelope>> {
        let mut out = Vec::new();
        while let Some(envelope) = mailbox.try_recv() {
            out.push(envelope);
        }
        out
    }

    // ------------------------------------------------------------------
    // Router
    // ------------------------------------------------------------------

    #[test]
    fn test_desktop_round_trip_scenario() {
        let router = default_router();
        let desktop = rid("desktop-A");

        let first = router.submit(&desktop, started(4242)).unwrap();
        let second = router.submit(&desktop, session_started()).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(first.routing, Routing::Queued(QueueReason::ChannelUnavailable));

        router.connect(&desktop);
        let (events, snapshot) = router.read_since(&desktop, 0).unwrap();
        assert_eq!(seqs(&events), vec![1, 2]);
        assert_eq!(events[0].kind(), EventKind::ProcessEvent);
        assert_eq!(events[1].kind(), EventKind::SessionEvent);
        assert!(snapshot.present);

        let ack = router.acknowledge(&desktop, 2).unwrap();
        assert_eq!(ack.retired, 2);
        assert!(!ack.stale);

        let (handle, mut mailbox) = ConnectionHandle::open();
        let outcome = router.register_connection(&desktop, handle.clone());
        assert_eq!(outcome.drained, 0);

        let third = router.submit(&desktop, limit_exceeded()).unwrap();
        assert_eq!(third.sequence, 3);
        assert_eq!(third.routing, Routing::Pushed);
        assert_eq!(seqs(&drain_mailbox(&mut mailbox)), vec![3]);

        let (events, _) = router.read_since(&desktop, 2).unwrap();
        assert!(events.is_empty(), "pushed envelope must not reappear in poll");

        assert!(router.confirm_sent(&desktop, handle.id(), 3));
        let (events, snapshot) = router.read_since(&desktop, 0).unwrap();
        assert!(events.is_empty());
        assert_eq!(snapshot.last_delivered_seq, 3);
    }

    #[test]
    fn test_poll_is_idempotent_until_acknowledged() {
        let router = default_router();
        let desktop = rid("desktop-A");
        for pid in 1..=4 {
            router.submit(&desktop, started(pid));
        }

        let (first, _) = router.read_since(&desktop, 1).unwrap();
        let (second, _) = router.read_since(&desktop, 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(seqs(&first), vec![2, 3, 4]);

        router.acknowledge(&desktop, 3).unwrap();
        let (after_ack, _) = router.read_since(&desktop, 3).unwrap();
        assert_eq!(seqs(&after_ack), vec![4]);
        let (from_zero, _) = router.read_since(&desktop, 0).unwrap();
        assert_eq!(seqs(&from_zero), vec![4]);
    }

    #[test]
    fn test_offline_backlog_drains_in_order_before_new_events() {
        let router = default_router();
        let desktop = rid("desktop-A");
        for pid in 1..=5 {
            router.submit(&desktop, started(pid));
        }

        let (handle, mut mailbox) = ConnectionHandle::open();
        let outcome = router.register_connection(&desktop, handle);
        assert_eq!(outcome.drained, 5);
        assert_eq!(outcome.pending, 0);

        let receipt = router.submit(&desktop, limit_exceeded()).unwrap();
        assert_eq!(receipt.routing, Routing::Pushed);
        assert_eq!(seqs(&drain_mailbox(&mut mailbox)), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_window_full_queues_and_confirm_pumps_next() {
        let router = router(RouterSettings {
            max_in_flight: 2,
            ..RouterSettings::default()
        });
        let desktop = rid("desktop-A");
        let (handle, mut mailbox) = ConnectionHandle::open();
        router.register_connection(&desktop, handle.clone());

        let routings: Vec<_> = (1..=4)
            .map(|pid| router.submit(&desktop, started(pid)).unwrap().routing)
            .collect();
        assert_eq!(
            routings,
            vec![
                Routing::Pushed,
                Routing::Pushed,
                Routing::Queued(QueueReason::WindowFull),
                Routing::Queued(QueueReason::Backlog),
            ]
        );
        assert_eq!(seqs(&drain_mailbox(&mut mailbox)), vec![1, 2]);

        router.confirm_sent(&desktop, handle.id(), 1);
        assert_eq!(seqs(&drain_mailbox(&mut mailbox)), vec![3]);

        let snapshot = router.snapshot(&desktop);
        assert_eq!(snapshot.in_flight, 2);
        assert_eq!(snapshot.queued, 1);
        assert_eq!(snapshot.last_delivered_seq, 1);
    }

    #[test]
    fn test_unregister_requeues_unconfirmed_envelopes() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let (handle, _mailbox) = ConnectionHandle::open();
        router.register_connection(&desktop, handle.clone());

        router.submit(&desktop, started(1));
        router.submit(&desktop, started(2));
        router.confirm_sent(&desktop, handle.id(), 1);

        assert!(router.unregister_connection(&desktop, handle.id()));
        let (events, snapshot) = router.read_since(&desktop, 0).unwrap();
        assert_eq!(seqs(&events), vec![2]);
        assert_eq!(snapshot.phase, RecipientPhase::Offline);
        assert_eq!(snapshot.last_delivered_seq, 1);

        let receipt = router.submit(&desktop, started(3)).unwrap();
        assert_eq!(receipt.routing, Routing::Queued(QueueReason::ChannelUnavailable));
    }

    #[test]
    fn test_dead_connection_falls_back_to_queue() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let (handle, mailbox) = ConnectionHandle::open();
        router.register_connection(&desktop, handle);
        drop(mailbox);

        let receipt = router.submit(&desktop, started(1)).unwrap();
        assert_eq!(receipt.routing, Routing::Queued(QueueReason::PushFailed));
        assert_eq!(router.snapshot(&desktop).phase, RecipientPhase::Offline);
        let (events, _) = router.read_since(&desktop, 0).unwrap();
        assert_eq!(seqs(&events), vec![1]);
    }

    #[test]
    fn test_newer_connection_supersedes_older() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let (old, mut old_mailbox) = ConnectionHandle::open();
        router.register_connection(&desktop, old.clone());
        router.submit(&desktop, started(1));
        assert_eq!(seqs(&drain_mailbox(&mut old_mailbox)), vec![1]);

        let (new, mut new_mailbox) = ConnectionHandle::open();
        let outcome = router.register_connection(&desktop, new.clone());
        assert_eq!(outcome.superseded, Some(old.id()));
        assert_eq!(outcome.drained, 1, "unconfirmed envelope moves to the new connection");
        assert_eq!(seqs(&drain_mailbox(&mut new_mailbox)), vec![1]);

        assert!(!router.confirm_sent(&desktop, old.id(), 1));
        assert!(!router.unregister_connection(&desktop, old.id()));
        assert_eq!(router.snapshot(&desktop).phase, RecipientPhase::Live);
    }

    #[tokio::test]
    async fn test_connection_handle_close_signals() {
        let (handle, mut mailbox) = ConnectionHandle::open();
        let envelope = Arc::new(EventEnvelope::seal(1, started(1), Utc::now()).unwrap());
        handle.offer(Arc::clone(&envelope)).unwrap();
        assert_eq!(mailbox.recv().await.map(|e| e.sequence()), Some(1));

        handle.force_close();
        tokio::time::timeout(Duration::from_secs(1), mailbox.closed())
            .await
            .expect("force_close wakes the connection task");

        drop(mailbox);
        assert!(handle.is_closed());
        assert_eq!(handle.offer(envelope), Err(PushError::Closed));
    }

    #[test]
    fn test_overflow_counts_each_eviction_once() {
        let router = router(RouterSettings {
            max_queue_depth: 3,
            ..RouterSettings::default()
        });
        let desktop = rid("desktop-A");
        for pid in 1..=7 {
            router.submit(&desktop, started(pid));
            assert!(router.snapshot(&desktop).queued <= 3);
        }

        let snapshot = router.snapshot(&desktop);
        assert_eq!(snapshot.overflow_count, 4);
        assert!(snapshot.degraded());
        let (events, _) = router.read_since(&desktop, 0).unwrap();
        assert_eq!(seqs(&events), vec![5, 6, 7]);
    }

    #[test]
    fn test_acknowledge_validation_and_stale_acks() {
        let router = default_router();
        let desktop = rid("desktop-A");
        router.submit(&desktop, started(1));
        router.submit(&desktop, started(2));

        let err = router.acknowledge(&desktop, 9).unwrap_err();
        assert_eq!(err, DeliveryError::InvalidSequence { seq: 9, last_assigned: 2 });

        router.acknowledge(&desktop, 2).unwrap();
        let stale = router.acknowledge(&desktop, 1).unwrap();
        assert!(stale.stale);
        assert_eq!(stale.retired, 0);
        assert_eq!(stale.last_delivered_seq, 2);
    }

    #[test]
    fn test_poll_unknown_recipient_does_not_create_state() {
        let router = default_router();
        let stranger = rid("never-seen");

        let (events, snapshot) = router.read_since(&stranger, 0).unwrap();
        assert!(events.is_empty());
        assert_eq!(snapshot.phase, RecipientPhase::Unknown);
        assert_eq!(router.recipient_count(), 0);

        let err = router.read_since(&stranger, 1).unwrap_err();
        assert_eq!(err.code(), "invalid_sequence");
    }

    #[test]
    fn test_batch_orders_by_created_at_then_source() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let tick = Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap();
        let later = tick + chrono::Duration::seconds(1);

        let receipts = router.submit_batch(
            &desktop,
            vec![
                Submission {
                    payload: limit_exceeded(),
                    created_at: later,
                    source: SourceOrder(0),
                },
                Submission {
                    payload: session_started(),
                    created_at: tick,
                    source: SourceOrder(2),
                },
                Submission {
                    payload: started(1),
                    created_at: tick,
                    source: SourceOrder(1),
                },
            ],
        );
        assert_eq!(receipts.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);

        let (events, _) = router.read_since(&desktop, 0).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![EventKind::ProcessEvent, EventKind::SessionEvent, EventKind::Notification]
        );
        assert_eq!(events[0].created_at(), tick);
    }

    #[test]
    fn test_idle_collection_keeps_sequence_continuity() {
        let router = router(RouterSettings {
            idle_timeout: Duration::ZERO,
            ..RouterSettings::default()
        });
        let desktop = rid("desktop-A");
        router.submit(&desktop, started(1));
        router.submit(&desktop, started(2));
        router.acknowledge(&desktop, 2).unwrap();

        let collected = router.collect_idle();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].undelivered, 0);
        assert_eq!(router.recipient_count(), 0);
        assert_eq!(router.snapshot(&desktop).phase, RecipientPhase::Unknown);
        assert_eq!(router.snapshot(&desktop).last_assigned_seq, 2);

        let receipt = router.submit(&desktop, started(3)).unwrap();
        assert_eq!(receipt.sequence, 3);
        assert_eq!(router.snapshot(&desktop).last_delivered_seq, 2);
    }

    #[test]
    fn test_acknowledge_after_collection_advances_retained_mark() {
        let router = router(RouterSettings {
            idle_timeout: Duration::ZERO,
            ..RouterSettings::default()
        });
        let desktop = rid("desktop-A");
        router.submit(&desktop, started(1));
        router.submit(&desktop, started(2));

        let collected = router.collect_idle();
        assert_eq!(collected[0].undelivered, 2);

        let outcome = router.acknowledge(&desktop, 2).unwrap();
        assert_eq!(
            outcome,
            AckOutcome {
                retired: 0,
                stale: false,
                last_delivered_seq: 2,
            }
        );
        assert!(router.acknowledge(&desktop, 1).unwrap().stale);
        assert!(matches!(
            router.acknowledge(&desktop, 3),
            Err(DeliveryError::InvalidSequence { .. })
        ));
        assert_eq!(router.snapshot(&desktop).last_delivered_seq, 2);

        assert_eq!(router.submit(&desktop, started(3)).unwrap().sequence, 3);
        let (events, snapshot) = router.read_since(&desktop, 2).unwrap();
        assert_eq!(seqs(&events), vec![3]);
        assert_eq!(snapshot.last_delivered_seq, 2);
    }

    #[tokio::test]
    async fn test_expired_marks_are_read_back_from_log() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let log = EventLog::spawn(Arc::clone(&db)).unwrap();
        let settings = RouterSettings {
            idle_timeout: Duration::ZERO,
            ..RouterSettings::default()
        };
        let router = DeliveryRouter::new(settings, log.clone());
        let desktop = rid("desktop-A");
        router.submit(&desktop, started(1));
        router.submit(&desktop, started(2));
        router.acknowledge(&desktop, 1).unwrap();

        assert_eq!(router.collect_idle().len(), 1);
        assert!(log.flush().await);
        assert_eq!(router.expire_retained(Duration::ZERO), 1);
        assert_eq!(router.retained_count(), 0);

        let snapshot = router.snapshot(&desktop);
        assert_eq!(snapshot.last_assigned_seq, 2);
        assert_eq!(snapshot.last_delivered_seq, 1);
        assert_eq!(router.submit(&desktop, started(3)).unwrap().sequence, 3);
    }

    #[test]
    fn test_retained_marks_stay_without_a_log_to_reload_them() {
        let router = router(RouterSettings {
            idle_timeout: Duration::ZERO,
            ..RouterSettings::default()
        });
        let desktop = rid("desktop-A");
        router.submit(&desktop, started(1));
        router.collect_idle();

        assert_eq!(router.expire_retained(Duration::ZERO), 0);
        assert_eq!(router.retained_count(), 1);
        assert_eq!(router.submit(&desktop, started(2)).unwrap().sequence, 2);
    }

    #[test]
    fn test_live_recipients_are_never_collected() {
        let router = router(RouterSettings {
            idle_timeout: Duration::ZERO,
            ..RouterSettings::default()
        });
        let live = rid("desktop-A");
        let (handle, _mailbox) = ConnectionHandle::open();
        router.register_connection(&live, handle);
        router.submit(&rid("laptop-B"), started(1));

        let collected = router.collect_idle();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].recipient_id, rid("laptop-B"));
        assert_eq!(collected[0].undelivered, 1);
        assert_eq!(router.snapshot(&live).phase, RecipientPhase::Live);
    }

    #[test]
    fn test_idle_timeout_spares_recent_recipients() {
        let router = router(RouterSettings {
            idle_timeout: Duration::from_secs(3600),
            ..RouterSettings::default()
        });
        router.submit(&rid("desktop-A"), started(1));
        assert!(router.collect_idle().is_empty());
        assert_eq!(router.recipient_count(), 1);
    }

    #[test]
    fn test_restore_recipient_resumes_sequencing() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let envelopes = (4..=5)
            .map(|seq| Arc::new(EventEnvelope::seal(seq, started(seq as u32), Utc::now()).unwrap()))
            .collect();

        let evicted = router.restore_recipient(
            desktop.clone(),
            SequenceMarks {
                last_assigned: 5,
                last_delivered: 3,
            },
            envelopes,
        );
        assert_eq!(evicted, 0);

        let (events, snapshot) = router.read_since(&desktop, 3).unwrap();
        assert_eq!(seqs(&events), vec![4, 5]);
        assert_eq!(snapshot.last_delivered_seq, 3);
        assert_eq!(router.submit(&desktop, started(6)).unwrap().sequence, 6);
    }

    #[test]
    fn test_disconnect_closes_connection_and_clears_presence() {
        let router = default_router();
        let desktop = rid("desktop-A");
        router.connect(&desktop);
        let (handle, _mailbox) = ConnectionHandle::open();
        router.register_connection(&desktop, handle.clone());

        let snapshot = router.disconnect(&desktop);
        assert_eq!(snapshot.phase, RecipientPhase::Offline);
        assert!(!snapshot.present);
        assert!(!router.unregister_connection(&desktop, handle.id()));
    }

    #[test]
    fn test_recipients_sequence_independently_under_contention() {
        let router = default_router();
        let per_thread = 250u64;

        std::thread::scope(|scope| {
            for name in ["desktop-A", "desktop-B"] {
                for _ in 0..2 {
                    let router = Arc::clone(&router);
                    scope.spawn(move || {
                        let id = rid(name);
                        for pid in 0..per_thread {
                            router.submit(&id, started(pid as u32));
                        }
                    });
                }
            }
        });

        for name in ["desktop-A", "desktop-B"] {
            let snapshot = router.snapshot(&rid(name));
            assert_eq!(snapshot.last_assigned_seq, per_thread * 2);
            let (events, _) = router.read_since(&rid(name), 0).unwrap();
            assert_eq!(seqs(&events), (1..=per_thread * 2).collect::<Vec<_>>());
        }
    }

    // ------------------------------------------------------------------
    // Push channel
    // ------------------------------------------------------------------

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<String>>>,
        fail_after: Option<usize>,
        stall_after: Option<usize>,
        closed: Arc<AtomicBool>,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }

        fn json(&self) -> Vec<Value> {
            self.frames()
                .iter()
                .map(|f| serde_json::from_str(f).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_text(&mut self, text: &str) -> Result<(), PushError> {
            let sent = self.frames.lock().unwrap().len();
            if self.fail_after.is_some_and(|n| sent >= n) {
                return Err(PushError::Transport("broken pipe".to_string()));
            }
            if self.stall_after.is_some_and(|n| sent >= n) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.frames.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), PushError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedStream {
        rx: mpsc::UnboundedReceiver<InboundFrame>,
    }

    #[async_trait]
    impl FrameStream for ScriptedStream {
        async fn next_frame(&mut self) -> Result<Option<InboundFrame>, PushError> {
            Ok(self.rx.recv().await)
        }
    }

    fn client() -> (mpsc::UnboundedSender<InboundFrame>, ScriptedStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, ScriptedStream { rx })
    }

    async fn wait_for_frames(sink: &RecordingSink, count: usize) {
        for _ in 0..400 {
            if sink.frames().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} frames, got {:?}", sink.frames());
    }

    #[tokio::test]
    async fn test_push_sends_welcome_then_backlog_then_live_events() {
        let router = default_router();
        let desktop = rid("desktop-A");
        for pid in 1..=3 {
            router.submit(&desktop, started(pid));
        }
        let (polled, _) = router.read_since(&desktop, 0).unwrap();

        let channel = PushChannel::new(Arc::clone(&router), Duration::from_secs(1));
        let sink = RecordingSink::default();
        let (client_tx, stream) = client();
        let task = tokio::spawn({
            let channel = channel.clone();
            let sink = sink.clone();
            let desktop = desktop.clone();
            async move { channel.serve(desktop, sink, stream).await }
        });

        wait_for_frames(&sink, 4).await;
        router.submit(&desktop, limit_exceeded());
        wait_for_frames(&sink, 5).await;

        let frames = sink.json();
        assert_eq!(frames[0]["type"], "welcome");
        assert_eq!(frames[0]["recipient_id"], "desktop-A");
        let pushed: Vec<u64> = frames[1..].iter().map(|f| f["seq"].as_u64().unwrap()).collect();
        assert_eq!(pushed, vec![1, 2, 3, 4]);
        assert_eq!(sink.frames()[1], polled[0].wire_str(), "push and pull bytes must match");

        drop(client_tx);
        let summary = task.await.unwrap();
        assert_eq!(summary.reason, CloseReason::ClientClosed);
        assert_eq!(summary.delivered, 4);
        assert!(sink.closed.load(Ordering::SeqCst));

        let snapshot = router.snapshot(&desktop);
        assert_eq!(snapshot.phase, RecipientPhase::Offline);
        assert_eq!(snapshot.last_delivered_seq, 4);
        assert_eq!(snapshot.queued, 0);
    }

    #[tokio::test]
    async fn test_push_answers_ping_and_ack_frames() {
        let router = default_router();
        let desktop = rid("desktop-A");
        router.submit(&desktop, started(1));

        let channel = PushChannel::new(Arc::clone(&router), Duration::from_secs(1));
        let sink = RecordingSink::default();
        let (client_tx, stream) = client();
        let task = tokio::spawn({
            let sink = sink.clone();
            let desktop = desktop.clone();
            async move { channel.serve(desktop, sink, stream).await }
        });
        wait_for_frames(&sink, 2).await;

        client_tx.send(InboundFrame::Text(r#"{"type":"ping"}"#.to_string())).unwrap();
        client_tx.send(InboundFrame::Text(r#"{"type":"desktop_ready"}"#.to_string())).unwrap();
        client_tx.send(InboundFrame::Text(r#"{"type":"ack","up_to_seq":7}"#.to_string())).unwrap();
        client_tx.send(InboundFrame::Text("not json".to_string())).unwrap();
        wait_for_frames(&sink, 5).await;

        let frames = sink.json();
        assert_eq!(frames[2]["type"], "pong");
        assert_eq!(frames[3]["type"], "error");
        assert_eq!(frames[3]["code"], "invalid_sequence");
        assert_eq!(frames[4]["code"], "invalid_request");

        client_tx.send(InboundFrame::Close).unwrap();
        assert_eq!(task.await.unwrap().reason, CloseReason::ClientClosed);
    }

    #[tokio::test]
    async fn test_push_newer_connection_closes_older_task() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let channel = PushChannel::new(Arc::clone(&router), Duration::from_secs(1));

        let first_sink = RecordingSink::default();
        let (_first_tx, first_stream) = client();
        let first = tokio::spawn({
            let channel = channel.clone();
            let sink = first_sink.clone();
            let desktop = desktop.clone();
            async move { channel.serve(desktop, sink, first_stream).await }
        });
        wait_for_frames(&first_sink, 1).await;

        let second_sink = RecordingSink::default();
        let (_second_tx, second_stream) = client();
        let second = tokio::spawn({
            let channel = channel.clone();
            let sink = second_sink.clone();
            let desktop = desktop.clone();
            async move { channel.serve(desktop, sink, second_stream).await }
        });

        let first_summary = tokio::time::timeout(Duration::from_secs(2), first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_summary.reason, CloseReason::Superseded);

        router.submit(&desktop, started(1));
        wait_for_frames(&second_sink, 2).await;
        assert_eq!(first_sink.frames().len(), 1);
        assert_eq!(router.snapshot(&desktop).phase, RecipientPhase::Live);

        router.disconnect(&desktop);
        let second_summary = tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second_summary.reason, CloseReason::Superseded);
    }

    #[tokio::test]
    async fn test_push_send_failure_requeues_envelope() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let channel = PushChannel::new(Arc::clone(&router), Duration::from_secs(1));
        let sink = RecordingSink {
            fail_after: Some(1),
            ..RecordingSink::default()
        };
        let (_client_tx, stream) = client();
        let task = tokio::spawn({
            let sink = sink.clone();
            let desktop = desktop.clone();
            async move { channel.serve(desktop, sink, stream).await }
        });
        wait_for_frames(&sink, 1).await;

        router.submit(&desktop, started(1));
        let summary = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(matches!(summary.reason, CloseReason::Transport(_)));
        assert_eq!(summary.delivered, 0);

        let (events, snapshot) = router.read_since(&desktop, 0).unwrap();
        assert_eq!(seqs(&events), vec![1]);
        assert_eq!(snapshot.phase, RecipientPhase::Offline);
        assert_eq!(snapshot.last_delivered_seq, 0);
    }

    #[tokio::test]
    async fn test_push_send_timeout_requeues_envelope() {
        let router = default_router();
        let desktop = rid("desktop-A");
        let channel = PushChannel::new(Arc::clone(&router), Duration::from_millis(50));
        let sink = RecordingSink {
            stall_after: Some(1),
            ..RecordingSink::default()
        };
        let (_client_tx, stream) = client();
        let task = tokio::spawn({
            let sink = sink.clone();
            let desktop = desktop.clone();
            async move { channel.serve(desktop, sink, stream).await }
        });
        wait_for_frames(&sink, 1).await;

        router.submit(&desktop, started(1));
        let summary = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::SendTimeout);

        let (events, _) = router.read_since(&desktop, 0).unwrap();
        assert_eq!(seqs(&events), vec![1]);
    }
}
