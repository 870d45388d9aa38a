/// Dashboard aggregation tests
///
/// The aggregator is read-only and degrades to zero-valued metrics when
/// storage is unavailable; it never surfaces an error.
use realtime_service::models::{DeliveryChannel, NotificationRequest, ParticipantRole};
use realtime_service::services::{DashboardService, DeliveryDispatcher, SessionService};
use realtime_service::storage::MemoryStore;
use realtime_service::websocket::ConnectionRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    registry: ConnectionRegistry,
    sessions: SessionService,
    dispatcher: DeliveryDispatcher,
    dashboard: DashboardService,
}

fn build_harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let registry = ConnectionRegistry::new();
    Harness {
        store: store.clone(),
        registry: registry.clone(),
        sessions: SessionService::new(store.clone(), registry.clone()),
        dispatcher: DeliveryDispatcher::new(store.clone(), registry.clone(), None, None),
        dashboard: DashboardService::new(store, registry, 24),
    }
}

#[tokio::test]
async fn test_empty_system_yields_zeroes() {
    let h = build_harness();
    let stats = h.dashboard.stats().await;

    assert_eq!(stats.sessions_open, 0);
    assert_eq!(stats.sessions_active, 0);
    assert_eq!(stats.messages_in_window, 0);
    assert_eq!(stats.delivery_success_rate, 0.0);
    assert_eq!(stats.live_connections, 0);
}

#[tokio::test]
async fn test_stats_reflect_activity() {
    let h = build_harness();
    let user = Uuid::new_v4();
    let agent = Uuid::new_v4();

    // One waiting session, one active session with traffic
    h.sessions
        .open_session(Uuid::new_v4(), None, None, None)
        .await
        .unwrap();
    let session = h.sessions.open_session(user, None, None, None).await.unwrap();
    h.sessions
        .add_participant(session.id, agent, ParticipantRole::SupportAgent)
        .await
        .unwrap();
    h.sessions
        .post_message(session.id, user, "hello")
        .await
        .unwrap();
    h.sessions
        .post_message(session.id, agent, "hi, how can I help?")
        .await
        .unwrap();

    // One in-app delivery (sent) and one push delivery (failed, no tokens)
    h.dispatcher
        .dispatch(NotificationRequest {
            recipient_id: user,
            title: "t".into(),
            body: "b".into(),
            channels: vec![DeliveryChannel::InApp, DeliveryChannel::Push],
            metadata: None,
        })
        .await
        .unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    h.registry.register(user, tx);

    let stats = h.dashboard.stats().await;
    assert_eq!(stats.sessions_open, 1);
    assert_eq!(stats.sessions_active, 1);
    assert_eq!(stats.messages_in_window, 2);
    assert!(stats.messages_per_hour > 0.0);
    assert_eq!(stats.deliveries_sent, 1);
    assert_eq!(stats.deliveries_failed, 1);
    assert_eq!(stats.delivery_success_rate, 0.5);
    assert_eq!(stats.live_connections, 1);
}

#[tokio::test]
async fn test_storage_failure_degrades_to_zeroes() {
    let h = build_harness();
    let user = Uuid::new_v4();
    h.sessions.open_session(user, None, None, None).await.unwrap();

    h.store.fail_reads(true);
    let stats = h.dashboard.stats().await;

    // Degraded, not an error
    assert_eq!(stats.sessions_open, 0);
    assert_eq!(stats.messages_in_window, 0);
    assert_eq!(stats.deliveries_sent, 0);
    assert!(h.dashboard.waiting_sessions(10).await.is_empty());
}

#[tokio::test]
async fn test_waiting_sessions_oldest_first() {
    let h = build_harness();

    let first = h
        .sessions
        .open_session(Uuid::new_v4(), None, Some("first".into()), None)
        .await
        .unwrap();
    let second = h
        .sessions
        .open_session(Uuid::new_v4(), None, Some("second".into()), None)
        .await
        .unwrap();
    // An agent-assigned session is not waiting
    h.sessions
        .open_session(Uuid::new_v4(), Some(Uuid::new_v4()), None, None)
        .await
        .unwrap();

    let waiting = h.dashboard.waiting_sessions(10).await;
    assert_eq!(waiting.len(), 2);
    assert_eq!(waiting[0].id, first.id);
    assert_eq!(waiting[1].id, second.id);
}

#[tokio::test]
async fn test_session_presence_counts_connected_members() {
    let h = build_harness();
    let user = Uuid::new_v4();
    let session = h.sessions.open_session(user, None, None, None).await.unwrap();

    assert_eq!(h.dashboard.session_presence(session.id), 0);

    let (tx, _rx) = mpsc::unbounded_channel();
    h.registry.register(user, tx);
    h.registry.join_session(session.id, user);

    assert_eq!(h.dashboard.session_presence(session.id), 1);
}
