/// Delivery dispatcher tests
///
/// Runs the real dispatcher against the in-memory store, a scripted push
/// gateway and a scripted email relay, covering:
/// - preference suppression (never attempted)
/// - revoked tokens never reaching the gateway
/// - permanent failures revoking tokens, transient ones leaving them
/// - per-channel partial success reporting
use async_trait::async_trait;
use realtime_service::error::AppError;
use realtime_service::models::{
    DeliveryChannel, DeliveryState, DevicePlatform, DeviceToken, NotificationRequest, TokenStatus,
};
use realtime_service::services::dispatcher::DeliveryDispatcher;
use realtime_service::services::push_gateway::{
    EmailRelay, PushGateway, PushOutcome, PushPayload,
};
use realtime_service::storage::{MemoryStore, Storage};
use realtime_service::websocket::{ConnectionRegistry, WsEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Push gateway with scripted per-token outcomes; records every token it
/// is handed.
#[derive(Default)]
struct ScriptedGateway {
    outcomes: Mutex<HashMap<String, PushOutcome>>,
    attempted: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self::default()
    }

    fn script(&self, token: &str, outcome: PushOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(token.to_string(), outcome);
    }

    fn attempted_tokens(&self) -> Vec<String> {
        self.attempted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for ScriptedGateway {
    async fn send_push(&self, token: &DeviceToken, _payload: &PushPayload) -> PushOutcome {
        self.attempted.lock().unwrap().push(token.token.clone());
        self.outcomes
            .lock()
            .unwrap()
            .get(&token.token)
            .cloned()
            .unwrap_or(PushOutcome::Sent {
                provider_message_id: format!("msg-{}", token.token),
            })
    }
}

/// Email relay that can be scripted to fail
struct ScriptedRelay {
    fail_with: Option<String>,
    sent: Mutex<Vec<Uuid>>,
}

impl ScriptedRelay {
    fn ok() -> Self {
        Self {
            fail_with: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EmailRelay for ScriptedRelay {
    async fn send_email(
        &self,
        recipient: Uuid,
        _subject: &str,
        _body: &str,
    ) -> Result<(), String> {
        match &self.fail_with {
            Some(reason) => Err(reason.clone()),
            None => {
                self.sent.lock().unwrap().push(recipient);
                Ok(())
            }
        }
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    registry: ConnectionRegistry,
    gateway: Arc<ScriptedGateway>,
    relay: Arc<ScriptedRelay>,
    dispatcher: DeliveryDispatcher,
}

fn build_harness() -> Harness {
    build_harness_with_relay(ScriptedRelay::ok())
}

fn build_harness_with_relay(relay: ScriptedRelay) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let registry = ConnectionRegistry::new();
    let gateway = Arc::new(ScriptedGateway::new());
    let relay = Arc::new(relay);
    let dispatcher = DeliveryDispatcher::new(
        store.clone(),
        registry.clone(),
        Some(gateway.clone()),
        Some(relay.clone()),
    );
    Harness {
        store,
        registry,
        gateway,
        relay,
        dispatcher,
    }
}

fn request(recipient: Uuid, channels: Vec<DeliveryChannel>) -> NotificationRequest {
    NotificationRequest {
        recipient_id: recipient,
        title: "Card update".to_string(),
        body: "Your card ending 4821 was activated".to_string(),
        channels,
        metadata: None,
    }
}

fn state_of(
    receipt: &realtime_service::models::DispatchReceipt,
    channel: DeliveryChannel,
) -> DeliveryState {
    receipt
        .channels
        .iter()
        .find(|d| d.channel == channel)
        .map(|d| d.state)
        .expect("channel record missing")
}

#[tokio::test]
async fn test_dispatch_requires_channels() {
    let h = build_harness();
    let result = h.dispatcher.dispatch(request(Uuid::new_v4(), vec![])).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn test_mixed_token_scenario() {
    // Recipient with one active and one revoked token, push enabled,
    // email disabled: push goes to the active token only, email is
    // suppressed, the overall request is delivered via push.
    let h = build_harness();
    let recipient = Uuid::new_v4();

    h.store
        .upsert_device_token(recipient, DevicePlatform::Ios, "tok-active")
        .await
        .unwrap();
    let revoked = h
        .store
        .upsert_device_token(recipient, DevicePlatform::Android, "tok-revoked")
        .await
        .unwrap();
    h.store.mark_token_revoked(revoked.id).await.unwrap();

    h.store
        .set_preference(recipient, DeliveryChannel::Email, false)
        .await
        .unwrap();

    let receipt = h
        .dispatcher
        .dispatch(request(
            recipient,
            vec![DeliveryChannel::Push, DeliveryChannel::Email],
        ))
        .await
        .unwrap();

    assert!(receipt.delivered);
    assert_eq!(state_of(&receipt, DeliveryChannel::Push), DeliveryState::Sent);
    assert_eq!(
        state_of(&receipt, DeliveryChannel::Email),
        DeliveryState::Suppressed
    );

    // The revoked token never reached the gateway
    assert_eq!(h.gateway.attempted_tokens(), vec!["tok-active"]);
    // The relay saw nothing
    assert!(h.relay.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_all_channels_suppressed_attempts_nothing() {
    let h = build_harness();
    let recipient = Uuid::new_v4();

    for channel in [
        DeliveryChannel::Push,
        DeliveryChannel::Email,
        DeliveryChannel::InApp,
    ] {
        h.store
            .set_preference(recipient, channel, false)
            .await
            .unwrap();
    }

    let receipt = h
        .dispatcher
        .dispatch(request(
            recipient,
            vec![
                DeliveryChannel::Push,
                DeliveryChannel::Email,
                DeliveryChannel::InApp,
            ],
        ))
        .await
        .unwrap();

    // Not a failure: every channel recorded as suppressed, zero attempts
    assert!(!receipt.delivered);
    assert!(receipt
        .channels
        .iter()
        .all(|d| d.state == DeliveryState::Suppressed));
    assert!(h.gateway.attempted_tokens().is_empty());
    assert!(h.relay.sent.lock().unwrap().is_empty());
    assert!(h
        .dispatcher
        .inbox(recipient, 10, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_permanent_failure_revokes_token() {
    let h = build_harness();
    let recipient = Uuid::new_v4();

    h.store
        .upsert_device_token(recipient, DevicePlatform::Android, "tok-dead")
        .await
        .unwrap();
    h.gateway.script(
        "tok-dead",
        PushOutcome::PermanentFailure("Unregistered".to_string()),
    );

    let receipt = h
        .dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::Push]))
        .await
        .unwrap();

    assert!(!receipt.delivered);
    assert_eq!(
        state_of(&receipt, DeliveryChannel::Push),
        DeliveryState::Failed
    );

    let tokens = h.store.list_tokens(recipient).await.unwrap();
    assert_eq!(tokens[0].status, TokenStatus::Revoked);

    // The next dispatch cycle never selects the revoked token
    h.dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::Push]))
        .await
        .unwrap();
    assert_eq!(h.gateway.attempted_tokens(), vec!["tok-dead"]);
}

#[tokio::test]
async fn test_transient_failure_leaves_token_active() {
    let h = build_harness();
    let recipient = Uuid::new_v4();

    h.store
        .upsert_device_token(recipient, DevicePlatform::Web, "tok-flaky")
        .await
        .unwrap();
    h.gateway.script(
        "tok-flaky",
        PushOutcome::TransientFailure("503 upstream".to_string()),
    );

    let receipt = h
        .dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::Push]))
        .await
        .unwrap();
    assert!(!receipt.delivered);

    let tokens = h.store.list_tokens(recipient).await.unwrap();
    assert_eq!(tokens[0].status, TokenStatus::Active);

    // Retried by the next dispatch call, not by any in-process loop
    h.gateway.script(
        "tok-flaky",
        PushOutcome::Sent {
            provider_message_id: "msg-2".to_string(),
        },
    );
    let receipt = h
        .dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::Push]))
        .await
        .unwrap();
    assert!(receipt.delivered);
    assert_eq!(h.gateway.attempted_tokens().len(), 2);
}

#[tokio::test]
async fn test_push_with_no_tokens_fails() {
    let h = build_harness();
    let receipt = h
        .dispatcher
        .dispatch(request(Uuid::new_v4(), vec![DeliveryChannel::Push]))
        .await
        .unwrap();

    assert!(!receipt.delivered);
    let record = &receipt.channels[0];
    assert_eq!(record.state, DeliveryState::Failed);
    assert_eq!(record.detail.as_deref(), Some("no active device tokens"));
}

#[tokio::test]
async fn test_unconfigured_gateways_fail_fast() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher =
        DeliveryDispatcher::new(store.clone(), ConnectionRegistry::new(), None, None);
    let recipient = Uuid::new_v4();
    store
        .upsert_device_token(recipient, DevicePlatform::Ios, "tok")
        .await
        .unwrap();

    let receipt = dispatcher
        .dispatch(request(
            recipient,
            vec![DeliveryChannel::Push, DeliveryChannel::Email],
        ))
        .await
        .unwrap();

    assert!(!receipt.delivered);
    for record in &receipt.channels {
        assert_eq!(record.state, DeliveryState::Failed);
        assert!(record
            .detail
            .as_deref()
            .unwrap_or_default()
            .contains("not configured"));
    }
}

#[tokio::test]
async fn test_in_app_persists_and_pushes_to_live_connection() {
    let h = build_harness();
    let recipient = Uuid::new_v4();

    let (tx, mut rx) = mpsc::unbounded_channel();
    h.registry.register(recipient, tx);

    let receipt = h
        .dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::InApp]))
        .await
        .unwrap();

    assert!(receipt.delivered);

    // Persisted to the inbox
    let inbox = h.dispatcher.inbox(recipient, 10, 0).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert!(!inbox[0].is_read);

    // And pushed over the live connection
    assert!(matches!(
        rx.recv().await,
        Some(WsEvent::Notification { .. })
    ));
}

#[tokio::test]
async fn test_in_app_succeeds_for_offline_recipient() {
    let h = build_harness();
    let recipient = Uuid::new_v4();

    let receipt = h
        .dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::InApp]))
        .await
        .unwrap();

    // The inbox write is the delivery; the realtime push is best-effort
    assert!(receipt.delivered);
    assert_eq!(h.dispatcher.inbox(recipient, 10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_partial_success_is_reported_per_channel() {
    // Push fails (no tokens), in-app lands: the receipt shows both.
    let h = build_harness();
    let recipient = Uuid::new_v4();

    let receipt = h
        .dispatcher
        .dispatch(request(
            recipient,
            vec![DeliveryChannel::Push, DeliveryChannel::InApp],
        ))
        .await
        .unwrap();

    assert!(receipt.delivered);
    assert_eq!(
        state_of(&receipt, DeliveryChannel::Push),
        DeliveryState::Failed
    );
    assert_eq!(
        state_of(&receipt, DeliveryChannel::InApp),
        DeliveryState::Sent
    );
}

#[tokio::test]
async fn test_email_relay_failure_is_recorded() {
    let h = build_harness_with_relay(ScriptedRelay::failing("relay timeout"));
    let recipient = Uuid::new_v4();

    let receipt = h
        .dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::Email]))
        .await
        .unwrap();

    assert!(!receipt.delivered);
    let record = &receipt.channels[0];
    assert_eq!(record.state, DeliveryState::Failed);
    assert_eq!(record.detail.as_deref(), Some("relay timeout"));
}

#[tokio::test]
async fn test_delivery_records_are_persisted() {
    let h = build_harness();
    let recipient = Uuid::new_v4();
    h.store
        .set_preference(recipient, DeliveryChannel::Email, false)
        .await
        .unwrap();

    let receipt = h
        .dispatcher
        .dispatch(request(
            recipient,
            vec![DeliveryChannel::Email, DeliveryChannel::InApp],
        ))
        .await
        .unwrap();

    // Each channel reached exactly one terminal state in storage
    let stored = h
        .store
        .list_channel_deliveries(receipt.notification_id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    for record in stored {
        assert_ne!(record.state, DeliveryState::Pending);
    }
}

#[tokio::test]
async fn test_mark_inbox_read_is_single_shot() {
    let h = build_harness();
    let recipient = Uuid::new_v4();
    h.dispatcher
        .dispatch(request(recipient, vec![DeliveryChannel::InApp]))
        .await
        .unwrap();

    let inbox = h.dispatcher.inbox(recipient, 10, 0).await.unwrap();
    let entry_id = inbox[0].id;

    assert!(h.dispatcher.mark_inbox_read(entry_id).await.unwrap());
    // Already read: no-op
    assert!(!h.dispatcher.mark_inbox_read(entry_id).await.unwrap());

    let inbox = h.dispatcher.inbox(recipient, 10, 0).await.unwrap();
    assert!(inbox[0].is_read);
    assert!(inbox[0].read_at.is_some());
}

#[tokio::test]
async fn test_register_device_rejects_empty_token() {
    let h = build_harness();
    let result = h
        .dispatcher
        .register_device_token(Uuid::new_v4(), DevicePlatform::Ios, "  ")
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn test_reregistering_token_reactivates_it() {
    let h = build_harness();
    let recipient = Uuid::new_v4();

    h.dispatcher
        .register_device_token(recipient, DevicePlatform::Ios, "tok-1")
        .await
        .unwrap();
    assert!(h
        .dispatcher
        .remove_device_token(recipient, "tok-1")
        .await
        .unwrap());

    let device = h
        .dispatcher
        .register_device_token(recipient, DevicePlatform::Ios, "tok-1")
        .await
        .unwrap();
    assert_eq!(device.status, TokenStatus::Active);

    let active = h.store.active_tokens(recipient).await.unwrap();
    assert_eq!(active.len(), 1);
}
