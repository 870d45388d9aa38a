//! Persistence seam for the realtime core.
//!
//! The core treats storage as a synchronous key-addressed collaborator
//! with read-after-write consistency for its own writes. `PgStore` is the
//! production backend; `MemoryStore` backs tests and local development.

use crate::error::AppResult;
use crate::models::{
    ChannelDelivery, ChannelPreference, ChatMessage, ChatSession, DeliveryChannel, DeliveryState,
    DevicePlatform, DeviceToken, InboxEntry, MessageStatus, Notification, Participant,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Aggregate counts for the dashboard, computed over a trailing window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounts {
    pub open: i64,
    pub active: i64,
    pub closed: i64,
}

/// Delivery outcomes over a trailing window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    pub sent: i64,
    pub failed: i64,
    pub suppressed: i64,
}

#[async_trait]
pub trait Storage: Send + Sync {
    // -- sessions ---------------------------------------------------------

    /// Persist a new session together with its initial participants
    async fn insert_session(
        &self,
        session: &ChatSession,
        participants: &[Participant],
    ) -> AppResult<()>;

    async fn get_session(&self, session_id: Uuid) -> AppResult<Option<ChatSession>>;

    /// OPEN -> ACTIVE
    async fn activate_session(&self, session_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;

    /// Any -> CLOSED
    async fn close_session(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> AppResult<()>;

    /// Add or re-activate a participant
    async fn upsert_participant(&self, participant: &Participant) -> AppResult<Participant>;

    async fn get_participant(
        &self,
        session_id: Uuid,
        identity: Uuid,
    ) -> AppResult<Option<Participant>>;

    /// Active participants of a session
    async fn list_participants(&self, session_id: Uuid) -> AppResult<Vec<Participant>>;

    // -- messages ---------------------------------------------------------

    /// Append a message and bump the session activity counters
    async fn insert_message(&self, message: &ChatMessage) -> AppResult<()>;

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<ChatMessage>>;

    /// Forward-only status update; the caller is responsible for checking
    /// `MessageStatus::can_advance_to`
    async fn update_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Chronological page of a session's messages
    async fn list_messages(
        &self,
        session_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ChatMessage>>;

    // -- notifications ----------------------------------------------------

    /// Persist a notification together with its per-channel records
    async fn insert_notification(
        &self,
        notification: &Notification,
        deliveries: &[ChannelDelivery],
    ) -> AppResult<()>;

    async fn update_channel_delivery(
        &self,
        delivery_id: Uuid,
        state: DeliveryState,
        detail: Option<&str>,
        attempted_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    async fn list_channel_deliveries(
        &self,
        notification_id: Uuid,
    ) -> AppResult<Vec<ChannelDelivery>>;

    // -- device tokens ----------------------------------------------------

    /// Register or re-activate a device token (upsert on identity+token)
    async fn upsert_device_token(
        &self,
        identity: Uuid,
        platform: DevicePlatform,
        token: &str,
    ) -> AppResult<DeviceToken>;

    /// Revoke a token by value; false when no such token exists
    async fn revoke_device_token(&self, identity: Uuid, token: &str) -> AppResult<bool>;

    /// Revoke a token by id (permanent provider failure path)
    async fn mark_token_revoked(&self, token_id: Uuid) -> AppResult<()>;

    /// Tokens eligible for delivery; revoked and stale tokens are never
    /// returned
    async fn active_tokens(&self, identity: Uuid) -> AppResult<Vec<DeviceToken>>;

    async fn list_tokens(&self, identity: Uuid) -> AppResult<Vec<DeviceToken>>;

    // -- preferences ------------------------------------------------------

    /// None means the identity never expressed a preference for the channel
    async fn get_preference(
        &self,
        identity: Uuid,
        channel: DeliveryChannel,
    ) -> AppResult<Option<ChannelPreference>>;

    async fn set_preference(
        &self,
        identity: Uuid,
        channel: DeliveryChannel,
        enabled: bool,
    ) -> AppResult<ChannelPreference>;

    async fn list_preferences(&self, identity: Uuid) -> AppResult<Vec<ChannelPreference>>;

    // -- in-app inbox -----------------------------------------------------

    async fn insert_inbox_entry(&self, entry: &InboxEntry) -> AppResult<()>;

    async fn list_inbox(
        &self,
        recipient_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<InboxEntry>>;

    /// False when the entry does not exist or is already read
    async fn mark_inbox_read(&self, entry_id: Uuid, at: DateTime<Utc>) -> AppResult<bool>;

    // -- dashboard reads --------------------------------------------------

    async fn session_counts(&self, since: DateTime<Utc>) -> AppResult<SessionCounts>;

    async fn messages_since(&self, since: DateTime<Utc>) -> AppResult<i64>;

    async fn delivery_counts(&self, since: DateTime<Utc>) -> AppResult<DeliveryCounts>;

    /// Sessions still waiting for an agent, oldest first
    async fn list_open_sessions(&self, limit: i64) -> AppResult<Vec<ChatSession>>;
}
