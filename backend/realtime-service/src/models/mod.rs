use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat session lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Created, no support agent yet
    Open,
    /// A privileged participant has joined
    Active,
    /// Terminal; accepts no further mutations
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> SessionStatus {
        match s.to_lowercase().as_str() {
            "active" => SessionStatus::Active,
            "closed" => SessionStatus::Closed,
            _ => SessionStatus::Open,
        }
    }
}

/// Participant role within a chat session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The user who opened the session
    Owner,
    /// Support staff; joining one flips an OPEN session to ACTIVE
    SupportAgent,
    /// Read-mostly participant (supervisors, audits)
    Observer,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Owner => "owner",
            ParticipantRole::SupportAgent => "support_agent",
            ParticipantRole::Observer => "observer",
        }
    }

    pub fn parse(s: &str) -> ParticipantRole {
        match s.to_lowercase().as_str() {
            "support_agent" => ParticipantRole::SupportAgent,
            "observer" => ParticipantRole::Observer,
            _ => ParticipantRole::Owner,
        }
    }

    /// Whether joining with this role activates an open session
    pub fn is_privileged(&self) -> bool {
        matches!(self, ParticipantRole::SupportAgent)
    }
}

/// Message delivery status
///
/// Ordered: sent < delivered < read. Failed is terminal and unordered
/// with respect to the rest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> MessageStatus {
        match s.to_lowercase().as_str() {
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Sent,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
            MessageStatus::Failed => 3,
        }
    }

    /// Whether a status change to `next` is a legal forward move.
    ///
    /// Failed is terminal; any non-terminal status may fail.
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        if *self == MessageStatus::Failed {
            return false;
        }
        if next == MessageStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// Notification delivery channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    Push,
    Email,
    InApp,
}

impl DeliveryChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryChannel::Push => "push",
            DeliveryChannel::Email => "email",
            DeliveryChannel::InApp => "in_app",
        }
    }

    pub fn parse(s: &str) -> Option<DeliveryChannel> {
        match s.to_lowercase().as_str() {
            "push" => Some(DeliveryChannel::Push),
            "email" => Some(DeliveryChannel::Email),
            "in_app" | "in-app" | "inapp" => Some(DeliveryChannel::InApp),
            _ => None,
        }
    }
}

/// Per-channel delivery state for one notification request
///
/// Each requested channel reaches exactly one terminal state per dispatch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
    Suppressed,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Sent => "sent",
            DeliveryState::Failed => "failed",
            DeliveryState::Suppressed => "suppressed",
        }
    }

    pub fn parse(s: &str) -> DeliveryState {
        match s.to_lowercase().as_str() {
            "sent" => DeliveryState::Sent,
            "failed" => DeliveryState::Failed,
            "suppressed" => DeliveryState::Suppressed,
            _ => DeliveryState::Pending,
        }
    }
}

/// Device platform for push tokens
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlatform {
    Ios,
    Android,
    Web,
}

impl DevicePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevicePlatform::Ios => "ios",
            DevicePlatform::Android => "android",
            DevicePlatform::Web => "web",
        }
    }

    pub fn parse(s: &str) -> DevicePlatform {
        match s.to_lowercase().as_str() {
            "ios" => DevicePlatform::Ios,
            "web" => DevicePlatform::Web,
            _ => DevicePlatform::Android,
        }
    }
}

/// Device token lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Stale,
    Revoked,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Stale => "stale",
            TokenStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> TokenStatus {
        match s.to_lowercase().as_str() {
            "stale" => TokenStatus::Stale,
            "revoked" => TokenStatus::Revoked,
            _ => TokenStatus::Active,
        }
    }
}

/// A support chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,

    /// Optional human-facing title
    pub title: Option<String>,

    pub status: SessionStatus,

    /// The user who opened the session
    pub initiator_id: Uuid,

    /// Agent assigned at open time, if any
    pub assigned_agent_id: Option<Uuid>,

    /// Custom data, tags, etc.
    pub metadata: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,

    /// When the session became ACTIVE
    pub started_at: Option<DateTime<Utc>>,

    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,

    pub last_activity_at: DateTime<Utc>,

    /// Running message counter, maintained on every append
    pub total_messages: i64,
}

/// A participant attached to a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub identity: Uuid,
    pub role: ParticipantRole,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// A chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

/// A logical notification, fanned out across channels by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub title: String,
    pub body: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Per-channel delivery record for one notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: DeliveryChannel,
    pub state: DeliveryState,

    /// Provider message id on success, failure reason otherwise
    pub detail: Option<String>,

    pub attempted_at: Option<DateTime<Utc>>,
}

/// Outcome of one dispatch call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub notification_id: Uuid,

    /// True when at least one requested, non-suppressed channel reached sent
    pub delivered: bool,

    pub channels: Vec<ChannelDelivery>,
}

/// Push token registered for a recipient device
///
/// A recipient may hold several tokens (multi-device); each is
/// independently revocable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceToken {
    pub id: Uuid,
    pub identity: Uuid,
    pub platform: DevicePlatform,
    pub token: String,
    pub status: TokenStatus,
    pub registered_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Per-identity, per-channel opt-in record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub identity: Uuid,
    pub channel: DeliveryChannel,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Entry in the persisted in-app inbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub notification_id: Uuid,
    pub title: String,
    pub body: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request to dispatch a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub recipient_id: Uuid,
    pub title: String,
    pub body: String,
    pub channels: Vec<DeliveryChannel>,
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_roundtrip() {
        for status in [
            SessionStatus::Open,
            SessionStatus::Active,
            SessionStatus::Closed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), status);
        }
        assert_eq!(SessionStatus::parse("unknown"), SessionStatus::Open);
    }

    #[test]
    fn test_message_status_is_monotonic() {
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(MessageStatus::Delivered.can_advance_to(MessageStatus::Read));

        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Sent));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Read));
    }

    #[test]
    fn test_failed_is_terminal_and_reachable() {
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Failed));
        assert!(MessageStatus::Delivered.can_advance_to(MessageStatus::Failed));
        assert!(MessageStatus::Read.can_advance_to(MessageStatus::Failed));

        assert!(!MessageStatus::Failed.can_advance_to(MessageStatus::Sent));
        assert!(!MessageStatus::Failed.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Failed.can_advance_to(MessageStatus::Read));
        assert!(!MessageStatus::Failed.can_advance_to(MessageStatus::Failed));
    }

    #[test]
    fn test_delivery_channel_parse() {
        assert_eq!(DeliveryChannel::parse("push"), Some(DeliveryChannel::Push));
        assert_eq!(
            DeliveryChannel::parse("in-app"),
            Some(DeliveryChannel::InApp)
        );
        assert_eq!(
            DeliveryChannel::parse("IN_APP"),
            Some(DeliveryChannel::InApp)
        );
        assert_eq!(DeliveryChannel::parse("sms"), None);
    }

    #[test]
    fn test_privileged_roles() {
        assert!(ParticipantRole::SupportAgent.is_privileged());
        assert!(!ParticipantRole::Owner.is_privileged());
        assert!(!ParticipantRole::Observer.is_privileged());
    }

    #[test]
    fn test_token_status_parse_defaults_active() {
        assert_eq!(TokenStatus::parse("revoked"), TokenStatus::Revoked);
        assert_eq!(TokenStatus::parse("anything"), TokenStatus::Active);
    }
}
