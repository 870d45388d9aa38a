//! In-memory storage backend
//!
//! Backs the test suites and local development without a database. Keeps
//! the same read-after-write semantics the core expects from `PgStore`.

use super::{DeliveryCounts, SessionCounts, Storage};
use crate::error::{AppError, AppResult};
use crate::models::{
    ChannelDelivery, ChannelPreference, ChatMessage, ChatSession, DeliveryChannel, DeliveryState,
    DevicePlatform, DeviceToken, InboxEntry, MessageStatus, Notification, Participant,
    SessionStatus, TokenStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, ChatSession>,
    participants: HashMap<(Uuid, Uuid), Participant>,
    messages: HashMap<Uuid, ChatMessage>,
    notifications: HashMap<Uuid, Notification>,
    deliveries: HashMap<Uuid, ChannelDelivery>,
    tokens: HashMap<Uuid, DeviceToken>,
    preferences: HashMap<(Uuid, DeliveryChannel), ChannelPreference>,
    inbox: HashMap<Uuid, InboxEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    /// When set, every write fails; used to exercise persistence-failure paths
    fail_writes: AtomicBool,
    /// When set, aggregate reads fail; used to exercise degraded dashboards
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all subsequent writes fail with a database error
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make aggregate reads fail with a database error
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database("simulated write failure".into()));
        }
        Ok(())
    }

    fn check_readable(&self) -> AppResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Database("simulated read failure".into()));
        }
        Ok(())
    }

    /// Number of stored messages, for test assertions
    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert_session(
        &self,
        session: &ChatSession,
        participants: &[Participant],
    ) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id, session.clone());
        for p in participants {
            inner
                .participants
                .insert((p.session_id, p.identity), p.clone());
        }
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> AppResult<Option<ChatSession>> {
        Ok(self.inner.read().await.sessions.get(&session_id).cloned())
    }

    async fn activate_session(&self, session_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            if session.status == SessionStatus::Open {
                session.status = SessionStatus::Active;
                session.started_at = Some(at);
                session.last_activity_at = at;
            }
        }
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            if session.status != SessionStatus::Closed {
                session.status = SessionStatus::Closed;
                session.closed_at = Some(at);
                session.close_reason = reason.map(String::from);
            }
        }
        Ok(())
    }

    async fn upsert_participant(&self, participant: &Participant) -> AppResult<Participant> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        let key = (participant.session_id, participant.identity);
        let entry = inner
            .participants
            .entry(key)
            .and_modify(|p| {
                p.is_active = true;
                p.left_at = None;
                p.role = participant.role;
            })
            .or_insert_with(|| participant.clone());
        Ok(entry.clone())
    }

    async fn get_participant(
        &self,
        session_id: Uuid,
        identity: Uuid,
    ) -> AppResult<Option<Participant>> {
        Ok(self
            .inner
            .read()
            .await
            .participants
            .get(&(session_id, identity))
            .cloned())
    }

    async fn list_participants(&self, session_id: Uuid) -> AppResult<Vec<Participant>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Participant> = inner
            .participants
            .values()
            .filter(|p| p.session_id == session_id && p.is_active)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.joined_at);
        Ok(out)
    }

    async fn insert_message(&self, message: &ChatMessage) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        inner.messages.insert(message.id, message.clone());
        if let Some(session) = inner.sessions.get_mut(&message.session_id) {
            session.total_messages += 1;
            session.last_activity_at = message.created_at;
        }
        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<ChatMessage>> {
        Ok(self.inner.read().await.messages.get(&message_id).cloned())
    }

    async fn update_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if let Some(message) = inner.messages.get_mut(&message_id) {
            message.status = status;
            match status {
                MessageStatus::Delivered => message.delivered_at = Some(at),
                MessageStatus::Read => message.read_at = Some(at),
                _ => {}
            }
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ChatMessage>> {
        let inner = self.inner.read().await;
        let mut out: Vec<ChatMessage> = inner
            .messages
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.clamp(0, 200) as usize)
            .collect())
    }

    async fn insert_notification(
        &self,
        notification: &Notification,
        deliveries: &[ChannelDelivery],
    ) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        inner
            .notifications
            .insert(notification.id, notification.clone());
        for d in deliveries {
            inner.deliveries.insert(d.id, d.clone());
        }
        Ok(())
    }

    async fn update_channel_delivery(
        &self,
        delivery_id: Uuid,
        state: DeliveryState,
        detail: Option<&str>,
        attempted_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if let Some(d) = inner.deliveries.get_mut(&delivery_id) {
            d.state = state;
            d.detail = detail.map(String::from);
            d.attempted_at = attempted_at;
        }
        Ok(())
    }

    async fn list_channel_deliveries(
        &self,
        notification_id: Uuid,
    ) -> AppResult<Vec<ChannelDelivery>> {
        let inner = self.inner.read().await;
        Ok(inner
            .deliveries
            .values()
            .filter(|d| d.notification_id == notification_id)
            .cloned()
            .collect())
    }

    async fn upsert_device_token(
        &self,
        identity: Uuid,
        platform: DevicePlatform,
        token: &str,
    ) -> AppResult<DeviceToken> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(existing) = inner
            .tokens
            .values_mut()
            .find(|t| t.identity == identity && t.token == token)
        {
            existing.status = TokenStatus::Active;
            existing.platform = platform;
            existing.last_used_at = Some(now);
            return Ok(existing.clone());
        }

        let device = DeviceToken {
            id: Uuid::new_v4(),
            identity,
            platform,
            token: token.to_string(),
            status: TokenStatus::Active,
            registered_at: now,
            last_used_at: None,
        };
        inner.tokens.insert(device.id, device.clone());
        Ok(device)
    }

    async fn revoke_device_token(&self, identity: Uuid, token: &str) -> AppResult<bool> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        match inner.tokens.values_mut().find(|t| {
            t.identity == identity && t.token == token && t.status != TokenStatus::Revoked
        }) {
            Some(t) => {
                t.status = TokenStatus::Revoked;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_token_revoked(&self, token_id: Uuid) -> AppResult<()> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        if let Some(t) = inner.tokens.get_mut(&token_id) {
            t.status = TokenStatus::Revoked;
        }
        Ok(())
    }

    async fn active_tokens(&self, identity: Uuid) -> AppResult<Vec<DeviceToken>> {
        let inner = self.inner.read().await;
        let mut out: Vec<DeviceToken> = inner
            .tokens
            .values()
            .filter(|t| t.identity == identity && t.status == TokenStatus::Active)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.registered_at);
        Ok(out)
    }

    async fn list_tokens(&self, identity: Uuid) -> AppResult<Vec<DeviceToken>> {
        let inner = self.inner.read().await;
        let mut out: Vec<DeviceToken> = inner
            .tokens
            .values()
            .filter(|t| t.identity == identity)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.registered_at);
        Ok(out)
    }

    async fn get_preference(
        &self,
        identity: Uuid,
        channel: DeliveryChannel,
    ) -> AppResult<Option<ChannelPreference>> {
        Ok(self
            .inner
            .read()
            .await
            .preferences
            .get(&(identity, channel))
            .cloned())
    }

    async fn set_preference(
        &self,
        identity: Uuid,
        channel: DeliveryChannel,
        enabled: bool,
    ) -> AppResult<ChannelPreference> {
        self.check_writable()?;
        let pref = ChannelPreference {
            identity,
            channel,
            enabled,
            updated_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .preferences
            .insert((identity, channel), pref.clone());
        Ok(pref)
    }

    async fn list_preferences(&self, identity: Uuid) -> AppResult<Vec<ChannelPreference>> {
        let inner = self.inner.read().await;
        Ok(inner
            .preferences
            .values()
            .filter(|p| p.identity == identity)
            .cloned()
            .collect())
    }

    async fn insert_inbox_entry(&self, entry: &InboxEntry) -> AppResult<()> {
        self.check_writable()?;
        self.inner
            .write()
            .await
            .inbox
            .insert(entry.id, entry.clone());
        Ok(())
    }

    async fn list_inbox(
        &self,
        recipient_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<InboxEntry>> {
        let inner = self.inner.read().await;
        let mut out: Vec<InboxEntry> = inner
            .inbox
            .values()
            .filter(|e| e.recipient_id == recipient_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.clamp(0, 100) as usize)
            .collect())
    }

    async fn mark_inbox_read(&self, entry_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        self.check_writable()?;
        let mut inner = self.inner.write().await;
        match inner.inbox.get_mut(&entry_id) {
            Some(e) if !e.is_read => {
                e.is_read = true;
                e.read_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn session_counts(&self, since: DateTime<Utc>) -> AppResult<SessionCounts> {
        self.check_readable()?;
        let inner = self.inner.read().await;
        let mut counts = SessionCounts::default();
        for s in inner.sessions.values() {
            match s.status {
                SessionStatus::Open => counts.open += 1,
                SessionStatus::Active => counts.active += 1,
                SessionStatus::Closed => {
                    if s.closed_at.map(|t| t >= since).unwrap_or(false) {
                        counts.closed += 1;
                    }
                }
            }
        }
        Ok(counts)
    }

    async fn messages_since(&self, since: DateTime<Utc>) -> AppResult<i64> {
        self.check_readable()?;
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .filter(|m| m.created_at >= since)
            .count() as i64)
    }

    async fn delivery_counts(&self, since: DateTime<Utc>) -> AppResult<DeliveryCounts> {
        self.check_readable()?;
        let inner = self.inner.read().await;
        let mut counts = DeliveryCounts::default();
        for d in inner.deliveries.values() {
            let in_window = inner
                .notifications
                .get(&d.notification_id)
                .map(|n| n.created_at >= since)
                .unwrap_or(false);
            if !in_window {
                continue;
            }
            match d.state {
                DeliveryState::Sent => counts.sent += 1,
                DeliveryState::Failed => counts.failed += 1,
                DeliveryState::Suppressed => counts.suppressed += 1,
                DeliveryState::Pending => {}
            }
        }
        Ok(counts)
    }

    async fn list_open_sessions(&self, limit: i64) -> AppResult<Vec<ChatSession>> {
        self.check_readable()?;
        let inner = self.inner.read().await;
        let mut out: Vec<ChatSession> = inner
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Open)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}
