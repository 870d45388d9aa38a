//! PostgreSQL-backed storage
//!
//! Raw SQL with bind parameters; enums are stored as text and parsed back
//! through the model helpers. Schema lives in `migrations/`.

use super::{DeliveryCounts, SessionCounts, Storage};
use crate::error::{AppError, AppResult};
use crate::models::{
    ChannelDelivery, ChannelPreference, ChatMessage, ChatSession, DeliveryChannel, DeliveryState,
    DevicePlatform, DeviceToken, InboxEntry, MessageStatus, Notification, Participant,
    ParticipantRole, SessionStatus, TokenStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn session_from_row(row: &sqlx::postgres::PgRow) -> ChatSession {
        let status: String = row.get("status");
        ChatSession {
            id: row.get("id"),
            title: row.get("title"),
            status: SessionStatus::parse(&status),
            initiator_id: row.get("initiator_id"),
            assigned_agent_id: row.get("assigned_agent_id"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            closed_at: row.get("closed_at"),
            close_reason: row.get("close_reason"),
            last_activity_at: row.get("last_activity_at"),
            total_messages: row.get("total_messages"),
        }
    }

    fn participant_from_row(row: &sqlx::postgres::PgRow) -> Participant {
        let role: String = row.get("role");
        Participant {
            id: row.get("id"),
            session_id: row.get("session_id"),
            identity: row.get("identity"),
            role: ParticipantRole::parse(&role),
            is_active: row.get("is_active"),
            joined_at: row.get("joined_at"),
            left_at: row.get("left_at"),
        }
    }

    fn message_from_row(row: &sqlx::postgres::PgRow) -> ChatMessage {
        let status: String = row.get("status");
        ChatMessage {
            id: row.get("id"),
            session_id: row.get("session_id"),
            sender_id: row.get("sender_id"),
            body: row.get("body"),
            status: MessageStatus::parse(&status),
            created_at: row.get("created_at"),
            delivered_at: row.get("delivered_at"),
            read_at: row.get("read_at"),
        }
    }

    fn token_from_row(row: &sqlx::postgres::PgRow) -> DeviceToken {
        let platform: String = row.get("platform");
        let status: String = row.get("status");
        DeviceToken {
            id: row.get("id"),
            identity: row.get("identity"),
            platform: DevicePlatform::parse(&platform),
            token: row.get("token"),
            status: TokenStatus::parse(&status),
            registered_at: row.get("registered_at"),
            last_used_at: row.get("last_used_at"),
        }
    }

    fn delivery_from_row(row: &sqlx::postgres::PgRow) -> AppResult<ChannelDelivery> {
        let channel: String = row.get("channel");
        let state: String = row.get("state");
        Ok(ChannelDelivery {
            id: row.get("id"),
            notification_id: row.get("notification_id"),
            channel: DeliveryChannel::parse(&channel)
                .ok_or_else(|| AppError::Database(format!("unknown channel: {}", channel)))?,
            state: DeliveryState::parse(&state),
            detail: row.get("detail"),
            attempted_at: row.get("attempted_at"),
        })
    }
}

#[async_trait]
impl Storage for PgStore {
    async fn insert_session(
        &self,
        session: &ChatSession,
        participants: &[Participant],
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_sessions (
                id, title, status, initiator_id, assigned_agent_id, metadata,
                created_at, started_at, last_activity_at, total_messages
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0)
            "#,
        )
        .bind(session.id)
        .bind(&session.title)
        .bind(session.status.as_str())
        .bind(session.initiator_id)
        .bind(session.assigned_agent_id)
        .bind(&session.metadata)
        .bind(session.created_at)
        .bind(session.started_at)
        .bind(session.last_activity_at)
        .execute(&mut *tx)
        .await?;

        for p in participants {
            sqlx::query(
                r#"
                INSERT INTO chat_participants (
                    id, session_id, identity, role, is_active, joined_at
                ) VALUES ($1, $2, $3, $4, true, $5)
                "#,
            )
            .bind(p.id)
            .bind(p.session_id)
            .bind(p.identity)
            .bind(p.role.as_str())
            .bind(p.joined_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_session(&self, session_id: Uuid) -> AppResult<Option<ChatSession>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, status, initiator_id, assigned_agent_id, metadata,
                   created_at, started_at, closed_at, close_reason,
                   last_activity_at, total_messages
            FROM chat_sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| Self::session_from_row(&r)))
    }

    async fn activate_session(&self, session_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = 'active', started_at = $1, last_activity_at = $1
            WHERE id = $2 AND status = 'open'
            "#,
        )
        .bind(at)
        .bind(session_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE chat_sessions
            SET status = 'closed', closed_at = $1, close_reason = $2
            WHERE id = $3 AND status <> 'closed'
            "#,
        )
        .bind(at)
        .bind(reason)
        .bind(session_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn upsert_participant(&self, participant: &Participant) -> AppResult<Participant> {
        let row = sqlx::query(
            r#"
            INSERT INTO chat_participants (
                id, session_id, identity, role, is_active, joined_at
            ) VALUES ($1, $2, $3, $4, true, $5)
            ON CONFLICT (session_id, identity) DO UPDATE
            SET is_active = true, left_at = NULL, role = $4
            RETURNING id, session_id, identity, role, is_active, joined_at, left_at
            "#,
        )
        .bind(participant.id)
        .bind(participant.session_id)
        .bind(participant.identity)
        .bind(participant.role.as_str())
        .bind(participant.joined_at)
        .fetch_one(&self.db)
        .await?;

        Ok(Self::participant_from_row(&row))
    }

    async fn get_participant(
        &self,
        session_id: Uuid,
        identity: Uuid,
    ) -> AppResult<Option<Participant>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, identity, role, is_active, joined_at, left_at
            FROM chat_participants
            WHERE session_id = $1 AND identity = $2
            "#,
        )
        .bind(session_id)
        .bind(identity)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| Self::participant_from_row(&r)))
    }

    async fn list_participants(&self, session_id: Uuid) -> AppResult<Vec<Participant>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, identity, role, is_active, joined_at, left_at
            FROM chat_participants
            WHERE session_id = $1 AND is_active = true
            ORDER BY joined_at ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(Self::participant_from_row).collect())
    }

    async fn insert_message(&self, message: &ChatMessage) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_messages (
                id, session_id, sender_id, body, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE chat_sessions
            SET total_messages = total_messages + 1, last_activity_at = $1
            WHERE id = $2
            "#,
        )
        .bind(message.created_at)
        .bind(message.session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> AppResult<Option<ChatMessage>> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, sender_id, body, status, created_at,
                   delivered_at, read_at
            FROM chat_messages
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| Self::message_from_row(&r)))
    }

    async fn update_message_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        match status {
            MessageStatus::Delivered => {
                sqlx::query(
                    r#"
                    UPDATE chat_messages
                    SET status = $1, delivered_at = $2
                    WHERE id = $3
                    "#,
                )
                .bind(status.as_str())
                .bind(at)
                .bind(message_id)
                .execute(&self.db)
                .await?;
            }
            MessageStatus::Read => {
                sqlx::query(
                    r#"
                    UPDATE chat_messages
                    SET status = $1, read_at = $2
                    WHERE id = $3
                    "#,
                )
                .bind(status.as_str())
                .bind(at)
                .bind(message_id)
                .execute(&self.db)
                .await?;
            }
            _ => {
                sqlx::query(
                    r#"
                    UPDATE chat_messages
                    SET status = $1
                    WHERE id = $2
                    "#,
                )
                .bind(status.as_str())
                .bind(message_id)
                .execute(&self.db)
                .await?;
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
        let limit = limit.min(200);
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, sender_id, body, status, created_at,
                   delivered_at, read_at
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(Self::message_from_row).collect())
    }

    async fn insert_notification(
        &self,
        notification: &Notification,
        deliveries: &[ChannelDelivery],
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, recipient_id, title, body, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.id)
        .bind(notification.recipient_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.metadata)
        .bind(notification.created_at)
        .execute(&mut *tx)
        .await?;

        for d in deliveries {
            sqlx::query(
                r#"
                INSERT INTO notification_deliveries (
                    id, notification_id, channel, state, detail, attempted_at
                ) VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(d.id)
            .bind(d.notification_id)
            .bind(d.channel.as_str())
            .bind(d.state.as_str())
            .bind(&d.detail)
            .bind(d.attempted_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_channel_delivery(
        &self,
        delivery_id: Uuid,
        state: DeliveryState,
        detail: Option<&str>,
        attempted_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET state = $1, detail = $2, attempted_at = $3
            WHERE id = $4
            "#,
        )
        .bind(state.as_str())
        .bind(detail)
        .bind(attempted_at)
        .bind(delivery_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_channel_deliveries(
        &self,
        notification_id: Uuid,
    ) -> AppResult<Vec<ChannelDelivery>> {
        let rows = sqlx::query(
            r#"
            SELECT id, notification_id, channel, state, detail, attempted_at
            FROM notification_deliveries
            WHERE notification_id = $1
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Self::delivery_from_row).collect()
    }

    async fn upsert_device_token(
        &self,
        identity: Uuid,
        platform: DevicePlatform,
        token: &str,
    ) -> AppResult<DeviceToken> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let row = sqlx::query(
            r#"
            INSERT INTO device_tokens (
                id, identity, platform, token, status, registered_at
            ) VALUES ($1, $2, $3, $4, 'active', $5)
            ON CONFLICT (identity, token) DO UPDATE
            SET status = 'active', platform = $3, last_used_at = $5
            RETURNING id, identity, platform, token, status, registered_at, last_used_at
            "#,
        )
        .bind(id)
        .bind(identity)
        .bind(platform.as_str())
        .bind(token)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(Self::token_from_row(&row))
    }

    async fn revoke_device_token(&self, identity: Uuid, token: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE device_tokens
            SET status = 'revoked'
            WHERE identity = $1 AND token = $2 AND status <> 'revoked'
            "#,
        )
        .bind(identity)
        .bind(token)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_token_revoked(&self, token_id: Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE device_tokens
            SET status = 'revoked'
            WHERE id = $1
            "#,
        )
        .bind(token_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn active_tokens(&self, identity: Uuid) -> AppResult<Vec<DeviceToken>> {
        let rows = sqlx::query(
            r#"
            SELECT id, identity, platform, token, status, registered_at, last_used_at
            FROM device_tokens
            WHERE identity = $1 AND status = 'active'
            ORDER BY registered_at ASC
            "#,
        )
        .bind(identity)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(Self::token_from_row).collect())
    }

    async fn list_tokens(&self, identity: Uuid) -> AppResult<Vec<DeviceToken>> {
        let rows = sqlx::query(
            r#"
            SELECT id, identity, platform, token, status, registered_at, last_used_at
            FROM device_tokens
            WHERE identity = $1
            ORDER BY registered_at ASC
            "#,
        )
        .bind(identity)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(Self::token_from_row).collect())
    }

    async fn get_preference(
        &self,
        identity: Uuid,
        channel: DeliveryChannel,
    ) -> AppResult<Option<ChannelPreference>> {
        let row = sqlx::query(
            r#"
            SELECT identity, channel, enabled, updated_at
            FROM channel_preferences
            WHERE identity = $1 AND channel = $2
            "#,
        )
        .bind(identity)
        .bind(channel.as_str())
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| {
            let enabled: bool = r.get("enabled");
            ChannelPreference {
                identity: r.get("identity"),
                channel,
                enabled,
                updated_at: r.get("updated_at"),
            }
        }))
    }

    async fn set_preference(
        &self,
        identity: Uuid,
        channel: DeliveryChannel,
        enabled: bool,
    ) -> AppResult<ChannelPreference> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO channel_preferences (identity, channel, enabled, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identity, channel) DO UPDATE
            SET enabled = $3, updated_at = $4
            "#,
        )
        .bind(identity)
        .bind(channel.as_str())
        .bind(enabled)
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(ChannelPreference {
            identity,
            channel,
            enabled,
            updated_at: now,
        })
    }

    async fn list_preferences(&self, identity: Uuid) -> AppResult<Vec<ChannelPreference>> {
        let rows = sqlx::query(
            r#"
            SELECT identity, channel, enabled, updated_at
            FROM channel_preferences
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_all(&self.db)
        .await?;

        let mut prefs = Vec::with_capacity(rows.len());
        for r in rows {
            let channel: String = r.get("channel");
            let channel = DeliveryChannel::parse(&channel)
                .ok_or_else(|| AppError::Database(format!("unknown channel: {}", channel)))?;
            prefs.push(ChannelPreference {
                identity: r.get("identity"),
                channel,
                enabled: r.get("enabled"),
                updated_at: r.get("updated_at"),
            });
        }
        Ok(prefs)
    }

    async fn insert_inbox_entry(&self, entry: &InboxEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inbox_notifications (
                id, recipient_id, notification_id, title, body, is_read, created_at
            ) VALUES ($1, $2, $3, $4, $5, false, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.recipient_id)
        .bind(entry.notification_id)
        .bind(&entry.title)
        .bind(&entry.body)
        .bind(entry.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_inbox(
        &self,
        recipient_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<InboxEntry>> {
        let limit = limit.min(100);
        let rows = sqlx::query(
            r#"
            SELECT id, recipient_id, notification_id, title, body, is_read,
                   read_at, created_at
            FROM inbox_notifications
            WHERE recipient_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(recipient_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .iter()
            .map(|r| InboxEntry {
                id: r.get("id"),
                recipient_id: r.get("recipient_id"),
                notification_id: r.get("notification_id"),
                title: r.get("title"),
                body: r.get("body"),
                is_read: r.get("is_read"),
                read_at: r.get("read_at"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn mark_inbox_read(&self, entry_id: Uuid, at: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_notifications
            SET is_read = true, read_at = $1
            WHERE id = $2 AND is_read = false
            "#,
        )
        .bind(at)
        .bind(entry_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn session_counts(&self, since: DateTime<Utc>) -> AppResult<SessionCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'open') AS open_count,
                COUNT(*) FILTER (WHERE status = 'active') AS active_count,
                COUNT(*) FILTER (WHERE status = 'closed' AND closed_at >= $1) AS closed_count
            FROM chat_sessions
            "#,
        )
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(SessionCounts {
            open: row.get("open_count"),
            active: row.get("active_count"),
            closed: row.get("closed_count"),
        })
    }

    async fn messages_since(&self, since: DateTime<Utc>) -> AppResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS message_count
            FROM chat_messages
            WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(row.get("message_count"))
    }

    async fn delivery_counts(&self, since: DateTime<Utc>) -> AppResult<DeliveryCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'sent') AS sent_count,
                COUNT(*) FILTER (WHERE state = 'failed') AS failed_count,
                COUNT(*) FILTER (WHERE state = 'suppressed') AS suppressed_count
            FROM notification_deliveries d
            JOIN notifications n ON n.id = d.notification_id
            WHERE n.created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(DeliveryCounts {
            sent: row.get("sent_count"),
            failed: row.get("failed_count"),
            suppressed: row.get("suppressed_count"),
        })
    }

    async fn list_open_sessions(&self, limit: i64) -> AppResult<Vec<ChatSession>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, status, initiator_id, assigned_agent_id, metadata,
                   created_at, started_at, closed_at, close_reason,
                   last_activity_at, total_messages
            FROM chat_sessions
            WHERE status = 'open'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(|r| Self::session_from_row(r)).collect())
    }
}
