//! Chat session lifecycle and message flow
//!
//! State machine: OPEN -> ACTIVE -> CLOSED, with OPEN -> CLOSED allowed
//! and CLOSED terminal. All mutations for one session are serialized
//! behind a per-session mutex (single writer per session); mutations on
//! different sessions never contend. The guard covers only the persisted
//! write; it is released before broadcast so a slow client cannot stall
//! unrelated posts.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    ChatMessage, ChatSession, MessageStatus, Participant, ParticipantRole, SessionStatus,
};
use crate::storage::Storage;
use crate::websocket::{ConnectionRegistry, WsEvent};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SessionService {
    storage: Arc<dyn Storage>,
    registry: ConnectionRegistry,
    /// Per-session write locks; entries are dropped when a session closes
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SessionService {
    pub fn new(storage: Arc<dyn Storage>, registry: ConnectionRegistry) -> Self {
        Self {
            storage,
            registry,
            locks: DashMap::new(),
        }
    }

    fn session_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Open a new session.
    ///
    /// Starts OPEN, or ACTIVE when an agent is assigned at open time. The
    /// initiator always joins as owner.
    pub async fn open_session(
        &self,
        initiator: Uuid,
        assigned_agent: Option<Uuid>,
        title: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> AppResult<ChatSession> {
        let now = Utc::now();
        let status = if assigned_agent.is_some() {
            SessionStatus::Active
        } else {
            SessionStatus::Open
        };

        let session = ChatSession {
            id: Uuid::new_v4(),
            title,
            status,
            initiator_id: initiator,
            assigned_agent_id: assigned_agent,
            metadata,
            created_at: now,
            started_at: assigned_agent.map(|_| now),
            closed_at: None,
            close_reason: None,
            last_activity_at: now,
            total_messages: 0,
        };

        let mut participants = vec![Participant {
            id: Uuid::new_v4(),
            session_id: session.id,
            identity: initiator,
            role: ParticipantRole::Owner,
            is_active: true,
            joined_at: now,
            left_at: None,
        }];
        if let Some(agent) = assigned_agent {
            participants.push(Participant {
                id: Uuid::new_v4(),
                session_id: session.id,
                identity: agent,
                role: ParticipantRole::SupportAgent,
                is_active: true,
                joined_at: now,
                left_at: None,
            });
        }

        self.storage.insert_session(&session, &participants).await?;
        metrics::observe_session_opened();

        info!(
            "Session {} opened by {} (status: {})",
            session.id,
            initiator,
            session.status.as_str()
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> AppResult<ChatSession> {
        self.storage
            .get_session(session_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn participants(&self, session_id: Uuid) -> AppResult<Vec<Participant>> {
        // Surface missing sessions instead of an empty participant list
        self.get_session(session_id).await?;
        self.storage.list_participants(session_id).await
    }

    /// Add (or re-activate) a participant.
    ///
    /// The first privileged joiner flips an OPEN session to ACTIVE. Fails
    /// on CLOSED sessions: that lifecycle is terminal.
    pub async fn add_participant(
        &self,
        session_id: Uuid,
        identity: Uuid,
        role: ParticipantRole,
    ) -> AppResult<Participant> {
        let lock = self.session_lock(session_id);
        let guard = lock.lock().await;

        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Closed {
            return Err(AppError::InvalidTransition {
                from: SessionStatus::Closed,
                to: SessionStatus::Active,
            });
        }

        let now = Utc::now();
        let participant = self
            .storage
            .upsert_participant(&Participant {
                id: Uuid::new_v4(),
                session_id,
                identity,
                role,
                is_active: true,
                joined_at: now,
                left_at: None,
            })
            .await?;

        if role.is_privileged() && session.status == SessionStatus::Open {
            self.storage.activate_session(session_id, now).await?;
            info!("Session {} activated by {} joining", session_id, identity);
        }

        drop(guard);

        self.registry.broadcast(
            session_id,
            WsEvent::ParticipantJoined {
                session_id,
                identity,
                role,
            },
            None,
        );

        Ok(participant)
    }

    /// Append a message to a session and fan it out.
    ///
    /// The message is persisted in `sent` status before anything touches
    /// the registry; a persistence failure fails the whole operation and
    /// nothing is broadcast. Participants with a live connection at
    /// broadcast time get the message pushed and the status advances to
    /// `delivered`; everyone else fetches history and acknowledges
    /// explicitly.
    pub async fn post_message(
        &self,
        session_id: Uuid,
        sender: Uuid,
        body: &str,
    ) -> AppResult<ChatMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::BadRequest("message body cannot be empty".into()));
        }

        let lock = self.session_lock(session_id);
        let guard = lock.lock().await;

        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Closed {
            return Err(AppError::SessionClosed);
        }

        let participant = self.storage.get_participant(session_id, sender).await?;
        if !participant.map(|p| p.is_active).unwrap_or(false) {
            return Err(AppError::NotAParticipant);
        }

        let mut message = ChatMessage {
            id: Uuid::new_v4(),
            session_id,
            sender_id: sender,
            body: body.to_string(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            delivered_at: None,
            read_at: None,
        };

        self.storage.insert_message(&message).await?;
        metrics::observe_message_posted();

        // Persisted; release the session before any fan-out I/O
        drop(guard);

        let delivered_to = self.registry.broadcast(
            session_id,
            WsEvent::message_new(message.id, session_id, sender, body),
            Some(sender),
        );

        if !delivered_to.is_empty() {
            let now = Utc::now();
            if let Err(e) = self
                .storage
                .update_message_status(message.id, MessageStatus::Delivered, now)
                .await
            {
                // The fan-out already happened; delivery tracking catches up
                // on the next client acknowledgment
                warn!("Failed to record delivery for {}: {}", message.id, e);
            } else {
                message.status = MessageStatus::Delivered;
                message.delivered_at = Some(now);
            }
        }

        debug!(
            "Message {} posted to {} ({} live recipients)",
            message.id,
            session_id,
            delivered_to.len()
        );
        Ok(message)
    }

    /// Explicit client acknowledgment: advance a message to `delivered`
    /// or `read`.
    ///
    /// Status only ever moves forward; a stale acknowledgment (e.g. a
    /// second device reporting `delivered` after `read`) is a no-op, not
    /// an error.
    pub async fn acknowledge(
        &self,
        message_id: Uuid,
        identity: Uuid,
        target: MessageStatus,
    ) -> AppResult<ChatMessage> {
        if !matches!(target, MessageStatus::Delivered | MessageStatus::Read) {
            return Err(AppError::BadRequest(format!(
                "cannot acknowledge to status {}",
                target.as_str()
            )));
        }

        let mut message = self
            .storage
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let participant = self
            .storage
            .get_participant(message.session_id, identity)
            .await?;
        if !participant.map(|p| p.is_active).unwrap_or(false) {
            return Err(AppError::NotAParticipant);
        }

        let lock = self.session_lock(message.session_id);
        let _guard = lock.lock().await;

        if !message.status.can_advance_to(target) {
            debug!(
                "Ignoring stale ack for {}: {} -> {}",
                message_id,
                message.status.as_str(),
                target.as_str()
            );
            return Ok(message);
        }

        let now = Utc::now();
        self.storage
            .update_message_status(message_id, target, now)
            .await?;
        message.status = target;
        match target {
            MessageStatus::Delivered => message.delivered_at = Some(now),
            MessageStatus::Read => message.read_at = Some(now),
            _ => {}
        }
        Ok(message)
    }

    /// Close a session. Idempotent: closing a closed session is a no-op.
    pub async fn close_session(
        &self,
        session_id: Uuid,
        reason: Option<&str>,
    ) -> AppResult<ChatSession> {
        let lock = self.session_lock(session_id);
        let guard = lock.lock().await;

        let session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Closed {
            debug!("Session {} already closed", session_id);
            return Ok(session);
        }

        let now = Utc::now();
        self.storage.close_session(session_id, now, reason).await?;
        metrics::observe_session_closed();

        drop(guard);
        self.locks.remove(&session_id);

        self.registry.broadcast(
            session_id,
            WsEvent::SessionClosed {
                session_id,
                reason: reason.map(String::from),
            },
            None,
        );

        info!("Session {} closed ({})", session_id, reason.unwrap_or("-"));
        let mut session = session;
        session.status = SessionStatus::Closed;
        session.closed_at = Some(now);
        session.close_reason = reason.map(String::from);
        Ok(session)
    }

    /// Chronological message page; clients use this instead of any
    /// implicit replay on reconnect.
    pub async fn message_history(
        &self,
        session_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ChatMessage>> {
        self.get_session(session_id).await?;
        self.storage.list_messages(session_id, limit, offset).await
    }

    /// Relay a typing indicator to the session. Transient: nothing is
    /// persisted and failures are ignored.
    pub fn relay_typing(&self, session_id: Uuid, identity: Uuid, is_typing: bool) {
        self.registry.broadcast(
            session_id,
            WsEvent::Typing {
                session_id,
                identity,
                is_typing,
            },
            Some(identity),
        );
    }
}
