//! Operational read-side aggregation
//!
//! Computes counts and rates over persisted state plus the live registry.
//! Strictly read-only, and failure-tolerant: a storage error degrades the
//! affected figures to zero instead of propagating.

use crate::models::ChatSession;
use crate::storage::{DeliveryCounts, SessionCounts, Storage};
use crate::websocket::ConnectionRegistry;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub window_hours: i64,

    pub sessions_open: i64,
    pub sessions_active: i64,
    pub sessions_closed_in_window: i64,

    pub messages_in_window: i64,
    pub messages_per_hour: f64,

    pub deliveries_sent: i64,
    pub deliveries_failed: i64,
    pub deliveries_suppressed: i64,
    /// sent / (sent + failed); 0.0 when nothing was attempted
    pub delivery_success_rate: f64,

    pub live_connections: usize,
}

pub struct DashboardService {
    storage: Arc<dyn Storage>,
    registry: ConnectionRegistry,
    window_hours: i64,
}

impl DashboardService {
    pub fn new(storage: Arc<dyn Storage>, registry: ConnectionRegistry, window_hours: i64) -> Self {
        Self {
            storage,
            registry,
            window_hours,
        }
    }

    /// Aggregate stats over the trailing window. Never errors.
    pub async fn stats(&self) -> DashboardStats {
        let since = Utc::now() - Duration::hours(self.window_hours);

        let sessions = match self.storage.session_counts(since).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Dashboard session counts unavailable: {}", e);
                SessionCounts::default()
            }
        };

        let messages = match self.storage.messages_since(since).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Dashboard message count unavailable: {}", e);
                0
            }
        };

        let deliveries = match self.storage.delivery_counts(since).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!("Dashboard delivery counts unavailable: {}", e);
                DeliveryCounts::default()
            }
        };

        let attempted = deliveries.sent + deliveries.failed;
        let delivery_success_rate = if attempted > 0 {
            deliveries.sent as f64 / attempted as f64
        } else {
            0.0
        };

        let messages_per_hour = if self.window_hours > 0 {
            messages as f64 / self.window_hours as f64
        } else {
            0.0
        };

        DashboardStats {
            window_hours: self.window_hours,
            sessions_open: sessions.open,
            sessions_active: sessions.active,
            sessions_closed_in_window: sessions.closed,
            messages_in_window: messages,
            messages_per_hour,
            deliveries_sent: deliveries.sent,
            deliveries_failed: deliveries.failed,
            deliveries_suppressed: deliveries.suppressed,
            delivery_success_rate,
            live_connections: self.registry.connection_count(),
        }
    }

    /// Sessions still waiting for an agent, oldest first. Empty on error.
    pub async fn waiting_sessions(&self, limit: i64) -> Vec<ChatSession> {
        match self.storage.list_open_sessions(limit).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Dashboard waiting list unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Connected members of one session, from the registry
    pub fn session_presence(&self, session_id: Uuid) -> usize {
        self.registry.session_member_count(session_id)
    }
}
