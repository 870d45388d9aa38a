//! Notification fan-out
//!
//! Dispatches one logical notification across the requested channels,
//! recording exactly one terminal state per channel. Preference-suppressed
//! channels are never attempted. Push goes token-by-token through the
//! gateway adapter; permanent provider rejections revoke the token,
//! transient ones leave it for the next dispatch cycle (retries are
//! caller-driven, at most once per dispatch call).

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    ChannelDelivery, DeliveryChannel, DeliveryState, DevicePlatform, DeviceToken, DispatchReceipt,
    InboxEntry, Notification, NotificationRequest,
};
use crate::services::push_gateway::{EmailRelay, PushGateway, PushOutcome, PushPayload};
use crate::storage::Storage;
use crate::websocket::{ConnectionRegistry, WsEvent};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct DeliveryDispatcher {
    storage: Arc<dyn Storage>,
    registry: ConnectionRegistry,
    push_gateway: Option<Arc<dyn PushGateway>>,
    email_relay: Option<Arc<dyn EmailRelay>>,
}

impl DeliveryDispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: ConnectionRegistry,
        push_gateway: Option<Arc<dyn PushGateway>>,
        email_relay: Option<Arc<dyn EmailRelay>>,
    ) -> Self {
        Self {
            storage,
            registry,
            push_gateway,
            email_relay,
        }
    }

    /// Fan one notification out across its requested channels.
    ///
    /// The notification and its pending per-channel records are persisted
    /// before any delivery attempt; a persistence failure fails the whole
    /// call. Partial success is reported per channel, never collapsed
    /// into one pass/fail.
    pub async fn dispatch(&self, request: NotificationRequest) -> AppResult<DispatchReceipt> {
        if request.channels.is_empty() {
            return Err(AppError::BadRequest("no channels requested".into()));
        }

        let mut channels: Vec<DeliveryChannel> = Vec::new();
        for channel in &request.channels {
            if !channels.contains(channel) {
                channels.push(*channel);
            }
        }

        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: request.recipient_id,
            title: request.title.clone(),
            body: request.body.clone(),
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        };

        let mut deliveries: Vec<ChannelDelivery> = channels
            .iter()
            .map(|channel| ChannelDelivery {
                id: Uuid::new_v4(),
                notification_id: notification.id,
                channel: *channel,
                state: DeliveryState::Pending,
                detail: None,
                attempted_at: None,
            })
            .collect();

        self.storage
            .insert_notification(&notification, &deliveries)
            .await?;

        for delivery in deliveries.iter_mut() {
            let enabled = self
                .channel_enabled(request.recipient_id, delivery.channel)
                .await?;
            if !enabled {
                delivery.state = DeliveryState::Suppressed;
                delivery.detail = Some("suppressed by preference".to_string());
                self.storage
                    .update_channel_delivery(
                        delivery.id,
                        delivery.state,
                        delivery.detail.as_deref(),
                        None,
                    )
                    .await?;
                metrics::observe_delivery(delivery.channel.as_str(), delivery.state.as_str());
                debug!(
                    "Channel {} suppressed for {}",
                    delivery.channel.as_str(),
                    request.recipient_id
                );
                continue;
            }

            let attempted_at = Utc::now();
            let (state, detail) = match delivery.channel {
                DeliveryChannel::Push => self.attempt_push(&notification).await,
                DeliveryChannel::Email => self.attempt_email(&notification).await,
                DeliveryChannel::InApp => self.attempt_in_app(&notification).await,
            };

            delivery.state = state;
            delivery.detail = detail;
            delivery.attempted_at = Some(attempted_at);
            self.storage
                .update_channel_delivery(
                    delivery.id,
                    delivery.state,
                    delivery.detail.as_deref(),
                    delivery.attempted_at,
                )
                .await?;
            metrics::observe_delivery(delivery.channel.as_str(), delivery.state.as_str());
        }

        let delivered = deliveries.iter().any(|d| d.state == DeliveryState::Sent);
        info!(
            "Dispatched notification {} to {} (delivered: {})",
            notification.id, request.recipient_id, delivered
        );

        Ok(DispatchReceipt {
            notification_id: notification.id,
            delivered,
            channels: deliveries,
        })
    }

    /// Missing preference records mean opted in
    async fn channel_enabled(&self, identity: Uuid, channel: DeliveryChannel) -> AppResult<bool> {
        Ok(self
            .storage
            .get_preference(identity, channel)
            .await?
            .map(|p| p.enabled)
            .unwrap_or(true))
    }

    /// Push to every active token; revoked tokens are never fetched, let
    /// alone attempted. Channel is sent when at least one token accepts.
    async fn attempt_push(&self, notification: &Notification) -> (DeliveryState, Option<String>) {
        let gateway = match &self.push_gateway {
            Some(gateway) => gateway,
            None => {
                warn!("Push requested but no gateway configured");
                return (
                    DeliveryState::Failed,
                    Some("push gateway not configured".to_string()),
                );
            }
        };

        let tokens = match self.storage.active_tokens(notification.recipient_id).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Failed to load device tokens: {}", e);
                return (DeliveryState::Failed, Some(e.to_string()));
            }
        };
        if tokens.is_empty() {
            return (
                DeliveryState::Failed,
                Some("no active device tokens".to_string()),
            );
        }

        let payload = PushPayload {
            title: notification.title.clone(),
            body: notification.body.clone(),
            data: notification.metadata.clone(),
        };

        let mut accepted: Option<String> = None;
        let mut last_error: Option<String> = None;
        for token in &tokens {
            match gateway.send_push(token, &payload).await {
                PushOutcome::Sent {
                    provider_message_id,
                } => {
                    debug!(
                        "Push accepted for token {} ({})",
                        token.id, provider_message_id
                    );
                    if accepted.is_none() {
                        accepted = Some(provider_message_id);
                    }
                }
                PushOutcome::PermanentFailure(reason) => {
                    warn!("Token {} permanently rejected: {}", token.id, reason);
                    if let Err(e) = self.storage.mark_token_revoked(token.id).await {
                        warn!("Failed to revoke token {}: {}", token.id, e);
                    }
                    last_error = Some(reason);
                }
                PushOutcome::TransientFailure(reason) => {
                    // Token stays active; the next dispatch retries it
                    warn!("Token {} transient failure: {}", token.id, reason);
                    last_error = Some(reason);
                }
            }
        }

        match accepted {
            Some(message_id) => (DeliveryState::Sent, Some(message_id)),
            None => (DeliveryState::Failed, last_error),
        }
    }

    async fn attempt_email(&self, notification: &Notification) -> (DeliveryState, Option<String>) {
        let relay = match &self.email_relay {
            Some(relay) => relay,
            None => {
                warn!("Email requested but no relay configured");
                return (
                    DeliveryState::Failed,
                    Some("email relay not configured".to_string()),
                );
            }
        };

        match relay
            .send_email(
                notification.recipient_id,
                &notification.title,
                &notification.body,
            )
            .await
        {
            Ok(()) => (DeliveryState::Sent, None),
            Err(reason) => {
                warn!(
                    "Email relay failed for {}: {}",
                    notification.recipient_id, reason
                );
                (DeliveryState::Failed, Some(reason))
            }
        }
    }

    /// Write to the persisted inbox, then push to a live connection when
    /// one exists. The channel is sent once the inbox write lands; the
    /// realtime push is best-effort on top.
    async fn attempt_in_app(&self, notification: &Notification) -> (DeliveryState, Option<String>) {
        let entry = InboxEntry {
            id: Uuid::new_v4(),
            recipient_id: notification.recipient_id,
            notification_id: notification.id,
            title: notification.title.clone(),
            body: notification.body.clone(),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };

        if let Err(e) = self.storage.insert_inbox_entry(&entry).await {
            warn!("Inbox write failed for {}: {}", notification.id, e);
            return (DeliveryState::Failed, Some(e.to_string()));
        }

        let pushed = self.registry.send(
            notification.recipient_id,
            WsEvent::notification(notification.id, &notification.title, &notification.body),
        );
        debug!(
            "In-app notification {} stored (live push: {})",
            notification.id, pushed
        );

        (DeliveryState::Sent, None)
    }

    // -- device token management -----------------------------------------

    pub async fn register_device_token(
        &self,
        identity: Uuid,
        platform: DevicePlatform,
        token: &str,
    ) -> AppResult<DeviceToken> {
        if token.trim().is_empty() {
            return Err(AppError::BadRequest("device token cannot be empty".into()));
        }
        let device = self
            .storage
            .upsert_device_token(identity, platform, token)
            .await?;
        info!("Registered device token for {}", identity);
        Ok(device)
    }

    pub async fn remove_device_token(&self, identity: Uuid, token: &str) -> AppResult<bool> {
        let removed = self.storage.revoke_device_token(identity, token).await?;
        if removed {
            debug!("Revoked device token for {}", identity);
        }
        Ok(removed)
    }

    pub async fn device_tokens(&self, identity: Uuid) -> AppResult<Vec<DeviceToken>> {
        self.storage.list_tokens(identity).await
    }

    // -- in-app inbox ------------------------------------------------------

    pub async fn inbox(
        &self,
        recipient_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<InboxEntry>> {
        self.storage.list_inbox(recipient_id, limit, offset).await
    }

    pub async fn mark_inbox_read(&self, entry_id: Uuid) -> AppResult<bool> {
        self.storage.mark_inbox_read(entry_id, Utc::now()).await
    }
}
