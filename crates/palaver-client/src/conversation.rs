//! Conversation synchronizer: reconciles optimistic local messages with
//! server-confirmed records across fetch, pagination, send, resend,
//! location, and image upload.
//!
//! The send pipeline is an explicit state machine per message:
//! `Sending -> Sent` (terminal) or `Sending -> Failed -> Sending` (retry
//! loop). Send failures never reject; the UI reads `send_status`.

use std::sync::Arc;

use tracing::{debug, warn};

use palaver_shared::constants::CONNECT_NOTIFICATION_DELAY_SECS;
use palaver_shared::media;
use palaver_shared::types::{epoch_seconds_now, Coordinates, MessageKey, Role, SendStatus};
use palaver_shared::user::{has_channel_linked, has_linkable_channels};
use palaver_shared::Message;
use palaver_store::{ConversationCommand, ConversationUpdate};

use crate::api::{MessagesResponse, SendMessageResponse};
use crate::error::{ClientError, Result};
use crate::events::WidgetEvent;
use crate::geo::GeoError;
use crate::session::Session;

/// Outgoing message content accepted from the host page.
#[derive(Debug, Clone)]
pub enum MessagePayload {
    Text(String),
    /// Location share; coordinates are acquired from the geolocator when
    /// not supplied.
    Location(Option<Coordinates>),
}

/// How an outgoing message reaches the backend.
#[derive(Clone, Copy)]
enum SendKind {
    Post,
    Upload,
}

impl Session {
    /// Fetch the current conversation window and replace local state
    /// wholesale. Concurrent triggers (UI mount, reconnect) coalesce into
    /// one round trip per user.
    pub async fn get_messages(self: &Arc<Self>) -> Result<MessagesResponse> {
        let user_id = self.require_user_id()?;
        let session = Arc::clone(self);
        let fetch_user = user_id.clone();
        self.fetch_throttle
            .exec(user_id, move || async move {
                session.fetch_conversation(&fetch_user).await
            })
            .await
    }

    async fn fetch_conversation(self: &Arc<Self>, user_id: &str) -> Result<MessagesResponse> {
        let response = self.api.get_messages(user_id, None).await?;
        {
            let mut state = self.state.lock().unwrap();
            state
                .conversation
                .apply(ConversationCommand::SetConversation(ConversationUpdate {
                    conversation_id: response.conversation.id.clone(),
                    unread_count: response.conversation.unread_count,
                    has_more_messages: Some(response.previous.is_some()),
                }));
            state
                .conversation
                .apply(ConversationCommand::SetMessages(response.messages.clone()));
        }
        Ok(response)
    }

    /// Fetch the page of history older than the earliest confirmed
    /// message. Guaranteed no-op (`Ok(None)`) when there is nothing more,
    /// a fetch is already in flight, or nothing confirmed is held yet.
    pub async fn fetch_more_messages(self: &Arc<Self>) -> Result<Option<MessagesResponse>> {
        let user_id = self.require_user_id()?;

        let before = {
            let mut state = self.state.lock().unwrap();
            if !state.conversation.has_more_messages || state.conversation.is_fetching_more {
                return Ok(None);
            }
            let Some(before) = state.conversation.earliest_received() else {
                return Ok(None);
            };
            state
                .conversation
                .apply(ConversationCommand::SetFetchingMore(true));
            before
        };

        match self.api.get_messages(&user_id, Some(before)).await {
            Ok(response) => {
                let mut state = self.state.lock().unwrap();
                state
                    .conversation
                    .apply(ConversationCommand::SetConversation(ConversationUpdate {
                        conversation_id: response.conversation.id.clone(),
                        has_more_messages: Some(response.previous.is_some()),
                        ..ConversationUpdate::default()
                    }));
                state
                    .conversation
                    .apply(ConversationCommand::PrependMessages(
                        response.messages.clone(),
                    ));
                state
                    .conversation
                    .apply(ConversationCommand::SetFetchingMore(false));
                Ok(Some(response))
            }
            Err(e) => {
                self.apply(ConversationCommand::SetFetchingMore(false));
                Err(e)
            }
        }
    }

    /// Send a message: insert an optimistic record immediately, then run
    /// the send pipeline. Resolves with the final local record; network
    /// failures are absorbed into `send_status = failed`.
    pub async fn send_message(self: &Arc<Self>, payload: MessagePayload) -> Result<Message> {
        self.require_user_id()?;
        match payload {
            MessagePayload::Text(text) => {
                let message = self.add_optimistic(Message::outgoing_text(text));
                self.send_chain(SendKind::Post, message).await
            }
            MessagePayload::Location(coordinates) => {
                let message = self.add_optimistic(Message::outgoing_location(coordinates));
                self.acquire_and_send_location(message).await
            }
        }
    }

    /// Re-enter the send pipeline for a failed message, reusing its
    /// ephemeral id. Unknown ids are a silent no-op.
    pub async fn resend_message(self: &Arc<Self>, client_id: &str) -> Result<Option<Message>> {
        self.require_user_id()?;

        let existing = {
            let state = self.state.lock().unwrap();
            state.conversation.find_by_client_id(client_id).cloned()
        };
        let Some(mut message) = existing else {
            return Ok(None);
        };

        message.send_status = Some(SendStatus::Sending);
        self.apply(ConversationCommand::ReplaceMessage {
            key: MessageKey::ClientId(client_id.to_string()),
            message: message.clone(),
        });

        let sent = match message.kind {
            palaver_shared::types::MessageKind::Location if message.coordinates.is_none() => {
                self.acquire_and_send_location(message).await?
            }
            palaver_shared::types::MessageKind::Image
            | palaver_shared::types::MessageKind::File => {
                self.send_chain(SendKind::Upload, message).await?
            }
            _ => self.send_chain(SendKind::Post, message).await?,
        };
        Ok(Some(sent))
    }

    /// Validate, resize, and send an image. Unsupported types and resize
    /// failures raise a notification without creating an optimistic
    /// record.
    pub async fn upload_image(
        self: &Arc<Self>,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<Message>> {
        self.require_user_id()?;
        if !self.config.image_upload_enabled {
            return Err(ClientError::Validation("image upload is disabled".into()));
        }

        if !media::is_file_type_supported(mime_type) {
            self.emitter.emit(WidgetEvent::Notification {
                text: self.config.text.invalid_file_error.clone(),
            });
            return Ok(None);
        }

        let resized = match media::resize_image(&bytes) {
            Ok(resized) => resized,
            Err(e) => {
                debug!(error = %e, "Image resize failed");
                self.emitter.emit(WidgetEvent::Notification {
                    text: self.config.text.invalid_file_error.clone(),
                });
                return Ok(None);
            }
        };

        let data_url = media::to_data_url("image/jpeg", &resized);
        let message =
            self.add_optimistic(Message::outgoing_image(data_url, "image/jpeg".into()));
        self.send_chain(SendKind::Upload, message).await.map(Some)
    }

    /// Reset the unread counter locally and on the server. No network
    /// call when the counter is already zero.
    pub async fn reset_unread_count(&self) -> Result<()> {
        let user_id = self.require_user_id()?;
        {
            let state = self.state.lock().unwrap();
            if state.conversation.unread_count == 0 {
                return Ok(());
            }
        }
        self.apply(ConversationCommand::ResetUnread);
        self.emitter.emit(WidgetEvent::UnreadCount { count: 0 });
        self.api.reset_unread(&user_id).await
    }

    /// The conversation changed elsewhere: re-fetch and re-subscribe,
    /// unless a live subscription means we already saw the change.
    pub async fn handle_conversation_updated(self: &Arc<Self>) -> Result<()> {
        let subscribed = self.state.lock().unwrap().conversation_sub.is_some();
        if subscribed {
            return Ok(());
        }
        self.get_messages().await?;
        self.connect_conversation().await
    }

    /// Deliver an action postback. Best-effort: failures surface as a
    /// notification, never as an error.
    pub async fn post_postback(&self, action_id: &str) -> Result<()> {
        let user_id = self.require_user_id()?;
        if let Err(e) = self.api.post_postback(&user_id, action_id).await {
            debug!(error = %e, "Postback delivery failed");
            self.emitter.emit(WidgetEvent::Notification {
                text: self.config.text.action_postback_error.clone(),
            });
        }
        Ok(())
    }

    fn add_optimistic(&self, mut message: Message) -> Message {
        message.device_id = Some(self.device_id.clone());
        self.apply(ConversationCommand::AddMessage(message.clone()));
        message
    }

    /// The send pipeline. Hard ordering guarantee: any pending profile
    /// state is flushed before the message hits the network.
    async fn send_chain(self: &Arc<Self>, kind: SendKind, message: Message) -> Result<Message> {
        let profile_snapshot = {
            let state = self.state.lock().unwrap();
            state.user.editable_snapshot()
        };
        if let Err(e) = self.immediate_update(profile_snapshot).await {
            warn!(error = %e, "Profile sync failed ahead of message send");
            return Ok(self.mark_send_failed(message));
        }

        let user_id = match self.user_id() {
            Some(id) => id,
            None => return Ok(self.mark_send_failed(message)),
        };

        let result = match kind {
            SendKind::Post => self.api.send_message(&user_id, &message).await,
            SendKind::Upload => self.upload_blob(&user_id, &message).await,
        };

        match result {
            Ok(response) => {
                let confirmed = self.on_send_success(&message, response);
                self.after_send_best_effort().await;
                Ok(confirmed)
            }
            Err(e) => {
                debug!(error = %e, "Message send failed");
                Ok(self.mark_send_failed(message))
            }
        }
    }

    async fn upload_blob(&self, user_id: &str, message: &Message) -> Result<SendMessageResponse> {
        let data_url = message.media_url.as_deref().ok_or_else(|| {
            ClientError::Validation("image message has no media payload".into())
        })?;
        let (_mime, blob) = media::data_url_to_blob(data_url)?;
        self.api.upload_image(user_id, blob, &self.device_id).await
    }

    fn on_send_success(&self, message: &Message, response: SendMessageResponse) -> Message {
        let confirmed = response.message;
        {
            let mut state = self.state.lock().unwrap();
            state
                .conversation
                .apply(ConversationCommand::SetConversation(ConversationUpdate {
                    conversation_id: response.conversation.id.clone(),
                    ..ConversationUpdate::default()
                }));
            state.user.conversation_started = true;

            if let Some(client_id) = message.client_id.clone() {
                state
                    .conversation
                    .apply(ConversationCommand::ReplaceMessage {
                        key: MessageKey::ClientId(client_id),
                        message: confirmed.clone(),
                    });
            }
        }
        self.emitter.emit(WidgetEvent::MessageSent {
            message: confirmed.clone(),
        });
        confirmed
    }

    /// Post-send steps that must never fail the send: the channel-linking
    /// prompt heuristic and (re)subscribing to the conversation.
    async fn after_send_best_effort(self: &Arc<Self>) {
        self.maybe_notify_channel_linking();
        if let Err(e) = self.connect_conversation().await {
            debug!(error = %e, "Conversation subscription after send failed");
        }
    }

    fn mark_send_failed(&self, mut message: Message) -> Message {
        message.send_status = Some(SendStatus::Failed);
        if let Some(client_id) = message.client_id.clone() {
            self.apply(ConversationCommand::ReplaceMessage {
                key: MessageKey::ClientId(client_id),
                message: message.clone(),
            });
        }
        message
    }

    /// Acquire coordinates when missing, then send. Timeout (10 s by
    /// default) fails the message; a platform result arriving after the
    /// timeout is discarded with the dropped future. Permission and
    /// secure-context failures discard the optimistic record entirely;
    /// resending cannot succeed without user intervention.
    async fn acquire_and_send_location(self: &Arc<Self>, message: Message) -> Result<Message> {
        if message.coordinates.is_some() {
            return self.send_chain(SendKind::Post, message).await;
        }

        let acquisition = tokio::time::timeout(
            self.config.location_timeout,
            self.geolocator.current_position(),
        );

        match acquisition.await {
            Err(_) => {
                debug!("Geolocation acquisition timed out");
                Ok(self.mark_send_failed(message))
            }
            Ok(Ok(position)) => {
                let mut located = message;
                located.coordinates = Some(position.coords);
                if let Some(client_id) = located.client_id.clone() {
                    self.apply(ConversationCommand::ReplaceMessage {
                        key: MessageKey::ClientId(client_id),
                        message: located.clone(),
                    });
                }
                self.send_chain(SendKind::Post, located).await
            }
            Ok(Err(e)) if e.is_terminal() => {
                if let Some(client_id) = message.client_id.clone() {
                    self.apply(ConversationCommand::RemoveMessage(MessageKey::ClientId(
                        client_id,
                    )));
                }
                let text = match e {
                    GeoError::InsecureContext => {
                        self.config.text.location_security_restriction.clone()
                    }
                    _ => self.config.text.location_services_denied.clone(),
                };
                self.emitter.emit(WidgetEvent::Notification { text });
                Ok(message)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Geolocation acquisition failed");
                Ok(self.mark_send_failed(message))
            }
        }
    }

    /// Prompt the user to link another channel: only when linkable
    /// channels exist, none is linked, and this is either the first user
    /// message or the previous confirmed one is old enough.
    fn maybe_notify_channel_linking(&self) {
        let text = {
            let state = self.state.lock().unwrap();
            let Some(app) = &state.app else { return };
            if !has_linkable_channels(app) || has_channel_linked(app, &state.user.clients) {
                return;
            }

            let user_messages: Vec<&Message> = state
                .conversation
                .messages
                .iter()
                .filter(|m| m.role == Role::AppUser)
                .collect();

            let should_notify = if user_messages.len() == 1 {
                true
            } else {
                // previous confirmed user message, ignoring the one just sent
                user_messages
                    .iter()
                    .rev()
                    .skip(1)
                    .find_map(|m| m.received)
                    .is_some_and(|ts| {
                        epoch_seconds_now() - ts >= CONNECT_NOTIFICATION_DELAY_SECS
                    })
            };
            if !should_notify {
                return;
            }
            self.config.text.connect_notification.clone()
        };

        self.emitter.emit(WidgetEvent::Notification { text });
    }
}
