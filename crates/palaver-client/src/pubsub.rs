//! Pub/sub session management: subscribe/unsubscribe lifecycle for the
//! conversation and user channels, plus the loop that routes inbound
//! events into the conversation store and out to the host as typed
//! events.
//!
//! The transport itself is an external collaborator behind
//! [`PubSubTransport`]; this module only owns handle bookkeeping and
//! routing. Subscription failures are not retried here; callers decide.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use palaver_shared::types::Role;
use palaver_shared::Message;
use palaver_store::ConversationCommand;

use crate::error::Result;
use crate::events::WidgetEvent;
use crate::session::Session;

/// Inbound event delivered by the transport on a subscribed channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A message was published on the conversation channel.
    Message {
        message: Message,
        /// Device that produced the message, when the transport knows it.
        /// Used to skip this client's own echoes.
        source_device: Option<String>,
    },
    /// Typing/presence activity on the conversation.
    Activity { role: Role, active: bool },
    /// The conversation changed elsewhere (another device, a channel
    /// link); the client should re-fetch.
    ConversationUpdated,
}

/// An active channel subscription. Cancelling (or dropping) the handle
/// tears the subscription down.
pub struct Subscription {
    channel: String,
    canceller: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, canceller: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            channel: channel.into(),
            canceller: Some(canceller),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.canceller.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.canceller.take() {
            cancel();
        }
    }
}

/// Transport seam: a named channel is subscribed with a sink for inbound
/// events and yields a cancellable handle.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn subscribe(
        &self,
        channel: &str,
        sink: mpsc::Sender<ChannelEvent>,
    ) -> Result<Subscription>;

    /// Clear transport-level connection state. Safe to call with no
    /// active subscriptions.
    fn disconnect(&self) {}
}

pub fn conversation_channel(conversation_id: &str) -> String {
    format!("/v1/conversations/{conversation_id}")
}

pub fn conversation_activity_channel(conversation_id: &str) -> String {
    format!("/v1/conversations/{conversation_id}/activity")
}

pub fn user_channel(user_id: &str) -> String {
    format!("/v1/appusers/{user_id}")
}

impl Session {
    /// Subscribe to the conversation message and activity channels.
    /// No-op when already subscribed or when no conversation exists yet.
    pub async fn connect_conversation(self: &Arc<Self>) -> Result<()> {
        let conversation_id = {
            let state = self.state.lock().unwrap();
            if state.conversation_sub.is_some() {
                return Ok(());
            }
            match state.conversation.conversation_id.clone() {
                Some(id) => id,
                None => return Ok(()),
            }
        };

        let (messages, activity) = futures::future::try_join(
            self.transport
                .subscribe(&conversation_channel(&conversation_id), self.channel_tx.clone()),
            self.transport.subscribe(
                &conversation_activity_channel(&conversation_id),
                self.channel_tx.clone(),
            ),
        )
        .await?;

        let mut state = self.state.lock().unwrap();
        if state.conversation_sub.is_some() {
            // lost a subscribe race; the fresh handles cancel on drop
            return Ok(());
        }
        debug!(conversation = %conversation_id, "Subscribed to conversation channels");
        state.conversation_sub = Some((messages, activity));
        Ok(())
    }

    /// Subscribe to the user channel. No-op when already subscribed or
    /// not logged in.
    pub async fn connect_user(self: &Arc<Self>) -> Result<()> {
        let user_id = {
            let state = self.state.lock().unwrap();
            if state.user_sub.is_some() {
                return Ok(());
            }
            match state.user.id.clone() {
                Some(id) => id,
                None => return Ok(()),
            }
        };

        let subscription = self
            .transport
            .subscribe(&user_channel(&user_id), self.channel_tx.clone())
            .await?;

        let mut state = self.state.lock().unwrap();
        if state.user_sub.is_some() {
            return Ok(());
        }
        debug!(user = %user_id, "Subscribed to user channel");
        state.user_sub = Some(subscription);
        Ok(())
    }

    /// Cancel all subscriptions and clear transport connection state.
    /// Safe when nothing is subscribed.
    pub fn disconnect_pubsub(&self) {
        let (conversation, user) = {
            let mut state = self.state.lock().unwrap();
            (state.conversation_sub.take(), state.user_sub.take())
        };

        if let Some((messages, activity)) = conversation {
            messages.cancel();
            activity.cancel();
        }
        if let Some(subscription) = user {
            subscription.cancel();
        }

        self.transport.disconnect();
    }

    /// Inbound routing loop. Runs until every sender half of the channel
    /// is gone or the façade aborts it on destroy.
    pub(crate) async fn run_channel_events(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ChannelEvent>,
    ) {
        debug!("Channel event loop started");
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Message {
                    message,
                    source_device,
                } => self.handle_inbound_message(message, source_device),
                ChannelEvent::Activity { role, active } => {
                    self.emitter.emit(WidgetEvent::Typing { role, active });
                }
                ChannelEvent::ConversationUpdated => {
                    if let Err(e) = self.handle_conversation_updated().await {
                        warn!(error = %e, "Conversation refresh after update signal failed");
                    }
                }
            }
        }
        debug!("Channel event loop ended");
    }

    fn handle_inbound_message(&self, message: Message, source_device: Option<String>) {
        if source_device.as_deref() == Some(self.device_id.as_str()) {
            // own echo; the send pipeline already reconciled it
            return;
        }

        let incremented = message.role != Role::AppUser;
        let unread_count = {
            let mut state = self.state.lock().unwrap();
            if incremented {
                state.conversation.apply(ConversationCommand::IncrementUnread);
            }
            state
                .conversation
                .apply(ConversationCommand::AddMessage(message.clone()));
            state.conversation.unread_count
        };

        self.emitter.emit(WidgetEvent::MessageReceived { message });
        if incremented {
            self.emitter.emit(WidgetEvent::UnreadCount {
                count: unread_count,
            });
        }
    }
}
