//! Observable events the widget exposes to the host page. The core never
//! renders anything; presentation layers subscribe here and read state
//! snapshots.

use tokio::sync::broadcast;

use palaver_shared::types::Role;
use palaver_shared::{Message, User};

pub const EVENT_READY: &str = "ready";
pub const EVENT_DESTROY: &str = "destroy";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_MESSAGE_SENT: &str = "message:sent";
pub const EVENT_MESSAGE_RECEIVED: &str = "message:received";
pub const EVENT_UNREAD_COUNT: &str = "unreadCount";
pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_TYPING: &str = "typing";

#[derive(Debug, Clone)]
pub enum WidgetEvent {
    /// Login completed; the widget is usable.
    Ready { user: User },
    Destroy,
    /// Any message confirmed in either direction.
    Message { message: Message },
    /// A message this client sent was confirmed by the server.
    MessageSent { message: Message },
    /// A message pushed over the realtime channel.
    MessageReceived { message: Message },
    UnreadCount { count: u32 },
    /// User-facing notice (invalid upload, location denied, channel
    /// linking prompt).
    Notification { text: String },
    /// Typing/presence activity on the conversation.
    Typing { role: Role, active: bool },
}

impl WidgetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WidgetEvent::Ready { .. } => EVENT_READY,
            WidgetEvent::Destroy => EVENT_DESTROY,
            WidgetEvent::Message { .. } => EVENT_MESSAGE,
            WidgetEvent::MessageSent { .. } => EVENT_MESSAGE_SENT,
            WidgetEvent::MessageReceived { .. } => EVENT_MESSAGE_RECEIVED,
            WidgetEvent::UnreadCount { .. } => EVENT_UNREAD_COUNT,
            WidgetEvent::Notification { .. } => EVENT_NOTIFICATION,
            WidgetEvent::Typing { .. } => EVENT_TYPING,
        }
    }
}

/// Broadcast fan-out of widget events. Emitting with no subscribers is
/// fine; events are simply dropped.
pub struct EventEmitter {
    tx: broadcast::Sender<WidgetEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: WidgetEvent) {
        // sent/received also fan out on the generic `message` event
        if let WidgetEvent::MessageSent { message } | WidgetEvent::MessageReceived { message } =
            &event
        {
            let _ = self.tx.send(WidgetEvent::Message {
                message: message.clone(),
            });
        }
        let _ = self.tx.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
