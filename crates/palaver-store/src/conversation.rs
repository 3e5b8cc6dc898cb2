//! The conversation reducer: an ordered message collection plus the
//! counters and pagination flags that travel with it.
//!
//! All mutations go through [`ConversationState::apply`] with a
//! [`ConversationCommand`], so the full reconciliation behavior (ordering,
//! dedupe, optimistic replace) is captured in one exhaustive match.

use std::cmp::Ordering;
use std::collections::HashSet;

use palaver_shared::types::{MessageKey, Role};
use palaver_shared::Message;

/// Conversation state as observed by the UI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    /// Server conversation identifier, once one exists.
    pub conversation_id: Option<String>,
    /// Messages in display order: confirmed ascending by `received`,
    /// then unconfirmed ascending by `client_sent`.
    pub messages: Vec<Message>,
    pub unread_count: u32,
    pub has_more_messages: bool,
    /// Guard flag: a pagination fetch is in flight.
    pub is_fetching_more: bool,
}

/// Server conversation metadata to merge into the state. Fields left as
/// `None` are untouched.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    pub conversation_id: Option<String>,
    pub unread_count: Option<u32>,
    pub has_more_messages: Option<bool>,
}

/// One mutation of the conversation.
#[derive(Debug, Clone)]
pub enum ConversationCommand {
    /// Back to the empty initial state (logout / login).
    Reset,
    /// Merge server conversation metadata; does not touch messages.
    SetConversation(ConversationUpdate),
    /// Replace the full message set (history fetch): dedupe then sort.
    SetMessages(Vec<Message>),
    /// Insert a single message and restore ordering.
    AddMessage(Message),
    /// Merge an older history page in front of the held messages.
    PrependMessages(Vec<Message>),
    /// Substitute the first message matching `key`, preserving its
    /// position. A miss is a silent no-op: an optimistic record may have
    /// been evicted while its confirmation was in flight, and a late
    /// replace must not resurrect it.
    ReplaceMessage { key: MessageKey, message: Message },
    /// Remove every message matching `key`.
    RemoveMessage(MessageKey),
    IncrementUnread,
    ResetUnread,
    SetFetchingMore(bool),
}

impl ConversationState {
    pub fn apply(&mut self, command: ConversationCommand) {
        match command {
            ConversationCommand::Reset => {
                *self = Self::default();
            }
            ConversationCommand::SetConversation(update) => {
                if let Some(id) = update.conversation_id {
                    self.conversation_id = Some(id);
                }
                if let Some(unread) = update.unread_count {
                    self.unread_count = unread;
                }
                if let Some(has_more) = update.has_more_messages {
                    self.has_more_messages = has_more;
                }
            }
            ConversationCommand::SetMessages(messages) => {
                let mut messages = remove_duplicates(messages);
                sort_messages(&mut messages);
                self.messages = messages;
            }
            ConversationCommand::AddMessage(message) => {
                self.messages.push(message);
                sort_messages(&mut self.messages);
            }
            ConversationCommand::PrependMessages(messages) => {
                let held: HashSet<_> = self
                    .messages
                    .iter()
                    .filter_map(dedup_key)
                    .collect();
                let mut page: Vec<Message> = remove_duplicates(messages)
                    .into_iter()
                    .filter(|m| match dedup_key(m) {
                        Some(key) => !held.contains(&key),
                        None => true,
                    })
                    .collect();
                sort_messages(&mut page);
                page.append(&mut self.messages);
                self.messages = page;
            }
            ConversationCommand::ReplaceMessage { key, message } => {
                if let Some(existing) = self.messages.iter_mut().find(|m| m.matches(&key)) {
                    *existing = message;
                }
            }
            ConversationCommand::RemoveMessage(key) => {
                self.messages.retain(|m| !m.matches(&key));
            }
            ConversationCommand::IncrementUnread => {
                self.unread_count = self.unread_count.saturating_add(1);
            }
            ConversationCommand::ResetUnread => {
                self.unread_count = 0;
            }
            ConversationCommand::SetFetchingMore(value) => {
                self.is_fetching_more = value;
            }
        }
    }

    /// Earliest server timestamp among the held confirmed messages; the
    /// `before` cursor for pagination.
    pub fn earliest_received(&self) -> Option<f64> {
        self.messages.iter().find_map(|m| m.received)
    }

    pub fn find_by_client_id(&self, client_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.client_id.as_deref() == Some(client_id))
    }
}

/// Stable ordering: confirmed messages by `received` ascending, then
/// unconfirmed ones by `client_sent` ascending.
fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| match (a.received, b.received) {
        (None, None) => partial(a.client_sent, b.client_sent),
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(ra), Some(rb)) => ra.partial_cmp(&rb).unwrap_or(Ordering::Equal),
    });
}

fn partial(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

/// Duplicate identity of a confirmed message. Unconfirmed records have no
/// server id yet; their client id is their identity and they are never
/// treated as duplicates of one another.
fn dedup_key(message: &Message) -> Option<(String, Role, Option<String>)> {
    message
        .id
        .clone()
        .map(|id| (id, message.role, message.media_type.clone()))
}

/// Drop duplicate `(id, role, media_type)` keys, keeping the first
/// occurrence in input order.
fn remove_duplicates(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    messages
        .into_iter()
        .filter(|m| match dedup_key(m) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}
