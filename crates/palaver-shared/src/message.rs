use serde::{Deserialize, Serialize};

use crate::types::{Coordinates, MessageKey, MessageKind, Role, SendStatus};
use crate::types::{epoch_seconds_now, new_client_id};

/// A single conversation message.
///
/// Both server-confirmed records and locally created optimistic records use
/// this shape. Before confirmation a message is identified by `client_id`
/// and ordered by `client_sent`; once the server confirms it, the
/// authoritative record (carrying `id` and `received`) replaces the local
/// one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned immutable identifier.
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Ephemeral client identifier, set until the server record replaces
    /// this one.
    #[serde(rename = "_clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Local creation time (epoch seconds); orders unconfirmed messages.
    #[serde(rename = "_clientSent", skip_serializing_if = "Option::is_none")]
    pub client_sent: Option<f64>,

    #[serde(rename = "type")]
    pub kind: MessageKind,

    pub role: Role,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,

    /// Server-assigned ordering timestamp (epoch seconds); absent until
    /// the message is confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_status: Option<SendStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl Message {
    /// Skeleton for an outgoing optimistic record: fresh ephemeral id,
    /// local timestamp, `Sending` status.
    pub fn new_outgoing(kind: MessageKind) -> Self {
        Self {
            id: None,
            client_id: Some(new_client_id()),
            client_sent: Some(epoch_seconds_now()),
            kind,
            role: Role::AppUser,
            text: None,
            media_url: None,
            media_type: None,
            coordinates: None,
            received: None,
            send_status: Some(SendStatus::Sending),
            device_id: None,
        }
    }

    pub fn outgoing_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new_outgoing(MessageKind::Text)
        }
    }

    pub fn outgoing_location(coordinates: Option<Coordinates>) -> Self {
        Self {
            coordinates,
            ..Self::new_outgoing(MessageKind::Location)
        }
    }

    pub fn outgoing_image(media_url: String, media_type: String) -> Self {
        Self {
            media_url: Some(media_url),
            media_type: Some(media_type),
            ..Self::new_outgoing(MessageKind::Image)
        }
    }

    /// A message is confirmed once the server has assigned it an ordering
    /// timestamp.
    pub fn is_confirmed(&self) -> bool {
        self.received.is_some()
    }

    pub fn matches(&self, key: &MessageKey) -> bool {
        match key {
            MessageKey::ClientId(id) => self.client_id.as_deref() == Some(id.as_str()),
            MessageKey::ServerId(id) => self.id.as_deref() == Some(id.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_text_is_sending_with_client_identity() {
        let msg = Message::outgoing_text("hello");
        assert!(msg.id.is_none());
        assert!(msg.client_id.is_some());
        assert!(msg.client_sent.is_some());
        assert_eq!(msg.send_status, Some(SendStatus::Sending));
        assert!(!msg.is_confirmed());
    }

    #[test]
    fn matches_by_either_identity() {
        let mut msg = Message::outgoing_text("hi");
        let client_id = msg.client_id.clone().unwrap();
        assert!(msg.matches(&MessageKey::ClientId(client_id.clone())));
        assert!(!msg.matches(&MessageKey::ServerId("abc".into())));

        msg.id = Some("abc".into());
        assert!(msg.matches(&MessageKey::ServerId("abc".into())));
        assert!(msg.matches(&MessageKey::ClientId(client_id)));
    }

    #[test]
    fn wire_format_uses_underscore_prefixed_identity() {
        let msg = Message {
            id: Some("m1".into()),
            received: Some(1700000000.5),
            ..Message::outgoing_text("hey")
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["_id"], "m1");
        assert_eq!(json["type"], "text");
        assert_eq!(json["role"], "appUser");
        assert_eq!(json["sendStatus"], "sending");
        assert!(json.get("mediaUrl").is_none());
    }
}
