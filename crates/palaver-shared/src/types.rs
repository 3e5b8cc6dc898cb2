use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    AppUser,
    AppMaker,
    Whisper,
}

/// Payload kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Location,
}

/// Delivery state of a locally created message.
///
/// `Sending -> Sent` is terminal; `Sending -> Failed -> Sending` is the
/// retry loop. Server-confirmed messages carry no status at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Sending,
    Sent,
    Failed,
}

/// Match key for replace/remove operations on the conversation.
///
/// A message is addressed either by its ephemeral client id (before the
/// server confirms it) or by its server-assigned id. First match wins and
/// a miss is a silent no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKey {
    ClientId(String),
    ServerId(String),
}

/// Geographic coordinates attached to a location message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub long: f64,
}

/// Current wall-clock time as fractional epoch seconds, the unit the
/// backend uses for `received` timestamps.
pub fn epoch_seconds_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Generate a dashless v4 uuid, used for ephemeral message ids and the
/// persisted device/client id.
pub fn new_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}
