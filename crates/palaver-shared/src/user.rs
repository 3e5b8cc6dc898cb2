use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::LINKABLE_CHANNEL_KINDS;

/// Profile attributes a host page is allowed to set. Anything else in an
/// update payload is stripped before dirty-checking and before the wire.
pub const EDITABLE_PROPERTIES: &[&str] =
    &["givenName", "surname", "email", "signedUpAt", "properties"];

/// The end user on whose behalf the widget converses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Server-assigned identifier.
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Host-provided identifier for authenticated users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_up_at: Option<String>,

    /// Free-form host-defined properties.
    #[serde(default)]
    pub properties: Map<String, Value>,

    #[serde(default)]
    pub conversation_started: bool,

    /// Devices and linked channel clients known to the backend.
    #[serde(default)]
    pub clients: Vec<ClientInfo>,
}

impl User {
    /// Snapshot of the editable attributes as a props map, the shape the
    /// update endpoint takes.
    pub fn editable_snapshot(&self) -> Map<String, Value> {
        let mut props = Map::new();
        if let Some(v) = &self.given_name {
            props.insert("givenName".into(), Value::String(v.clone()));
        }
        if let Some(v) = &self.surname {
            props.insert("surname".into(), Value::String(v.clone()));
        }
        if let Some(v) = &self.email {
            props.insert("email".into(), Value::String(v.clone()));
        }
        if let Some(v) = &self.signed_up_at {
            props.insert("signedUpAt".into(), Value::String(v.clone()));
        }
        if !self.properties.is_empty() {
            props.insert("properties".into(), Value::Object(self.properties.clone()));
        }
        props
    }

    fn editable_value(&self, prop: &str) -> Value {
        fn opt_str(value: &Option<String>) -> Value {
            value.clone().map(Value::String).unwrap_or(Value::Null)
        }
        match prop {
            "givenName" => opt_str(&self.given_name),
            "surname" => opt_str(&self.surname),
            "email" => opt_str(&self.email),
            "signedUpAt" => opt_str(&self.signed_up_at),
            "properties" => Value::Object(self.properties.clone()),
            _ => Value::Null,
        }
    }
}

/// A device or channel client attached to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Backend application descriptor returned at login.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    #[serde(default)]
    pub integrations: Vec<Integration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Keep only the allow-listed editable attributes of a props map.
pub fn strip_to_editable(props: Map<String, Value>) -> Map<String, Value> {
    props
        .into_iter()
        .filter(|(key, _)| EDITABLE_PROPERTIES.contains(&key.as_str()))
        .collect()
}

/// Whether writing `props` would change any editable attribute, compared by
/// deep JSON equality against the last server-confirmed values.
pub fn is_profile_dirty(user: &User, props: &Map<String, Value>) -> bool {
    EDITABLE_PROPERTIES.iter().any(|prop| {
        props
            .get(*prop)
            .is_some_and(|incoming| *incoming != user.editable_value(prop))
    })
}

/// Whether the app exposes any channel the user could still link.
pub fn has_linkable_channels(app: &AppInfo) -> bool {
    app.integrations
        .iter()
        .any(|i| LINKABLE_CHANNEL_KINDS.contains(&i.kind.as_str()))
}

/// Whether a client for the given channel kind is already attached.
pub fn is_channel_linked(clients: &[ClientInfo], kind: &str) -> bool {
    clients.iter().any(|c| c.platform == kind)
}

/// Whether at least one of the app's linkable channels is linked already.
pub fn has_channel_linked(app: &AppInfo, clients: &[ClientInfo]) -> bool {
    app.integrations
        .iter()
        .filter(|i| LINKABLE_CHANNEL_KINDS.contains(&i.kind.as_str()))
        .any(|i| is_channel_linked(clients, &i.kind))
}
