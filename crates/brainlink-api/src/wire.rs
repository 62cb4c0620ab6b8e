//! JSON frames exchanged with the brain controller.
//!
//! Every frame is a WebSocket text message holding one JSON object,
//! internally tagged by `"type"`. Value updates carry a composite
//! [`Key`] and an [`Entry`]; the entry's `_vid_obj` metadata is what the
//! core uses to decide what kind of entity a key represents.

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ── Well-known keys ──────────────────────────────────────────────────

/// System clock value, pushed once a second.
pub const HEARTBEAT_KEY: Key = Key::new(317, 1, None);

/// Screen that carries the controller's "there is a problem" indicator.
pub const FAULT_INDICATOR_SCREEN: u32 = 318;

/// Value id used for the back/navigation button on every screen.
pub const NAVIGATION_VALUE_ID: u32 = 0;

/// `_vid_obj.type` for temperatures.
pub const TYPE_TEMPERATURE: i64 = 12;

/// `_vid_obj.type` for choice sets (on/off, modes, programs).
pub const TYPE_CHOICE: i64 = 15;

/// Display text the controller uses when a value has no label.
pub const PLACEHOLDER_TEXT: &str = "???";

// ── Key ──────────────────────────────────────────────────────────────

/// Composite identifier of one value on one screen.
///
/// Encoded on the wire as `[screen, value, index|null]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(u32, u32, Option<u32>)", into = "(u32, u32, Option<u32>)")]
pub struct Key {
    pub screen: u32,
    pub value: u32,
    pub index: Option<u32>,
}

/// What a key stands for, before any metadata is looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Heartbeat,
    FaultIndicator,
    Navigation,
    Value,
}

impl Key {
    pub const fn new(screen: u32, value: u32, index: Option<u32>) -> Self {
        Self {
            screen,
            value,
            index,
        }
    }

    pub fn classify(&self) -> KeyClass {
        if *self == HEARTBEAT_KEY {
            KeyClass::Heartbeat
        } else if self.screen == FAULT_INDICATOR_SCREEN {
            KeyClass::FaultIndicator
        } else if self.value == NAVIGATION_VALUE_ID {
            KeyClass::Navigation
        } else {
            KeyClass::Value
        }
    }

    /// `true` for keys that may become entities.
    pub fn is_value(&self) -> bool {
        self.classify() == KeyClass::Value
    }
}

impl From<(u32, u32, Option<u32>)> for Key {
    fn from((screen, value, index): (u32, u32, Option<u32>)) -> Self {
        Self::new(screen, value, index)
    }
}

impl From<Key> for (u32, u32, Option<u32>) {
    fn from(key: Key) -> Self {
        (key.screen, key.value, key.index)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}:{index}", self.screen, self.value),
            None => write!(f, "{}:{}", self.screen, self.value),
        }
    }
}

/// Error returned when a key is not in `screen:value[:index]` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key '{0}': expected screen:value or screen:value:index")]
pub struct ParseKeyError(String);

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKeyError(s.to_owned());
        let mut parts = s.trim().split(':').map(str::parse::<u32>);

        let screen = parts.next().and_then(Result::ok).ok_or_else(err)?;
        let value = parts.next().and_then(Result::ok).ok_or_else(err)?;
        let index = match parts.next() {
            Some(part) => Some(part.map_err(|_| err())?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Self::new(screen, value, index))
    }
}

// ── Entry & metadata ─────────────────────────────────────────────────

/// Payload of a value update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub value: Value,

    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,

    /// `true` when the user may change the value from the host. Anything
    /// other than a boolean reads as absent.
    #[serde(default, deserialize_with = "lenient")]
    pub edit: Option<bool>,

    /// Screen this value is shown on.
    #[serde(rename = "_screen_key")]
    pub screen_key: u32,

    #[serde(rename = "_vid_obj", default, deserialize_with = "lenient")]
    pub meta: Option<ValueMeta>,
}

impl Entry {
    pub fn is_editable(&self) -> bool {
        self.edit == Some(true)
    }
}

/// Value descriptor (`_vid_obj`). Re-sent with every update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueMeta {
    #[serde(default, deserialize_with = "lenient")]
    pub unit: Option<String>,

    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub type_code: Option<i64>,

    #[serde(default, deserialize_with = "lenient")]
    pub elements: Vec<Element>,

    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

/// Decode a descriptive field, falling back to its default when the
/// controller sends a value of another type.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// One entry of a choice set.
///
/// Most controllers send `{ "text": "On" }`; older firmware sends bare
/// literals, which are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Element {
    Descriptor { text: Option<String> },
    Literal(Value),
}

impl Element {
    /// Label shown to the user for the element at `index`.
    pub fn label(&self, index: usize) -> String {
        match self {
            Self::Descriptor { text: Some(text) } => text.clone(),
            Self::Descriptor { text: None } => format!("Option {index}"),
            Self::Literal(Value::String(s)) => s.clone(),
            Self::Literal(other) => other.to_string(),
        }
    }
}

impl From<Value> for Element {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Descriptor {
                text: map.get("text").and_then(Value::as_str).map(str::to_owned),
            },
            other => Self::Literal(other),
        }
    }
}

impl From<Element> for Value {
    fn from(element: Element) -> Self {
        match element {
            Element::Descriptor { text: Some(text) } => serde_json::json!({ "text": text }),
            Element::Descriptor { text: None } => serde_json::json!({}),
            Element::Literal(value) => value,
        }
    }
}

/// Screen descriptor; its title prefixes entity names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    pub screen_key: u32,
    #[serde(default)]
    pub title: String,
}

// ── Frames ───────────────────────────────────────────────────────────

/// Frames sent to the controller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Handshake {
        client: String,
        nonce: String,
    },
    Login {
        username: String,
        #[serde(serialize_with = "expose_password")]
        password: SecretString,
    },
    Subscribe {
        traverse_screens: bool,
    },
    Navigate {
        id: u64,
        screen: u32,
    },
    Edit {
        id: u64,
        key: Key,
        value: u64,
    },
}

fn expose_password<S: Serializer>(password: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(password.expose_secret())
}

/// Frames received from the controller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    HandshakeAck {
        nonce: String,
        session_id: String,
    },
    LoginResult {
        success: bool,
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Screen(Screen),
    Update {
        key: Key,
        entry: Entry,
    },
    Ack {
        id: u64,
    },
    Ping,
    #[serde(other)]
    Unknown,
}

impl DeviceMessage {
    /// Short tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::HandshakeAck { .. } => "handshake_ack",
            Self::LoginResult { .. } => "login_result",
            Self::Screen(_) => "screen",
            Self::Update { .. } => "update",
            Self::Ack { .. } => "ack",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }
}

/// Outbound commands that the controller acknowledges.
///
/// The correlator assigns the frame id when the command is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Bring the screen owning a value to the foreground.
    Navigate { screen: u32 },
    /// Set a choice value to the option at `value`.
    Edit { key: Key, value: u64 },
}

impl Command {
    pub(crate) fn into_message(self, id: u64) -> ClientMessage {
        match self {
            Self::Navigate { screen } => ClientMessage::Navigate { id, screen },
            Self::Edit { key, value } => ClientMessage::Edit { id, key, value },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
