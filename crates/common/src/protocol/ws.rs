// WebSocket message types for the cuelink relay protocol.
//
// Inbound frames are loose JSON objects keyed by `action`; the relay only
// interprets `register` and `switch-presenter` and forwards everything else.
// Outbound frames are either a `ServerNotice` (tagged by `action`) or a
// relayed client message enriched with a session summary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Literal text frame a client sends as a keepalive.
pub const PING_FRAME: &str = "ping";
/// Literal text frame the relay answers a keepalive with.
pub const PONG_FRAME: &str = "pong";

pub const REGISTER_ACTION: &str = "register";
pub const SWITCH_PRESENTER_ACTION: &str = "switch-presenter";

/// Keys the relay writes onto every relayed copy. Client-supplied values
/// under these names are discarded.
pub const RESERVED_RELAY_FIELDS: [&str; 5] = [
    "sender_device_id",
    "main_instance",
    "main_player_id",
    "connected_remotes_count",
    "connected_players_count",
];

/// Role a device declares when it registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    Player,
    Remote,
}

impl ClientRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Remote => "remote",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "player" => Some(Self::Player),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// How the relay treats an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    Register,
    SwitchPresenter,
    Broadcast,
}

/// Client -> Server: any decoded inbound frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMessage {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ClientMessage {
    pub fn new(action: impl Into<String>) -> Self {
        Self { action: action.into(), payload: None, fields: Map::new() }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn register(session_id: &str, device_id: &str, role: ClientRole) -> Self {
        Self::new(REGISTER_ACTION)
            .with_field("session_id", session_id)
            .with_field("device_id", device_id)
            .with_field("role", role.as_str())
    }

    pub fn kind(&self) -> ClientAction {
        match self.action.as_str() {
            REGISTER_ACTION => ClientAction::Register,
            SWITCH_PRESENTER_ACTION => ClientAction::SwitchPresenter,
            _ => ClientAction::Broadcast,
        }
    }

    /// Identity carried by a `register` frame. Older clients send the
    /// session as `id`, the role as `type` and their instance id as a string
    /// `payload`; those spellings are honoured when the canonical field is
    /// absent.
    pub fn register_request(&self) -> RegisterRequest {
        let device_id = string_field(&self.fields, &["device_id"])
            .or_else(|| self.payload.as_ref().and_then(Value::as_str).map(ToOwned::to_owned));

        RegisterRequest {
            session_id: string_field(&self.fields, &["session_id", "id"]),
            device_id,
            role: string_field(&self.fields, &["role", "type"]),
        }
    }
}

fn string_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| fields.get(*key).and_then(Value::as_str)).map(ToOwned::to_owned)
}

/// Identity a device presents when registering, either as WebSocket query
/// parameters or inside a `register` frame. Validation happens in the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl RegisterRequest {
    pub fn new(session_id: &str, device_id: &str, role: ClientRole) -> Self {
        Self {
            session_id: Some(session_id.to_owned()),
            device_id: Some(device_id.to_owned()),
            role: Some(role.as_str().to_owned()),
        }
    }

    /// True when the client supplied none of the identity fields.
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.device_id.is_none() && self.role.is_none()
    }
}

/// Server -> Client: relay-generated notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerNotice {
    /// The device became the active player on registration.
    PlayerConnected,
    /// The device is a standby player (on registration or after a switch).
    PlayerDemoted,
    /// The device took over as active player.
    PlayerPromoted,
    /// An active player is present in the session.
    PlayerAvailable,
    /// The session has no active player.
    NoPlayerConnected,
    /// Sent to standby players when a new active player registers.
    NewPlayerConnected,
    /// Sent to the active player whenever the remote population changes.
    RemoteCount { count: usize },
    Error { code: String, message: String, retryable: bool },
}

/// Server -> Client: an admitted client message, as seen by one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayedMessage {
    #[serde(flatten)]
    pub message: ClientMessage,
    pub sender_device_id: String,
    /// Whether the recipient of this copy is the active player.
    pub main_instance: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_player_id: Option<String>,
    pub connected_remotes_count: usize,
    pub connected_players_count: usize,
}

/// Everything the relay writes to a socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerFrame {
    Notice(ServerNotice),
    Relay(RelayedMessage),
}

impl From<ServerNotice> for ServerFrame {
    fn from(notice: ServerNotice) -> Self {
        Self::Notice(notice)
    }
}

impl From<RelayedMessage> for ServerFrame {
    fn from(message: RelayedMessage) -> Self {
        Self::Relay(message)
    }
}
