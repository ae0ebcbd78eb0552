// Per-session device state: the active player, remotes and standby players.
//
// A `Session` only stores connections and answers questions about them. Role
// decisions (who gets promoted, who is told what) live in `hub::handler`;
// relay admission lives in `hub::router`. Every mutation here keeps the
// invariant that a device id occupies at most one slot.

mod registry;

pub use registry::SessionRegistry;

use cuelink_common::protocol::ws::{ClientRole, ServerFrame, ServerNotice};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Status the relay assigned to a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    ActivePlayer,
    StandbyPlayer,
    Remote,
}

impl DeviceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ActivePlayer => "active_player",
            Self::StandbyPlayer => "standby_player",
            Self::Remote => "remote",
        }
    }
}

/// Sending half of one socket's outbound queue. The socket task owns the
/// receiver; once every `Outbound` clone is dropped the socket shuts down.
#[derive(Debug, Clone)]
pub struct Outbound {
    sender: mpsc::UnboundedSender<ServerFrame>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Best-effort delivery. Returns false when the socket has gone away.
    pub fn send(&self, frame: impl Into<ServerFrame>) -> bool {
        self.sender.send(frame.into()).is_ok()
    }
}

/// One registered device link.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub session_id: String,
    pub device_id: String,
    pub role: ClientRole,
    pub status: DeviceStatus,
    outbound: Outbound,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        session_id: impl Into<String>,
        device_id: impl Into<String>,
        role: ClientRole,
        outbound: Outbound,
    ) -> Self {
        let status = match role {
            ClientRole::Player => DeviceStatus::StandbyPlayer,
            ClientRole::Remote => DeviceStatus::Remote,
        };
        Self {
            id,
            session_id: session_id.into(),
            device_id: device_id.into(),
            role,
            status,
            outbound,
        }
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_open()
    }

    pub fn send(&self, frame: impl Into<ServerFrame>) -> bool {
        self.outbound.send(frame)
    }
}

/// Result of a successful presenter switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterSwap {
    pub promoted: ConnectionId,
    pub demoted: Option<ConnectionId>,
}

#[derive(Debug)]
pub struct Session {
    id: String,
    player: Option<Connection>,
    remotes: BTreeMap<String, Connection>,
    standby_players: BTreeMap<String, Connection>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            player: None,
            remotes: BTreeMap::new(),
            standby_players: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn player(&self) -> Option<&Connection> {
        self.player.as_ref()
    }

    pub fn has_player(&self) -> bool {
        self.player.is_some()
    }

    pub fn remotes(&self) -> impl Iterator<Item = &Connection> {
        self.remotes.values()
    }

    pub fn standby_players(&self) -> impl Iterator<Item = &Connection> {
        self.standby_players.values()
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    /// Active plus standby players.
    pub fn player_count(&self) -> usize {
        usize::from(self.player.is_some()) + self.standby_players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.player.is_none() && self.remotes.is_empty() && self.standby_players.is_empty()
    }

    /// Every registered connection: the player first, then remotes, then
    /// standby players.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.player.iter().chain(self.remotes.values()).chain(self.standby_players.values())
    }

    pub fn find(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections().find(|connection| connection.id == connection_id)
    }

    pub fn status_of(&self, connection_id: ConnectionId) -> Option<DeviceStatus> {
        self.find(connection_id).map(|connection| connection.status)
    }

    /// Connection currently registered under `device_id`, in any slot.
    pub fn connection_for_device(&self, device_id: &str) -> Option<ConnectionId> {
        self.player
            .as_ref()
            .filter(|player| player.device_id == device_id)
            .or_else(|| self.remotes.get(device_id))
            .or_else(|| self.standby_players.get(device_id))
            .map(|connection| connection.id)
    }

    pub(crate) fn seat_player(&mut self, mut connection: Connection) {
        debug_assert!(self.player.is_none(), "session already has an active player");
        connection.status = DeviceStatus::ActivePlayer;
        self.player = Some(connection);
    }

    pub(crate) fn queue_standby(&mut self, mut connection: Connection) {
        connection.status = DeviceStatus::StandbyPlayer;
        self.standby_players.insert(connection.device_id.clone(), connection);
    }

    pub(crate) fn add_remote(&mut self, mut connection: Connection) {
        connection.status = DeviceStatus::Remote;
        self.remotes.insert(connection.device_id.clone(), connection);
    }

    /// Detach a connection from whichever slot holds it. The returned
    /// connection keeps the status it had at removal time.
    pub(crate) fn remove(&mut self, connection_id: ConnectionId) -> Option<Connection> {
        if self.player.as_ref().is_some_and(|player| player.id == connection_id) {
            return self.player.take();
        }
        if let Some(device_id) = device_key(&self.remotes, connection_id) {
            return self.remotes.remove(&device_id);
        }
        if let Some(device_id) = device_key(&self.standby_players, connection_id) {
            return self.standby_players.remove(&device_id);
        }
        None
    }

    /// Promote a standby player and move the current player (if any) into
    /// standby. Returns `None` when `connection_id` is not a standby player.
    pub(crate) fn swap_presenter(&mut self, connection_id: ConnectionId) -> Option<PresenterSwap> {
        let device_id = device_key(&self.standby_players, connection_id)?;
        let promoted = self.standby_players.remove(&device_id)?;

        let demoted = self.player.take().map(|previous| {
            let id = previous.id;
            self.queue_standby(previous);
            id
        });
        self.seat_player(promoted);

        Some(PresenterSwap { promoted: connection_id, demoted })
    }

    pub(crate) fn notify_player(&self, notice: ServerNotice) -> bool {
        self.player.as_ref().is_some_and(|player| player.send(notice))
    }

    pub(crate) fn notify_remotes(&self, notice: &ServerNotice) -> usize {
        notify_each(self.remotes.values(), notice)
    }

    pub(crate) fn notify_standby_players(&self, notice: &ServerNotice) -> usize {
        notify_each(self.standby_players.values(), notice)
    }

    /// Tell the active player how many remotes are attached.
    pub(crate) fn announce_remote_count(&self) -> bool {
        self.notify_player(ServerNotice::RemoteCount { count: self.remote_count() })
    }
}

fn device_key(slots: &BTreeMap<String, Connection>, connection_id: ConnectionId) -> Option<String> {
    slots
        .iter()
        .find(|(_, connection)| connection.id == connection_id)
        .map(|(device_id, _)| device_id.clone())
}

fn notify_each<'a>(
    connections: impl Iterator<Item = &'a Connection>,
    notice: &ServerNotice,
) -> usize {
    connections.filter(|connection| connection.send(notice.clone())).count()
}
