// Connection lifecycle: registration and role assignment, inbound dispatch,
// presenter switch and disconnect cleanup.
//
// `ConnectionHandler` owns every session. It is driven one event at a time by
// the hub task, so nothing in here needs a lock.

use std::collections::HashMap;

use cuelink_common::protocol::ws::{
    ClientAction, ClientMessage, ClientRole, RegisterRequest, ServerNotice,
};
use tracing::{debug, info, warn};

use super::{
    router::{BroadcastOutcome, BroadcastRouter, DEFAULT_STANDBY_ACTIONS},
    RelayEvent,
};
use crate::error::{ErrorCode, RegistrationError, RelayError};
use crate::metrics;
use crate::session::{Connection, ConnectionId, DeviceStatus, Outbound, Session, SessionRegistry};

/// Validated identity of a registering device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub session_id: String,
    pub device_id: String,
    pub role: ClientRole,
}

impl TryFrom<RegisterRequest> for Registration {
    type Error = RegistrationError;

    fn try_from(request: RegisterRequest) -> Result<Self, Self::Error> {
        let session_id = non_empty(request.session_id).ok_or(RegistrationError::MissingSessionId)?;
        let device_id = non_empty(request.device_id).ok_or(RegistrationError::MissingDeviceId)?;
        let raw_role = non_empty(request.role).ok_or(RegistrationError::MissingRole)?;
        let role = ClientRole::parse(&raw_role)
            .ok_or_else(|| RegistrationError::UnknownRole(raw_role.clone()))?;

        Ok(Self { session_id, device_id, role })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub remove_empty_sessions: bool,
    pub standby_allowed_actions: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            remove_empty_sessions: true,
            standby_allowed_actions: DEFAULT_STANDBY_ACTIONS.map(str::to_owned).to_vec(),
        }
    }
}

#[derive(Debug)]
enum Link {
    /// Accepted by the transport, not yet registered.
    Pending(Outbound),
    Registered { session_id: String, device_id: String },
}

#[derive(Debug)]
pub struct ConnectionHandler {
    registry: SessionRegistry,
    router: BroadcastRouter,
    remove_empty_sessions: bool,
    links: HashMap<ConnectionId, Link>,
}

impl Default for ConnectionHandler {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl ConnectionHandler {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            router: BroadcastRouter::new(config.standby_allowed_actions),
            remove_empty_sessions: config.remove_empty_sessions,
            links: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Live links, registered or not.
    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    pub fn dispatch(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connect { connection_id, outbound, identity } => {
                self.connect(connection_id, outbound, identity);
            }
            RelayEvent::Message { connection_id, message } => {
                self.handle_message(connection_id, message);
            }
            RelayEvent::Disconnect { connection_id } => self.disconnect(connection_id),
        }
        metrics::set_active_sessions(self.registry.len());
    }

    /// Track a new link. Identity supplied at connect time registers it
    /// straight away; otherwise it waits for a `register` message.
    pub fn connect(
        &mut self,
        connection_id: ConnectionId,
        outbound: Outbound,
        identity: RegisterRequest,
    ) {
        self.links.insert(connection_id, Link::Pending(outbound));
        debug!(connection_id = %connection_id, "connection accepted");

        if !identity.is_empty() {
            let _ = self.register(connection_id, identity);
        }
    }

    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        request: RegisterRequest,
    ) -> Result<DeviceStatus, RegistrationError> {
        let outbound = match self.links.get(&connection_id) {
            Some(Link::Pending(outbound)) => outbound.clone(),
            Some(Link::Registered { session_id, device_id }) => {
                let error = RegistrationError::AlreadyRegistered {
                    session_id: session_id.clone(),
                    device_id: device_id.clone(),
                };
                self.reject(connection_id, &error);
                return Err(error);
            }
            None => return Err(RegistrationError::UnknownConnection),
        };

        let Registration { session_id, device_id, role } = match Registration::try_from(request) {
            Ok(registration) => registration,
            Err(error) => {
                self.reject(connection_id, &error);
                return Err(error);
            }
        };

        self.evict_device(&session_id, &device_id);

        let connection = Connection::new(connection_id, &session_id, &device_id, role, outbound);
        let status = admit(self.registry.get_or_create(&session_id), connection);
        self.links.insert(
            connection_id,
            Link::Registered { session_id: session_id.clone(), device_id: device_id.clone() },
        );

        metrics::record_registration(status);
        info!(
            session_id = %session_id,
            device_id = %device_id,
            connection_id = %connection_id,
            status = status.as_str(),
            "device registered"
        );
        Ok(status)
    }

    pub fn handle_message(&mut self, connection_id: ConnectionId, message: ClientMessage) {
        match message.kind() {
            ClientAction::Register => {
                let _ = self.register(connection_id, message.register_request());
            }
            ClientAction::SwitchPresenter => self.switch_presenter(connection_id),
            ClientAction::Broadcast => self.broadcast(connection_id, message),
        }
    }

    pub fn switch_presenter(&mut self, connection_id: ConnectionId) {
        let Some(session_id) = self.require_registered(connection_id) else {
            return;
        };
        let Some(session) = self.registry.get_mut(&session_id) else {
            return;
        };
        let Some(swap) = session.swap_presenter(connection_id) else {
            debug!(
                session_id = %session_id,
                connection_id = %connection_id,
                "switch-presenter ignored for non-standby connection"
            );
            return;
        };

        if let Some(demoted) = swap.demoted.and_then(|id| session.find(id)) {
            demoted.send(ServerNotice::PlayerDemoted);
        }
        session.notify_player(ServerNotice::PlayerPromoted);
        session.notify_remotes(&ServerNotice::PlayerAvailable);
        session.announce_remote_count();

        metrics::increment_presenter_switches();
        info!(
            session_id = %session_id,
            device_id = session.player().map(|player| player.device_id.as_str()).unwrap_or_default(),
            connection_id = %connection_id,
            "presenter switched"
        );
    }

    fn broadcast(&mut self, connection_id: ConnectionId, message: ClientMessage) {
        let Some(session_id) = self.require_registered(connection_id) else {
            return;
        };
        let Some(session) = self.registry.get(&session_id) else {
            return;
        };

        let action = message.action.clone();
        match self.router.broadcast(session, connection_id, message) {
            BroadcastOutcome::NotAdmitted => {
                metrics::record_broadcast(false);
                debug!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    action = %action,
                    "broadcast dropped by admission"
                );
            }
            BroadcastOutcome::Relayed { delivered, skipped } => {
                metrics::record_broadcast(true);
                debug!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    action = %action,
                    delivered,
                    skipped,
                    "broadcast relayed"
                );
            }
        }
    }

    pub fn disconnect(&mut self, connection_id: ConnectionId) {
        let Some((session_id, connection)) = self.detach(connection_id) else {
            debug!(connection_id = %connection_id, "unregistered connection closed");
            return;
        };

        info!(
            session_id = %session_id,
            device_id = %connection.device_id,
            connection_id = %connection_id,
            status = connection.status.as_str(),
            "device disconnected"
        );

        if self.remove_empty_sessions && self.registry.remove_if_empty(&session_id) {
            info!(session_id = %session_id, "empty session removed");
        }
    }

    /// Forget a link and, if it was registered, take it out of its session
    /// and send the corrective notices. Empty sessions are left in place.
    fn detach(&mut self, connection_id: ConnectionId) -> Option<(String, Connection)> {
        let Link::Registered { session_id, .. } = self.links.remove(&connection_id)? else {
            return None;
        };
        let session = self.registry.get_mut(&session_id)?;
        let connection = session.remove(connection_id)?;

        match connection.status {
            DeviceStatus::ActivePlayer => {
                session.notify_remotes(&ServerNotice::NoPlayerConnected);
                session.notify_standby_players(&ServerNotice::NoPlayerConnected);
            }
            DeviceStatus::StandbyPlayer => {}
            DeviceStatus::Remote => {
                session.announce_remote_count();
            }
        }

        Some((session_id, connection))
    }

    /// A device that registers again under a new link replaces the old one.
    fn evict_device(&mut self, session_id: &str, device_id: &str) {
        let Some(previous) =
            self.registry.get(session_id).and_then(|session| session.connection_for_device(device_id))
        else {
            return;
        };

        if let Some((_, connection)) = self.detach(previous) {
            connection.send(RelayError::from_code(ErrorCode::DeviceReplaced).to_notice());
            warn!(
                session_id = %session_id,
                device_id = %device_id,
                connection_id = %previous,
                "device replaced by a newer connection"
            );
        }
    }

    /// Session id of a registered link. Pending links are told to register
    /// first.
    fn require_registered(&self, connection_id: ConnectionId) -> Option<String> {
        match self.links.get(&connection_id)? {
            Link::Registered { session_id, .. } => Some(session_id.clone()),
            Link::Pending(outbound) => {
                outbound.send(RelayError::from_code(ErrorCode::RegisterRequired).to_notice());
                None
            }
        }
    }

    fn reject(&self, connection_id: ConnectionId, error: &RegistrationError) {
        metrics::increment_registrations_rejected();
        warn!(connection_id = %connection_id, error = %error, "registration rejected");

        let notice = RelayError::from(error).to_notice();
        match self.links.get(&connection_id) {
            Some(Link::Pending(outbound)) => {
                outbound.send(notice);
            }
            Some(Link::Registered { session_id, .. }) => {
                if let Some(connection) =
                    self.registry.get(session_id).and_then(|session| session.find(connection_id))
                {
                    connection.send(notice);
                }
            }
            None => {}
        }
    }
}

/// Place a connection according to its declared role and send the
/// role-specific notices.
fn admit(session: &mut Session, connection: Connection) -> DeviceStatus {
    let status = match connection.role {
        ClientRole::Player if !session.has_player() => {
            connection.send(ServerNotice::PlayerConnected);
            session.seat_player(connection);
            session.notify_remotes(&ServerNotice::PlayerAvailable);
            session.notify_standby_players(&ServerNotice::NewPlayerConnected);
            DeviceStatus::ActivePlayer
        }
        ClientRole::Player => {
            connection.send(ServerNotice::PlayerDemoted);
            session.queue_standby(connection);
            DeviceStatus::StandbyPlayer
        }
        ClientRole::Remote => {
            let notice = if session.has_player() {
                ServerNotice::PlayerAvailable
            } else {
                ServerNotice::NoPlayerConnected
            };
            connection.send(notice);
            session.add_remote(connection);
            DeviceStatus::Remote
        }
    };

    session.announce_remote_count();
    status
}
