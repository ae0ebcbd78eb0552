// The relay hub: a single task that owns all session state.
//
// Socket tasks never touch sessions directly. They push `RelayEvent`s into
// the hub's queue and receive frames back through their `Outbound` channel.
// Events are handled strictly one after another, in arrival order.

mod handler;
mod router;

pub use handler::{ConnectionHandler, HubConfig, Registration};
pub use router::{BroadcastOutcome, BroadcastRouter, DEFAULT_STANDBY_ACTIONS};

use cuelink_common::protocol::ws::{ClientMessage, RegisterRequest};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::debug;

use crate::session::{ConnectionId, Outbound};

#[derive(Debug)]
pub enum RelayEvent {
    /// A transport link was accepted. `identity` holds whatever the client
    /// put on the upgrade URL and may be empty.
    Connect { connection_id: ConnectionId, outbound: Outbound, identity: RegisterRequest },
    Message { connection_id: ConnectionId, message: ClientMessage },
    Disconnect { connection_id: ConnectionId },
}

/// Cloneable handle for submitting events to the hub task.
#[derive(Debug, Clone)]
pub struct RelayHub {
    events: mpsc::UnboundedSender<RelayEvent>,
}

impl RelayHub {
    /// Start the hub task. It runs until every `RelayHub` clone is dropped
    /// and then hands the handler back through the join handle.
    pub fn spawn(handler: ConnectionHandler) -> (Self, JoinHandle<ConnectionHandler>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(handler, receiver));
        (Self { events }, task)
    }

    pub fn submit(&self, event: RelayEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn connect(
        &self,
        connection_id: ConnectionId,
        outbound: Outbound,
        identity: RegisterRequest,
    ) -> bool {
        self.submit(RelayEvent::Connect { connection_id, outbound, identity })
    }

    pub fn message(&self, connection_id: ConnectionId, message: ClientMessage) -> bool {
        self.submit(RelayEvent::Message { connection_id, message })
    }

    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        self.submit(RelayEvent::Disconnect { connection_id })
    }
}

async fn run(
    mut handler: ConnectionHandler,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
) -> ConnectionHandler {
    while let Some(event) = events.recv().await {
        handler.dispatch(event);
    }
    debug!(sessions = handler.registry().len(), "relay hub stopped");
    handler
}
