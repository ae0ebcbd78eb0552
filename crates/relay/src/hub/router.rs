// Broadcast admission and fan-out for one session.

use std::collections::HashSet;

use cuelink_common::protocol::ws::{ClientMessage, RelayedMessage, RESERVED_RELAY_FIELDS};

use crate::session::{ConnectionId, DeviceStatus, Session};

/// Actions a standby player may broadcast when no override is configured.
pub const DEFAULT_STANDBY_ACTIONS: [&str; 1] = ["request-state"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// The sender failed admission; nothing was sent.
    NotAdmitted,
    Relayed { delivered: usize, skipped: usize },
}

#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    standby_allowed_actions: HashSet<String>,
}

impl Default for BroadcastRouter {
    fn default() -> Self {
        Self::new(DEFAULT_STANDBY_ACTIONS)
    }
}

impl BroadcastRouter {
    pub fn new<I, S>(standby_allowed_actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { standby_allowed_actions: standby_allowed_actions.into_iter().map(Into::into).collect() }
    }

    pub fn admits(&self, status: DeviceStatus, action: &str) -> bool {
        match status {
            DeviceStatus::ActivePlayer | DeviceStatus::Remote => true,
            DeviceStatus::StandbyPlayer => self.standby_allowed_actions.contains(action),
        }
    }

    /// Relay `message` from `sender` to every connection in the session,
    /// the sender included. Closed links are counted as skipped.
    pub fn broadcast(
        &self,
        session: &Session,
        sender: ConnectionId,
        mut message: ClientMessage,
    ) -> BroadcastOutcome {
        let Some(sender) = session.find(sender) else {
            return BroadcastOutcome::NotAdmitted;
        };
        if !self.admits(sender.status, &message.action) {
            return BroadcastOutcome::NotAdmitted;
        }

        for key in RESERVED_RELAY_FIELDS {
            message.fields.remove(key);
        }

        let main_player_id = session.player().map(|player| player.device_id.clone());
        let connected_remotes_count = session.remote_count();
        let connected_players_count = session.player_count();

        let (mut delivered, mut skipped) = (0, 0);
        for recipient in session.connections() {
            let copy = RelayedMessage {
                message: message.clone(),
                sender_device_id: sender.device_id.clone(),
                main_instance: recipient.status == DeviceStatus::ActivePlayer,
                main_player_id: main_player_id.clone(),
                connected_remotes_count,
                connected_players_count,
            };
            if recipient.send(copy) {
                delivered += 1;
            } else {
                skipped += 1;
            }
        }

        BroadcastOutcome::Relayed { delivered, skipped }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::connection;
    use cuelink_common::protocol::ws::{ClientRole, ServerFrame};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn relayed(receiver: &mut UnboundedReceiver<ServerFrame>) -> RelayedMessage {
        match receiver.try_recv().expect("a relayed frame should be queued") {
            ServerFrame::Relay(message) => message,
            other => panic!("expected relayed message, got {other:?}"),
        }
    }

    #[test]
    fn admission_by_status() {
        let router = BroadcastRouter::default();
        assert!(router.admits(DeviceStatus::ActivePlayer, "next"));
        assert!(router.admits(DeviceStatus::Remote, "next"));
        assert!(router.admits(DeviceStatus::StandbyPlayer, "request-state"));
        assert!(!router.admits(DeviceStatus::StandbyPlayer, "next"));
    }

    #[test]
    fn custom_allow_list_replaces_default() {
        let router = BroadcastRouter::new(["sync-clock"]);
        assert!(router.admits(DeviceStatus::StandbyPlayer, "sync-clock"));
        assert!(!router.admits(DeviceStatus::StandbyPlayer, "request-state"));
    }

    #[test]
    fn remote_message_reaches_everyone_with_summary() {
        let mut session = Session::new("A");
        let (player, mut player_rx) = connection("A", "p1", ClientRole::Player);
        let (standby, mut standby_rx) = connection("A", "p2", ClientRole::Player);
        let (remote, mut remote_rx) = connection("A", "r1", ClientRole::Remote);
        let remote_id = remote.id;
        session.seat_player(player);
        session.queue_standby(standby);
        session.add_remote(remote);

        let outcome = BroadcastRouter::default().broadcast(
            &session,
            remote_id,
            ClientMessage::new("next").with_payload(json!({ "slide": 2 })),
        );
        assert_eq!(outcome, BroadcastOutcome::Relayed { delivered: 3, skipped: 0 });

        let to_player = relayed(&mut player_rx);
        assert_eq!(to_player.message.action, "next");
        assert_eq!(to_player.sender_device_id, "r1");
        assert!(to_player.main_instance);
        assert_eq!(to_player.main_player_id.as_deref(), Some("p1"));
        assert_eq!(to_player.connected_remotes_count, 1);
        assert_eq!(to_player.connected_players_count, 2);

        assert!(!relayed(&mut standby_rx).main_instance);
        assert!(!relayed(&mut remote_rx).main_instance);
    }

    #[test]
    fn standby_message_outside_allow_list_is_dropped() {
        let mut session = Session::new("A");
        let (player, mut player_rx) = connection("A", "p1", ClientRole::Player);
        let (standby, _standby_rx) = connection("A", "p2", ClientRole::Player);
        let standby_id = standby.id;
        session.seat_player(player);
        session.queue_standby(standby);

        let router = BroadcastRouter::default();
        let outcome = router.broadcast(&session, standby_id, ClientMessage::new("next"));
        assert_eq!(outcome, BroadcastOutcome::NotAdmitted);
        assert!(player_rx.try_recv().is_err());

        let outcome = router.broadcast(&session, standby_id, ClientMessage::new("request-state"));
        assert_eq!(outcome, BroadcastOutcome::Relayed { delivered: 2, skipped: 0 });
        assert_eq!(relayed(&mut player_rx).sender_device_id, "p2");
    }

    #[test]
    fn unknown_sender_is_not_admitted() {
        let session = Session::new("A");
        let outcome = BroadcastRouter::default().broadcast(
            &session,
            uuid::Uuid::new_v4(),
            ClientMessage::new("next"),
        );
        assert_eq!(outcome, BroadcastOutcome::NotAdmitted);
    }

    #[test]
    fn closed_recipients_are_skipped() {
        let mut session = Session::new("A");
        let (player, player_rx) = connection("A", "p1", ClientRole::Player);
        let (remote, mut remote_rx) = connection("A", "r1", ClientRole::Remote);
        let remote_id = remote.id;
        session.seat_player(player);
        session.add_remote(remote);
        drop(player_rx);

        let outcome =
            BroadcastRouter::default().broadcast(&session, remote_id, ClientMessage::new("next"));
        assert_eq!(outcome, BroadcastOutcome::Relayed { delivered: 1, skipped: 1 });
        assert_eq!(relayed(&mut remote_rx).message.action, "next");
    }

    #[test]
    fn reserved_fields_from_clients_are_overwritten() {
        let mut session = Session::new("A");
        let (remote, mut remote_rx) = connection("A", "r1", ClientRole::Remote);
        let remote_id = remote.id;
        session.add_remote(remote);

        let message = ClientMessage::new("next")
            .with_field("sender_device_id", "spoofed")
            .with_field("main_instance", true)
            .with_field("note", "kept");
        BroadcastRouter::default().broadcast(&session, remote_id, message);

        let copy = relayed(&mut remote_rx);
        assert_eq!(copy.sender_device_id, "r1");
        assert!(!copy.main_instance);
        assert!(copy.main_player_id.is_none());
        assert!(!copy.message.fields.contains_key("sender_device_id"));
        assert_eq!(copy.message.fields.get("note"), Some(&json!("kept")));
    }
}
