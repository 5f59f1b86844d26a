//! Room/user event fan-out.
//!
//! Business code (session coordinator, presence reconciler) depends only on
//! the [`Broadcaster`] trait; [`WsBroadcaster`] is the transport binding that
//! resolves targets to live connections through the registry and pushes
//! frames over per-connection channels.
//!
//! Delivery is fire-and-forget per connection: a full or closed channel is
//! logged and skipped, never escalated to the operation that triggered the
//! broadcast, and never blocks delivery to the remaining targets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use crate::models::{MessageView, RoomSummary, UserView};
use crate::registry::ConnectionRegistry;

/// Delivery target for an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Every connection subscribed to the room.
    Room(String),
    /// Every connection belonging to the user (all tabs/devices).
    User(String),
    /// An explicit connection-id list (private-room narrowing).
    Clients(Vec<String>),
    /// Every connection except the listed ones (redacted counterpart of a
    /// visibility change).
    AllExcept(Vec<String>),
    /// Unconditional global fan-out; reserved for system-wide announcements.
    All,
    /// A single connection.
    Connection(String),
}

/// Events pushed to clients. Names and argument order are the wire contract.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    AddUser { user: UserView, room: String, is_owner: bool },
    Leave { user: UserView, room: String },
    MarkInactive { users: Vec<UserView> },
    AddMessage { message: MessageView, room: String },
    ReplaceMessage { client_id: String, message: MessageView, room: String },
    UpdateActivity { user: UserView, room: String },
    UpdateRoom { room: RoomSummary },
    UpdateUnreadNotifications { count: i64 },
    SetTyping { user: UserView, room: String },
    Kick { user: UserView, room: String, caller: UserView, reason: Option<String> },
    LockRoom { user: UserView, room: String, visible: bool },
    JoinRoom { room: RoomSummary },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::AddUser { .. } => "addUser",
            ClientEvent::Leave { .. } => "leave",
            ClientEvent::MarkInactive { .. } => "markInactive",
            ClientEvent::AddMessage { .. } => "addMessage",
            ClientEvent::ReplaceMessage { .. } => "replaceMessage",
            ClientEvent::UpdateActivity { .. } => "updateActivity",
            ClientEvent::UpdateRoom { .. } => "updateRoom",
            ClientEvent::UpdateUnreadNotifications { .. } => "updateUnreadNotifications",
            ClientEvent::SetTyping { .. } => "setTyping",
            ClientEvent::Kick { .. } => "kick",
            ClientEvent::LockRoom { .. } => "lockRoom",
            ClientEvent::JoinRoom { .. } => "joinRoom",
        }
    }

    /// Serialize to the wire frame: `{"event": <name>, "args": [...]}`.
    pub fn to_frame(&self) -> String {
        let args = match self {
            ClientEvent::AddUser { user, room, is_owner } => json!([user, room, is_owner]),
            ClientEvent::Leave { user, room } => json!([user, room]),
            ClientEvent::MarkInactive { users } => json!([users]),
            ClientEvent::AddMessage { message, room } => json!([message, room]),
            ClientEvent::ReplaceMessage { client_id, message, room } => {
                json!([client_id, message, room])
            }
            ClientEvent::UpdateActivity { user, room } => json!([user, room]),
            ClientEvent::UpdateRoom { room } => json!([room]),
            ClientEvent::UpdateUnreadNotifications { count } => json!([count]),
            ClientEvent::SetTyping { user, room } => json!([user, room]),
            ClientEvent::Kick { user, room, caller, reason } => {
                json!([user, room, caller, reason])
            }
            ClientEvent::LockRoom { user, room, visible } => json!([user, room, visible]),
            ClientEvent::JoinRoom { room } => json!([room]),
        };
        json!({ "event": self.name(), "args": args }).to_string()
    }
}

/// Fan-out capability consumed by the coordinator and the reconciler.
pub trait Broadcaster: Send + Sync {
    fn emit(&self, target: Target, event: ClientEvent);
}

/// Transport-backed broadcaster: resolves targets against the live registry
/// and writes frames into per-connection outbound channels.
pub struct WsBroadcaster {
    registry: Arc<ConnectionRegistry>,
    senders: Mutex<HashMap<String, mpsc::Sender<String>>>,
}

impl WsBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            senders: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the outbound channel for a connection. Called from the
    /// transport's connect lifecycle hook.
    pub fn attach(&self, connection_id: &str, tx: mpsc::Sender<String>) {
        self.senders.lock().insert(connection_id.to_string(), tx);
    }

    /// Detach a connection's outbound channel on disconnect.
    pub fn detach(&self, connection_id: &str) {
        self.senders.lock().remove(connection_id);
    }

    fn resolve(&self, target: &Target) -> Vec<String> {
        match target {
            Target::Room(room) => self.registry.connections_for_room(room),
            Target::User(user_id) => self.registry.connections_for_user(user_id),
            Target::Clients(ids) => ids.clone(),
            Target::AllExcept(excluded) => {
                let senders = self.senders.lock();
                senders
                    .keys()
                    .filter(|id| !excluded.contains(id))
                    .cloned()
                    .collect()
            }
            Target::All => self.senders.lock().keys().cloned().collect(),
            Target::Connection(id) => vec![id.clone()],
        }
    }
}

impl Broadcaster for WsBroadcaster {
    fn emit(&self, target: Target, event: ClientEvent) {
        let ids = self.resolve(&target);
        if ids.is_empty() {
            return;
        }
        let frame = event.to_frame();
        let senders = self.senders.lock();
        for id in &ids {
            match senders.get(id) {
                Some(tx) => {
                    if let Err(e) = tx.try_send(frame.clone()) {
                        tracing::warn!(
                            connection = %id,
                            event = event.name(),
                            "dropping event for unreachable connection: {e}"
                        );
                    }
                }
                None => {
                    tracing::debug!(
                        connection = %id,
                        event = event.name(),
                        "no outbound channel for connection"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserStatus;

    fn user(name: &str) -> UserView {
        UserView {
            name: name.to_string(),
            status: UserStatus::Online,
            last_activity: 0,
            is_afk: false,
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, WsBroadcaster, mpsc::Receiver<String>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = WsBroadcaster::new(Arc::clone(&registry));
        registry.register("c1", "u1");
        let (tx, rx) = mpsc::channel(16);
        hub.attach("c1", tx);
        (registry, hub, rx)
    }

    #[test]
    fn frame_shape_matches_contract() {
        let event = ClientEvent::AddUser {
            user: user("alice"),
            room: "lobby".to_string(),
            is_owner: true,
        };
        let frame: serde_json::Value = serde_json::from_str(&event.to_frame()).unwrap();
        assert_eq!(frame["event"], "addUser");
        assert_eq!(frame["args"][0]["name"], "alice");
        assert_eq!(frame["args"][1], "lobby");
        assert_eq!(frame["args"][2], true);
    }

    #[test]
    fn room_target_reaches_subscribers() {
        let (registry, hub, mut rx) = setup();
        registry.subscribe("c1", "lobby");

        hub.emit(
            Target::Room("lobby".to_string()),
            ClientEvent::Leave { user: user("bob"), room: "lobby".to_string() },
        );
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "leave");
    }

    #[test]
    fn room_target_skips_non_subscribers() {
        let (_registry, hub, mut rx) = setup();
        hub.emit(
            Target::Room("lobby".to_string()),
            ClientEvent::Leave { user: user("bob"), room: "lobby".to_string() },
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn all_except_excludes_listed_connections() {
        let (registry, hub, mut rx1) = setup();
        registry.register("c2", "u2");
        let (tx2, mut rx2) = mpsc::channel(16);
        hub.attach("c2", tx2);

        hub.emit(
            Target::AllExcept(vec!["c1".to_string()]),
            ClientEvent::UpdateUnreadNotifications { count: 1 },
        );
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn failed_delivery_does_not_block_others() {
        let (registry, hub, _rx_dropped) = setup();
        registry.register("c2", "u2");
        registry.subscribe("c1", "lobby");
        registry.subscribe("c2", "lobby");
        let (tx2, mut rx2) = mpsc::channel(16);
        hub.attach("c2", tx2);

        // c1's receiver is dropped below; its channel is closed.
        drop(_rx_dropped);
        hub.emit(
            Target::Room("lobby".to_string()),
            ClientEvent::MarkInactive { users: vec![user("bob")] },
        );
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn user_target_fans_to_every_tab() {
        let (registry, hub, mut rx1) = setup();
        registry.register("c2", "u1");
        let (tx2, mut rx2) = mpsc::channel(16);
        hub.attach("c2", tx2);

        hub.emit(
            Target::User("u1".to_string()),
            ClientEvent::UpdateUnreadNotifications { count: 3 },
        );
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
