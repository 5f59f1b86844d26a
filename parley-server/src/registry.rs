//! Live connection registry.
//!
//! In-memory mapping of transport connections to their owning user and room
//! subscriptions, with reverse indexes for fan-out. This is the authoritative
//! record of "who is physically reachable right now": the transport layer
//! feeds it through connect/disconnect lifecycle hooks, never by inspecting
//! transport internals.
//!
//! All operations are short critical sections over one lock; no I/O happens
//! while it is held, and reads return a consistent snapshot.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

/// Room keys are case-insensitive.
fn room_key(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug, Default)]
struct ConnectionInfo {
    user_id: String,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    /// connection id → owning user and subscribed rooms
    connections: HashMap<String, ConnectionInfo>,
    /// room key → connection ids subscribed to it
    by_room: HashMap<String, HashSet<String>>,
    /// user id → connection ids
    by_user: HashMap<String, HashSet<String>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection for a user. Idempotent for the same pair.
    pub fn register(&self, connection_id: &str, user_id: &str) {
        let mut inner = self.inner.lock();
        inner
            .connections
            .entry(connection_id.to_string())
            .or_insert_with(|| ConnectionInfo {
                user_id: user_id.to_string(),
                rooms: HashSet::new(),
            });
        inner
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    /// Add a connection to a room's delivery set. No-op if already
    /// subscribed or if the connection is unknown.
    pub fn subscribe(&self, connection_id: &str, room: &str) {
        let key = room_key(room);
        let mut inner = self.inner.lock();
        let Some(info) = inner.connections.get_mut(connection_id) else {
            return;
        };
        if info.rooms.insert(key.clone()) {
            inner
                .by_room
                .entry(key)
                .or_default()
                .insert(connection_id.to_string());
        }
    }

    /// Remove a connection from a room's delivery set. No-op if absent.
    pub fn unsubscribe(&self, connection_id: &str, room: &str) {
        let key = room_key(room);
        let mut inner = self.inner.lock();
        let Some(info) = inner.connections.get_mut(connection_id) else {
            return;
        };
        if info.rooms.remove(&key) {
            if let Some(set) = inner.by_room.get_mut(&key) {
                set.remove(connection_id);
                if set.is_empty() {
                    inner.by_room.remove(&key);
                }
            }
        }
    }

    /// Subscribe every live connection of a user to a room.
    pub fn subscribe_user(&self, user_id: &str, room: &str) {
        for conn in self.connections_for_user(user_id) {
            self.subscribe(&conn, room);
        }
    }

    /// Unsubscribe every live connection of a user from a room.
    pub fn unsubscribe_user(&self, user_id: &str, room: &str) {
        for conn in self.connections_for_user(user_id) {
            self.unsubscribe(&conn, room);
        }
    }

    pub fn connections_for_room(&self, room: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .by_room
            .get(&room_key(room))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connections_for_user(&self, user_id: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .by_user
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_of(&self, connection_id: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .connections
            .get(connection_id)
            .map(|info| info.user_id.clone())
    }

    /// Every live connection paired with its owning user. Used by the
    /// reconciler's drift-healing pass.
    pub fn all_connections(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock();
        inner
            .connections
            .iter()
            .map(|(id, info)| (id.clone(), info.user_id.clone()))
            .collect()
    }

    /// Remove a connection from every index. Returns the owning user id if
    /// the connection was tracked. Irreversible.
    pub fn drop_connection(&self, connection_id: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let info = inner.connections.remove(connection_id)?;
        for key in &info.rooms {
            if let Some(set) = inner.by_room.get_mut(key) {
                set.remove(connection_id);
                if set.is_empty() {
                    inner.by_room.remove(key);
                }
            }
        }
        if let Some(set) = inner.by_user.get_mut(&info.user_id) {
            set.remove(connection_id);
            if set.is_empty() {
                inner.by_user.remove(&info.user_id);
            }
        }
        Some(info.user_id)
    }
}
