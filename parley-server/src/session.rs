//! Session coordinator: the entry surface for connection-lifecycle and room
//! operations.
//!
//! Each operation validates, mutates the store inside one transaction, and
//! only then fans out events — so a client can never observe a broadcast for
//! state it cannot also read back.
//!
//! Presence transitions for one user (connect / disconnect / reconnect) are
//! serialized behind a per-user async mutex: two racing disconnects must not
//! leave status inconsistent with the actual client count. That is the only
//! lock here beyond per-structure ones, and it is scoped to a single user.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::AbortHandle;

use crate::broadcast::{Broadcaster, ClientEvent, Target};
use crate::error::ChatError;
use crate::mention::extract_mentions;
use crate::models::{ClientRow, MessageRow, MessageView, RoomSummary, UserRow, UserStatus, UserView, now_ms};
use crate::msgid;
use crate::registry::ConnectionRegistry;
use crate::store::Store;

/// A mention is marked already-read only if the mentioned user showed
/// activity within this window (and is in the room, not AFK, not offline).
const MENTION_READ_WINDOW_MS: i64 = 10 * 60 * 1000;

/// Backlog messages handed to a connecting client per room.
const CONNECT_BACKLOG: usize = 50;

/// Per-user mutexes guarding "count my clients, decide my status".
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    fn acquire(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }
}

/// Per-room state handed to a freshly connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room: RoomSummary,
    pub users: Vec<UserView>,
    pub recent: Vec<MessageView>,
}

/// What a client learns when its connection registers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSnapshot {
    pub user: UserView,
    pub rooms: Vec<RoomInfo>,
}

/// Cheap to clone: every field is shared. A clone rides into the spawned
/// grace-window task.
#[derive(Clone)]
pub struct SessionCoordinator {
    store: Arc<Store>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    locks: Arc<UserLocks>,
    /// Pending delayed status recomputations, keyed by connection id. A
    /// reconnect for the same connection aborts the entry instead of racing
    /// it.
    pending: Arc<Mutex<HashMap<String, AbortHandle>>>,
    max_message_length: usize,
    disconnect_grace: Duration,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
        max_message_length: usize,
        disconnect_grace: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            locks: Arc::new(UserLocks::default()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            max_message_length,
            disconnect_grace,
        }
    }

    // ── Connection lifecycle ───────────────────────────────────────────

    /// Register a new physical connection for a user.
    ///
    /// Presence only changes on the user's *first* connection: going from
    /// zero clients flips Offline→Inactive and announces the user to every
    /// room they belong to. Additional tabs register silently.
    pub async fn connect(
        &self,
        user_id: &str,
        name: &str,
        connection_id: &str,
        user_agent: Option<&str>,
    ) -> Result<ConnectSnapshot, ChatError> {
        let lock = self.locks.acquire(user_id);
        let _guard = lock.lock().await;

        let now = now_ms();
        let (flipped, user, rooms, infos) = self.store.with_tx(|tx| {
            tx.ensure_user(user_id, name)?;
            let had_clients = tx.client_count(user_id)? > 0;
            tx.add_client(&ClientRow {
                id: connection_id.to_string(),
                user_id: user_id.to_string(),
                user_agent: user_agent.map(str::to_string),
                last_activity: now,
                last_client_activity: now,
            })?;
            tx.touch_user(user_id, now)?;

            let mut user = tx
                .get_user(user_id)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            let mut flipped = false;
            if !had_clients && user.status == UserStatus::Offline {
                tx.set_status(user_id, UserStatus::Inactive)?;
                user.status = UserStatus::Inactive;
                flipped = true;
            }

            let mut rooms = Vec::new();
            let mut infos = Vec::new();
            for room in tx.rooms_of_user(user_id)? {
                rooms.push((room.clone(), tx.is_owner(user_id, &room)?));
                if let Some(summary) = tx.room_summary(&room)? {
                    let users = tx.online_users(&room)?.iter().map(UserView::from).collect();
                    let recent = tx.recent_messages(&room, CONNECT_BACKLOG)?;
                    infos.push(RoomInfo { room: summary, users, recent });
                }
            }
            Ok((flipped, user, rooms, infos))
        })?;

        for (room, _) in &rooms {
            self.registry.subscribe(connection_id, room);
        }

        if flipped {
            let view = UserView::from(&user);
            for (room, is_owner) in &rooms {
                self.broadcaster.emit(
                    Target::Room(room.clone()),
                    ClientEvent::AddUser {
                        user: view.clone(),
                        room: room.clone(),
                        is_owner: *is_owner,
                    },
                );
            }
        }

        tracing::info!(user = %user.name, connection = %connection_id, first = flipped, "connected");
        Ok(ConnectSnapshot { user: UserView::from(&user), rooms: infos })
    }

    /// Re-register a connection that dropped and came back before the
    /// reconciler expired it. If the disconnect grace window already fired
    /// (stored status is Offline) this behaves like a fresh connect and
    /// re-announces the user; otherwise it is silent.
    pub async fn reconnect(
        &self,
        user_id: &str,
        name: &str,
        connection_id: &str,
        user_agent: Option<&str>,
    ) -> Result<(), ChatError> {
        // Cancel the pending status recomputation, not merely outrace it.
        if let Some(handle) = self.pending.lock().remove(connection_id) {
            handle.abort();
        }

        let lock = self.locks.acquire(user_id);
        let _guard = lock.lock().await;

        let now = now_ms();
        let (was_offline, user, rooms) = self.store.with_tx(|tx| {
            tx.ensure_user(user_id, name)?;
            tx.add_client(&ClientRow {
                id: connection_id.to_string(),
                user_id: user_id.to_string(),
                user_agent: user_agent.map(str::to_string),
                last_activity: now,
                last_client_activity: now,
            })?;
            tx.touch_user(user_id, now)?;

            let mut user = tx
                .get_user(user_id)?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            let was_offline = user.status == UserStatus::Offline;
            if was_offline {
                tx.set_status(user_id, UserStatus::Inactive)?;
                user.status = UserStatus::Inactive;
            }
            let mut rooms = Vec::new();
            for room in tx.rooms_of_user(user_id)? {
                rooms.push((room.clone(), tx.is_owner(user_id, &room)?));
            }
            Ok((was_offline, user, rooms))
        })?;

        for (room, _) in &rooms {
            self.registry.subscribe(connection_id, room);
        }

        if was_offline {
            tracing::info!(user = %user.name, connection = %connection_id, "reconnected after going offline");
            let view = UserView::from(&user);
            for (room, is_owner) in &rooms {
                self.broadcaster.emit(
                    Target::Room(room.clone()),
                    ClientEvent::AddUser {
                        user: view.clone(),
                        room: room.clone(),
                        is_owner: *is_owner,
                    },
                );
            }
        } else {
            tracing::debug!(user = %user.name, connection = %connection_id, "reconnected");
        }
        Ok(())
    }

    /// Tear down a physical connection.
    ///
    /// The client row is removed immediately so the reconciler sees truth,
    /// but with `use_threshold` the status recomputation (and any `leave`
    /// broadcast) is deferred by the grace window so a page refresh does not
    /// flicker the user to Offline and back.
    pub async fn disconnect(
        &self,
        connection_id: &str,
        use_threshold: bool,
    ) -> Result<(), ChatError> {
        let registry_user = self.registry.drop_connection(connection_id);
        let store_user = self
            .store
            .with_tx(|tx| tx.remove_client(connection_id))?;

        let Some(user_id) = store_user.or(registry_user) else {
            tracing::info!(connection = %connection_id, "disconnect for unknown connection");
            return Ok(());
        };

        if use_threshold {
            let this = self.clone();
            let conn = connection_id.to_string();
            let uid = user_id.clone();
            let grace = self.disconnect_grace;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                this.pending.lock().remove(&conn);
                if let Err(e) = this.finalize_disconnect(&uid).await {
                    tracing::error!(user = %uid, "deferred disconnect failed: {e}");
                }
            });
            if let Some(old) = self
                .pending
                .lock()
                .insert(connection_id.to_string(), handle.abort_handle())
            {
                old.abort();
            }
        } else {
            self.finalize_disconnect(&user_id).await?;
        }
        Ok(())
    }

    /// Recompute a user's status after a connection went away. Collapses to
    /// Offline (and broadcasts `leave` per room) only when the last client
    /// is gone; a concurrent finalization that already flipped the user is a
    /// no-op here, so one user going away yields exactly one `leave` per
    /// room.
    async fn finalize_disconnect(&self, user_id: &str) -> Result<(), ChatError> {
        let lock = self.locks.acquire(user_id);
        let _guard = lock.lock().await;

        let outcome = self.store.with_tx(|tx| {
            let Some(mut user) = tx.get_user(user_id)? else {
                return Ok(None);
            };
            if user.status == UserStatus::Offline {
                return Ok(None);
            }
            if tx.client_count(user_id)? > 0 {
                return Ok(None);
            }
            tx.set_status(user_id, UserStatus::Offline)?;
            user.status = UserStatus::Offline;
            let rooms = tx.rooms_of_user(user_id)?;
            Ok(Some((user, rooms)))
        })?;

        if let Some((user, rooms)) = outcome {
            tracing::info!(user = %user.name, "all clients gone, marking offline");
            let view = UserView::from(&user);
            for room in rooms {
                self.broadcaster.emit(
                    Target::Room(room.clone()),
                    ClientEvent::Leave { user: view.clone(), room },
                );
            }
        }
        Ok(())
    }

    // ── Room operations ────────────────────────────────────────────────

    /// Join a room, creating it if it does not exist (the creator becomes
    /// owner). Subscribes every live connection of the user and announces
    /// the join to the room and the user's own tabs.
    pub fn join(&self, user_id: &str, room_name: &str) -> Result<RoomSummary, ChatError> {
        let now = now_ms();
        let (user, room, summary, is_owner, already_member) = self
            .store
            .with_tx(|tx| {
                let Some(user) = tx.get_user(user_id)? else {
                    return Ok(Err(ChatError::UnknownUser(user_id.to_string())));
                };
                let (created, room) = match tx.get_room(room_name)? {
                    Some(room) => (false, room),
                    None => {
                        tx.ensure_room(room_name, Some(user_id))?;
                        let room = tx
                            .get_room(room_name)?
                            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                        (true, room)
                    }
                };
                if room.closed {
                    return Ok(Err(ChatError::RoomClosed(room.name)));
                }
                let already_member = tx.is_user_in_room(user_id, &room.name)?;
                if room.private
                    && !already_member
                    && !tx.is_allowed(user_id, &room.name)?
                {
                    return Ok(Err(ChatError::AccessDenied(room.name)));
                }
                if !already_member {
                    tx.add_membership(user_id, &room.name, created)?;
                    tx.touch_user(user_id, now)?;
                }
                let is_owner = tx.is_owner(user_id, &room.name)?;
                let summary = tx
                    .room_summary(&room.name)?
                    .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                Ok(Ok((user, room.name, summary, is_owner, already_member)))
            })??;

        self.registry.subscribe_user(user_id, &room);
        if already_member {
            return Ok(summary);
        }

        let view = UserView::from(&user);
        self.broadcaster.emit(
            Target::Room(room.clone()),
            ClientEvent::AddUser { user: view, room: room.clone(), is_owner },
        );
        self.broadcaster.emit(
            Target::User(user_id.to_string()),
            ClientEvent::JoinRoom { room: summary.clone() },
        );
        self.room_changed(&room)?;
        Ok(summary)
    }

    /// Leave a room: announce to the room (the leaver's own tabs included),
    /// then unsubscribe every one of the user's connections.
    pub fn leave(&self, user_id: &str, room_name: &str) -> Result<(), ChatError> {
        let (user, room) = self
            .store
            .with_tx(|tx| {
                let Some(user) = tx.get_user(user_id)? else {
                    return Ok(Err(ChatError::UnknownUser(user_id.to_string())));
                };
                let Some(room) = tx.get_room(room_name)? else {
                    return Ok(Err(ChatError::UnknownRoom(room_name.to_string())));
                };
                if !tx.remove_membership(user_id, &room.name)? {
                    return Ok(Err(ChatError::NotInRoom(room.name)));
                }
                Ok(Ok((user, room.name)))
            })??;

        let view = UserView::from(&user);
        self.broadcaster.emit(
            Target::Room(room.clone()),
            ClientEvent::Leave { user: view, room: room.clone() },
        );
        self.registry.unsubscribe_user(user_id, &room);
        self.room_changed(&room)?;
        Ok(())
    }

    /// Post a message to a room.
    ///
    /// Rejected before any mutation when the content is too long, the room
    /// is closed, or the sender lacks access. When the client supplied a
    /// provisional id, the rest of the room receives `addMessage` before the
    /// sender's own `replaceMessage` — other members must never see a
    /// message flash before the sender's UI reconciles it.
    pub fn send_message(
        &self,
        user_id: &str,
        connection_id: Option<&str>,
        room_name: &str,
        content: &str,
        client_message_id: Option<&str>,
    ) -> Result<MessageView, ChatError> {
        if self.max_message_length > 0 && content.chars().count() > self.max_message_length {
            return Err(ChatError::MessageTooLong(self.max_message_length));
        }

        let now = now_ms();
        let message_id = msgid::generate();
        let (view, user_view, crossed, unread, room) = self
            .store
            .with_tx(|tx| {
                let Some(user) = tx.get_user(user_id)? else {
                    return Ok(Err(ChatError::UnknownUser(user_id.to_string())));
                };
                let Some(room) = tx.get_room(room_name)? else {
                    return Ok(Err(ChatError::UnknownRoom(room_name.to_string())));
                };
                if room.closed {
                    return Ok(Err(ChatError::RoomClosed(room.name)));
                }
                if !tx.is_user_in_room(user_id, &room.name)? {
                    return Ok(Err(ChatError::NotInRoom(room.name)));
                }
                if room.private && !tx.is_allowed(user_id, &room.name)? {
                    return Ok(Err(ChatError::AccessDenied(room.name)));
                }

                // Activity touch; sending always forces the user active.
                let crossed = user.status != UserStatus::Online;
                tx.touch_user(user_id, now)?;
                if let Some(conn) = connection_id {
                    tx.touch_client(conn, now)?;
                }
                if crossed {
                    tx.set_status(user_id, UserStatus::Online)?;
                }

                tx.insert_message(&MessageRow {
                    id: message_id.clone(),
                    room: room.name.clone(),
                    user_id: user_id.to_string(),
                    content: content.to_string(),
                    posted_at: now,
                })?;

                let mentioned = self.record_mentions(tx, &user, &room.name, room.private, content, &message_id, now)?;
                let mut unread = Vec::new();
                for m in &mentioned {
                    unread.push((m.id.clone(), tx.unread_notification_count(&m.id)?));
                }

                let view = MessageView {
                    id: message_id.clone(),
                    user: user.name.clone(),
                    content: content.to_string(),
                    posted_at: now,
                };
                let user_view = UserView {
                    name: user.name.clone(),
                    status: UserStatus::Online,
                    last_activity: now,
                    is_afk: user.is_afk,
                };
                Ok(Ok((view, user_view, crossed, unread, room.name)))
            })??;

        if crossed {
            self.broadcaster.emit(
                Target::Room(room.clone()),
                ClientEvent::UpdateActivity { user: user_view, room: room.clone() },
            );
        }

        match (client_message_id, connection_id) {
            (Some(client_id), Some(conn)) => {
                let others: Vec<String> = self
                    .registry
                    .connections_for_room(&room)
                    .into_iter()
                    .filter(|c| c != conn)
                    .collect();
                self.broadcaster.emit(
                    Target::Clients(others),
                    ClientEvent::AddMessage { message: view.clone(), room: room.clone() },
                );
                self.broadcaster.emit(
                    Target::Connection(conn.to_string()),
                    ClientEvent::ReplaceMessage {
                        client_id: client_id.to_string(),
                        message: view.clone(),
                        room: room.clone(),
                    },
                );
            }
            _ => {
                self.broadcaster.emit(
                    Target::Room(room.clone()),
                    ClientEvent::AddMessage { message: view.clone(), room: room.clone() },
                );
            }
        }

        for (uid, count) in unread {
            self.broadcaster.emit(
                Target::User(uid),
                ClientEvent::UpdateUnreadNotifications { count },
            );
        }
        Ok(view)
    }

    /// Create mention notifications for a message. A user is notified at
    /// most once per message, never for their own message, and never for a
    /// private room they cannot see. The notification starts already-read
    /// when the user is demonstrably watching: not offline, not AFK, active
    /// within the read window, and currently a member of the room.
    fn record_mentions(
        &self,
        tx: &crate::store::StoreTx<'_>,
        author: &UserRow,
        room: &str,
        room_private: bool,
        content: &str,
        message_id: &str,
        now: i64,
    ) -> rusqlite::Result<Vec<UserRow>> {
        let mut mentioned: Vec<UserRow> = Vec::new();
        for name in extract_mentions(content) {
            let Some(user) = tx.get_user_by_name(&name)? else {
                continue;
            };
            if user.id == author.id {
                continue;
            }
            if room_private
                && !tx.is_allowed(&user.id, room)?
                && !tx.is_user_in_room(&user.id, room)?
            {
                continue;
            }
            if mentioned.iter().any(|m| m.id == user.id) {
                continue;
            }
            let in_room = tx.is_user_in_room(&user.id, room)?;
            let read = user.status != UserStatus::Offline
                && !user.is_afk
                && now - user.last_activity < MENTION_READ_WINDOW_MS
                && in_room;
            tx.add_notification(&user.id, message_id, room, read)?;
            mentioned.push(user);
        }
        Ok(mentioned)
    }

    /// Typing indicator: touches activity and tells the room.
    pub fn typing(&self, user_id: &str, room_name: &str) -> Result<(), ChatError> {
        let now = now_ms();
        let (user_view, crossed, room) = self
            .store
            .with_tx(|tx| {
                let Some(user) = tx.get_user(user_id)? else {
                    return Ok(Err(ChatError::UnknownUser(user_id.to_string())));
                };
                let Some(room) = tx.get_room(room_name)? else {
                    return Ok(Err(ChatError::UnknownRoom(room_name.to_string())));
                };
                if !tx.is_user_in_room(user_id, &room.name)? {
                    return Ok(Err(ChatError::NotInRoom(room.name)));
                }
                let crossed = user.status != UserStatus::Online;
                tx.touch_user(user_id, now)?;
                if crossed {
                    tx.set_status(user_id, UserStatus::Online)?;
                }
                let user_view = UserView {
                    name: user.name.clone(),
                    status: UserStatus::Online,
                    last_activity: now,
                    is_afk: user.is_afk,
                };
                Ok(Ok((user_view, crossed, room.name)))
            })??;

        if crossed {
            self.broadcaster.emit(
                Target::Room(room.clone()),
                ClientEvent::UpdateActivity { user: user_view.clone(), room: room.clone() },
            );
        }
        self.broadcaster.emit(
            Target::Room(room.clone()),
            ClientEvent::SetTyping { user: user_view, room },
        );
        Ok(())
    }

    /// Explicit client heartbeat: touch the user and connection, and if the
    /// touch crossed the Inactive→Online boundary announce it to every room
    /// the user is in.
    pub fn update_activity(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<(), ChatError> {
        let now = now_ms();
        let (user_view, crossed, rooms) = self
            .store
            .with_tx(|tx| {
                let Some(user) = tx.get_user(user_id)? else {
                    return Ok(Err(ChatError::UnknownUser(user_id.to_string())));
                };
                let crossed = user.status == UserStatus::Inactive;
                tx.touch_user(user_id, now)?;
                tx.touch_client(connection_id, now)?;
                if crossed {
                    tx.set_status(user_id, UserStatus::Online)?;
                }
                let user_view = UserView {
                    name: user.name.clone(),
                    status: if crossed { UserStatus::Online } else { user.status },
                    last_activity: now,
                    is_afk: user.is_afk,
                };
                Ok(Ok((user_view, crossed, tx.rooms_of_user(user_id)?)))
            })??;

        if crossed {
            for room in rooms {
                self.broadcaster.emit(
                    Target::Room(room.clone()),
                    ClientEvent::UpdateActivity { user: user_view.clone(), room },
                );
            }
        }
        Ok(())
    }

    /// Remove a user from a room they were kicked out of. The kick event
    /// reaches the room while the target's tabs are still subscribed, so
    /// every one of their devices sees it.
    pub fn kick(
        &self,
        caller_id: &str,
        target_name: &str,
        room_name: &str,
        reason: Option<&str>,
    ) -> Result<(), ChatError> {
        let (caller, target, room) = self
            .store
            .with_tx(|tx| {
                let Some(caller) = tx.get_user(caller_id)? else {
                    return Ok(Err(ChatError::UnknownUser(caller_id.to_string())));
                };
                let Some(room) = tx.get_room(room_name)? else {
                    return Ok(Err(ChatError::UnknownRoom(room_name.to_string())));
                };
                if !tx.is_owner(caller_id, &room.name)? {
                    return Ok(Err(ChatError::NotOwner(room.name)));
                }
                let Some(target) = tx.get_user_by_name(target_name)? else {
                    return Ok(Err(ChatError::UnknownUser(target_name.to_string())));
                };
                if !tx.remove_membership(&target.id, &room.name)? {
                    return Ok(Err(ChatError::NotInRoom(room.name)));
                }
                Ok(Ok((caller, target, room.name)))
            })??;

        self.broadcaster.emit(
            Target::Room(room.clone()),
            ClientEvent::Kick {
                user: UserView::from(&target),
                room: room.clone(),
                caller: UserView::from(&caller),
                reason: reason.map(str::to_string),
            },
        );
        self.registry.unsubscribe_user(&target.id, &room);
        self.room_changed(&room)?;
        Ok(())
    }

    /// Make a room private. Everyone currently allowed to see it gets the
    /// visible event; everyone else gets the redacted one so the room
    /// disappears from their lobby rather than silently never existing.
    pub fn lock_room(&self, caller_id: &str, room_name: &str) -> Result<(), ChatError> {
        let (caller, room, allowed) = self
            .store
            .with_tx(|tx| {
                let Some(caller) = tx.get_user(caller_id)? else {
                    return Ok(Err(ChatError::UnknownUser(caller_id.to_string())));
                };
                let Some(room) = tx.get_room(room_name)? else {
                    return Ok(Err(ChatError::UnknownRoom(room_name.to_string())));
                };
                if !tx.is_owner(caller_id, &room.name)? {
                    return Ok(Err(ChatError::NotOwner(room.name)));
                }
                tx.set_room_private(&room.name, true)?;
                // Current members keep their access.
                for member in tx.members_of_room(&room.name)? {
                    tx.allow_user(&member.id, &room.name)?;
                }
                let allowed = tx.allowed_client_ids(&room.name)?;
                Ok(Ok((caller, room.name, allowed)))
            })??;

        let view = UserView::from(&caller);
        self.broadcaster.emit(
            Target::Clients(allowed.clone()),
            ClientEvent::LockRoom { user: view.clone(), room: room.clone(), visible: true },
        );
        self.broadcaster.emit(
            Target::AllExcept(allowed),
            ClientEvent::LockRoom { user: view, room: room.clone(), visible: false },
        );
        self.room_changed(&room)?;
        Ok(())
    }

    /// Push the room's current summary to everyone who can see it: all
    /// clients for a public room, only the allowed set for a private one.
    /// Events about a private room are never broadcast globally.
    pub fn room_changed(&self, room_name: &str) -> Result<(), ChatError> {
        let outcome = self.store.with_tx(|tx| {
            let Some(summary) = tx.room_summary(room_name)? else {
                return Ok(None);
            };
            let allowed = if summary.private {
                Some(tx.allowed_client_ids(room_name)?)
            } else {
                None
            };
            Ok(Some((summary, allowed)))
        })?;

        if let Some((summary, allowed)) = outcome {
            let event = ClientEvent::UpdateRoom { room: summary };
            match allowed {
                Some(ids) => self.broadcaster.emit(Target::Clients(ids), event),
                None => self.broadcaster.emit(Target::All, event),
            }
        }
        Ok(())
    }
}
