//! SQLite persistence layer.
//!
//! Durable record of users, rooms, clients (physical connections), room
//! membership, messages, and mention notifications. Uses WAL mode for
//! concurrent reads during writes.
//!
//! Every mutating flow goes through [`Store::with_tx`]: the closure's
//! mutations commit as one unit, so a logical operation ("join room" = add
//! membership + touch activity + maybe flip status) is atomic and a failure
//! leaves no partial state behind.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};

use crate::models::{ClientRow, MessageRow, MessageView, RoomRow, RoomSummary, UserRow, UserStatus};

/// Database handle wrapping a SQLite connection.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Run a closure inside a transaction. Commits if the closure returns
    /// `Ok`, rolls back otherwise. This is the atomicity boundary for every
    /// mutating operation; broadcasts must happen only after this returns.
    pub fn with_tx<R>(&self, f: impl FnOnce(&StoreTx) -> SqlResult<R>) -> SqlResult<R> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let view = StoreTx { conn: &tx };
        match f(&view) {
            Ok(r) => {
                tx.commit()?;
                Ok(r)
            }
            Err(e) => Err(e), // tx dropped → rollback
        }
    }
}

fn init(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            TEXT PRIMARY KEY,
            name          TEXT NOT NULL UNIQUE COLLATE NOCASE,
            status        INTEGER NOT NULL DEFAULT 2,
            last_activity INTEGER NOT NULL DEFAULT 0,
            is_afk        INTEGER NOT NULL DEFAULT 0,
            afk_note      TEXT
        );

        CREATE TABLE IF NOT EXISTS rooms (
            name    TEXT PRIMARY KEY COLLATE NOCASE,
            private INTEGER NOT NULL DEFAULT 0,
            closed  INTEGER NOT NULL DEFAULT 0,
            topic   TEXT,
            welcome TEXT,
            creator TEXT
        );

        CREATE TABLE IF NOT EXISTS clients (
            id                   TEXT PRIMARY KEY,
            user_id              TEXT NOT NULL REFERENCES users(id),
            user_agent           TEXT,
            last_activity        INTEGER NOT NULL,
            last_client_activity INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_clients_user ON clients(user_id);
        CREATE INDEX IF NOT EXISTS idx_clients_activity ON clients(last_activity);

        CREATE TABLE IF NOT EXISTS memberships (
            user_id  TEXT NOT NULL REFERENCES users(id),
            room     TEXT NOT NULL COLLATE NOCASE,
            is_owner INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, room)
        );

        CREATE INDEX IF NOT EXISTS idx_memberships_room ON memberships(room);

        CREATE TABLE IF NOT EXISTS allowed (
            user_id TEXT NOT NULL REFERENCES users(id),
            room    TEXT NOT NULL COLLATE NOCASE,
            PRIMARY KEY (user_id, room)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id        TEXT PRIMARY KEY,
            room      TEXT NOT NULL COLLATE NOCASE,
            user_id   TEXT NOT NULL,
            content   TEXT NOT NULL,
            posted_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room_ts
            ON messages(room, posted_at DESC);

        CREATE TABLE IF NOT EXISTS notifications (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL REFERENCES users(id),
            message_id TEXT NOT NULL REFERENCES messages(id),
            room       TEXT NOT NULL COLLATE NOCASE,
            read       INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, read);
        ",
    )?;
    Ok(())
}

/// Transactional view over the store. All reads and writes inside a single
/// logical operation go through one of these.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    // ── Users ──────────────────────────────────────────────────────────

    /// Create a user row if one does not exist yet. The identity provider
    /// resolves the id upstream; this backfills the durable record on first
    /// sight. New users start Offline with no activity.
    pub fn ensure_user(&self, id: &str, name: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO users (id, name, status) VALUES (?1, ?2, ?3)",
            params![id, name, UserStatus::Offline.as_i64()],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> SqlResult<Option<UserRow>> {
        self.conn
            .query_row(
                "SELECT id, name, status, last_activity, is_afk, afk_note
                 FROM users WHERE id = ?1",
                params![id],
                map_user_row,
            )
            .optional()
    }

    /// Case-insensitive lookup by name.
    pub fn get_user_by_name(&self, name: &str) -> SqlResult<Option<UserRow>> {
        self.conn
            .query_row(
                "SELECT id, name, status, last_activity, is_afk, afk_note
                 FROM users WHERE name = ?1",
                params![name],
                map_user_row,
            )
            .optional()
    }

    pub fn set_status(&self, user_id: &str, status: UserStatus) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE users SET status = ?2 WHERE id = ?1",
            params![user_id, status.as_i64()],
        )?;
        Ok(())
    }

    pub fn touch_user(&self, user_id: &str, now_ms: i64) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE users SET last_activity = ?2 WHERE id = ?1",
            params![user_id, now_ms],
        )?;
        Ok(())
    }

    pub fn set_afk(&self, user_id: &str, afk: bool, note: Option<&str>) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE users SET is_afk = ?2, afk_note = ?3 WHERE id = ?1",
            params![user_id, afk as i64, note],
        )?;
        Ok(())
    }

    // ── Clients ────────────────────────────────────────────────────────

    /// Register a client row for a connection. Replaces any stale row with
    /// the same connection id (reconnect before the reconciler reaped it).
    pub fn add_client(&self, client: &ClientRow) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO clients
                 (id, user_id, user_agent, last_activity, last_client_activity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                client.id,
                client.user_id,
                client.user_agent,
                client.last_activity,
                client.last_client_activity,
            ],
        )?;
        Ok(())
    }

    /// Remove a client row. Returns the owning user id if the row existed.
    pub fn remove_client(&self, id: &str) -> SqlResult<Option<String>> {
        let user_id: Option<String> = self
            .conn
            .query_row(
                "SELECT user_id FROM clients WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if user_id.is_some() {
            self.conn
                .execute("DELETE FROM clients WHERE id = ?1", params![id])?;
        }
        Ok(user_id)
    }

    pub fn get_client(&self, id: &str) -> SqlResult<Option<ClientRow>> {
        self.conn
            .query_row(
                "SELECT id, user_id, user_agent, last_activity, last_client_activity
                 FROM clients WHERE id = ?1",
                params![id],
                map_client_row,
            )
            .optional()
    }

    pub fn client_count(&self, user_id: &str) -> SqlResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM clients WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
    }

    pub fn touch_client(&self, id: &str, now_ms: i64) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE clients SET last_activity = ?2 WHERE id = ?1",
            params![id, now_ms],
        )?;
        Ok(())
    }

    /// Zombie candidates: client rows whose last activity predates the
    /// cutoff. The transport dropped these without a clean disconnect.
    pub fn clients_older_than(&self, cutoff_ms: i64) -> SqlResult<Vec<ClientRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, user_agent, last_activity, last_client_activity
             FROM clients WHERE last_activity < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff_ms], map_client_row)?;
        rows.collect()
    }

    // ── Rooms ──────────────────────────────────────────────────────────

    /// Create a room if it does not exist. Returns true if created.
    pub fn ensure_room(&self, name: &str, creator: Option<&str>) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO rooms (name, creator) VALUES (?1, ?2)",
            params![name, creator],
        )?;
        Ok(changed > 0)
    }

    pub fn get_room(&self, name: &str) -> SqlResult<Option<RoomRow>> {
        self.conn
            .query_row(
                "SELECT name, private, closed, topic, welcome, creator
                 FROM rooms WHERE name = ?1",
                params![name],
                map_room_row,
            )
            .optional()
    }

    pub fn set_room_private(&self, name: &str, private: bool) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE rooms SET private = ?2 WHERE name = ?1",
            params![name, private as i64],
        )?;
        Ok(())
    }

    pub fn set_room_closed(&self, name: &str, closed: bool) -> SqlResult<()> {
        self.conn.execute(
            "UPDATE rooms SET closed = ?2 WHERE name = ?1",
            params![name, closed as i64],
        )?;
        Ok(())
    }

    /// Room summary with the live (non-Offline) member count.
    pub fn room_summary(&self, name: &str) -> SqlResult<Option<RoomSummary>> {
        let Some(room) = self.get_room(name)? else {
            return Ok(None);
        };
        let count = self.online_count(&room.name)?;
        Ok(Some(RoomSummary {
            name: room.name,
            count,
            private: room.private,
            closed: room.closed,
            topic: room.topic,
        }))
    }

    pub fn all_rooms(&self) -> SqlResult<Vec<RoomRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, private, closed, topic, welcome, creator FROM rooms ORDER BY name",
        )?;
        let rows = stmt.query_map([], map_room_row)?;
        rows.collect()
    }

    // ── Memberships ────────────────────────────────────────────────────

    pub fn add_membership(&self, user_id: &str, room: &str, is_owner: bool) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO memberships (user_id, room, is_owner) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, room) DO NOTHING",
            params![user_id, room, is_owner as i64],
        )?;
        Ok(())
    }

    pub fn remove_membership(&self, user_id: &str, room: &str) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM memberships WHERE user_id = ?1 AND room = ?2",
            params![user_id, room],
        )?;
        Ok(changed > 0)
    }

    pub fn is_user_in_room(&self, user_id: &str, room: &str) -> SqlResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM memberships WHERE user_id = ?1 AND room = ?2",
            params![user_id, room],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn is_owner(&self, user_id: &str, room: &str) -> SqlResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM memberships
             WHERE user_id = ?1 AND room = ?2 AND is_owner = 1",
            params![user_id, room],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn rooms_of_user(&self, user_id: &str) -> SqlResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT room FROM memberships WHERE user_id = ?1 ORDER BY room")?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
        rows.collect()
    }

    pub fn members_of_room(&self, room: &str) -> SqlResult<Vec<UserRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.name, u.status, u.last_activity, u.is_afk, u.afk_note
             FROM users u JOIN memberships m ON m.user_id = u.id
             WHERE m.room = ?1 ORDER BY u.name",
        )?;
        let rows = stmt.query_map(params![room], map_user_row)?;
        rows.collect()
    }

    /// Members of a room that are currently not Offline.
    pub fn online_users(&self, room: &str) -> SqlResult<Vec<UserRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.name, u.status, u.last_activity, u.is_afk, u.afk_note
             FROM users u JOIN memberships m ON m.user_id = u.id
             WHERE m.room = ?1 AND u.status != ?2 ORDER BY u.name",
        )?;
        let rows = stmt.query_map(params![room, UserStatus::Offline.as_i64()], map_user_row)?;
        rows.collect()
    }

    pub fn online_count(&self, room: &str) -> SqlResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM users u JOIN memberships m ON m.user_id = u.id
             WHERE m.room = ?1 AND u.status != ?2",
            params![room, UserStatus::Offline.as_i64()],
            |row| row.get(0),
        )
    }

    // ── Private-room access ────────────────────────────────────────────

    pub fn allow_user(&self, user_id: &str, room: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO allowed (user_id, room) VALUES (?1, ?2)
             ON CONFLICT(user_id, room) DO NOTHING",
            params![user_id, room],
        )?;
        Ok(())
    }

    pub fn is_allowed(&self, user_id: &str, room: &str) -> SqlResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM allowed WHERE user_id = ?1 AND room = ?2",
            params![user_id, room],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Connection ids of every client whose user is permitted to see the
    /// room: the allowed list plus current members. Events about a private
    /// room must be narrowed to exactly this set.
    pub fn allowed_client_ids(&self, room: &str) -> SqlResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT c.id FROM clients c
             WHERE c.user_id IN (
                 SELECT user_id FROM allowed WHERE room = ?1
                 UNION
                 SELECT user_id FROM memberships WHERE room = ?1
             )",
        )?;
        let rows = stmt.query_map(params![room], |row| row.get(0))?;
        rows.collect()
    }

    // ── Reconciler queries ─────────────────────────────────────────────

    /// Users marked Online/Inactive that have no client rows left.
    pub fn users_with_zero_clients(&self) -> SqlResult<Vec<UserRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, status, last_activity, is_afk, afk_note
             FROM users
             WHERE status != ?1
               AND NOT EXISTS (SELECT 1 FROM clients c WHERE c.user_id = users.id)",
        )?;
        let rows = stmt.query_map(params![UserStatus::Offline.as_i64()], map_user_row)?;
        rows.collect()
    }

    /// Online users whose last activity predates the cutoff.
    pub fn users_idle_longer_than(&self, cutoff_ms: i64) -> SqlResult<Vec<UserRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, status, last_activity, is_afk, afk_note
             FROM users WHERE status = ?1 AND last_activity < ?2",
        )?;
        let rows = stmt.query_map(
            params![UserStatus::Online.as_i64(), cutoff_ms],
            map_user_row,
        )?;
        rows.collect()
    }

    // ── Messages ───────────────────────────────────────────────────────

    pub fn insert_message(&self, msg: &MessageRow) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO messages (id, room, user_id, content, posted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![msg.id, msg.room, msg.user_id, msg.content, msg.posted_at],
        )?;
        Ok(())
    }

    /// Most recent messages for a room with sender names resolved, oldest
    /// first. A fixed-depth backlog for the connect snapshot, not
    /// pagination.
    pub fn recent_messages(&self, room: &str, limit: usize) -> SqlResult<Vec<MessageView>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, u.name, m.content, m.posted_at
             FROM messages m JOIN users u ON u.id = m.user_id
             WHERE m.room = ?1
             ORDER BY m.posted_at DESC, m.id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![room, limit as i64], |row| {
            Ok(MessageView {
                id: row.get(0)?,
                user: row.get(1)?,
                content: row.get(2)?,
                posted_at: row.get(3)?,
            })
        })?;
        let mut out = rows.collect::<SqlResult<Vec<_>>>()?;
        out.reverse();
        Ok(out)
    }

    // ── Notifications ──────────────────────────────────────────────────

    pub fn add_notification(
        &self,
        user_id: &str,
        message_id: &str,
        room: &str,
        read: bool,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO notifications (user_id, message_id, room, read)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, message_id, room, read as i64],
        )?;
        Ok(())
    }

    pub fn unread_notification_count(&self, user_id: &str) -> SqlResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
            params![user_id],
            |row| row.get(0),
        )
    }

    pub fn notification_count_for_message(&self, message_id: &str) -> SqlResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE message_id = ?1",
            params![message_id],
            |row| row.get(0),
        )
    }
}

fn map_user_row(row: &rusqlite::Row) -> SqlResult<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        status: UserStatus::from_i64(row.get(2)?),
        last_activity: row.get(3)?,
        is_afk: row.get::<_, i64>(4)? != 0,
        afk_note: row.get(5)?,
    })
}

fn map_room_row(row: &rusqlite::Row) -> SqlResult<RoomRow> {
    Ok(RoomRow {
        name: row.get(0)?,
        private: row.get::<_, i64>(1)? != 0,
        closed: row.get::<_, i64>(2)? != 0,
        topic: row.get(3)?,
        welcome: row.get(4)?,
        creator: row.get(5)?,
    })
}

fn map_client_row(row: &rusqlite::Row) -> SqlResult<ClientRow> {
    Ok(ClientRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_agent: row.get(2)?,
        last_activity: row.get(3)?,
        last_client_activity: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: &str, user: &str, last_activity: i64) -> ClientRow {
        ClientRow {
            id: id.to_string(),
            user_id: user.to_string(),
            user_agent: Some("test".to_string()),
            last_activity,
            last_client_activity: last_activity,
        }
    }

    #[test]
    fn user_roundtrip_and_name_is_case_insensitive() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "Alice")?;
                let by_name = tx.get_user_by_name("alice")?.unwrap();
                assert_eq!(by_name.id, "u1");
                assert_eq!(by_name.status, UserStatus::Offline);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn ensure_user_is_idempotent() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.set_status("u1", UserStatus::Online)?;
                tx.ensure_user("u1", "alice")?;
                // Second ensure must not reset status.
                assert_eq!(tx.get_user("u1")?.unwrap().status, UserStatus::Online);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn failed_tx_rolls_back() {
        let store = Store::open_memory().unwrap();
        let result: SqlResult<()> = store.with_tx(|tx| {
            tx.ensure_user("u1", "alice")?;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());

        store
            .with_tx(|tx| {
                assert!(tx.get_user("u1")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn client_lifecycle() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.add_client(&client("c1", "u1", 1000))?;
                tx.add_client(&client("c2", "u1", 1000))?;
                assert_eq!(tx.client_count("u1")?, 2);

                assert_eq!(tx.remove_client("c1")?.as_deref(), Some("u1"));
                assert_eq!(tx.client_count("u1")?, 1);
                // Removing a missing row reports no owner.
                assert!(tx.remove_client("c1")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn zombie_query_respects_cutoff() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.add_client(&client("old", "u1", 1_000))?;
                tx.add_client(&client("fresh", "u1", 10_000))?;

                let zombies = tx.clients_older_than(5_000)?;
                assert_eq!(zombies.len(), 1);
                assert_eq!(zombies[0].id, "old");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn membership_and_online_counts() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.ensure_user("u2", "bob")?;
                tx.ensure_room("lobby", Some("u1"))?;
                tx.add_membership("u1", "lobby", true)?;
                tx.add_membership("u2", "lobby", false)?;

                // Both still Offline.
                assert_eq!(tx.online_count("lobby")?, 0);

                tx.set_status("u1", UserStatus::Online)?;
                tx.set_status("u2", UserStatus::Inactive)?;
                assert_eq!(tx.online_count("lobby")?, 2);

                assert!(tx.is_owner("u1", "lobby")?);
                assert!(!tx.is_owner("u2", "lobby")?);
                assert!(tx.is_user_in_room("u2", "Lobby")?);

                let online = tx.online_users("lobby")?;
                assert_eq!(online.len(), 2);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn duplicate_membership_ignored() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.ensure_room("lobby", None)?;
                tx.add_membership("u1", "lobby", true)?;
                tx.add_membership("u1", "lobby", false)?;
                // First write wins: the owner bit is not clobbered.
                assert!(tx.is_owner("u1", "lobby")?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn allowed_client_ids_covers_members_and_allowed() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.ensure_user("u2", "bob")?;
                tx.ensure_user("u3", "eve")?;
                tx.ensure_room("secret", Some("u1"))?;
                tx.set_room_private("secret", true)?;
                tx.add_membership("u1", "secret", true)?;
                tx.allow_user("u2", "secret")?;

                tx.add_client(&client("a1", "u1", 0))?;
                tx.add_client(&client("a2", "u1", 0))?;
                tx.add_client(&client("b1", "u2", 0))?;
                tx.add_client(&client("e1", "u3", 0))?;

                let mut ids = tx.allowed_client_ids("secret")?;
                ids.sort();
                assert_eq!(ids, vec!["a1", "a2", "b1"]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn reconciler_queries() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.ensure_user("u2", "bob")?;
                tx.set_status("u1", UserStatus::Online)?;
                tx.set_status("u2", UserStatus::Online)?;
                tx.touch_user("u1", 1_000)?;
                tx.touch_user("u2", 100_000)?;
                tx.add_client(&client("b1", "u2", 100_000))?;

                // u1 is Online with no clients.
                let orphans = tx.users_with_zero_clients()?;
                assert_eq!(orphans.len(), 1);
                assert_eq!(orphans[0].id, "u1");

                // Only u1 is idle past the cutoff.
                let idle = tx.users_idle_longer_than(50_000)?;
                assert_eq!(idle.len(), 1);
                assert_eq!(idle[0].id, "u1");

                // Inactive users are not re-flagged.
                tx.set_status("u1", UserStatus::Inactive)?;
                assert!(tx.users_idle_longer_than(50_000)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn message_and_notification_roundtrip() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.ensure_user("u2", "bob")?;
                tx.ensure_room("lobby", None)?;
                let msg = MessageRow {
                    id: "m1".to_string(),
                    room: "lobby".to_string(),
                    user_id: "u1".to_string(),
                    content: "hey @bob".to_string(),
                    posted_at: 1_000,
                };
                tx.insert_message(&msg)?;
                tx.add_notification("u2", "m1", "lobby", false)?;

                assert_eq!(tx.unread_notification_count("u2")?, 1);
                assert_eq!(tx.notification_count_for_message("m1")?, 1);

                let recent = tx.recent_messages("lobby", 10)?;
                assert_eq!(recent.len(), 1);
                assert_eq!(recent[0].content, "hey @bob");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn room_summary_reports_live_count() {
        let store = Store::open_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.ensure_user("u1", "alice")?;
                tx.ensure_room("lobby", None)?;
                tx.add_membership("u1", "lobby", false)?;
                tx.set_status("u1", UserStatus::Online)?;

                let summary = tx.room_summary("lobby")?.unwrap();
                assert_eq!(summary.count, 1);
                assert!(!summary.private);
                assert!(tx.room_summary("nope")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.db");
        {
            let store = Store::open(&path).unwrap();
            store
                .with_tx(|tx| {
                    tx.ensure_user("u1", "alice")?;
                    tx.ensure_room("lobby", Some("u1"))?;
                    tx.add_membership("u1", "lobby", true)
                })
                .unwrap();
        }
        let store = Store::open(&path).unwrap();
        store
            .with_tx(|tx| {
                assert!(tx.get_user("u1")?.is_some());
                assert!(tx.is_owner("u1", "lobby")?);
                Ok(())
            })
            .unwrap();
    }
}
