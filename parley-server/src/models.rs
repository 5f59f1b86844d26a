//! Persisted row types and the view models pushed to clients.
//!
//! Row structs mirror the SQLite schema in [`crate::store`]; view models are
//! the serialized shapes client UIs consume. Status is never set directly by
//! request handlers — it only changes through presence transitions in the
//! session coordinator and the reconciler.

use serde::Serialize;

/// Current unix time in milliseconds — the resolution all persisted
/// timestamps use.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Aggregate user status, derived from connected clients and activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UserStatus {
    Online,
    Inactive,
    Offline,
}

impl UserStatus {
    pub fn from_i64(v: i64) -> Self {
        match v {
            0 => UserStatus::Online,
            1 => UserStatus::Inactive,
            _ => UserStatus::Offline,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            UserStatus::Online => 0,
            UserStatus::Inactive => 1,
            UserStatus::Offline => 2,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub status: UserStatus,
    /// Server-observed activity, unix milliseconds.
    pub last_activity: i64,
    pub is_afk: bool,
    pub afk_note: Option<String>,
}

/// A chat room.
#[derive(Debug, Clone)]
pub struct RoomRow {
    pub name: String,
    pub private: bool,
    pub closed: bool,
    pub topic: Option<String>,
    pub welcome: Option<String>,
    pub creator: Option<String>,
}

/// A single physical connection belonging to a user.
#[derive(Debug, Clone)]
pub struct ClientRow {
    pub id: String,
    pub user_id: String,
    pub user_agent: Option<String>,
    /// Server-observed activity, unix milliseconds.
    pub last_activity: i64,
    /// Client-reported idle time, distinct from server-observed activity.
    pub last_client_activity: i64,
}

/// A persisted chat message.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub room: String,
    pub user_id: String,
    pub content: String,
    pub posted_at: i64,
}

/// User shape pushed inside presence events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub name: String,
    pub status: UserStatus,
    pub last_activity: i64,
    pub is_afk: bool,
}

impl From<&UserRow> for UserView {
    fn from(u: &UserRow) -> Self {
        Self {
            name: u.name.clone(),
            status: u.status,
            last_activity: u.last_activity,
            is_afk: u.is_afk,
        }
    }
}

/// Room shape pushed in lobby/visibility events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub name: String,
    /// Number of members currently not Offline.
    pub count: i64,
    pub private: bool,
    pub closed: bool,
    pub topic: Option<String>,
}

/// Message shape pushed in `addMessage`/`replaceMessage` events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub user: String,
    pub content: String,
    pub posted_at: i64,
}
