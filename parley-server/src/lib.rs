//! Parley: a group chat server whose core is the real-time room/presence
//! broadcast engine — tracking which users and connections are members of
//! which rooms, multiplexing one user across many tabs and devices, and
//! fanning presence and message events out to exactly the right subscribers.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod mention;
pub mod models;
pub mod msgid;
pub mod presence;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod web;
