//! Server configuration.

use std::time::Duration;

use clap::Parser;

/// Runtime configuration, from flags or environment.
///
/// The presence thresholds are policy knobs, not load-bearing algorithmic
/// choices; the defaults match the behavior clients were built against.
#[derive(Parser, Debug, Clone)]
#[command(name = "parley-server", about = "Group chat server with real-time presence")]
pub struct ServerConfig {
    /// Address for the HTTP/WebSocket listener.
    #[arg(long, default_value = "127.0.0.1:8953", env = "PARLEY_LISTEN")]
    pub listen_addr: String,

    /// SQLite database path. Omit for an in-memory database (state is lost
    /// on restart).
    #[arg(long, env = "PARLEY_DB")]
    pub db_path: Option<String>,

    /// Maximum message length in characters. 0 disables the limit.
    #[arg(long, default_value_t = 4096, env = "PARLEY_MAX_MESSAGE_LENGTH")]
    pub max_message_length: usize,

    /// Seconds to wait after a disconnect before recomputing the user's
    /// status, so a page refresh doesn't flicker them offline.
    #[arg(long, default_value_t = 10, env = "PARLEY_DISCONNECT_GRACE_SECS")]
    pub disconnect_grace_secs: u64,

    /// Seconds between presence reconciliation sweeps.
    #[arg(long, default_value_t = 60, env = "PARLEY_PRESENCE_INTERVAL_SECS")]
    pub presence_interval_secs: u64,

    /// Seconds of client-row staleness before a connection is considered a
    /// zombie and reaped.
    #[arg(long, default_value_t = 180, env = "PARLEY_ZOMBIE_THRESHOLD_SECS")]
    pub zombie_threshold_secs: u64,

    /// Seconds of user inactivity before they are marked inactive.
    #[arg(long, default_value_t = 300, env = "PARLEY_IDLE_THRESHOLD_SECS")]
    pub idle_threshold_secs: u64,
}

impl ServerConfig {
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs)
    }

    pub fn zombie_threshold(&self) -> Duration {
        Duration::from_secs(self.zombie_threshold_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_presence_policy() {
        let config = ServerConfig::parse_from(["parley-server"]);
        assert_eq!(config.disconnect_grace_secs, 10);
        assert_eq!(config.presence_interval_secs, 60);
        assert_eq!(config.zombie_threshold_secs, 180);
        assert_eq!(config.idle_threshold_secs, 300);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::parse_from([
            "parley-server",
            "--zombie-threshold-secs",
            "60",
            "--max-message-length",
            "100",
        ]);
        assert_eq!(config.zombie_threshold_secs, 60);
        assert_eq!(config.max_message_length, 100);
    }
}
