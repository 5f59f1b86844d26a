//! Background presence reconciliation.
//!
//! The connection registry (live truth) and the store (durable truth) drift:
//! transports drop without a clean disconnect, rows go missing, users idle
//! out. A periodic sweep heals the drift in four steps:
//!
//! 1. touch the client row of every live connection, synthesizing rows the
//!    store is missing;
//! 2. reap zombie client rows whose last activity is past the staleness
//!    threshold;
//! 3. flip users with zero remaining clients to Offline, broadcasting
//!    `leave` batched per room;
//! 4. flip users idle past the idle threshold to Inactive, broadcasting
//!    `markInactive` batched per room.
//!
//! A run that fails is logged and swallowed; the next scheduled run proceeds
//! regardless. Runs never overlap — a tick that lands while a sweep is still
//! executing is skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::broadcast::{Broadcaster, ClientEvent, Target};
use crate::models::{ClientRow, UserRow, UserStatus, UserView, now_ms};
use crate::registry::ConnectionRegistry;
use crate::store::Store;

pub struct PresenceReconciler {
    store: Arc<Store>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    interval: Duration,
    zombie_threshold: Duration,
    idle_threshold: Duration,
    running: AtomicBool,
}

impl PresenceReconciler {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
        interval: Duration,
        zombie_threshold: Duration,
        idle_threshold: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            broadcaster,
            interval,
            zombie_threshold,
            idle_threshold,
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the periodic sweep on the runtime. The task runs for the
    /// server's lifetime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.run_once();
            }
        })
    }

    /// Execute one sweep. Public for tests and for a forced check.
    pub fn run_once(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("presence sweep still running, skipping tick");
            return;
        }

        tracing::debug!("checking user presence");
        if let Err(e) = self.sweep() {
            tracing::error!("presence sweep failed: {e}");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn sweep(&self) -> rusqlite::Result<()> {
        self.update_presence()?;
        self.remove_zombies()?;
        self.remove_offline_users()?;
        self.check_user_status()?;
        Ok(())
    }

    /// Touch the store row of every live connection. A live connection with
    /// no row is registry/store drift — heal it by synthesizing the row
    /// from what the registry knows.
    fn update_presence(&self) -> rusqlite::Result<()> {
        let live = self.registry.all_connections();
        if live.is_empty() {
            return Ok(());
        }
        let now = now_ms();
        self.store.with_tx(|tx| {
            for (connection_id, user_id) in &live {
                if tx.get_client(connection_id)?.is_some() {
                    tx.touch_client(connection_id, now)?;
                } else if tx.get_user(user_id)?.is_some() {
                    tracing::info!(
                        connection = %connection_id,
                        user = %user_id,
                        "connection exists but isn't tracked, backfilling client row"
                    );
                    tx.add_client(&ClientRow {
                        id: connection_id.clone(),
                        user_id: user_id.clone(),
                        user_agent: None,
                        last_activity: now,
                        last_client_activity: now,
                    })?;
                } else {
                    tracing::info!(
                        connection = %connection_id,
                        user = %user_id,
                        "live connection references an unknown user"
                    );
                }
            }
            Ok(())
        })
    }

    /// Delete client rows the transport silently abandoned.
    fn remove_zombies(&self) -> rusqlite::Result<()> {
        let cutoff = now_ms() - self.zombie_threshold.as_millis() as i64;
        self.store.with_tx(|tx| {
            for zombie in tx.clients_older_than(cutoff)? {
                tracing::info!(connection = %zombie.id, user = %zombie.user_id, "removing zombie connection");
                tx.remove_client(&zombie.id)?;
            }
            Ok(())
        })
    }

    /// Users holding an Online/Inactive status with zero client rows go
    /// Offline, with one `leave` per (user, room), batched per room.
    fn remove_offline_users(&self) -> rusqlite::Result<()> {
        let flipped = self.store.with_tx(|tx| {
            let mut flipped = Vec::new();
            for user in tx.users_with_zero_clients()? {
                tracing::info!(user = %user.name, "no clients left, marking offline");
                tx.set_status(&user.id, UserStatus::Offline)?;
                let rooms = tx.rooms_of_user(&user.id)?;
                let mut user = user;
                user.status = UserStatus::Offline;
                flipped.push((user, rooms));
            }
            Ok(flipped)
        })?;

        for (room, users) in group_by_room(&flipped) {
            for user in users {
                self.broadcaster.emit(
                    Target::Room(room.clone()),
                    ClientEvent::Leave { user, room: room.clone() },
                );
            }
        }
        Ok(())
    }

    /// Online users idle past the threshold become Inactive; each affected
    /// room gets a single `markInactive` with its batch of users.
    fn check_user_status(&self) -> rusqlite::Result<()> {
        let cutoff = now_ms() - self.idle_threshold.as_millis() as i64;
        let flipped = self.store.with_tx(|tx| {
            let mut flipped = Vec::new();
            for user in tx.users_idle_longer_than(cutoff)? {
                tx.set_status(&user.id, UserStatus::Inactive)?;
                let rooms = tx.rooms_of_user(&user.id)?;
                let mut user = user;
                user.status = UserStatus::Inactive;
                flipped.push((user, rooms));
            }
            Ok(flipped)
        })?;

        if !flipped.is_empty() {
            tracing::info!(count = flipped.len(), "marking idle users inactive");
        }
        for (room, users) in group_by_room(&flipped) {
            self.broadcaster.emit(
                Target::Room(room.clone()),
                ClientEvent::MarkInactive { users },
            );
        }
        Ok(())
    }
}

/// Group (user, rooms) pairs by room so each room is broadcast once.
fn group_by_room(flipped: &[(UserRow, Vec<String>)]) -> Vec<(String, Vec<UserView>)> {
    let mut by_room: HashMap<String, Vec<UserView>> = HashMap::new();
    for (user, rooms) in flipped {
        for room in rooms {
            by_room.entry(room.clone()).or_default().push(UserView::from(user));
        }
    }
    let mut out: Vec<_> = by_room.into_iter().collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<(Target, ClientEvent)>>,
    }

    impl Recording {
        fn events(&self) -> Vec<(Target, ClientEvent)> {
            self.events.lock().clone()
        }
    }

    impl Broadcaster for Recording {
        fn emit(&self, target: Target, event: ClientEvent) {
            self.events.lock().push((target, event));
        }
    }

    struct Fixture {
        reconciler: PresenceReconciler,
        store: Arc<Store>,
        registry: Arc<ConnectionRegistry>,
        hub: Arc<Recording>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::open_memory().unwrap());
        let registry = Arc::new(ConnectionRegistry::new());
        let hub = Arc::new(Recording::default());
        let reconciler = PresenceReconciler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&hub) as Arc<dyn Broadcaster>,
            Duration::from_secs(60),
            Duration::from_secs(180),
            Duration::from_secs(300),
        );
        Fixture { reconciler, store, registry, hub }
    }

    fn seed_user(store: &Store, id: &str, name: &str, status: UserStatus) {
        store
            .with_tx(|tx| {
                tx.ensure_user(id, name)?;
                tx.set_status(id, status)?;
                tx.touch_user(id, now_ms())
            })
            .unwrap();
    }

    fn seed_client(store: &Store, id: &str, user: &str, last_activity: i64) {
        store
            .with_tx(|tx| {
                tx.add_client(&ClientRow {
                    id: id.to_string(),
                    user_id: user.to_string(),
                    user_agent: None,
                    last_activity,
                    last_client_activity: last_activity,
                })
            })
            .unwrap();
    }

    #[test]
    fn zombie_reclamation_respects_threshold() {
        let f = fixture();
        seed_user(&f.store, "u1", "alice", UserStatus::Online);
        let now = now_ms();
        // 4 minutes stale → zombie; 2 minutes → kept.
        seed_client(&f.store, "stale", "u1", now - 4 * 60 * 1000);
        seed_client(&f.store, "fresh", "u1", now - 2 * 60 * 1000);

        f.reconciler.run_once();

        f.store
            .with_tx(|tx| {
                assert!(tx.get_client("stale")?.is_none());
                assert!(tx.get_client("fresh")?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn live_connection_is_not_reaped() {
        let f = fixture();
        seed_user(&f.store, "u1", "alice", UserStatus::Online);
        let now = now_ms();
        seed_client(&f.store, "c1", "u1", now - 10 * 60 * 1000);
        // The registry still sees the connection: step 1 touches it before
        // the zombie pass, so it survives.
        f.registry.register("c1", "u1");

        f.reconciler.run_once();

        f.store
            .with_tx(|tx| {
                assert!(tx.get_client("c1")?.is_some());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn drift_heals_missing_client_rows() {
        let f = fixture();
        seed_user(&f.store, "u1", "alice", UserStatus::Online);
        f.registry.register("ghost", "u1");

        f.reconciler.run_once();

        f.store
            .with_tx(|tx| {
                let row = tx.get_client("ghost")?.unwrap();
                assert_eq!(row.user_id, "u1");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn users_without_clients_go_offline_with_leave_per_room() {
        let f = fixture();
        seed_user(&f.store, "u1", "alice", UserStatus::Online);
        seed_user(&f.store, "u2", "bob", UserStatus::Inactive);
        f.store
            .with_tx(|tx| {
                tx.ensure_room("lobby", None)?;
                tx.add_membership("u1", "lobby", false)?;
                tx.add_membership("u2", "lobby", false)
            })
            .unwrap();

        f.reconciler.run_once();

        f.store
            .with_tx(|tx| {
                assert_eq!(tx.get_user("u1")?.unwrap().status, UserStatus::Offline);
                assert_eq!(tx.get_user("u2")?.unwrap().status, UserStatus::Offline);
                Ok(())
            })
            .unwrap();

        let leaves: Vec<_> = f
            .hub
            .events()
            .into_iter()
            .filter(|(_, e)| matches!(e, ClientEvent::Leave { .. }))
            .collect();
        assert_eq!(leaves.len(), 2);
        for (target, _) in leaves {
            assert_eq!(target, Target::Room("lobby".to_string()));
        }
    }

    #[test]
    fn idle_users_marked_inactive_batched_per_room() {
        let f = fixture();
        let now = now_ms();
        f.store
            .with_tx(|tx| {
                for (id, name) in [("u1", "alice"), ("u2", "bob")] {
                    tx.ensure_user(id, name)?;
                    tx.set_status(id, UserStatus::Online)?;
                    // Idle for 6 minutes, but still connected.
                    tx.touch_user(id, now - 6 * 60 * 1000)?;
                }
                tx.ensure_room("lobby", None)?;
                tx.add_membership("u1", "lobby", false)?;
                tx.add_membership("u2", "lobby", false)
            })
            .unwrap();
        seed_client(&f.store, "c1", "u1", now);
        seed_client(&f.store, "c2", "u2", now);

        f.reconciler.run_once();

        f.store
            .with_tx(|tx| {
                assert_eq!(tx.get_user("u1")?.unwrap().status, UserStatus::Inactive);
                assert_eq!(tx.get_user("u2")?.unwrap().status, UserStatus::Inactive);
                Ok(())
            })
            .unwrap();

        let marks: Vec<_> = f
            .hub
            .events()
            .into_iter()
            .filter(|(_, e)| matches!(e, ClientEvent::MarkInactive { .. }))
            .collect();
        // One event for the room, carrying both users.
        assert_eq!(marks.len(), 1);
        match &marks[0].1 {
            ClientEvent::MarkInactive { users } => assert_eq!(users.len(), 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn recently_active_user_is_left_alone() {
        let f = fixture();
        let now = now_ms();
        seed_user(&f.store, "u1", "alice", UserStatus::Online);
        seed_client(&f.store, "c1", "u1", now);

        f.reconciler.run_once();

        f.store
            .with_tx(|tx| {
                assert_eq!(tx.get_user("u1")?.unwrap().status, UserStatus::Online);
                Ok(())
            })
            .unwrap();
        assert!(f.hub.events().is_empty());
    }

    #[test]
    fn zombie_reap_then_offline_in_one_run() {
        let f = fixture();
        seed_user(&f.store, "u1", "alice", UserStatus::Online);
        f.store
            .with_tx(|tx| {
                tx.ensure_room("lobby", None)?;
                tx.add_membership("u1", "lobby", false)
            })
            .unwrap();
        // Only connection is a zombie; the same run that reaps it must also
        // collapse the user to Offline.
        seed_client(&f.store, "dead", "u1", now_ms() - 10 * 60 * 1000);

        f.reconciler.run_once();

        f.store
            .with_tx(|tx| {
                assert_eq!(tx.get_user("u1")?.unwrap().status, UserStatus::Offline);
                Ok(())
            })
            .unwrap();
        assert!(f
            .hub
            .events()
            .iter()
            .any(|(_, e)| matches!(e, ClientEvent::Leave { .. })));
    }
}
