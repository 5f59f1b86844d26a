//! Server construction and the HTTP/WebSocket listener.
//!
//! All components are wired by explicit constructor injection: the store,
//! registry, broadcaster, coordinator, and reconciler are built here and
//! handed to the web layer — no ambient container, no global state.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::broadcast::WsBroadcaster;
use crate::config::ServerConfig;
use crate::presence::PresenceReconciler;
use crate::registry::ConnectionRegistry;
use crate::session::SessionCoordinator;
use crate::store::Store;
use crate::web;

/// Shared handles the web layer needs per request.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<WsBroadcaster>,
    pub coordinator: Arc<SessionCoordinator>,
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Build the component graph: open the store, construct the registry,
    /// the transport-backed broadcaster, and the coordinator.
    fn build_state(&self) -> Result<(Arc<AppState>, Arc<PresenceReconciler>)> {
        let store = match &self.config.db_path {
            Some(path) => {
                tracing::info!("opening database: {path}");
                Arc::new(Store::open(path).with_context(|| format!("failed to open database {path}"))?)
            }
            None => {
                tracing::info!("no database path configured, using in-memory store");
                Arc::new(Store::open_memory().context("failed to open in-memory database")?)
            }
        };

        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(WsBroadcaster::new(Arc::clone(&registry)));
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&broadcaster) as _,
            self.config.max_message_length,
            self.config.disconnect_grace(),
        ));
        let reconciler = Arc::new(PresenceReconciler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&broadcaster) as _,
            self.config.presence_interval(),
            self.config.zombie_threshold(),
            self.config.idle_threshold(),
        ));

        let state = Arc::new(AppState {
            config: self.config.clone(),
            store,
            registry,
            broadcaster,
            coordinator,
        });
        Ok((state, reconciler))
    }

    /// Run the server, blocking forever.
    pub async fn run(self) -> Result<()> {
        let listen_addr = self.config.listen_addr.clone();
        let (state, reconciler) = self.build_state()?;

        reconciler.spawn();

        let router = web::router(state);
        let listener = tokio::net::TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("failed to bind {listen_addr}"))?;
        tracing::info!("listening on {listen_addr}");
        axum::serve(listener, router).await?;
        Ok(())
    }

    /// Start the server on an ephemeral port and return the bound address
    /// plus the serve task (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let (state, reconciler) = self.build_state()?;
        reconciler.spawn();

        let router = web::router(state);
        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("listening on {addr}");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await?;
            Ok(())
        });
        Ok((addr, handle))
    }
}
