use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::replicators::ReplicatorSet;
use crate::router::build_router;
use crate::state::AppState;

/// The derived-data cache HTTP server.
pub struct DdcServer {
    config: ServerConfig,
    state: AppState,
    replicators: ReplicatorSet,
}

impl DdcServer {
    /// Open storage, build the shared state and the configured replicators.
    pub async fn open(config: ServerConfig) -> ServerResult<Self> {
        let state = AppState::open(&config).await?;
        let replicators = ReplicatorSet::from_config(&config, state.refs.clone())?;
        Ok(Self {
            config,
            state,
            replicators,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn replicators(&self) -> &ReplicatorSet {
        &self.replicators
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Serve until Ctrl-C, then stop the replicators and flush metadata.
    pub async fn serve(self) -> ServerResult<()> {
        let app = build_router(self.state.clone());
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            backend = %self.config.storage.backend,
            replicators = self.replicators.len(),
            "DDC server listening"
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let workers = self.replicators.spawn(stop_rx);

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));
        info!("shutting down");
        stop_tx.send_replace(true);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "replicator task failed");
            }
        }
        served?;
        self.state.flush()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_construction() {
        let server = DdcServer::open(ServerConfig::default()).await.unwrap();
        assert_eq!(server.config().bind_addr, "127.0.0.1:57001".parse().unwrap());
        let _router = server.router();
    }

    #[tokio::test]
    async fn bad_replicator_config_fails_open() {
        let mut config = ServerConfig::default();
        config.replication.replicators = vec![crate::config::ReplicatorSettings {
            name: "r".into(),
            namespace: "ns".into(),
            ..Default::default()
        }];
        assert!(matches!(
            DdcServer::open(config).await,
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn bad_snapshot_namespace_fails_open() {
        let mut config = ServerConfig::default();
        config.replication.snapshot_namespace = "not a name".into();
        assert!(DdcServer::open(config).await.is_err());
    }
}
