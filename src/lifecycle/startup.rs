//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the sandbox engine
//! - Compile every function into the registry (fail fast)
//! - Create the locality set
//! - Bind the listener and start accepting, last
//!
//! Any error here is fatal; the binary exits non-zero.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cluster::{EmptyLocalitySet, LocalitySet};
use crate::config::{GatewayConfig, ListenerConfig};
use crate::http::GatewayServer;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::registry::{FunctionRegistry, RegistryError};
use crate::sandbox::{Sandbox, SandboxError};

/// Reasons the gateway cannot start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("sandbox: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("function registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("cluster: {0}")]
    Cluster(#[from] EmptyLocalitySet),

    #[error("listener: {0}")]
    Listener(#[from] ListenerError),
}

/// Build every subsystem in dependency order: sandbox → registry → localities.
pub fn bootstrap(config: &GatewayConfig) -> Result<GatewayServer, StartupError> {
    let sandbox = Sandbox::new(&config.sandbox)?;
    let registry = Arc::new(FunctionRegistry::load(
        sandbox.engine(),
        &config.registry,
        config.mode,
    )?);
    if registry.is_empty() {
        tracing::warn!(
            dir = %config.registry.resolve_dir(config.mode).display(),
            "No functions registered; every request will be answered with 404"
        );
    }

    let localities = LocalitySet::local(&config.cluster, Arc::clone(&registry), sandbox)?;
    tracing::info!(
        mode = %config.mode,
        functions = ?registry.paths(),
        localities = localities.len(),
        compute_slots = config.cluster.compute_slots,
        "Gateway initialized"
    );

    Ok(GatewayServer::new(config, registry, localities))
}

/// A gateway whose accept loop is running in the background.
#[derive(Debug)]
pub struct RunningGateway {
    pub local_addr: SocketAddr,
    pub connections: ConnectionTracker,
    pub task: JoinHandle<Result<(), ListenerError>>,
}

/// Bind the listener and spawn the accept loop.
pub async fn serve(
    server: GatewayServer,
    listener_config: &ListenerConfig,
    shutdown: &Shutdown,
) -> Result<RunningGateway, StartupError> {
    let listener = Listener::bind(listener_config).await?;
    let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
    let connections = server.connections();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    Ok(RunningGateway {
        local_addr,
        connections,
        task,
    })
}
