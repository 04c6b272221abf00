//! Sandbox gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────────┐
//!                       │                     SANDBOX GATEWAY                       │
//!                       │                                                          │
//!   Client Request      │  ┌─────────┐   ┌──────────────┐   ┌──────────────────┐   │
//!   ────────────────────┼─▶│   net   │──▶│     http     │──▶│ cluster (set)    │   │
//!                       │  │listener │   │ bulk|stream  │   │ round-robin pick │   │
//!                       │  │deadline │   │   handler    │   └────────┬─────────┘   │
//!                       │  └─────────┘   └──────┬───────┘            │             │
//!                       │                       │                    ▼             │
//!                       │                       │           ┌──────────────────┐   │
//!                       │                       │           │ worker locality  │   │
//!                       │                       │           │ registry lookup  │   │
//!                       │                       │           │ + sandbox (wasm) │   │
//!   Client Response     │                       ▼           └────────┬─────────┘   │
//!   ◀───────────────────┼──────────── response / output channel ◀────┘             │
//!                       │                                                          │
//!                       │  config · observability · lifecycle (startup/shutdown)   │
//!                       └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use sandbox_gateway::config::loader::read_config;
use sandbox_gateway::config::validation::validate_config;
use sandbox_gateway::config::{loader::ConfigError, GatewayConfig, GatewayMode};
use sandbox_gateway::lifecycle::{self, signals, Shutdown};
use sandbox_gateway::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "sandbox-gateway", version)]
#[command(about = "HTTP gateway running sandboxed WebAssembly functions on a worker cluster")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Execution discipline: bulk or streaming.
    #[arg(long)]
    mode: Option<GatewayMode>,

    /// Listen address, e.g. 0.0.0.0:32425.
    #[arg(long)]
    bind: Option<String>,

    /// Directory of function modules.
    #[arg(long)]
    functions: Option<String>,

    /// Number of worker localities.
    #[arg(long)]
    localities: Option<usize>,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let Some(dir) = self.functions {
            config.registry.functions_dir = Some(dir);
        }
        if let Some(localities) = self.localities {
            config.cluster.localities = localities;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut cli = Cli::parse();

    let mut config = match cli.config.take() {
        Some(path) => read_config(&path)?,
        None => GatewayConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sandbox-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        mode = %config.mode,
        functions_dir = %config.registry.resolve_dir(config.mode).display(),
        localities = config.cluster.localities,
        connection_secs = config.timeouts.connection_secs,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.transport_threads)
        .max_blocking_threads(config.runtime.max_blocking_threads)
        .thread_name("gateway-transport")
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = lifecycle::bootstrap(&config)?;

    let shutdown = Arc::new(Shutdown::new());
    let running = lifecycle::serve(server, &config.listener, &shutdown).await?;
    tracing::info!(address = %running.local_addr, "Listening for connections");
    signals::spawn_signal_handler(Arc::clone(&shutdown));

    running.task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
