//! Generic API server.
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                   API SERVER                         │
//!   insecure ─────┼─▶ serving stack ─▶ open graph ────┐                  │
//!   (trusted net) │   (id, trace,      cors? → ctx    │   base router    │
//!                 │    gate, recover,                 ├─▶ groups,        │
//!   secure ───────┼─▶  timeout)     ─▶ trusted graph ─┘   discovery,     │
//!   (TLS)         │                   cors? → authz →     health, index  │
//!                 │                   authn? → ctx                       │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use generic_apiserver::config::{load_config, ServerOptions};
use generic_apiserver::observability::{init_logging, init_metrics};
use generic_apiserver::{Config, GenericApiServer};

#[derive(Parser)]
#[command(name = "apiserver", about = "Generic API server", version)]
struct Cli {
    /// TOML options file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(options) => options,
            Err(e) => {
                eprintln!("apiserver: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ServerOptions::default(),
    };

    if let Err(e) = init_logging(&options.observability) {
        eprintln!("apiserver: unable to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "apiserver starting");

    if options.observability.metrics_enabled {
        match options.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %options.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = match GenericApiServer::new(Config::from_options(options)) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Unable to assemble API server");
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(error = %e, "API server exited");
            ExitCode::FAILURE
        }
    }
}
