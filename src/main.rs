//! Forward HTTP/HTTPS proxy.
//!
//! ```text
//!     Client                      ┌──────────────────────────────────────────┐
//!     ──────── CONNECT / GET ────▶│ net::listener → http::server             │
//!                                 │       → http::dispatch                   │
//!                                 │           → security (allowlist,         │
//!                                 │               lockout, credentials)      │
//!                                 │           → http::tunnel ──── TCP ───────┼──▶ Upstream
//!                                 │           → http::relay ──── HTTP ───────┼──▶ Upstream
//!                                 └──────────────────────────────────────────┘
//! ```
//!
//! Configuration comes from an optional TOML file, then environment
//! variables, then the command line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use forward_proxy::config::loader;
use forward_proxy::error::ProxyError;
use forward_proxy::lifecycle::startup;
use forward_proxy::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "forward-proxy", version, about = "Forward HTTP/HTTPS proxy with CONNECT tunneling")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host (overrides config and PROXY_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config and PROXY_PORT).
    #[arg(short, long)]
    port: Option<u16>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("forward-proxy: {}", e);
            tracing::error!(error = %e, "Fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ProxyError> {
    let mut config = loader::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.listener.host = host;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    if cli.check {
        println!("configuration OK ({})", config.listener.bind_address());
        return Ok(());
    }

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address(),
        auth_enabled = config.auth.credentials().is_some(),
        allowed_ips = config.access.allowed_ips.len(),
        "forward-proxy starting"
    );

    startup::run(config).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
