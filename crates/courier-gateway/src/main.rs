//! Courier node.
//!
//! - Relay role: mesh router on `relay.bind` plus the message store
//! - Web role: `/v1/msgstream` (long/short polling) and `/v1/msgstream/ws`
//! - Config from `courier.yaml` (path overridable as the first argument)

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courier_gateway::{config, node};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "courier.yaml".into());
    let cfg = match config::load_from_file(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(path = %path, error = %e, code = e.client_code().as_str(), "config load failed");
            return ExitCode::FAILURE;
        }
    };

    match node::run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.client_code().as_str(), "node failed");
            ExitCode::FAILURE
        }
    }
}
