//! # Lead-Keeper Service
//!
//! Binary entry point for the Lead-Keeper HTTP service.
//!
//! This executable:
//! - Loads configuration from files and `LK__` environment variables
//! - Initializes structured logging
//! - Starts the HTTP server and receipt workers from lead-keeper-api

use lead_keeper_api::config::{LoggingConfig, ServiceConfig};
use lead_keeper_api::start_server;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str =
    "lead_keeper_service=info,lead_keeper_api=info,lead_keeper_core=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration decides the log format, so it is read before logging is up
    let loaded = ServiceConfig::load(ServiceConfig::explicit_path_from_env().as_deref())
        .and_then(|config| config.validate().map(|()| config));

    let config = match loaded {
        Ok(config) => {
            init_tracing(&config.logging);
            config
        }
        Err(e) => {
            init_tracing(&LoggingConfig::default());
            error!(error = %e, "Service configuration is invalid; aborting");
            std::process::exit(3);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        workers = config.pipeline.workers,
        "Starting Lead-Keeper Service"
    );

    if let Err(e) = start_server(config).await {
        error!(error = %e, "Service stopped with an error");
        std::process::exit(e.exit_code());
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
