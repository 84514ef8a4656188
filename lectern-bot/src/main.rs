//! Lectern bot - main entry point.

use anyhow::Result;
use lectern_common::config::Config;
use lectern_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Lectern v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    lectern_bot::run(&config).await
}
