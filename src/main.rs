#![deny(warnings)]

use std::sync::Arc;

use clap::Parser;
use status_page::{
    config::Config,
    handler::{build_router, AppState},
    health::HealthState,
    metrics::{http::HttpMetrics, MetricRegistry},
    render::TemplateRenderer,
    DynError,
};

/// 项目名称 (编译时获取)
const CARGO_CRATE_NAME: &str = env!("CARGO_CRATE_NAME");

#[tokio::main]
pub async fn main() -> Result<(), DynError> {
    let config = Config::parse();
    #[cfg(feature = "use_tracing_subscriber")]
    status_page::init_log::tracing::init(CARGO_CRATE_NAME)?;
    #[cfg(all(feature = "use_env_logger", not(feature = "use_tracing_subscriber")))]
    status_page::init_log::env_logger::init(CARGO_CRATE_NAME);

    let metrics = HttpMetrics::new(MetricRegistry::new())?;
    metrics.set_app_info(&config.app_version, &config.environment)?;
    log::info!("starting {} v{} in {}", config.service_name, config.app_version, config.environment);

    let health = Arc::new(HealthState::default());
    let shutdown_rx = status_page::shutdown_on_signal(health.clone(), config.shutdown_delay());
    let state = AppState {
        metrics,
        health,
        renderer: Arc::new(TemplateRenderer::default()),
        service_name: config.service_name.as_str().into(),
    };

    let server = status_page::new_server(config.port, build_router(state), shutdown_rx).with_timeout(config.idle_timeout());
    server.run().await?;
    Ok(())
}
