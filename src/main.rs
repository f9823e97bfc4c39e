//! statusd service binary.

use statusd::config::{self, EngineConfig, ServerConfig};
use statusd::db::Store;
use statusd::engine::Engine;
use statusd::scheduler::BeatManager;
use statusd::web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("statusd=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    let engine_cfg = EngineConfig::load();
    let status_conf = config::load_status_conf();
    tracing::info!("Starting statusd on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!(
        flapping_freq = engine_cfg.flapping_freq,
        flapping_time = engine_cfg.flapping_time,
        stealthy_time = engine_cfg.stealthy_time,
        stealthy_show = engine_cfg.stealthy_show,
        restore_event = engine_cfg.restore_event,
        "Engine thresholds"
    );
    tracing::info!(
        "Status table: {}",
        status_conf.names().collect::<Vec<_>>().join(", ")
    );

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!(
        "Database initialized with {} statuses",
        store.count_statuses()?
    );

    let engine = Arc::new(Engine::with_store(store, status_conf, engine_cfg));

    // Start beat
    let beat = BeatManager::new(engine.clone(), cfg.beat_interval);
    beat.start();

    // Start web server
    let server = Server::new(cfg, engine);
    let result = server.start().await;

    beat.stop();
    result
}
