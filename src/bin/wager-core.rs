use std::sync::Arc;

use log::info;

use wager_core::config::Config;
use wager_core::manager::EngineManager;
use wager_core::notify::LogPublisher;
use wager_core::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_env()?;
    env_logger::Builder::new()
        .parse_filters(&cfg.log_level)
        .init();

    let store = Arc::new(Store::connect(&cfg.database_url).await?);
    store.migrate().await?;
    info!("[main] connected, migrations applied");

    let manager = EngineManager::new(store, Arc::new(LogPublisher), cfg.taker_fee_bps);
    let booted = manager.boot().await?;
    info!(
        "[main] core ready on {}:{} with {booted} market engines (fee {} bps, tick {}c)",
        cfg.host, cfg.port, cfg.taker_fee_bps, cfg.default_tick_cents
    );

    tokio::signal::ctrl_c().await?;
    info!("[main] shutting down");
    Ok(())
}
