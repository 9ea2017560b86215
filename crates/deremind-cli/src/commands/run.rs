//! Long-running host: engine over the default store, alerts to the log,
//! events to stdout as JSON lines.

use deremind_core::{EngineConfig, LogSink, ReminderEngine, SqliteReminderStore, SystemClock};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve())
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::load()?;
    let store = SqliteReminderStore::open()?;
    let engine = ReminderEngine::start(
        Arc::new(store),
        Arc::new(LogSink),
        Arc::new(SystemClock),
        config,
    )
    .await?;
    let mut events = engine.subscribe();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("interrupt received, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let report = engine.flush().await;
    if !report.is_empty() {
        info!(
            updated = report.updated,
            deleted = report.deleted,
            dropped = report.dropped,
            "flushed pending writes"
        );
    }
    engine.shutdown().await;
    Ok(())
}
