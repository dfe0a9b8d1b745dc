use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;

/// How often the compactor checks WAL growth.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic WAL compactor. When the number of appends since the last
/// compaction passes `threshold`, the log is rewritten as a snapshot of
/// current state. Runs until the engine (and its WAL writer) shuts down.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let appends = match engine.wal_appends_since_compact().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "compactor: WAL writer unavailable, stopping");
                return;
            }
        };

        if appends < threshold {
            continue;
        }

        tracing::info!(appends, threshold, "compacting WAL");
        if let Err(e) = engine.compact_wal().await {
            tracing::error!(error = %e, "WAL compaction failed");
        }
    }
}
