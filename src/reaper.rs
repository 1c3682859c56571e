use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::session::SessionStore;
use crate::store::Store;

pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Compact the WAL once `threshold` appends have piled up since the last
/// compaction. Returns whether it ran.
pub async fn compact_if_due(store: &Store, threshold: u64) -> bool {
    let pending = store.wal_appends_since_compact().await;
    if pending < threshold {
        return false;
    }
    match store.compact().await {
        Ok(events) => {
            info!("compacted WAL: {pending} appends folded into {events} events");
            metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the WAL short.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// Background task that drops expired sessions.
pub async fn run_session_reaper(sessions: Arc<SessionStore>) {
    let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
    loop {
        interval.tick().await;
        let removed = sessions.purge_expired();
        if removed > 0 {
            debug!("reaped {removed} expired sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("bookings_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{name}_{}.wal", Ulid::new()))
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold");
        let store = Store::open(path.clone()).unwrap();
        store.seed_defaults().await.unwrap();

        let night = parse_date("2050-01-01").unwrap();
        for _ in 0..5 {
            let id = store.insert_block_for_room(1, night).await.unwrap();
            store.delete_block_by_id(id).await.unwrap();
        }
        // 2 rooms + 10 block changes
        assert!(!compact_if_due(&store, 100).await);
        assert!(compact_if_due(&store, 12).await);
        assert_eq!(store.wal_appends_since_compact().await, 0);
        drop(store);

        // Snapshot holds only the sequence marker and the two rooms.
        assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 3);
    }
}
