use std::sync::Arc;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info};

use crate::{artifacts::ArtifactStore, config::SweepPolicy};

/// Spawns the periodic artifact sweep. Abort the returned handle to stop it.
pub fn spawn_sweeper(store: Arc<dyn ArtifactStore>, policy: SweepPolicy) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so startup does not sweep.
        ticker.tick().await;

        info!(interval_secs = policy.interval.as_secs(), max_age_secs = policy.max_age.as_secs(), "🧹 Artifact sweeper started");
        loop {
            ticker.tick().await;
            match store.sweep(policy.max_age).await {
                Ok(removed) => info!(removed, "Scheduled cleanup finished"),
                Err(e) => error!("Error during scheduled cleanup: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{tests::put, ArtifactRole, FsArtifactStore};
    use std::time::Duration;

    #[tokio::test]
    async fn sweeps_on_each_tick_until_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::open(dir.path()).await.unwrap());
        put(&*store, b"stale", ArtifactRole::Original).await;

        let policy = SweepPolicy { interval: Duration::from_millis(30), max_age: Duration::from_millis(1) };
        let handle = spawn_sweeper(store.clone(), policy);

        let mut emptied = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if std::fs::read_dir(dir.path()).unwrap().count() == 0 {
                emptied = true;
                break;
            }
        }
        handle.abort();
        assert!(emptied, "sweeper never removed the stale artifact");
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
