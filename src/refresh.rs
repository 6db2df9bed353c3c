//! Background cache refresh worker
//!
//! Runs refresh cycles off the caller's thread so readers never wait on the
//! network. A cycle runs once at startup, then on every interval tick, and
//! whenever one is requested through the handle. Progress is reported over a
//! tokio channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::manager::{CacheManager, RefreshOutcome};

/// Messages sent from the background worker
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// A refresh cycle started
    RefreshStarted { force: bool },
    /// A collection committed a new snapshot
    CollectionRefreshed { collection: String, items: usize },
    /// A collection failed to refresh and kept its previous snapshot
    CollectionFailed { collection: String, error: String },
    /// A refresh cycle finished
    RefreshCompleted { refreshed: usize, failed: usize },
}

/// Configuration for the background worker
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How often to check for stale collections
    pub interval: Duration,
    /// Whether the worker runs at all
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(900), // 15 minutes
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh worker
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    /// Requests an out-of-schedule cycle; the flag is `force`
    request_tx: mpsc::Sender<bool>,
    /// Signals shutdown
    shutdown_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Spawns the background worker for `manager`
    ///
    /// With `config.enabled == false` nothing is spawned and the receiver
    /// never yields a message.
    pub fn spawn(manager: Arc<CacheManager>, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (request_tx, mut request_rx) = mpsc::channel::<bool>(4);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = config.enabled.then(|| {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                tracing::info!(interval = ?config.interval, "refresh worker started");

                loop {
                    // the first tick completes immediately: startup staleness check
                    let force = tokio::select! {
                        _ = interval.tick() => false,
                        Some(force) = request_rx.recv() => force,
                        _ = shutdown_rx.recv() => break,
                    };

                    run_cycle(&manager, &msg_tx, force).await;
                }

                tracing::info!("refresh worker stopped");
            })
        });

        Self {
            receiver: msg_rx,
            request_tx,
            shutdown_tx,
            task,
        }
    }

    /// Requests an immediate refresh cycle
    pub async fn request_refresh(&self, force: bool) {
        let _ = self.request_tx.send(force).await;
    }

    /// Shuts down the worker, waiting for an in-progress cycle to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Runs one `refresh_all` and reports what happened
async fn run_cycle(manager: &CacheManager, tx: &mpsc::Sender<RefreshMessage>, force: bool) {
    notify(tx, RefreshMessage::RefreshStarted { force });

    let results = manager.refresh_all(force).await;

    let mut refreshed = 0;
    let mut failed = 0;
    for (collection, outcome) in results {
        match outcome {
            RefreshOutcome::Refreshed { items, .. } => {
                refreshed += 1;
                notify(tx, RefreshMessage::CollectionRefreshed { collection, items });
            }
            RefreshOutcome::Failed(err) => {
                failed += 1;
                notify(
                    tx,
                    RefreshMessage::CollectionFailed {
                        collection,
                        error: err.to_string(),
                    },
                );
            }
            _ => {}
        }
    }

    notify(tx, RefreshMessage::RefreshCompleted { refreshed, failed });
}

/// Sends without waiting; progress messages are dropped if nobody drains them
fn notify(tx: &mpsc::Sender<RefreshMessage>, message: RefreshMessage) {
    if let Err(e) = tx.try_send(message) {
        tracing::trace!(error = %e, "dropping refresh message");
    }
}

/// Checks for pending refresh messages without blocking
///
/// # Returns
/// * `Some(RefreshMessage)` if a message was available
/// * `None` if no messages are pending
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotStore;
    use crate::data::{ApiError, CollectionSource, ItemRecord, Page};
    use crate::manager::CacheSettings;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// One-page collections; `broken` ids always fail
    struct StaticSource;

    #[async_trait]
    impl CollectionSource for StaticSource {
        async fn fetch_page(
            &self,
            collection_id: &str,
            _offset: u32,
            _limit: u32,
        ) -> Result<Page, ApiError> {
            if collection_id == "broken" {
                return Err(ApiError::Auth { status: 401 });
            }
            Ok(Page {
                items: vec![
                    ItemRecord::new(format!("{}-1", collection_id)),
                    ItemRecord::new(format!("{}-2", collection_id)),
                ],
                has_more: false,
            })
        }
    }

    fn create_test_manager(collections: &[(&str, &str)]) -> (Arc<CacheManager>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let settings = CacheSettings {
            collections: collections
                .iter()
                .map(|(name, id)| (name.to_string(), id.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        };
        let store = SnapshotStore::with_dir(temp_dir.path().to_path_buf());
        let manager = CacheManager::new(store, settings).with_source(Arc::new(StaticSource));
        (Arc::new(manager), temp_dir)
    }

    async fn next_message(handle: &mut RefreshHandle) -> RefreshMessage {
        tokio::time::timeout(Duration::from_secs(5), handle.receiver.recv())
            .await
            .expect("worker should report within 5s")
            .expect("channel should stay open")
    }

    fn quiet_config() -> RefreshConfig {
        RefreshConfig {
            interval: Duration::from_secs(3600),
            enabled: true,
        }
    }

    #[test]
    fn test_refresh_config_default() {
        let config = RefreshConfig::default();
        assert_eq!(config.interval, Duration::from_secs(900));
        assert!(config.enabled);
    }

    #[tokio::test]
    async fn test_refresh_handle_spawn_disabled() {
        let (manager, _temp_dir) = create_test_manager(&[("bands", "col-bands")]);
        let config = RefreshConfig {
            enabled: false,
            ..Default::default()
        };

        let mut handle = RefreshHandle::spawn(manager.clone(), config);
        tokio::task::yield_now().await;

        assert!(try_recv(&mut handle).is_none());
        assert!(manager.get("bands", None).is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_initial_cycle_runs_on_start() {
        let (manager, _temp_dir) =
            create_test_manager(&[("bands", "col-bands"), ("songs", "col-songs")]);
        let mut handle = RefreshHandle::spawn(manager.clone(), quiet_config());

        assert_eq!(
            next_message(&mut handle).await,
            RefreshMessage::RefreshStarted { force: false }
        );
        assert_eq!(
            next_message(&mut handle).await,
            RefreshMessage::CollectionRefreshed {
                collection: "bands".into(),
                items: 2
            }
        );
        assert_eq!(
            next_message(&mut handle).await,
            RefreshMessage::CollectionRefreshed {
                collection: "songs".into(),
                items: 2
            }
        );
        assert_eq!(
            next_message(&mut handle).await,
            RefreshMessage::RefreshCompleted { refreshed: 2, failed: 0 }
        );
        assert_eq!(manager.get("bands", None).len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_collection() {
        let (manager, _temp_dir) =
            create_test_manager(&[("albums", "broken"), ("bands", "col-bands")]);
        let mut handle = RefreshHandle::spawn(manager, quiet_config());

        assert!(matches!(next_message(&mut handle).await, RefreshMessage::RefreshStarted { .. }));
        assert!(matches!(
            next_message(&mut handle).await,
            RefreshMessage::CollectionFailed { ref collection, .. } if collection == "albums"
        ));
        assert!(matches!(
            next_message(&mut handle).await,
            RefreshMessage::CollectionRefreshed { ref collection, .. } if collection == "bands"
        ));
        assert_eq!(
            next_message(&mut handle).await,
            RefreshMessage::RefreshCompleted { refreshed: 1, failed: 1 }
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_requested_refresh_is_forced() {
        let (manager, _temp_dir) = create_test_manager(&[("bands", "col-bands")]);
        let mut handle = RefreshHandle::spawn(manager, quiet_config());

        // drain the startup cycle
        loop {
            if let RefreshMessage::RefreshCompleted { .. } = next_message(&mut handle).await {
                break;
            }
        }

        handle.request_refresh(false).await;
        assert_eq!(
            next_message(&mut handle).await,
            RefreshMessage::RefreshStarted { force: false }
        );
        assert_eq!(
            next_message(&mut handle).await,
            RefreshMessage::RefreshCompleted { refreshed: 0, failed: 0 },
            "fresh collection is skipped"
        );

        handle.request_refresh(true).await;
        assert_eq!(next_message(&mut handle).await, RefreshMessage::RefreshStarted { force: true });
        assert!(matches!(
            next_message(&mut handle).await,
            RefreshMessage::CollectionRefreshed { .. }
        ));

        handle.shutdown().await;
    }
}
