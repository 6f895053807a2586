//! Bot status tracking
//!
//! A tracker watches a set of projects and runs a callback once every one of
//! them reports `connected`. The orchestrator uses it to start the root bot
//! only after all of its skills are up.

use botrun_core::{BotStatus, ProjectId};
use botrun_runtime::StatusSnapshot;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback run when every tracked project is connected
pub type ConnectedCallback = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Watches projects until they are all connected
pub trait StatusTracker: Send + Sync {
    /// Watch `project_ids`, replacing any previous watch
    ///
    /// `on_connected` runs at most once. Tracking an empty set only clears
    /// the previous watch.
    fn track(&self, project_ids: Vec<ProjectId>, on_connected: ConnectedCallback);

    /// Drop the current watch without running its callback
    fn clear(&self);
}

/// Status tracker driven by a status board's watch channel
pub struct WatchStatusTracker {
    statuses: watch::Receiver<StatusSnapshot>,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl WatchStatusTracker {
    pub fn new(statuses: watch::Receiver<StatusSnapshot>) -> Self {
        Self {
            statuses,
            current: Mutex::new(None),
        }
    }

    fn replace(&self, handle: Option<JoinHandle<()>>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.abort();
        }
        *current = handle;
    }

    /// Whether a watch is still waiting
    pub fn is_tracking(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// True when every id is present in the snapshot with `connected` status
pub fn all_connected(snapshot: &StatusSnapshot, project_ids: &[ProjectId]) -> bool {
    project_ids.iter().all(|id| {
        snapshot
            .get(id)
            .is_some_and(|status| *status == BotStatus::Connected)
    })
}

impl StatusTracker for WatchStatusTracker {
    fn track(&self, project_ids: Vec<ProjectId>, on_connected: ConnectedCallback) {
        if project_ids.is_empty() {
            self.replace(None);
            return;
        }

        debug!("Tracking {} project(s): {:?}", project_ids.len(), project_ids);
        let mut statuses = self.statuses.clone();

        let handle = tokio::spawn(async move {
            loop {
                let ready = all_connected(&statuses.borrow_and_update(), &project_ids);
                if ready {
                    info!("All tracked projects connected: {:?}", project_ids);
                    on_connected().await;
                    return;
                }
                if statuses.changed().await.is_err() {
                    debug!("Status board dropped, tracker exiting");
                    return;
                }
            }
        });

        self.replace(Some(handle));
    }

    fn clear(&self) {
        self.replace(None);
    }
}

impl Drop for WatchStatusTracker {
    fn drop(&mut self) {
        self.replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrun_core::BotBuildConfig;
    use botrun_runtime::StatusBoard;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn board() -> StatusBoard {
        StatusBoard::new(vec![
            BotBuildConfig::new("root"),
            BotBuildConfig::new("skill-a"),
            BotBuildConfig::new("skill-b"),
        ])
    }

    fn counting_callback(count: &Arc<AtomicUsize>) -> ConnectedCallback {
        let count = count.clone();
        Box::new(move || {
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_all_connected() {
        let mut snapshot = StatusSnapshot::new();
        snapshot.insert("a".to_string(), BotStatus::Connected);
        snapshot.insert("b".to_string(), BotStatus::Connecting);

        assert!(all_connected(&snapshot, &["a".to_string()]));
        assert!(!all_connected(&snapshot, &["a".to_string(), "b".to_string()]));
        assert!(!all_connected(&snapshot, &["missing".to_string()]));
    }

    #[tokio::test]
    async fn test_fires_once_when_all_connected() {
        let board = board();
        let tracker = WatchStatusTracker::new(board.subscribe());
        let count = Arc::new(AtomicUsize::new(0));

        tracker.track(
            vec!["skill-a".to_string(), "skill-b".to_string()],
            counting_callback(&count),
        );

        board.set_status("skill-a", BotStatus::Connected);
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        board.set_status("skill-b", BotStatus::Connected);
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Flicker: no second call
        board.set_status("skill-b", BotStatus::Connecting);
        board.set_status("skill-b", BotStatus::Connected);
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_tracking());
    }

    #[tokio::test]
    async fn test_fires_immediately_when_already_connected() {
        let board = board();
        board.set_status("skill-a", BotStatus::Connected);
        let tracker = WatchStatusTracker::new(board.subscribe());
        let count = Arc::new(AtomicUsize::new(0));

        tracker.track(vec!["skill-a".to_string()], counting_callback(&count));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_drops_pending_watch() {
        let board = board();
        let tracker = WatchStatusTracker::new(board.subscribe());
        let count = Arc::new(AtomicUsize::new(0));

        tracker.track(vec!["skill-a".to_string()], counting_callback(&count));
        assert!(tracker.is_tracking());
        tracker.clear();

        board.set_status("skill-a", BotStatus::Connected);
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retrack_replaces_previous_watch() {
        let board = board();
        let tracker = WatchStatusTracker::new(board.subscribe());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        tracker.track(vec!["skill-a".to_string()], counting_callback(&first));
        tracker.track(vec!["skill-b".to_string()], counting_callback(&second));

        board.set_status("skill-a", BotStatus::Connected);
        board.set_status("skill-b", BotStatus::Connected);
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_set_never_fires() {
        let board = board();
        let tracker = WatchStatusTracker::new(board.subscribe());
        let count = Arc::new(AtomicUsize::new(0));

        tracker.track(vec![], counting_callback(&count));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!tracker.is_tracking());
    }
}
