//! Status board: the workspace state container
//!
//! Owns the ordered project collection and each project's runtime status.
//! Runtimes write statuses here; the orchestrator reads it through
//! [`BuildConfigSource`] and mutates it through [`Dispatcher`]. Every status
//! change is published as a [`StatusSnapshot`] on a watch channel.

use async_trait::async_trait;
use botrun_core::{
    BotBuildConfig, BotStatus, ProjectId, ProjectRuntimeState, Result, WorkspaceConfig,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::operations::{BuildConfigSource, Dispatcher};

/// Status of every project at one point in time
pub type StatusSnapshot = HashMap<ProjectId, BotStatus>;

#[derive(Debug, Clone)]
struct BoardEntry {
    build: BotBuildConfig,
    error: Option<String>,
    updated_at: chrono::DateTime<Utc>,
    manifest_url: Option<String>,
    local_endpoint: Option<String>,
}

impl BoardEntry {
    fn new(build: BotBuildConfig) -> Self {
        Self {
            build,
            error: None,
            updated_at: Utc::now(),
            manifest_url: None,
            local_endpoint: None,
        }
    }
}

struct BoardInner {
    entries: Mutex<Vec<BoardEntry>>,
    tx: watch::Sender<StatusSnapshot>,
}

/// Shared workspace state; clones share the same board
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

impl StatusBoard {
    /// Create a board from build configs, root first
    pub fn new(configs: Vec<BotBuildConfig>) -> Self {
        Self::from_entries(configs.into_iter().map(BoardEntry::new).collect())
    }

    /// Create a board from a workspace configuration
    pub fn from_config(config: &WorkspaceConfig) -> Self {
        let entries = config
            .projects
            .iter()
            .map(|project| BoardEntry {
                manifest_url: project.manifest_url.clone(),
                local_endpoint: project.local_endpoint(),
                ..BoardEntry::new(project.to_build_config())
            })
            .collect();
        Self::from_entries(entries)
    }

    fn from_entries(entries: Vec<BoardEntry>) -> Self {
        let (tx, _rx) = watch::channel(snapshot_of(&entries));
        Self {
            inner: Arc::new(BoardInner {
                entries: Mutex::new(entries),
                tx,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<BoardEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, entries: &[BoardEntry]) {
        self.inner.tx.send_replace(snapshot_of(entries));
    }

    /// Subscribe to status snapshots
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.tx.subscribe()
    }

    /// Current status of every project
    pub fn snapshot(&self) -> StatusSnapshot {
        snapshot_of(&self.entries())
    }

    pub fn project_ids(&self) -> Vec<ProjectId> {
        self.entries()
            .iter()
            .map(|e| e.build.project_id.clone())
            .collect()
    }

    pub fn status(&self, project_id: &str) -> Option<BotStatus> {
        self.entries()
            .iter()
            .find(|e| e.build.project_id == project_id)
            .map(|e| e.build.status)
    }

    pub fn runtime_state(&self, project_id: &str) -> Option<ProjectRuntimeState> {
        self.entries()
            .iter()
            .find(|e| e.build.project_id == project_id)
            .map(|e| ProjectRuntimeState {
                status: e.build.status,
                error: e.error.clone(),
                updated_at: e.updated_at,
            })
    }

    /// Record a status change and notify subscribers
    ///
    /// Returns false when the project is unknown.
    pub fn set_status(&self, project_id: &str, status: BotStatus) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.iter_mut().find(|e| e.build.project_id == project_id) else {
            warn!("Status update for unknown project {}", project_id);
            return false;
        };

        if entry.build.status != status {
            debug!("{}: {} -> {}", project_id, entry.build.status, status);
        }
        entry.build.status = status;
        entry.updated_at = Utc::now();
        self.publish(&entries);
        true
    }

    /// Record a runtime error; the project's status becomes `error`
    pub fn set_error(&self, project_id: &str, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut entries = self.entries();
        let Some(entry) = entries.iter_mut().find(|e| e.build.project_id == project_id) else {
            warn!("Error report for unknown project {}: {}", project_id, message);
            return false;
        };

        warn!("{} failed: {}", project_id, message);
        entry.build.status = BotStatus::Error;
        entry.error = Some(message);
        entry.updated_at = Utc::now();
        self.publish(&entries);
        true
    }

    /// Replace the project collection, keeping the runtime state of
    /// projects that are still present
    pub fn replace_projects(&self, configs: Vec<BotBuildConfig>) {
        let mut entries = self.entries();
        let previous: HashMap<ProjectId, BoardEntry> = entries
            .drain(..)
            .map(|e| (e.build.project_id.clone(), e))
            .collect();

        *entries = configs
            .into_iter()
            .map(|mut build| match previous.get(&build.project_id) {
                Some(old) => {
                    build.status = old.build.status;
                    BoardEntry {
                        build,
                        ..old.clone()
                    }
                }
                None => BoardEntry::new(build),
            })
            .collect();

        info!("Workspace now has {} projects", entries.len());
        self.publish(&entries);
    }
}

fn snapshot_of(entries: &[BoardEntry]) -> StatusSnapshot {
    entries
        .iter()
        .map(|e| (e.build.project_id.clone(), e.build.status))
        .collect()
}

impl BuildConfigSource for StatusBoard {
    fn build_configs(&self) -> Vec<BotBuildConfig> {
        self.entries().iter().map(|e| e.build.clone()).collect()
    }

    fn root_project_id(&self) -> Option<ProjectId> {
        self.entries().first().map(|e| e.build.project_id.clone())
    }
}

#[async_trait]
impl Dispatcher for StatusBoard {
    async fn update_settings_for_skills_without_manifest(&self) -> Result<()> {
        let mut entries = self.entries();
        let Some((root, skills)) = entries.split_first_mut() else {
            return Ok(());
        };

        let mut updated = 0;
        for skill in skills.iter().filter(|s| s.manifest_url.is_none()) {
            let Some(endpoint) = &skill.local_endpoint else {
                debug!(
                    "Skill {} has neither manifest nor port, leaving root settings alone",
                    skill.build.project_id
                );
                continue;
            };
            root.build.configuration.set_path(
                &["skills", skill.build.project_id.as_str(), "endpointUrl"],
                json!(endpoint),
            );
            updated += 1;
        }

        if updated > 0 {
            info!(
                "Wrote {} local skill endpoint(s) into {} settings",
                updated, root.build.project_id
            );
            root.updated_at = Utc::now();
        }
        Ok(())
    }

    fn reset_bot_runtime_error(&self, project_id: &str) {
        let mut entries = self.entries();
        if let Some(entry) = entries.iter_mut().find(|e| e.build.project_id == project_id) {
            entry.error = None;
            if entry.build.status == BotStatus::Error {
                entry.build.status = BotStatus::Unconnected;
                entry.updated_at = Utc::now();
                self.publish(&entries);
            }
        }
    }
}
