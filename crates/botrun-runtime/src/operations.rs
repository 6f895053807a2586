//! Collaborator contracts used by the orchestrator

use async_trait::async_trait;
use botrun_core::{BotBuildConfig, BuildRequest, ProjectId, PublishConfig, Result};

/// Builds, starts and stops bot processes (allows mocking in tests)
#[async_trait]
pub trait BotRuntimeOperations: Send + Sync {
    /// Compile the project's dialogs for the default recognizer, then start it
    async fn build_with_default_recognizer(
        &self,
        project_id: &str,
        request: BuildRequest,
    ) -> Result<()>;

    /// Start a bot that needs no build step (regex recognizer)
    async fn start_bot(&self, project_id: &str, config: &PublishConfig) -> Result<()>;

    /// Stop a bot. Stopping a bot that is not running is not an error.
    async fn stop_bot(&self, project_id: &str) -> Result<()>;
}

/// Read-only view of the workspace's projects
pub trait BuildConfigSource: Send + Sync {
    /// Every project, root bot first
    fn build_configs(&self) -> Vec<BotBuildConfig>;

    /// Id of the root bot, if the workspace has one
    fn root_project_id(&self) -> Option<ProjectId> {
        self.build_configs().into_iter().next().map(|c| c.project_id)
    }
}

/// State mutations the orchestrator requests from the workspace owner
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Point the root bot at local endpoints of skills that have no manifest
    async fn update_settings_for_skills_without_manifest(&self) -> Result<()>;

    /// Forget the last runtime error of a project
    fn reset_bot_runtime_error(&self, project_id: &str);
}
