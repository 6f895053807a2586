//! Process-backed bot runtime
//!
//! Each bot runs as a child process (`sh -c <start_command>`) inside its
//! project directory. A bot counts as connected once its process survives the
//! connect probe window.

use async_trait::async_trait;
use botrun_core::{
    BotStatus, BotrunError, BuildRequest, ProjectConfig, PublishConfig, Result, RuntimeDefaults,
    WorkspaceConfig,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::board::StatusBoard;
use crate::operations::BotRuntimeOperations;

const PROBE_POLL_MS: u64 = 50;

/// Runs bots as local child processes and reports their status on a board
pub struct ProcessRuntime {
    workspace_root: PathBuf,
    projects: HashMap<String, ProjectConfig>,
    defaults: RuntimeDefaults,
    board: StatusBoard,
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessRuntime {
    pub fn new(workspace_root: impl Into<PathBuf>, config: &WorkspaceConfig, board: StatusBoard) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            projects: config
                .projects
                .iter()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
            defaults: config.runtime.clone(),
            board,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn project(&self, project_id: &str) -> Result<&ProjectConfig> {
        self.projects
            .get(project_id)
            .ok_or_else(|| BotrunError::ProjectNotFound(project_id.to_string()))
    }

    fn shell(&self, project: &ProjectConfig, command_line: &str) -> Command {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(command_line)
            .current_dir(self.workspace_root.join(&project.directory))
            .env("BOTRUN_PROJECT_ID", &project.id);
        if let Some(port) = project.port {
            command.env("BOTRUN_PORT", port.to_string());
        }
        command
    }

    /// Ids of bots with a live child process
    pub async fn running(&self) -> Vec<String> {
        let mut children = self.children.lock().await;
        let mut exited = Vec::new();
        for (id, child) in children.iter_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                warn!("{} exited on its own ({})", id, status);
                exited.push(id.clone());
            }
        }
        for id in &exited {
            children.remove(id);
            self.board
                .set_error(id, format!("{} exited unexpectedly", id));
        }
        let mut ids: Vec<String> = children.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn run_build(&self, project: &ProjectConfig, request: &BuildRequest) -> Result<()> {
        let Some(build_command) = &project.build_command else {
            debug!("{} has no build command, nothing to compile", project.id);
            return Ok(());
        };

        let dialogs = request
            .dialogs
            .iter()
            .map(|d| d.path.display().to_string())
            .collect::<Vec<_>>()
            .join(",");

        info!(
            "Building {} ({} dialog(s))",
            project.id,
            request.dialogs.len()
        );

        let mut command = self.shell(project, build_command);
        command.env("BOTRUN_DIALOGS", dialogs).kill_on_drop(true);
        let output = command.output();

        let timeout = Duration::from_secs(self.defaults.build_timeout_secs);
        let output = match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(BotrunError::build(
                    &project.id,
                    format!("failed to run build command: {}", e),
                ))
            }
            Err(_) => {
                return Err(BotrunError::build(
                    &project.id,
                    format!("build timed out after {}s", timeout.as_secs()),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BotrunError::build(
                &project.id,
                format!("build exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(())
    }

    /// Spawn the bot and wait out the connect probe
    ///
    /// The child is registered before the probe so a stop issued while the
    /// bot is still starting kills it; the start then fails as cancelled.
    async fn spawn_bot(&self, project: &ProjectConfig, config: &PublishConfig) -> Result<()> {
        let settings = serde_json::to_string(config.as_value())?;
        {
            let mut children = self.children.lock().await;
            if children.contains_key(&project.id) {
                debug!("{} is already running", project.id);
                return Ok(());
            }
            let child = self
                .shell(project, &project.start_command)
                .env("BOTRUN_CONFIG", settings)
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| BotrunError::start(&project.id, format!("failed to spawn: {}", e)))?;
            children.insert(project.id.clone(), child);
        }

        self.board.set_status(&project.id, BotStatus::Connecting);

        let probe = Duration::from_millis(self.defaults.connect_probe_ms);
        let step = probe.min(Duration::from_millis(PROBE_POLL_MS));
        let deadline = tokio::time::Instant::now() + probe;
        loop {
            {
                let mut children = self.children.lock().await;
                let Some(child) = children.get_mut(&project.id) else {
                    return Err(BotrunError::Cancelled(format!(
                        "{} was stopped while starting",
                        project.id
                    )));
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        children.remove(&project.id);
                        return Err(BotrunError::start(
                            &project.id,
                            format!("process exited during startup ({})", status),
                        ));
                    }
                    Ok(None) if tokio::time::Instant::now() >= deadline => {
                        info!("{} is up (pid {:?})", project.id, child.id());
                        self.board.set_status(&project.id, BotStatus::Connected);
                        return Ok(());
                    }
                    Ok(None) => {}
                    Err(e) => {
                        children.remove(&project.id);
                        return Err(BotrunError::start(&project.id, e.to_string()));
                    }
                }
            }
            tokio::time::sleep(step).await;
        }
    }

    /// Record a failure on the board before handing it back
    fn report(&self, project_id: &str, result: Result<()>) -> Result<()> {
        match &result {
            Err(e) if e.is_cancelled() => debug!("{}", e),
            Err(e) => {
                self.board.set_error(project_id, e.to_string());
            }
            Ok(()) => {}
        }
        result
    }
}

#[async_trait]
impl BotRuntimeOperations for ProcessRuntime {
    #[instrument(skip(self, request), fields(dialogs = request.dialogs.len()))]
    async fn build_with_default_recognizer(
        &self,
        project_id: &str,
        request: BuildRequest,
    ) -> Result<()> {
        let project = self.project(project_id)?;
        self.board.set_status(project_id, BotStatus::Connecting);

        let result = match self.run_build(project, &request).await {
            Ok(()) => self.spawn_bot(project, &request.config).await,
            Err(e) => Err(e),
        };
        self.report(project_id, result)
    }

    #[instrument(skip(self, config))]
    async fn start_bot(&self, project_id: &str, config: &PublishConfig) -> Result<()> {
        let project = self.project(project_id)?;
        let result = self.spawn_bot(project, config).await;
        self.report(project_id, result)
    }

    #[instrument(skip(self))]
    async fn stop_bot(&self, project_id: &str) -> Result<()> {
        let child = self.children.lock().await.remove(project_id);

        if let Some(mut child) = child {
            info!("Stopping {}", project_id);
            child
                .start_kill()
                .map_err(|e| BotrunError::stop(project_id, e.to_string()))?;

            let grace = Duration::from_secs(self.defaults.stop_grace_secs);
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                warn!("{} did not exit within {}s", project_id, grace.as_secs());
            }
        } else {
            debug!("{} is not running", project_id);
        }

        self.board.set_status(project_id, BotStatus::Unconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botrun_core::RecognizerKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn workspace(root_cmd: &str, skill_build: Option<&str>) -> WorkspaceConfig {
        let mut skill = ProjectConfig::new("skill", "sleep 30").with_port(4001);
        if let Some(build) = skill_build {
            skill = skill.with_build_command(build);
        }
        WorkspaceConfig {
            projects: vec![
                ProjectConfig::new("root", root_cmd)
                    .with_port(4000)
                    .with_recognizer(RecognizerKind::Regex),
                skill,
            ],
            runtime: RuntimeDefaults {
                build_timeout_secs: 5,
                connect_probe_ms: 200,
                stop_grace_secs: 2,
            },
        }
    }

    fn runtime(dir: &TempDir, config: &WorkspaceConfig) -> (ProcessRuntime, StatusBoard) {
        let board = StatusBoard::from_config(config);
        (ProcessRuntime::new(dir.path(), config, board.clone()), board)
    }

    #[tokio::test]
    async fn test_start_and_stop_long_running_bot() {
        let dir = TempDir::new().unwrap();
        let config = workspace("sleep 30", None);
        let (runtime, board) = runtime(&dir, &config);

        runtime
            .start_bot("root", &PublishConfig::default())
            .await
            .unwrap();
        assert_eq!(board.status("root"), Some(BotStatus::Connected));
        assert_eq!(runtime.running().await, vec!["root".to_string()]);

        runtime.stop_bot("root").await.unwrap();
        assert_eq!(board.status("root"), Some(BotStatus::Unconnected));
        assert!(runtime.running().await.is_empty());
    }

    #[tokio::test]
    async fn test_bot_exiting_during_startup_is_an_error() {
        let dir = TempDir::new().unwrap();
        let config = workspace("exit 3", None);
        let (runtime, board) = runtime(&dir, &config);

        let err = runtime
            .start_bot("root", &PublishConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BotrunError::Start { .. }));

        let state = board.runtime_state("root").unwrap();
        assert_eq!(state.status, BotStatus::Error);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn test_failed_build_does_not_start() {
        let dir = TempDir::new().unwrap();
        let config = workspace("sleep 30", Some("echo broken >&2; exit 1"));
        let (runtime, board) = runtime(&dir, &config);

        let request = BuildRequest {
            dialogs: vec![],
            config: PublishConfig::default(),
        };
        let err = runtime
            .build_with_default_recognizer("skill", request)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("broken"));
        assert_eq!(board.status("skill"), Some(BotStatus::Error));
        assert!(runtime.running().await.is_empty());
    }

    #[tokio::test]
    async fn test_build_then_start() {
        let dir = TempDir::new().unwrap();
        let config = workspace("sleep 30", Some("test -n \"$BOTRUN_DIALOGS\""));
        let (runtime, board) = runtime(&dir, &config);

        let request = BuildRequest {
            dialogs: vec![botrun_core::DialogInfo::from_path("skill/main.dialog")],
            config: PublishConfig::default(),
        };
        runtime
            .build_with_default_recognizer("skill", request)
            .await
            .unwrap();

        assert_eq!(board.status("skill"), Some(BotStatus::Connected));
        runtime.stop_bot("skill").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_while_starting_kills_the_bot() {
        let dir = TempDir::new().unwrap();
        let mut config = workspace("sleep 30", None);
        config.runtime.connect_probe_ms = 600;
        let (runtime, board) = runtime(&dir, &config);
        let runtime = Arc::new(runtime);

        let starting = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.start_bot("root", &PublishConfig::default()).await }
        });
        for _ in 0..100 {
            if board.status("root") == Some(BotStatus::Connecting) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(board.status("root"), Some(BotStatus::Connecting));

        runtime.stop_bot("root").await.unwrap();
        let err = starting.await.unwrap().unwrap_err();

        assert!(err.is_cancelled());
        assert!(runtime.running().await.is_empty());
        assert_eq!(board.status("root"), Some(BotStatus::Unconnected));
    }

    #[tokio::test]
    async fn test_concurrent_starts_spawn_one_process() {
        let dir = TempDir::new().unwrap();
        let config = workspace("sleep 30", None);
        let (runtime, _board) = runtime(&dir, &config);

        let settings = PublishConfig::default();
        let (first, second) = tokio::join!(
            runtime.start_bot("root", &settings),
            runtime.start_bot("root", &settings)
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(runtime.running().await, vec!["root".to_string()]);
        runtime.stop_bot("root").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_not_running_is_ok() {
        let dir = TempDir::new().unwrap();
        let config = workspace("sleep 30", None);
        let (runtime, _board) = runtime(&dir, &config);

        runtime.stop_bot("skill").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let dir = TempDir::new().unwrap();
        let config = workspace("sleep 30", None);
        let (runtime, _board) = runtime(&dir, &config);

        let err = runtime
            .start_bot("ghost", &PublishConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BotrunError::ProjectNotFound(_)));
    }
}
