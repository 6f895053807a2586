//! Configuration management for botrun
//!
//! The workspace is described by `.botrun/config.toml` in the workspace
//! root: the ordered list of bot projects (root bot first) and the defaults
//! the process runtime uses when building and starting them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::{BotBuildConfig, BotStatus, DialogInfo, ProjectId, PublishConfig, RecognizerKind};
use crate::{BotrunError, Result};

/// Workspace-level botrun configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Bot projects; the first entry is the root bot
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,

    /// Process runtime defaults
    #[serde(default)]
    pub runtime: RuntimeDefaults,
}

/// One bot project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Stable project id
    pub id: ProjectId,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Project directory, relative to the workspace root
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Local port the bot listens on
    #[serde(default)]
    pub port: Option<u16>,

    /// Recognizer used by the bot's dialogs
    #[serde(default)]
    pub recognizer: RecognizerKind,

    /// Dialog files compiled by the default recognizer build
    #[serde(default)]
    pub dialogs: Vec<PathBuf>,

    /// Published skill manifest; skills without one get a local endpoint
    /// written into the root bot's settings
    #[serde(default)]
    pub manifest_url: Option<String>,

    /// Command that compiles the dialogs (default recognizer only)
    #[serde(default)]
    pub build_command: Option<String>,

    /// Command that runs the bot
    pub start_command: String,

    /// Publish settings passed through to the bot
    #[serde(default = "default_settings")]
    pub settings: serde_json::Value,
}

/// Defaults for the process runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeDefaults {
    /// Maximum time a build command may run
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,

    /// How long a started process must stay alive to count as connected
    #[serde(default = "default_connect_probe_ms")]
    pub connect_probe_ms: u64,

    /// Time to wait for a killed process to exit
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

// Default value providers
fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_settings() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_build_timeout_secs() -> u64 {
    300
}

fn default_connect_probe_ms() -> u64 {
    1500
}

fn default_stop_grace_secs() -> u64 {
    5
}

impl ProjectConfig {
    pub fn new(id: impl Into<ProjectId>, start_command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            directory: default_directory(),
            port: None,
            recognizer: RecognizerKind::Default,
            dialogs: Vec::new(),
            manifest_url: None,
            build_command: None,
            start_command: start_command.into(),
            settings: default_settings(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_recognizer(mut self, recognizer: RecognizerKind) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_dialogs(mut self, dialogs: Vec<PathBuf>) -> Self {
        self.dialogs = dialogs;
        self
    }

    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = Some(command.into());
        self
    }

    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = Some(url.into());
        self
    }

    /// Name shown to users, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Local messaging endpoint, if the bot has a port
    pub fn local_endpoint(&self) -> Option<String> {
        self.port
            .map(|port| format!("http://localhost:{}/api/messages", port))
    }

    /// Build/start view of this project in its initial state
    pub fn to_build_config(&self) -> BotBuildConfig {
        BotBuildConfig::new(self.id.clone())
            .with_configuration(PublishConfig::new(self.settings.clone()))
            .with_build_required(self.recognizer.requires_build())
            .with_status(BotStatus::Unconnected)
            .with_dialogs(self.dialogs.iter().map(DialogInfo::from_path).collect())
    }
}

impl WorkspaceConfig {
    /// Load configuration from `.botrun/config.toml` or use defaults
    pub fn load_or_default(workspace_root: &Path) -> Result<Self> {
        let config_path = Self::config_path(workspace_root);

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate a configuration file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BotrunError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.botrun/config.toml`
    pub fn write_default(workspace_root: &Path) -> Result<PathBuf> {
        let config_dir = workspace_root.join(".botrun");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| BotrunError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    pub fn config_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(".botrun/config.toml")
    }

    /// Check the workspace shape: a root bot, unique ids, unique ports
    pub fn validate(&self) -> Result<()> {
        if self.projects.is_empty() {
            return Err(BotrunError::Config(
                "workspace must declare at least one project (the root bot)".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut ports = HashSet::new();
        for project in &self.projects {
            if project.id.trim().is_empty() {
                return Err(BotrunError::Config("project id must not be empty".to_string()));
            }
            if !ids.insert(project.id.as_str()) {
                return Err(BotrunError::Config(format!(
                    "duplicate project id: {}",
                    project.id
                )));
            }
            if let Some(port) = project.port {
                if !ports.insert(port) {
                    return Err(BotrunError::Config(format!(
                        "port {} is used by more than one project",
                        port
                    )));
                }
            }
        }

        Ok(())
    }

    /// The root bot (first project)
    pub fn root(&self) -> Option<&ProjectConfig> {
        self.projects.first()
    }

    pub fn project(&self, project_id: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.id == project_id)
    }

    /// Skill bots (every project after the root)
    pub fn skills(&self) -> &[ProjectConfig] {
        self.projects.get(1..).unwrap_or(&[])
    }

    /// Build/start views for every project, root first
    pub fn build_configs(&self) -> Vec<BotBuildConfig> {
        self.projects.iter().map(ProjectConfig::to_build_config).collect()
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            projects: vec![
                ProjectConfig::new("root-bot", "dotnet run --project root-bot")
                    .with_port(3978)
                    .with_dialogs(vec![PathBuf::from("root-bot/root-bot.dialog")])
                    .with_build_command("bf luis:build --in root-bot --out generated"),
                ProjectConfig::new("echo-skill", "dotnet run --project echo-skill")
                    .with_port(3979)
                    .with_recognizer(RecognizerKind::Regex),
            ],
            runtime: RuntimeDefaults::default(),
        }
    }
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            build_timeout_secs: default_build_timeout_secs(),
            connect_probe_ms: default_connect_probe_ms(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}
