//! Core type definitions for bot runtime orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project identifier (stable id of a bot project in the workspace)
pub type ProjectId = String;

/// Runtime status of a bot project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    #[default]
    Unconnected,
    Connecting,
    Connected,
    Error,
}

impl BotStatus {
    /// Whether the bot is up and answering
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unconnected" | "stopped" => Ok(Self::Unconnected),
            "connecting" | "starting" => Ok(Self::Connecting),
            "connected" | "running" => Ok(Self::Connected),
            "error" | "failed" => Ok(Self::Error),
            _ => Err(format!("Invalid bot status: {}", s)),
        }
    }
}

/// Dialog-understanding strategy of a bot
///
/// Only two kinds are modeled: the default LU-based recognizer, whose
/// dialogs must be compiled before the bot can start, and the regex
/// recognizer, which starts directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerKind {
    #[default]
    Default,
    Regex,
}

impl RecognizerKind {
    pub fn requires_build(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl std::fmt::Display for RecognizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Regex => write!(f, "regex"),
        }
    }
}

impl std::str::FromStr for RecognizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" | "lu" | "luis" => Ok(Self::Default),
            "regex" => Ok(Self::Regex),
            _ => Err(format!("Invalid recognizer: {}", s)),
        }
    }
}

/// Opaque publish configuration handed to the runtime unchanged
///
/// The orchestrator never interprets it. The only writer is the settings
/// normalization step, which records skill endpoints on the root bot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishConfig(pub serde_json::Value);

impl PublishConfig {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Look up a nested value by key path
    pub fn get_path(&self, path: &[&str]) -> Option<&serde_json::Value> {
        path.iter().try_fold(&self.0, |value, key| value.get(*key))
    }

    /// Set a nested value, creating intermediate objects as needed
    ///
    /// Non-object values along the path are replaced by objects.
    pub fn set_path(&mut self, path: &[&str], value: serde_json::Value) {
        set_nested(&mut self.0, path, value);
    }
}

fn set_nested(target: &mut serde_json::Value, path: &[&str], value: serde_json::Value) {
    match path.split_first() {
        None => *target = value,
        Some((key, rest)) => {
            if !target.is_object() {
                *target = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = target {
                let child = map
                    .entry(key.to_string())
                    .or_insert(serde_json::Value::Null);
                set_nested(child, rest, value);
            }
        }
    }
}

impl From<serde_json::Value> for PublishConfig {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// A dialog file that the default recognizer build compiles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogInfo {
    /// Dialog id (file stem)
    pub id: String,
    /// Path relative to the project directory
    pub path: PathBuf,
}

impl DialogInfo {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// Derive the id from the file stem (`main.dialog` -> `main`)
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let id = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.split('.').next().unwrap_or(name).to_string())
            .unwrap_or_default();
        Self::new(id, path)
    }
}

/// Build/start view of one project in the workspace
///
/// The root bot is always at index 0 of the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotBuildConfig {
    pub project_id: ProjectId,
    pub configuration: PublishConfig,
    /// True when the default recognizer needs its dialogs compiled first
    pub build_required: bool,
    pub status: BotStatus,
    #[serde(default)]
    pub dialogs: Vec<DialogInfo>,
}

impl BotBuildConfig {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            configuration: PublishConfig::default(),
            build_required: false,
            status: BotStatus::Unconnected,
            dialogs: Vec::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: PublishConfig) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_build_required(mut self, build_required: bool) -> Self {
        self.build_required = build_required;
        self
    }

    pub fn with_status(mut self, status: BotStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_dialogs(mut self, dialogs: Vec<DialogInfo>) -> Self {
        self.dialogs = dialogs;
        self
    }
}

/// Payload for a default-recognizer build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub dialogs: Vec<DialogInfo>,
    pub config: PublishConfig,
}

/// Last observed runtime state of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRuntimeState {
    pub status: BotStatus,
    /// Last runtime error, cleared before each start attempt
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ProjectRuntimeState {
    fn default() -> Self {
        Self {
            status: BotStatus::Unconnected,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bot_status_parsing() {
        assert_eq!("connected".parse::<BotStatus>().unwrap(), BotStatus::Connected);
        assert_eq!("Running".parse::<BotStatus>().unwrap(), BotStatus::Connected);
        assert_eq!(BotStatus::Connecting.to_string(), "connecting");
        assert!("bogus".parse::<BotStatus>().is_err());
    }

    #[test]
    fn test_recognizer_requires_build() {
        assert!(RecognizerKind::Default.requires_build());
        assert!(!RecognizerKind::Regex.requires_build());
        assert_eq!("lu".parse::<RecognizerKind>().unwrap(), RecognizerKind::Default);
    }

    #[test]
    fn test_publish_config_set_path_creates_objects() {
        let mut config = PublishConfig::default();
        config.set_path(
            &["skills", "skill-a", "endpointUrl"],
            json!("http://localhost:3979/api/messages"),
        );

        assert_eq!(
            config.get_path(&["skills", "skill-a", "endpointUrl"]),
            Some(&json!("http://localhost:3979/api/messages"))
        );
    }

    #[test]
    fn test_publish_config_set_path_keeps_siblings() {
        let mut config = PublishConfig::new(json!({"name": "root", "skills": {"x": {"a": 1}}}));
        config.set_path(&["skills", "y", "endpointUrl"], json!("u"));

        assert_eq!(config.get_path(&["name"]), Some(&json!("root")));
        assert_eq!(config.get_path(&["skills", "x", "a"]), Some(&json!(1)));
        assert_eq!(config.get_path(&["skills", "y", "endpointUrl"]), Some(&json!("u")));
    }

    #[test]
    fn test_dialog_info_from_path() {
        let dialog = DialogInfo::from_path("dialogs/main/main.dialog");
        assert_eq!(dialog.id, "main");
        assert_eq!(dialog.path, PathBuf::from("dialogs/main/main.dialog"));
    }

    #[test]
    fn test_build_config_builder() {
        let config = BotBuildConfig::new("skill-a")
            .with_build_required(true)
            .with_status(BotStatus::Error);
        assert_eq!(config.project_id, "skill-a");
        assert!(config.build_required);
        assert_eq!(config.status, BotStatus::Error);
        assert!(config.dialogs.is_empty());
    }
}
