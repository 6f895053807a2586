//! Unified error types for botrun

use thiserror::Error;

/// Unified error type for all botrun operations
#[derive(Error, Debug)]
pub enum BotrunError {
    // Runtime errors
    #[error("Build failed for {project_id}: {message}")]
    Build { project_id: String, message: String },

    #[error("Start failed for {project_id}: {message}")]
    Start { project_id: String, message: String },

    #[error("Stop failed for {project_id}: {message}")]
    Stop { project_id: String, message: String },

    // Workspace errors
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Workspace has no root bot")]
    NoRootBot,

    // Orchestrator errors
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BotrunError {
    pub fn build(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            project_id: project_id.into(),
            message: message.into(),
        }
    }

    pub fn start(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Start {
            project_id: project_id.into(),
            message: message.into(),
        }
    }

    pub fn stop(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stop {
            project_id: project_id.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from cancelling an in-flight operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result type alias using BotrunError
pub type Result<T> = std::result::Result<T, BotrunError>;
