//! # botrun-core
//!
//! Core types for botrun, a local runtime manager for multi-bot workspaces.
//!
//! A workspace is one root bot plus any number of skill bots. The root bot
//! calls into its skills, so skills are brought up first and the root only
//! once every skill reports `connected`.
//!
//! ## Contents
//!
//! - Project and status types shared by every botrun crate
//! - Workspace configuration (`.botrun/config.toml`)
//! - Unified error type
//! - Fail-open helpers for best-effort operations such as stopping bots

mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{ProjectConfig, RuntimeDefaults, WorkspaceConfig};
pub use error::{BotrunError, Result};
pub use types::*;
