//! # botrun-orchestrator
//!
//! Start/stop orchestration for a root bot and its skills.
//!
//! This crate provides:
//! - A pure lifecycle state machine (skills phase, root phase)
//! - A status tracker that fires once a set of projects is connected
//! - The orchestrator that sequences build/start/stop calls

mod orchestrator;
mod state_machine;
mod tracker;

pub use orchestrator::{BotOrchestrator, CompletionCallback};
pub use state_machine::{transition, Action, Event, State};
pub use tracker::{all_connected, ConnectedCallback, StatusTracker, WatchStatusTracker};
