//! # botrun-runtime
//!
//! Runtime layer for botrun.
//!
//! This crate provides:
//! - The bot runtime operations abstraction (build, start, stop)
//! - A process-backed runtime that runs each bot as a child process
//! - A recording mock runtime for tests
//! - The status board: workspace state container, selectors and dispatcher

mod board;
mod mock;
mod operations;
mod process;

pub use board::{StatusBoard, StatusSnapshot};
pub use mock::{MockRuntime, RuntimeCall};
pub use operations::{BotRuntimeOperations, BuildConfigSource, Dispatcher};
pub use process::ProcessRuntime;
