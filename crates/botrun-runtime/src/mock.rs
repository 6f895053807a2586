//! Mock bot runtime for testing

use async_trait::async_trait;
use botrun_core::{BotStatus, BotrunError, BuildRequest, DialogInfo, ProjectId, PublishConfig, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::board::StatusBoard;
use crate::operations::BotRuntimeOperations;

/// A call received by [`MockRuntime`]
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    Build {
        project_id: ProjectId,
        dialogs: Vec<DialogInfo>,
    },
    Start {
        project_id: ProjectId,
        config: PublishConfig,
    },
    Stop {
        project_id: ProjectId,
    },
}

impl RuntimeCall {
    pub fn project_id(&self) -> &str {
        match self {
            Self::Build { project_id, .. }
            | Self::Start { project_id, .. }
            | Self::Stop { project_id } => project_id,
        }
    }
}

/// Records every call in order and optionally drives a status board
///
/// Clones share the same call log.
#[derive(Clone, Default)]
pub struct MockRuntime {
    calls: Arc<Mutex<Vec<RuntimeCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    failures: Arc<Mutex<HashMap<ProjectId, String>>>,
    delay: Duration,
    board: Option<StatusBoard>,
    auto_connect: bool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every build/start call take this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report statuses on a board
    ///
    /// Builds and starts mark the project `connecting`; with `auto_connect`
    /// a successful call then marks it `connected`. Stops mark it
    /// `unconnected`, failures mark it `error`.
    pub fn with_board(mut self, board: StatusBoard, auto_connect: bool) -> Self {
        self.board = Some(board);
        self.auto_connect = auto_connect;
        self
    }

    /// Make build/start calls for a project fail
    pub fn fail_on(self, project_id: impl Into<ProjectId>, message: impl Into<String>) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project_id.into(), message.into());
        self
    }

    /// All calls received so far, in order
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, project_id: &str) -> Vec<RuntimeCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.project_id() == project_id)
            .collect()
    }

    /// Highest number of build/start calls that were in progress at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, call: RuntimeCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    async fn run(&self, project_id: &str, fail: impl FnOnce(String) -> BotrunError) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(board) = &self.board {
            board.set_status(project_id, BotStatus::Connecting);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .cloned();

        if let Some(message) = failure {
            if let Some(board) = &self.board {
                board.set_error(project_id, message.clone());
            }
            return Err(fail(message));
        }

        if let (Some(board), true) = (&self.board, self.auto_connect) {
            board.set_status(project_id, BotStatus::Connected);
        }
        Ok(())
    }
}

#[async_trait]
impl BotRuntimeOperations for MockRuntime {
    async fn build_with_default_recognizer(
        &self,
        project_id: &str,
        request: BuildRequest,
    ) -> Result<()> {
        self.record(RuntimeCall::Build {
            project_id: project_id.to_string(),
            dialogs: request.dialogs,
        });
        self.run(project_id, |m| BotrunError::build(project_id, m))
            .await
    }

    async fn start_bot(&self, project_id: &str, config: &PublishConfig) -> Result<()> {
        self.record(RuntimeCall::Start {
            project_id: project_id.to_string(),
            config: config.clone(),
        });
        self.run(project_id, |m| BotrunError::start(project_id, m))
            .await
    }

    async fn stop_bot(&self, project_id: &str) -> Result<()> {
        self.record(RuntimeCall::Stop {
            project_id: project_id.to_string(),
        });
        if let Some(board) = &self.board {
            board.set_status(project_id, BotStatus::Unconnected);
        }
        Ok(())
    }
}
