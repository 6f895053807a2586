//! Bot runtime orchestrator
//!
//! Starts and stops a root bot and its skill bots in dependency order:
//! skills are started one at a time, and the root bot only once every skill
//! reports `connected`. The lifecycle bookkeeping lives in the pure state
//! machine; this module performs the side effects it asks for.

use botrun_core::fail_open::fail_open;
use botrun_core::{BotBuildConfig, BotrunError, BuildRequest, ProjectId, Result};
use botrun_runtime::{BotRuntimeOperations, BuildConfigSource, Dispatcher, StatusBoard};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::state_machine::{transition, Action, Event, State};
use crate::tracker::{ConnectedCallback, StatusTracker, WatchStatusTracker};

/// Called with `true` once all skill calls of a start-all run went out, and
/// with `false` when all bots are stopped
pub type CompletionCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct Control {
    state: State,
    tracked: Vec<ProjectId>,
    cancel: CancellationToken,
}

struct Inner {
    runtime: Arc<dyn BotRuntimeOperations>,
    dispatcher: Arc<dyn Dispatcher>,
    source: Arc<dyn BuildConfigSource>,
    tracker: Arc<dyn StatusTracker>,
    on_all_bots_started: Mutex<Option<CompletionCallback>>,
    control: Mutex<Control>,
}

/// Coordinates starting and stopping every bot in a workspace
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct BotOrchestrator {
    inner: Arc<Inner>,
}

impl BotOrchestrator {
    pub fn new(
        runtime: Arc<dyn BotRuntimeOperations>,
        dispatcher: Arc<dyn Dispatcher>,
        source: Arc<dyn BuildConfigSource>,
        tracker: Arc<dyn StatusTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                dispatcher,
                source,
                tracker,
                on_all_bots_started: Mutex::new(None),
                control: Mutex::new(Control {
                    state: State::Idle,
                    tracked: Vec::new(),
                    cancel: CancellationToken::new(),
                }),
            }),
        }
    }

    /// Orchestrator whose selectors, dispatcher and tracker are all backed
    /// by one status board
    pub fn with_board(runtime: Arc<dyn BotRuntimeOperations>, board: StatusBoard) -> Self {
        let tracker = Arc::new(WatchStatusTracker::new(board.subscribe()));
        let board = Arc::new(board);
        Self::new(runtime, board.clone(), board, tracker)
    }

    /// Register the all-bots started/stopped callback
    pub fn with_completion_callback(self, callback: impl Fn(bool) + Send + Sync + 'static) -> Self {
        *self
            .inner
            .on_all_bots_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
        self
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.control().state.clone()
    }

    /// Projects whose connection is awaited before the root bot starts
    pub fn tracked_project_ids(&self) -> Vec<ProjectId> {
        self.control().tracked.clone()
    }

    /// Feed an event to the state machine and apply the bookkeeping actions
    ///
    /// Actions that need I/O (starting skills or the root, stopping bots) and
    /// completion notifications are left for the caller, which knows when
    /// they are due. The returned token is the one current after the
    /// transition, taken under the same lock, so a later stop cancels it.
    fn dispatch(&self, event: Event) -> (Vec<Action>, CancellationToken) {
        let (actions, cancel) = {
            let mut control = self.control();
            let state = std::mem::replace(&mut control.state, State::Idle);
            let (next, actions) = transition(state, event);
            debug!("Lifecycle state: {}", next.name());
            control.state = next;

            for action in &actions {
                match action {
                    Action::TrackProjects { project_ids, .. } => {
                        control.tracked = project_ids.clone();
                    }
                    Action::ClearTrackedProjects => control.tracked.clear(),
                    Action::CancelInFlight => {
                        control.cancel.cancel();
                        control.cancel = CancellationToken::new();
                    }
                    Action::LogActivity { message } => info!("{}", message),
                    _ => {}
                }
            }
            (actions, control.cancel.clone())
        };

        for action in &actions {
            match action {
                Action::TrackProjects {
                    run_id,
                    project_ids,
                } => {
                    self.inner
                        .tracker
                        .track(project_ids.clone(), self.skills_connected_callback(run_id));
                }
                Action::ClearTrackedProjects => self.inner.tracker.clear(),
                _ => {}
            }
        }

        (actions, cancel)
    }

    fn notify(&self, actions: &[Action]) {
        let callback = self
            .inner
            .on_all_bots_started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(callback) = callback else {
            return;
        };
        for action in actions {
            if let Action::NotifyAllBotsStarted { started } = action {
                callback(*started);
            }
        }
    }

    fn skills_connected_callback(&self, run_id: &str) -> ConnectedCallback {
        let this = self.clone();
        let run_id = run_id.to_string();
        Box::new(move || {
            Box::pin(async move {
                // The root start clears the tracker, which would abort the
                // task this callback runs on
                tokio::spawn(async move {
                    this.on_skills_connected(run_id).await;
                });
            })
        })
    }

    async fn on_skills_connected(&self, run_id: String) {
        let (actions, cancel) = self.dispatch(Event::SkillsConnected { run_id });
        if actions.contains(&Action::StartRootBot) {
            match self.launch_root(&cancel).await {
                Err(e) if e.is_cancelled() => debug!("{}", e),
                Err(e) => warn!("Root bot start after skills connected failed: {}", e),
                Ok(()) => {}
            }
        }
    }

    fn root_config(&self) -> Result<BotBuildConfig> {
        self.inner
            .source
            .build_configs()
            .into_iter()
            .next()
            .ok_or(BotrunError::NoRootBot)
    }

    /// Reset the project's runtime error, then build or start it
    ///
    /// Default-recognizer projects are built (which also starts them);
    /// regex-recognizer projects are started directly.
    #[instrument(skip(self, config), fields(project = %config.project_id, build = config.build_required))]
    pub async fn handle_bot_start(&self, config: &BotBuildConfig) -> Result<()> {
        self.inner
            .dispatcher
            .reset_bot_runtime_error(&config.project_id);

        if config.build_required {
            let request = BuildRequest {
                dialogs: config.dialogs.clone(),
                config: config.configuration.clone(),
            };
            self.inner
                .runtime
                .build_with_default_recognizer(&config.project_id, request)
                .await
        } else {
            self.inner
                .runtime
                .start_bot(&config.project_id, &config.configuration)
                .await
        }
    }

    /// Start one bot; the root id goes through [`Self::start_root_bot`]
    pub async fn start_single_bot(&self, project_id: &str) -> Result<()> {
        let root_id = self
            .inner
            .source
            .root_project_id()
            .ok_or(BotrunError::NoRootBot)?;

        if project_id == root_id {
            return self.start_root_bot().await;
        }

        let config = self
            .inner
            .source
            .build_configs()
            .into_iter()
            .find(|c| c.project_id == project_id);

        match config {
            Some(config) => self.handle_bot_start(&config).await,
            None => {
                warn!("No project {} in workspace, nothing to start", project_id);
                Ok(())
            }
        }
    }

    /// Start the root bot unless it is already connected
    pub async fn start_root_bot(&self) -> Result<()> {
        self.root_config()?;
        let (_, cancel) = self.dispatch(Event::RootStartRequested);
        self.launch_root(&cancel).await
    }

    /// Start the root unless `cancel` fires first
    ///
    /// A cancelled start leaves the state to the stop that cancelled it.
    async fn launch_root(&self, cancel: &CancellationToken) -> Result<()> {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(BotrunError::Cancelled(
                    "root bot start stopped".to_string(),
                ))
            }
            result = self.start_root_if_needed() => result,
        };
        match &result {
            Ok(()) => {
                self.dispatch(Event::RootStartIssued);
            }
            Err(e) => {
                self.dispatch(Event::RootStartFailed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn start_root_if_needed(&self) -> Result<()> {
        self.inner
            .dispatcher
            .update_settings_for_skills_without_manifest()
            .await?;

        // Read after the settings update so the root sees its skill endpoints
        let root = self.root_config()?;
        if root.status.is_connected() {
            debug!("Root bot {} already connected", root.project_id);
            return Ok(());
        }
        self.handle_bot_start(&root).await
    }

    /// Start every skill one at a time, then the root once they all connect
    ///
    /// Returns after the last skill call; the root bot is started by the
    /// status tracker. Returns [`BotrunError::Cancelled`] when
    /// [`Self::stop_all_bots`] interrupts the loop.
    pub async fn start_all_bots(&self) -> Result<()> {
        let configs = self.inner.source.build_configs();
        let Some((_root, skills)) = configs.split_first() else {
            return Err(BotrunError::NoRootBot);
        };

        let run_id = uuid::Uuid::new_v4().to_string();
        let (actions, cancel) = self.dispatch(Event::StartAllRequested {
            run_id: run_id.clone(),
            skills: skills.iter().map(|s| s.project_id.clone()).collect(),
        });
        if !actions
            .iter()
            .any(|a| matches!(a, Action::StartSkills { .. }))
        {
            info!("A start of all bots is already in progress");
            return Ok(());
        }

        for skill in skills {
            if skill.status.is_connected() {
                debug!("Skill {} already connected", skill.project_id);
                continue;
            }
            if cancel.is_cancelled() {
                return Err(cancelled(&skill.project_id));
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled(&skill.project_id)),
                result = self.handle_bot_start(skill) => result,
            };

            if let Err(e) = result {
                self.dispatch(Event::SkillStartFailed {
                    project_id: skill.project_id.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        }

        let (actions, cancel) = self.dispatch(Event::SkillCallsIssued { run_id });
        self.notify(&actions);
        if actions.contains(&Action::StartRootBot) {
            self.launch_root(&cancel).await?;
        }
        Ok(())
    }

    /// Stop every bot, root included, and cancel an in-flight start
    pub async fn stop_all_bots(&self) {
        let (actions, _) = self.dispatch(Event::StopRequested);
        if actions.contains(&Action::StopAllBots) {
            for config in self.inner.source.build_configs() {
                let name = format!("stop {}", config.project_id);
                fail_open(&name, || self.inner.runtime.stop_bot(&config.project_id)).await;
            }
        }
        self.notify(&actions);
    }

    /// Stop one bot; the tracked set is left alone
    pub async fn stop_single_bot(&self, project_id: &str) -> Result<()> {
        self.inner.runtime.stop_bot(project_id).await
    }
}

fn cancelled(project_id: &str) -> BotrunError {
    BotrunError::Cancelled(format!("start of all bots stopped before {}", project_id))
}
