//! Pure state machine for the start/stop lifecycle
//!
//! This module implements a pure functional state machine with NO I/O.
//! All state transitions are deterministic and testable.
//!
//! Key design principles:
//! - Pure function: transition(state, event) -> (state, actions)
//! - No async, no I/O, no dependencies on the runtime crates
//! - Events that do not apply to the current state are ignored: the state is
//!   kept and the only action is a log line (never panic)
//! - Every start-all run carries a run id so that late events from an
//!   earlier run cannot drive the current one

/// Lifecycle state of a workspace start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Nothing in progress
    Idle,
    /// Skill build/start calls are being issued one by one
    StartingSkills {
        run_id: String,
        tracked: Vec<String>,
    },
    /// All skill calls issued, waiting for every skill to connect
    AwaitingSkills {
        run_id: String,
        tracked: Vec<String>,
    },
    /// Root bot build/start in progress
    StartingRoot,
    /// Root bot build/start issued successfully
    Done { summary: String },
    /// A build/start failed
    Failed { error: String },
}

impl State {
    /// Whether a start-all run is between its first skill call and the
    /// root bot start
    pub fn is_starting(&self) -> bool {
        matches!(
            self,
            Self::StartingSkills { .. } | Self::AwaitingSkills { .. } | Self::StartingRoot
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::StartingSkills { .. } => "starting_skills",
            Self::AwaitingSkills { .. } => "awaiting_skills",
            Self::StartingRoot => "starting_root",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Start every bot: skills first, root once they connect
    StartAllRequested { run_id: String, skills: Vec<String> },
    /// The serial skill loop issued its last call
    SkillCallsIssued { run_id: String },
    /// Every tracked skill reported connected
    SkillsConnected { run_id: String },
    /// Root bot start requested directly
    RootStartRequested,
    /// Root bot build/start call completed
    RootStartIssued,
    /// Root bot settings update or build/start failed
    RootStartFailed { message: String },
    /// A skill build/start failed
    SkillStartFailed { project_id: String, message: String },
    /// Stop every bot
    StopRequested,
}

/// Actions to execute as side effects of transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Watch these skills and report when all are connected
    TrackProjects {
        run_id: String,
        project_ids: Vec<String>,
    },
    /// Drop the tracked set and its watch
    ClearTrackedProjects,
    /// Issue the serial skill build/start calls
    StartSkills { project_ids: Vec<String> },
    /// Normalize settings and build/start the root bot
    StartRootBot,
    /// Abort an in-flight skill loop or root start
    CancelInFlight,
    /// Stop every bot in the workspace
    StopAllBots,
    /// Tell the caller whether all bots were started (true) or stopped (false)
    NotifyAllBotsStarted { started: bool },
    /// Log activity
    LogActivity { message: String },
}

fn ignored(state: State, event: &Event) -> (State, Vec<Action>) {
    let message = format!("Ignoring {:?} in state {}", event, state.name());
    (state, vec![Action::LogActivity { message }])
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and actions to execute.
/// This function is completely deterministic and has no side effects.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        // A start-all run is already going; at most one may be in flight
        (state, event @ Event::StartAllRequested { .. }) if state.is_starting() => {
            ignored(state, &event)
        }

        (_, Event::StartAllRequested { run_id, skills }) => {
            let mut actions = vec![Action::LogActivity {
                message: format!("Starting all bots: {} skill(s) first", skills.len()),
            }];
            if !skills.is_empty() {
                actions.push(Action::TrackProjects {
                    run_id: run_id.clone(),
                    project_ids: skills.clone(),
                });
            }
            actions.push(Action::StartSkills {
                project_ids: skills.clone(),
            });
            (
                State::StartingSkills {
                    run_id,
                    tracked: skills,
                },
                actions,
            )
        }

        // Skill loop finished
        (State::StartingSkills { run_id, tracked }, Event::SkillCallsIssued { run_id: done })
            if run_id == done =>
        {
            if tracked.is_empty() {
                // Nothing to wait for
                let actions = vec![
                    Action::LogActivity {
                        message: "No skills to wait for, starting root bot".to_string(),
                    },
                    Action::NotifyAllBotsStarted { started: true },
                    Action::ClearTrackedProjects,
                    Action::StartRootBot,
                ];
                (State::StartingRoot, actions)
            } else {
                let actions = vec![
                    Action::LogActivity {
                        message: format!("Waiting for {} skill(s) to connect", tracked.len()),
                    },
                    Action::NotifyAllBotsStarted { started: true },
                ];
                (State::AwaitingSkills { run_id, tracked }, actions)
            }
        }

        // Skills connected before the loop returned; the root is already on
        // its way but the caller still hears that all calls went out
        (
            state @ (State::StartingRoot | State::Done { .. } | State::Failed { .. }),
            Event::SkillCallsIssued { .. },
        ) => (state, vec![Action::NotifyAllBotsStarted { started: true }]),

        // Every tracked skill is connected: phase two
        (
            State::StartingSkills { run_id, tracked } | State::AwaitingSkills { run_id, tracked },
            Event::SkillsConnected { run_id: connected },
        ) if run_id == connected => {
            let actions = vec![
                Action::LogActivity {
                    message: format!("{} skill(s) connected, starting root bot", tracked.len()),
                },
                Action::ClearTrackedProjects,
                Action::StartRootBot,
            ];
            (State::StartingRoot, actions)
        }

        // Direct root start abandons any skill wait
        (_, Event::RootStartRequested) => {
            let actions = vec![
                Action::LogActivity {
                    message: "Starting root bot".to_string(),
                },
                Action::ClearTrackedProjects,
                Action::StartRootBot,
            ];
            (State::StartingRoot, actions)
        }

        (State::StartingRoot, Event::RootStartIssued) => {
            let summary = "Root bot started".to_string();
            let actions = vec![Action::LogActivity {
                message: summary.clone(),
            }];
            (State::Done { summary }, actions)
        }

        (State::StartingRoot, Event::RootStartFailed { message }) => {
            let actions = vec![Action::LogActivity {
                message: format!("Root bot failed: {}", message),
            }];
            (
                State::Failed {
                    error: format!("Root bot failed: {}", message),
                },
                actions,
            )
        }

        (
            State::StartingSkills { .. } | State::AwaitingSkills { .. },
            Event::SkillStartFailed { project_id, message },
        ) => {
            let error = format!("Skill {} failed: {}", project_id, message);
            let actions = vec![
                Action::LogActivity {
                    message: error.clone(),
                },
                Action::ClearTrackedProjects,
            ];
            (State::Failed { error }, actions)
        }

        // Stop is accepted everywhere
        (state, Event::StopRequested) => {
            let mut actions = vec![Action::LogActivity {
                message: format!("Stopping all bots (was {})", state.name()),
            }];
            if state.is_starting() {
                actions.push(Action::CancelInFlight);
            }
            actions.extend([
                Action::ClearTrackedProjects,
                Action::StopAllBots,
                Action::NotifyAllBotsStarted { started: false },
            ]);
            (State::Idle, actions)
        }

        // Stale or out-of-order events
        (state, event) => ignored(state, &event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_all(skills: &[&str]) -> Event {
        Event::StartAllRequested {
            run_id: "run-1".to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn run_event(make: fn(String) -> Event) -> Event {
        make("run-1".to_string())
    }

    #[test]
    fn test_happy_path_full_flow() {
        // Idle -> StartingSkills
        let (state, actions) = transition(State::Idle, start_all(&["skill-a", "skill-b"]));
        assert!(matches!(state, State::StartingSkills { .. }));
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[1], Action::TrackProjects { .. }));
        assert!(matches!(actions[2], Action::StartSkills { .. }));

        // StartingSkills -> AwaitingSkills
        let (state, actions) = transition(
            state,
            run_event(|run_id| Event::SkillCallsIssued { run_id }),
        );
        assert!(matches!(state, State::AwaitingSkills { .. }));
        assert!(actions.contains(&Action::NotifyAllBotsStarted { started: true }));

        // AwaitingSkills -> StartingRoot
        let (state, actions) = transition(
            state,
            run_event(|run_id| Event::SkillsConnected { run_id }),
        );
        assert_eq!(state, State::StartingRoot);
        assert!(actions.contains(&Action::StartRootBot));
        assert!(actions.contains(&Action::ClearTrackedProjects));

        // StartingRoot -> Done
        let (state, _) = transition(state, Event::RootStartIssued);
        assert!(matches!(state, State::Done { .. }));
    }

    #[test]
    fn test_no_skills_starts_root_after_loop() {
        let (state, actions) = transition(State::Idle, start_all(&[]));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::TrackProjects { .. })));

        let (state, actions) = transition(
            state,
            run_event(|run_id| Event::SkillCallsIssued { run_id }),
        );
        assert_eq!(state, State::StartingRoot);
        assert!(actions.contains(&Action::StartRootBot));
        assert!(actions.contains(&Action::NotifyAllBotsStarted { started: true }));
    }

    #[test]
    fn test_skills_connect_before_loop_returns() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));

        let (state, actions) = transition(
            state,
            run_event(|run_id| Event::SkillsConnected { run_id }),
        );
        assert_eq!(state, State::StartingRoot);
        assert!(actions.contains(&Action::StartRootBot));

        // Loop finishing afterwards only notifies
        let (state, actions) = transition(
            state,
            run_event(|run_id| Event::SkillCallsIssued { run_id }),
        );
        assert_eq!(state, State::StartingRoot);
        assert_eq!(actions, vec![Action::NotifyAllBotsStarted { started: true }]);
    }

    #[test]
    fn test_root_starts_once_when_statuses_flicker() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));
        let (state, _) = transition(
            state,
            run_event(|run_id| Event::SkillCallsIssued { run_id }),
        );
        let (state, first) = transition(
            state,
            run_event(|run_id| Event::SkillsConnected { run_id }),
        );
        assert!(first.contains(&Action::StartRootBot));

        let (state, second) = transition(
            state,
            run_event(|run_id| Event::SkillsConnected { run_id }),
        );
        assert_eq!(state, State::StartingRoot);
        assert!(!second.contains(&Action::StartRootBot));
    }

    #[test]
    fn test_stale_run_is_ignored() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));
        let (state, actions) = transition(
            state,
            Event::SkillsConnected {
                run_id: "run-0".to_string(),
            },
        );
        assert!(matches!(state, State::StartingSkills { .. }));
        assert!(matches!(actions[0], Action::LogActivity { .. }));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_second_start_all_is_ignored_while_starting() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));
        let (state, actions) = transition(state, start_all(&["skill-a"]));
        assert!(matches!(state, State::StartingSkills { .. }));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::StartSkills { .. })));
    }

    #[test]
    fn test_start_all_allowed_after_done_and_failed() {
        for state in [
            State::Done {
                summary: "ok".to_string(),
            },
            State::Failed {
                error: "boom".to_string(),
            },
        ] {
            let (state, actions) = transition(state, start_all(&["skill-a"]));
            assert!(matches!(state, State::StartingSkills { .. }));
            assert!(actions
                .iter()
                .any(|a| matches!(a, Action::StartSkills { .. })));
        }
    }

    #[test]
    fn test_skill_failure() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));
        let (state, actions) = transition(
            state,
            Event::SkillStartFailed {
                project_id: "skill-a".to_string(),
                message: "lubuild failed".to_string(),
            },
        );
        if let State::Failed { error } = &state {
            assert!(error.contains("skill-a"));
            assert!(error.contains("lubuild failed"));
        } else {
            panic!("expected Failed, got {:?}", state);
        }
        assert!(actions.contains(&Action::ClearTrackedProjects));
    }

    #[test]
    fn test_root_failure() {
        let (state, actions) = transition(
            State::StartingRoot,
            Event::RootStartFailed {
                message: "port in use".to_string(),
            },
        );
        assert!(matches!(state, State::Failed { .. }));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_direct_root_start_abandons_skill_wait() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));
        let (state, _) = transition(
            state,
            run_event(|run_id| Event::SkillCallsIssued { run_id }),
        );
        let (state, actions) = transition(state, Event::RootStartRequested);
        assert_eq!(state, State::StartingRoot);
        assert!(actions.contains(&Action::ClearTrackedProjects));

        // The old tracker can no longer trigger a second root start
        let (_, actions) = transition(
            state,
            run_event(|run_id| Event::SkillsConnected { run_id }),
        );
        assert!(!actions.contains(&Action::StartRootBot));
    }

    #[test]
    fn test_stop_cancels_only_in_flight_runs() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));
        let (state, actions) = transition(state, Event::StopRequested);
        assert_eq!(state, State::Idle);
        assert!(actions.contains(&Action::CancelInFlight));
        assert!(actions.contains(&Action::StopAllBots));
        assert!(actions.contains(&Action::NotifyAllBotsStarted { started: false }));

        let (_, actions) = transition(
            State::Done {
                summary: "ok".to_string(),
            },
            Event::StopRequested,
        );
        assert!(!actions.contains(&Action::CancelInFlight));
        assert!(actions.contains(&Action::StopAllBots));
    }

    #[test]
    fn test_loop_finishing_after_stop_is_ignored() {
        let (state, _) = transition(State::Idle, start_all(&["skill-a"]));
        let (state, _) = transition(state, Event::StopRequested);
        let (state, actions) = transition(
            state,
            run_event(|run_id| Event::SkillCallsIssued { run_id }),
        );
        assert_eq!(state, State::Idle);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::NotifyAllBotsStarted { .. })));
    }

    #[test]
    fn test_invalid_transitions_never_panic() {
        let (state, _) = transition(State::Idle, Event::RootStartIssued);
        assert_eq!(state, State::Idle);

        let (state, _) = transition(
            State::Idle,
            Event::SkillStartFailed {
                project_id: "x".to_string(),
                message: "y".to_string(),
            },
        );
        assert_eq!(state, State::Idle);

        let (state, _) = transition(
            State::Done {
                summary: "ok".to_string(),
            },
            Event::RootStartFailed {
                message: "late".to_string(),
            },
        );
        assert!(matches!(state, State::Done { .. }));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(State::Idle.name(), "idle");
        assert_eq!(State::StartingRoot.name(), "starting_root");
        assert!(State::StartingRoot.is_starting());
        assert!(!State::Idle.is_starting());
    }
}
