//! Implementations for the RunCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use std::{collections::BTreeMap, sync::Arc};

// Internal
use super::{Action, Input, Params, RunCtrlError, SpeedTable, StepOutcome};
use comms_if::{
    eqpt::arm::Axis,
    tc::Directive,
    tm::{RunState, StatusEvent},
};
use util::script::Script;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Run control state.
#[derive(Debug)]
pub struct RunCtrl {
    params: Params,

    state: RunState,

    /// Index of the step being executed or held.
    cursor: Option<usize>,

    script: Option<Arc<Script>>,

    /// Replacement script waiting for the in-flight step to finish.
    pending_script: Option<Arc<Script>>,

    speeds: SpeedTable,

    /// Speed updates for axes of the in-flight step, applied when it finishes.
    queued_speeds: BTreeMap<Axis, i64>,

    in_flight: Option<InFlight>,

    next_dispatch_id: u64,

    last_error: Option<String>,
}

/// The step currently held by the dispatcher.
#[derive(Debug, Clone)]
struct InFlight {
    id: u64,
    axes: Vec<Axis>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl RunCtrl {
    /// Create a new controller in the `IDLE` state with no script loaded.
    pub fn new(params: Params) -> Self {
        let mut speeds = SpeedTable::default();
        for o in params.initial_speeds.iter() {
            speeds.set(o.axis, params.speed_limits.range(o.axis).clamp(o.value));
        }

        Self {
            params,
            state: RunState::Idle,
            cursor: None,
            script: None,
            pending_script: None,
            speeds,
            queued_speeds: BTreeMap::new(),
            in_flight: None,
            next_dispatch_id: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn speeds(&self) -> &SpeedTable {
        &self.speeds
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_deref()
    }

    pub fn num_steps(&self) -> usize {
        self.script.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    pub fn script_pending(&self) -> bool {
        self.pending_script.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True if a step has been handed to the dispatcher and has not finished yet.
    pub fn step_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Process one input, returning the actions to perform.
    ///
    /// A rejected input leaves the controller unchanged.
    pub fn handle(&mut self, input: Input) -> Result<Vec<Action>, RunCtrlError> {
        match input {
            Input::Directive(d) => self.handle_directive(d),
            Input::LoadScript(s) => Ok(self.load_script(s)),
            Input::StepOutcome { id, outcome } => Ok(self.step_outcome(id, outcome)),
        }
    }

    // ---- DIRECTIVES ----

    fn handle_directive(&mut self, directive: Directive) -> Result<Vec<Action>, RunCtrlError> {
        if self.state == RunState::Error
            && !matches!(directive, Directive::Stop | Directive::Idle)
        {
            return Err(RunCtrlError::Faulted(directive));
        }

        let invalid = |state: RunState| RunCtrlError::InvalidTransition { state, directive };

        match directive {
            Directive::Play => match self.state {
                RunState::Idle => {
                    if self.script.is_none() {
                        return Err(RunCtrlError::NoScriptLoaded);
                    }
                    let mut actions = Vec::new();
                    self.set_state(RunState::Running, Some(0), &mut actions);
                    self.dispatch_cursor(&mut actions);
                    Ok(actions)
                }
                RunState::Running => Ok(Vec::new()),
                RunState::Paused => {
                    let mut actions = Vec::new();
                    self.set_state(RunState::Running, self.cursor, &mut actions);

                    // If the step held at pause is still running its completion continues the run
                    if self.in_flight.is_none() {
                        self.dispatch_cursor(&mut actions);
                    }
                    Ok(actions)
                }
                s => Err(invalid(s)),
            },
            Directive::Pause => match self.state {
                RunState::Running => {
                    let mut actions = Vec::new();
                    self.set_state(RunState::Paused, self.cursor, &mut actions);
                    Ok(actions)
                }
                RunState::Paused => Ok(Vec::new()),
                s => Err(invalid(s)),
            },
            Directive::Stop | Directive::Idle => Ok(self.stop()),
            Directive::Zero => {
                let mut actions = self.stop();
                actions.push(Action::Zero);
                Ok(actions)
            }
            Directive::Speed { axis, value } => Ok(self.set_speed(axis, value)),
        }
    }

    /// Abort the run. Goes straight to `IDLE` unless a step must unwind first.
    fn stop(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();

        self.last_error = None;

        match self.in_flight.as_ref().map(|f| f.id) {
            Some(id) => {
                actions.push(Action::Cancel { id });
                self.set_state(RunState::Stopping, None, &mut actions);
            }
            None => self.set_state(RunState::Idle, None, &mut actions),
        }

        actions
    }

    fn set_speed(&mut self, axis: Option<Axis>, value: i64) -> Vec<Action> {
        let mut actions = Vec::new();

        let axes: Vec<Axis> = match axis {
            Some(a) => vec![a],
            None => Axis::TRANSLATIONAL.to_vec(),
        };

        for axis in axes {
            let speed = self.params.speed_limits.range(axis).clamp(value);
            if speed != value {
                warn!("Speed {} for axis {} clamped to {}", value, axis, speed);
                actions.push(Action::Publish(StatusEvent::Warning(format!(
                    "speed {} for axis {} clamped to {}",
                    value, axis, speed
                ))));
            }

            let busy = self
                .in_flight
                .as_ref()
                .map(|f| f.axes.contains(&axis))
                .unwrap_or(false);

            if busy {
                debug!("Axis {} is moving, speed {} queued", axis, speed);
                self.queued_speeds.insert(axis, speed);
            } else {
                self.apply_speed(axis, speed, &mut actions);
            }
        }

        actions
    }

    fn apply_speed(&mut self, axis: Axis, speed: i64, actions: &mut Vec<Action>) {
        self.speeds.set(axis, speed);
        actions.push(Action::SetSpeed { axis, value: speed });
        actions.push(Action::Publish(StatusEvent::Speed { axis, value: speed }));
    }

    // ---- SCRIPTS ----

    fn load_script(&mut self, script: Script) -> Vec<Action> {
        let mut actions = Vec::new();
        let num_steps = script.len();
        let script = Arc::new(script);

        actions.push(Action::Publish(StatusEvent::ScriptLoaded { num_steps }));

        if self.in_flight.is_some() {
            info!("Script with {} steps staged until the current step finishes", num_steps);
            self.pending_script = Some(script);
            return actions;
        }

        info!("Script with {} steps loaded", num_steps);
        self.script = Some(script);
        self.pending_script = None;

        // A held run restarts at the top of the new script, a fault keeps pointing at the failed
        // step until it is cleared
        let cursor = match self.state {
            RunState::Paused => Some(0),
            RunState::Error => self.cursor,
            _ => None,
        };
        self.set_state(self.state, cursor, &mut actions);

        actions
    }

    // ---- DISPATCH ----

    fn step_outcome(&mut self, id: u64, outcome: StepOutcome) -> Vec<Action> {
        let mut actions = Vec::new();

        match self.in_flight {
            Some(ref f) if f.id == id => (),
            _ => {
                debug!("Ignoring outcome {:?} of stale dispatch {}", outcome, id);
                return actions;
            }
        }
        self.in_flight = None;

        // Step boundary, apply anything that was waiting for it
        for (axis, speed) in std::mem::take(&mut self.queued_speeds) {
            self.apply_speed(axis, speed, &mut actions);
        }
        let swapped = match self.pending_script.take() {
            Some(s) => {
                info!("Staged script with {} steps now active", s.len());
                self.script = Some(s);
                true
            }
            None => false,
        };

        match (self.state, outcome) {
            (RunState::Stopping, _) => self.set_state(RunState::Idle, None, &mut actions),
            (RunState::Running, StepOutcome::Completed)
            | (RunState::Paused, StepOutcome::Completed) => {
                let next = match (swapped, self.cursor) {
                    (true, _) => 0,
                    (false, Some(c)) => c + 1,
                    (false, None) => 0,
                };

                if next >= self.num_steps() {
                    info!("Script complete");
                    self.set_state(RunState::Idle, None, &mut actions);
                } else if self.state == RunState::Running {
                    self.set_state(RunState::Running, Some(next), &mut actions);
                    self.dispatch_cursor(&mut actions);
                } else {
                    self.set_state(RunState::Paused, Some(next), &mut actions);
                }
            }
            (RunState::Running, StepOutcome::Failed(e))
            | (RunState::Paused, StepOutcome::Failed(e)) => self.fault(e, &mut actions),
            (RunState::Running, StepOutcome::Cancelled)
            | (RunState::Paused, StepOutcome::Cancelled) => {
                self.fault("Step dispatch was cancelled unexpectedly".into(), &mut actions)
            }
            (s, o) => debug!("Outcome {:?} ignored in the {} state", o, s),
        }

        actions
    }

    /// Dispatch the step at the cursor.
    fn dispatch_cursor(&mut self, actions: &mut Vec<Action>) {
        let cursor = match self.cursor {
            Some(c) => c,
            None => return,
        };
        let step = match self.script.as_ref().and_then(|s| s.step(cursor)) {
            Some(s) => s.clone(),
            None => {
                self.set_state(RunState::Idle, None, actions);
                return;
            }
        };

        let id = self.next_dispatch_id;
        self.next_dispatch_id += 1;

        self.in_flight = Some(InFlight {
            id,
            axes: step.axes().collect(),
        });

        for w in step.warnings.iter() {
            actions.push(Action::Publish(StatusEvent::Warning(w.to_string())));
        }

        actions.push(Action::Dispatch {
            id,
            cursor,
            step,
            speeds: self.speeds.clone(),
        });
    }

    fn fault(&mut self, error: String, actions: &mut Vec<Action>) {
        warn!("Step {:?} failed: {}", self.cursor, error);
        self.last_error = Some(error.clone());
        self.set_state(RunState::Error, self.cursor, actions);
        actions.push(Action::Publish(StatusEvent::Fault(error)));
    }

    fn set_state(&mut self, state: RunState, cursor: Option<usize>, actions: &mut Vec<Action>) {
        if state != self.state {
            info!("RunCtrl {} -> {}", self.state, state);
        }
        self.state = state;
        self.cursor = cursor;
        actions.push(Action::Publish(StatusEvent::State { state, cursor }));
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use util::script::parse;

    fn ctrl_with(text: &str) -> RunCtrl {
        let mut ctrl = RunCtrl::new(Params::default());
        ctrl.handle(Input::LoadScript(parse(text).unwrap())).unwrap();
        ctrl
    }

    fn dispatched(actions: &[Action]) -> Vec<(u64, usize)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Dispatch { id, cursor, .. } => Some((*id, *cursor)),
                _ => None,
            })
            .collect()
    }

    fn complete(ctrl: &mut RunCtrl, id: u64) -> Vec<Action> {
        ctrl.handle(Input::StepOutcome {
            id,
            outcome: StepOutcome::Completed,
        })
        .unwrap()
    }

    #[test]
    fn test_play_without_script() {
        let mut ctrl = RunCtrl::new(Params::default());
        assert_eq!(
            ctrl.handle(Input::Directive(Directive::Play)),
            Err(RunCtrlError::NoScriptLoaded)
        );
        assert_eq!(ctrl.state(), RunState::Idle);
    }

    #[test]
    fn test_steps_run_in_order_then_idle() {
        let mut ctrl = ctrl_with("X(1,1,100) NEXT X(2,2,100) NEXT X(3,3,100)");

        let a = ctrl.handle(Input::Directive(Directive::Play)).unwrap();
        assert_eq!(dispatched(&a), vec![(0, 0)]);
        assert_eq!(ctrl.state(), RunState::Running);

        assert_eq!(dispatched(&complete(&mut ctrl, 0)), vec![(1, 1)]);
        assert_eq!(dispatched(&complete(&mut ctrl, 1)), vec![(2, 2)]);
        assert!(dispatched(&complete(&mut ctrl, 2)).is_empty());

        assert_eq!(ctrl.state(), RunState::Idle);
        assert_eq!(ctrl.cursor(), None);
    }

    #[test]
    fn test_pause_holds_after_in_flight_step() {
        let mut ctrl = ctrl_with("X(1,1,100) NEXT X(2,2,100)");
        ctrl.handle(Input::Directive(Directive::Play)).unwrap();

        ctrl.handle(Input::Directive(Directive::Pause)).unwrap();
        assert_eq!(ctrl.state(), RunState::Paused);

        // The in-flight step completes but the next one is not started
        assert!(dispatched(&complete(&mut ctrl, 0)).is_empty());
        assert_eq!(ctrl.state(), RunState::Paused);
        assert_eq!(ctrl.cursor(), Some(1));

        // Resume at the held cursor
        let a = ctrl.handle(Input::Directive(Directive::Play)).unwrap();
        assert_eq!(dispatched(&a), vec![(1, 1)]);

        let a = ctrl.handle(Input::Directive(Directive::Stop)).unwrap();
        assert!(a.contains(&Action::Cancel { id: 1 }));
        assert_eq!(ctrl.state(), RunState::Stopping);
        assert_eq!(ctrl.cursor(), None);

        ctrl.handle(Input::StepOutcome {
            id: 1,
            outcome: StepOutcome::Cancelled,
        })
        .unwrap();
        assert_eq!(ctrl.state(), RunState::Idle);
    }

    #[test]
    fn test_resume_while_step_still_in_flight() {
        let mut ctrl = ctrl_with("X(1,1,100) NEXT X(2,2,100)");
        ctrl.handle(Input::Directive(Directive::Play)).unwrap();
        ctrl.handle(Input::Directive(Directive::Pause)).unwrap();

        // Nothing new is dispatched, the in-flight step's completion continues the run
        let a = ctrl.handle(Input::Directive(Directive::Play)).unwrap();
        assert!(dispatched(&a).is_empty());
        assert_eq!(dispatched(&complete(&mut ctrl, 0)), vec![(1, 1)]);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut ctrl = ctrl_with("X(1,1,100)");

        assert!(matches!(
            ctrl.handle(Input::Directive(Directive::Pause)),
            Err(RunCtrlError::InvalidTransition { .. })
        ));

        // STOP and IDLE are always legal
        ctrl.handle(Input::Directive(Directive::Stop)).unwrap();
        ctrl.handle(Input::Directive(Directive::Idle)).unwrap();
        assert_eq!(ctrl.state(), RunState::Idle);

        // PLAY is rejected while a cancelled step unwinds
        ctrl.handle(Input::Directive(Directive::Play)).unwrap();
        ctrl.handle(Input::Directive(Directive::Stop)).unwrap();
        assert!(matches!(
            ctrl.handle(Input::Directive(Directive::Play)),
            Err(RunCtrlError::InvalidTransition {
                state: RunState::Stopping,
                ..
            })
        ));
    }

    #[test]
    fn test_error_only_accepts_stop_or_idle() {
        let mut ctrl = ctrl_with("X(1,1,100) NEXT X(2,2,100)");
        ctrl.handle(Input::Directive(Directive::Play)).unwrap();

        ctrl.handle(Input::StepOutcome {
            id: 0,
            outcome: StepOutcome::Failed("timeout".into()),
        })
        .unwrap();
        assert_eq!(ctrl.state(), RunState::Error);
        assert_eq!(ctrl.cursor(), Some(0));
        assert_eq!(ctrl.last_error(), Some("timeout"));

        for d in [
            Directive::Play,
            Directive::Pause,
            Directive::Zero,
            Directive::Speed {
                axis: None,
                value: 100,
            },
        ]
        .iter()
        {
            assert_eq!(
                ctrl.handle(Input::Directive(*d)),
                Err(RunCtrlError::Faulted(*d))
            );
            assert_eq!(ctrl.state(), RunState::Error);
        }

        // A new script does not hide which step failed
        ctrl.handle(Input::LoadScript(parse("Y(1,1,100)").unwrap()))
            .unwrap();
        assert_eq!(ctrl.state(), RunState::Error);
        assert_eq!(ctrl.cursor(), Some(0));
        assert_eq!(ctrl.last_error(), Some("timeout"));
        assert_eq!(ctrl.num_steps(), 1);

        ctrl.handle(Input::Directive(Directive::Stop)).unwrap();
        assert_eq!(ctrl.state(), RunState::Idle);
        assert_eq!(ctrl.cursor(), None);
        assert_eq!(ctrl.last_error(), None);
    }

    #[test]
    fn test_zero_cancels_and_returns_to_reference() {
        let mut ctrl = ctrl_with("X(1,1,100)");

        let a = ctrl.handle(Input::Directive(Directive::Zero)).unwrap();
        assert!(a.contains(&Action::Zero));
        assert_eq!(ctrl.state(), RunState::Idle);

        ctrl.handle(Input::Directive(Directive::Play)).unwrap();
        let a = ctrl.handle(Input::Directive(Directive::Zero)).unwrap();
        assert_eq!(a[0], Action::Cancel { id: 0 });
        assert_eq!(a.last(), Some(&Action::Zero));
        assert_eq!(ctrl.state(), RunState::Stopping);
    }

    #[test]
    fn test_stale_outcomes_are_ignored() {
        let mut ctrl = ctrl_with("X(1,1,100) NEXT X(2,2,100)");
        ctrl.handle(Input::Directive(Directive::Play)).unwrap();

        let a = complete(&mut ctrl, 7);
        assert!(a.is_empty());
        assert_eq!(ctrl.cursor(), Some(0));
    }

    #[test]
    fn test_speed_directives() {
        let mut ctrl = ctrl_with("X(1,1,100),G(1,1,100) NEXT X(2,2,100)");

        ctrl.handle(Input::Directive(Directive::Speed {
            axis: Some(Axis::G),
            value: 2000,
        }))
        .unwrap();
        assert_eq!(ctrl.speeds().get(Axis::G), Some(364));

        ctrl.handle(Input::Directive(Directive::Speed {
            axis: None,
            value: 5,
        }))
        .unwrap();
        for a in Axis::TRANSLATIONAL.iter() {
            assert_eq!(ctrl.speeds().get(*a), Some(10));
        }
        assert_eq!(ctrl.speeds().get(Axis::G), Some(364));
    }

    #[test]
    fn test_speed_mid_step_applies_at_boundary() {
        let mut ctrl = ctrl_with("X(1,1,100),Y(1,1,100) NEXT X(2,2,100),Y(2,2,100)");
        ctrl.handle(Input::Directive(Directive::Play)).unwrap();

        // X is moving, Z is not
        let set = |axis, value| Directive::Speed {
            axis: Some(axis),
            value,
        };
        let queued = ctrl.handle(Input::Directive(set(Axis::X, 500))).unwrap();
        let applied = ctrl.handle(Input::Directive(set(Axis::Z, 600))).unwrap();
        assert_eq!(ctrl.speeds().get(Axis::X), None);
        assert_eq!(ctrl.speeds().get(Axis::Z), Some(600));
        assert!(queued.is_empty());
        assert!(applied.contains(&Action::SetSpeed {
            axis: Axis::Z,
            value: 600
        }));

        let a = complete(&mut ctrl, 0);
        assert_eq!(ctrl.speeds().get(Axis::X), Some(500));

        // The arms learn the new speed before the next step is sent
        let set_pos = a.iter().position(|a| {
            *a == Action::SetSpeed {
                axis: Axis::X,
                value: 500,
            }
        });
        let dispatch_pos = a.iter().position(|a| matches!(a, Action::Dispatch { .. }));
        assert!(set_pos.unwrap() < dispatch_pos.unwrap());
        match a.iter().find(|a| matches!(a, Action::Dispatch { .. })) {
            Some(Action::Dispatch { speeds, cursor, .. }) => {
                assert_eq!(*cursor, 1);
                assert_eq!(speeds.get(Axis::X), Some(500));
            }
            _ => panic!("Expected the second step to be dispatched"),
        }
    }

    #[test]
    fn test_script_swap_at_step_boundary() {
        let mut ctrl = ctrl_with("X(1,1,100) NEXT X(2,2,100) NEXT X(3,3,100)");
        ctrl.handle(Input::Directive(Directive::Play)).unwrap();

        ctrl.handle(Input::LoadScript(parse("Y(1,1,100) NEXT Y(2,2,100)").unwrap()))
            .unwrap();
        assert!(ctrl.script_pending());
        assert_eq!(ctrl.num_steps(), 3);

        // The new script starts from its first step, none of the old steps follow
        let a = complete(&mut ctrl, 0);
        assert!(!ctrl.script_pending());
        assert_eq!(ctrl.num_steps(), 2);
        match a.iter().find(|a| matches!(a, Action::Dispatch { .. })) {
            Some(Action::Dispatch { step, cursor, .. }) => {
                assert_eq!(*cursor, 0);
                assert_eq!(step.moves[0].axis, Axis::Y);
            }
            _ => panic!("Expected the new script to be dispatched"),
        }
    }

    #[test]
    fn test_initial_speeds_are_clamped() {
        let params = Params {
            initial_speeds: vec![super::super::SpeedOverride {
                axis: Axis::G,
                value: 999,
            }],
            ..Default::default()
        };
        let ctrl = RunCtrl::new(params);
        assert_eq!(ctrl.speeds().get(Axis::G), Some(364));
    }
}
