//! # Engine
//!
//! The engine thread is the single decision point of the executable. It owns run control, the
//! dispatcher and the status sink, and consumes messages from one channel: operator requests from
//! any number of [`EngineHandle`]s, and reports from the dispatcher worker. Requests are therefore
//! applied strictly in arrival order.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{BTreeMap, VecDeque},
    path::Path,
    sync::mpsc::{channel, Receiver, Sender},
    thread::{self, JoinHandle},
};

use comms_if::{
    eqpt::arm::{Arm, Axis, SpeedLimits},
    tc::{Directive, DirectiveParseError},
    tm::{AxisActivity, AxisStatus, StatusEvent, StatusReport},
};
use log::{debug, error, info, warn};
use serde::Serialize;
use util::{
    script::{self, ParseError, Script, ScriptError},
    session::Session,
};

use crate::{
    dispatcher::{self, ArmLink, DispatchError, DispatchReport, Dispatcher},
    run_ctrl::{self, Action, Input, RunCtrl, RunCtrlError, StepOutcome},
    status_server::StatusSink,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The running engine. Dropping it stops the engine thread.
pub struct Engine {
    handle: EngineHandle,
    engine_jh: Option<JoinHandle<()>>,
}

/// Cloneable handle used to talk to the engine from any thread.
#[derive(Clone)]
pub struct EngineHandle {
    sender: Sender<EngineMsg>,
    speed_limits: SpeedLimits,
}

/// State owned by the engine thread.
struct EngineState {
    run_ctrl: RunCtrl,
    dispatcher: Dispatcher,
    sink: Box<dyn StatusSink>,
    session: Option<Session>,
    axes: BTreeMap<(Arm, Axis), AxisActivity>,
    script_text: Option<String>,
}

/// Archived copy of a loaded script.
#[derive(Serialize)]
struct ScriptArchive {
    num_steps: usize,
    text: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

pub(crate) enum EngineMsg {
    Directive(Directive, Sender<Result<(), RunCtrlError>>),
    LoadScript(Script, String, Sender<Result<(), RunCtrlError>>),
    GetStatus(Sender<StatusReport>),
    GetScript(Sender<Option<String>>),
    Dispatch(DispatchReport),
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Script rejected: {0}")]
    Parse(#[from] ParseError),

    #[error("Script file rejected: {0}")]
    Script(#[from] ScriptError),

    #[error("Invalid directive: {0}")]
    Directive(#[from] DirectiveParseError),

    #[error("Rejected: {0}")]
    Rejected(#[from] RunCtrlError),

    #[error("Could not start the dispatcher: {0}")]
    Dispatcher(#[from] DispatchError),

    #[error("Could not start the engine thread: {0}")]
    SpawnError(std::io::Error),

    #[error("The engine has stopped")]
    Disconnected,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Engine {
    /// Start the engine and its dispatcher.
    ///
    /// If a session is given every loaded script is archived in it.
    pub fn spawn(
        run_ctrl_params: run_ctrl::Params,
        dispatcher_params: dispatcher::Params,
        links: Vec<Box<dyn ArmLink>>,
        sink: Box<dyn StatusSink>,
        session: Option<Session>,
    ) -> Result<Self, EngineError> {
        let (sender, receiver) = channel();

        let mut axes = BTreeMap::new();
        for link in links.iter() {
            for axis in dispatcher_params.axis_mapping.axes_of(link.arm()) {
                axes.insert((link.arm(), axis), AxisActivity::Unknown);
            }
        }

        let speed_limits = run_ctrl_params.speed_limits;
        let dispatcher = Dispatcher::spawn(links, dispatcher_params, sender.clone())?;

        let state = EngineState {
            run_ctrl: RunCtrl::new(run_ctrl_params),
            dispatcher,
            sink,
            session,
            axes,
            script_text: None,
        };

        let engine_jh = thread::Builder::new()
            .name("engine".into())
            .spawn(move || state.run(receiver))
            .map_err(EngineError::SpawnError)?;

        Ok(Self {
            handle: EngineHandle {
                sender,
                speed_limits,
            },
            engine_jh: Some(engine_jh),
        })
    }

    /// Get a handle to the engine.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the engine and wait for its thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(jh) = self.engine_jh.take() {
            self.handle.sender.send(EngineMsg::Shutdown).ok();
            if jh.join().is_err() {
                error!("Engine thread panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EngineHandle {
    /// Apply a directive.
    pub fn directive(&self, directive: Directive) -> Result<(), EngineError> {
        let (tx, rx) = channel();
        self.send(EngineMsg::Directive(directive, tx))?;
        rx.recv().map_err(|_| EngineError::Disconnected)??;
        Ok(())
    }

    /// Parse and apply a directive given as text, such as `SPEED;G;200`.
    pub fn directive_str(&self, text: &str) -> Result<(), EngineError> {
        self.directive(Directive::parse(text)?)
    }

    /// Parse a script and load it, returning the number of steps.
    ///
    /// A script which does not parse is rejected and whatever was loaded before stays in place.
    pub fn load_script(&self, text: &str) -> Result<usize, EngineError> {
        let script = script::parse_with_limits(text, &self.speed_limits)?;
        self.load_parsed(script, text.to_string())
    }

    /// Read, parse and load a script file, returning the number of steps.
    pub fn load_script_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, EngineError> {
        let (text, script) = script::load(path, &self.speed_limits)?;
        self.load_parsed(script, text)
    }

    fn load_parsed(&self, script: Script, text: String) -> Result<usize, EngineError> {
        let num_steps = script.len();

        let (tx, rx) = channel();
        self.send(EngineMsg::LoadScript(script, text, tx))?;
        rx.recv().map_err(|_| EngineError::Disconnected)??;

        Ok(num_steps)
    }

    /// Take a snapshot of the engine's status.
    pub fn status(&self) -> Result<StatusReport, EngineError> {
        let (tx, rx) = channel();
        self.send(EngineMsg::GetStatus(tx))?;
        rx.recv().map_err(|_| EngineError::Disconnected)
    }

    /// The text of the most recently loaded script.
    pub fn script_text(&self) -> Result<Option<String>, EngineError> {
        let (tx, rx) = channel();
        self.send(EngineMsg::GetScript(tx))?;
        rx.recv().map_err(|_| EngineError::Disconnected)
    }

    fn send(&self, msg: EngineMsg) -> Result<(), EngineError> {
        self.sender.send(msg).map_err(|_| EngineError::Disconnected)
    }
}

impl From<DispatchReport> for EngineMsg {
    fn from(report: DispatchReport) -> Self {
        EngineMsg::Dispatch(report)
    }
}

impl EngineState {
    fn run(mut self, receiver: Receiver<EngineMsg>) {
        info!("Engine started");
        self.sink.publish(&StatusEvent::State {
            state: self.run_ctrl.state(),
            cursor: self.run_ctrl.cursor(),
        });

        while let Ok(msg) = receiver.recv() {
            match msg {
                EngineMsg::Directive(directive, reply) => {
                    let result = self.process(Input::Directive(directive));
                    if let Err(ref e) = result {
                        warn!("Directive {} rejected: {}", directive, e);
                    }
                    reply.send(result).ok();
                }
                EngineMsg::LoadScript(script, text, reply) => {
                    let num_steps = script.len();
                    let result = self.process(Input::LoadScript(script));
                    if result.is_ok() {
                        info!("Loaded script with {} step(s)", num_steps);
                        if let Some(ref session) = self.session {
                            session.save_with_timestamp(
                                "scripts/script.json",
                                ScriptArchive {
                                    num_steps,
                                    text: text.clone(),
                                },
                            );
                        }
                        self.script_text = Some(text);
                    }
                    reply.send(result).ok();
                }
                EngineMsg::GetStatus(reply) => {
                    reply.send(self.status_report()).ok();
                }
                EngineMsg::GetScript(reply) => {
                    reply.send(self.script_text.clone()).ok();
                }
                EngineMsg::Dispatch(DispatchReport::Outcome { id, outcome }) => {
                    if let Err(e) = self.process(Input::StepOutcome { id, outcome }) {
                        error!("Step outcome could not be applied: {}", e);
                    }
                }
                EngineMsg::Dispatch(DispatchReport::Axis {
                    arm,
                    axis,
                    activity,
                }) => {
                    self.axes.insert((arm, axis), activity);
                    self.sink.publish(&StatusEvent::Axis {
                        arm,
                        axis,
                        activity,
                    });
                }
                EngineMsg::Dispatch(DispatchReport::Warning(w)) => {
                    self.sink.publish(&StatusEvent::Warning(w));
                }
                EngineMsg::Shutdown => break,
            }
        }

        self.dispatcher.shutdown();
        info!("Engine stopped");
    }

    /// Feed an input to run control and carry out the resulting actions.
    ///
    /// Only the result for the first input is returned, follow-up inputs generated while carrying
    /// out actions are logged if they fail.
    fn process(&mut self, input: Input) -> Result<(), RunCtrlError> {
        let mut pending = VecDeque::new();
        for action in self.run_ctrl.handle(input)? {
            self.perform(action, &mut pending);
        }

        while let Some(input) = pending.pop_front() {
            match self.run_ctrl.handle(input) {
                Ok(actions) => {
                    for action in actions {
                        self.perform(action, &mut pending);
                    }
                }
                Err(e) => error!("Follow-up input rejected: {}", e),
            }
        }

        Ok(())
    }

    fn perform(&mut self, action: Action, pending: &mut VecDeque<Input>) {
        match action {
            Action::Dispatch {
                id,
                cursor,
                step,
                speeds,
            } => {
                debug!("Dispatching step {} as dispatch {}", cursor, id);
                if let Err(e) = self.dispatcher.dispatch(id, cursor, step, speeds) {
                    error!("Could not dispatch step {}: {}", cursor, e);
                    pending.push_back(Input::StepOutcome {
                        id,
                        outcome: StepOutcome::Failed(e.to_string()),
                    });
                }
            }
            Action::Cancel { id } => self.dispatcher.cancel(id),
            Action::Zero => {
                if let Err(e) = self.dispatcher.zero() {
                    error!("Could not zero the arms: {}", e);
                    self.sink
                        .publish(&StatusEvent::Warning(format!("Zero failed: {}", e)));
                }
            }
            Action::SetSpeed { axis, value } => {
                if let Err(e) = self.dispatcher.set_speed(axis, value) {
                    error!("Could not forward the speed of axis {}: {}", axis, e);
                }
            }
            Action::Publish(event) => self.sink.publish(&event),
        }
    }

    fn status_report(&self) -> StatusReport {
        StatusReport {
            state: self.run_ctrl.state(),
            cursor: self.run_ctrl.cursor(),
            num_steps: self.run_ctrl.num_steps(),
            script_pending: self.run_ctrl.script_pending(),
            speed_overrides: self.run_ctrl.speeds().overrides().clone(),
            axes: self
                .axes
                .iter()
                .map(|(&(arm, axis), &activity)| AxisStatus {
                    arm,
                    axis,
                    activity,
                })
                .collect(),
            last_error: self.run_ctrl.last_error().map(String::from),
        }
    }
}
