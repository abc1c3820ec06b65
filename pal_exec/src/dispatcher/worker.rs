//! Worker thread which owns the arm links and waits on them, so that the engine never blocks on
//! an arm.

// -----------------------------------------------------------------------------------------------
// INCLUDES
// -----------------------------------------------------------------------------------------------

use std::{
    collections::HashMap,
    sync::{
        atomic::AtomicU64,
        mpsc::{Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::arm::{Arm, ArmFrame, Axis},
    tm::AxisActivity,
};
use log::{debug, trace, warn};
use util::script::Step;

use super::{is_cancelled, AckMode, ArmLink, DispatchReport, Params};
use crate::run_ctrl::{SpeedTable, StepOutcome};

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug)]
pub(super) enum Job {
    /// Dispatch the moves of a step and wait for them
    Step {
        id: u64,
        cursor: usize,
        step: Step,
        speeds: SpeedTable,
    },

    /// Send every axis back to its reference position
    Zero,

    /// Forward a speed override to the arms driving the axis
    SetSpeed { axis: Axis, speed: i64 },

    /// The worker should stop
    Shutdown,
}

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

struct Worker<T> {
    links: Vec<Box<dyn ArmLink>>,
    params: Params,
    cancel_upto: Arc<AtomicU64>,
    reports: Sender<T>,
    activity: HashMap<(Arm, Axis), AxisActivity>,
    abandoned: Vec<AbandonedMove>,
}

/// A move which has been sent and not yet completed.
#[derive(Debug, Clone, Copy)]
struct PendingMove {
    arm: Arm,
    axis: Axis,
    index: i64,
    seen_busy: bool,
}

/// A move that was given up on while the arm may still be executing it. The first completion the
/// arm reports for it before `expires` belongs to the old move, not to a newer one.
#[derive(Debug, Clone, Copy)]
struct AbandonedMove {
    arm: Arm,
    axis: Axis,
    index: i64,
    expires: Instant,
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

pub(super) fn worker_thread<T>(
    links: Vec<Box<dyn ArmLink>>,
    params: Params,
    cancel_upto: Arc<AtomicU64>,
    jobs: Receiver<Job>,
    reports: Sender<T>,
) where
    T: From<DispatchReport>,
{
    let mut worker = Worker {
        links,
        params,
        cancel_upto,
        reports,
        activity: HashMap::new(),
        abandoned: Vec::new(),
    };

    loop {
        match jobs.recv_timeout(worker.params.poll_interval()) {
            Ok(Job::Step {
                id,
                cursor,
                step,
                speeds,
            }) => {
                let outcome = worker.run_step(id, cursor, &step, &speeds);
                debug!("Dispatch {} (step {}) finished: {:?}", id, cursor, outcome);
                worker.report(DispatchReport::Outcome { id, outcome });
            }
            Ok(Job::Zero) => worker.zero(),
            Ok(Job::SetSpeed { axis, speed }) => worker.set_speed(axis, speed),
            Ok(Job::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => worker.pump_idle(),
        }
    }

    debug!("Dispatcher worker exiting");
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl<T> Worker<T>
where
    T: From<DispatchReport>,
{
    fn run_step(
        &mut self,
        id: u64,
        cursor: usize,
        step: &Step,
        speeds: &SpeedTable,
    ) -> StepOutcome {
        if is_cancelled(&self.cancel_upto, id) {
            return StepOutcome::Cancelled;
        }

        let mut pending: Vec<PendingMove> = Vec::new();

        for mv in step.moves.iter() {
            let speed = speeds.effective(mv);

            for &arm in self.params.axis_mapping.arms(mv.axis) {
                let frame = ArmFrame::move_axis(arm, mv.axis, mv.index, mv.position, speed);

                let sent = match self.links.iter_mut().find(|l| l.arm() == arm) {
                    Some(link) => link.send(&frame).map_err(|e| e.to_string()),
                    None => Err(format!("No link to the {} arm", arm)),
                };
                if let Err(e) = sent {
                    self.abandon(&pending);
                    return StepOutcome::Failed(e);
                }

                debug!("Sent {}", frame);
                pending.push(PendingMove {
                    arm,
                    axis: mv.axis,
                    index: mv.index,
                    seen_busy: false,
                });
                self.set_activity(arm, mv.axis, AxisActivity::Busy);
            }
        }

        let deadline = Instant::now() + self.params.ack_timeout();
        let slice = self.poll_slice();

        loop {
            if pending.is_empty() {
                return StepOutcome::Completed;
            }

            if is_cancelled(&self.cancel_upto, id) {
                debug!("Dispatch {} cancelled with {} move(s) pending", id, pending.len());
                self.abandon(&pending);
                return StepOutcome::Cancelled;
            }

            if Instant::now() >= deadline {
                let waiting: Vec<String> = pending
                    .iter()
                    .map(|p| format!("{} {}", p.arm, p.axis))
                    .collect();
                self.abandon(&pending);
                return StepOutcome::Failed(format!(
                    "Step {} timed out after {} ms waiting for {}",
                    cursor,
                    self.params.ack_timeout_ms,
                    waiting.join(", ")
                ));
            }

            for i in 0..self.links.len() {
                let arm = self.links[i].arm();
                let polled = self.links[i].poll(slice);

                let bytes = match polled {
                    Ok(Some(b)) => b,
                    Ok(None) => continue,
                    Err(e) => {
                        self.abandon(&pending);
                        return StepOutcome::Failed(e.to_string());
                    }
                };

                match ArmFrame::decode(&bytes) {
                    Ok(frame) => self.handle_frame(arm, frame, &mut pending),
                    Err(e) => {
                        warn!("Discarding frame from the {} arm: {}", arm, e);
                        self.report(DispatchReport::Warning(format!(
                            "Discarded frame from the {} arm: {}",
                            arm, e
                        )));

                        if pending.iter().any(|p| p.arm == arm) {
                            self.abandon(&pending);
                            return StepOutcome::Failed(format!(
                                "Corrupt frame from the {} arm during step {}: {}",
                                arm, cursor, e
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Send every axis of every arm to its reference position.
    fn zero(&mut self) {
        let mut zeroed = Vec::new();

        for link in self.links.iter_mut() {
            let arm = link.arm();
            for axis in self.params.axis_mapping.axes_of(arm) {
                let frame = ArmFrame::zero_axis(arm, axis);
                match link.send(&frame) {
                    Ok(()) => {
                        debug!("Sent {}", frame);
                        zeroed.push((arm, axis));
                    }
                    Err(e) => {
                        warn!("Could not zero axis {} of the {} arm: {}", axis, arm, e);
                        self.reports
                            .send(T::from(DispatchReport::Warning(e.to_string())))
                            .ok();
                    }
                }
            }
        }

        // Zeroing puts the axes back in a known state
        for (arm, axis) in zeroed {
            self.set_activity(arm, axis, AxisActivity::Idle);
        }
    }

    /// Send a speed override to every arm the axis is mapped to.
    fn set_speed(&mut self, axis: Axis, speed: i64) {
        for &arm in self.params.axis_mapping.arms(axis) {
            let frame = ArmFrame::set_speed(arm, axis, speed);

            let sent = match self.links.iter_mut().find(|l| l.arm() == arm) {
                Some(link) => link.send(&frame).map_err(|e| e.to_string()),
                None => Err(format!("No link to the {} arm", arm)),
            };

            match sent {
                Ok(()) => debug!("Sent {}", frame),
                Err(e) => {
                    warn!("Could not set the speed of axis {} on the {} arm: {}", axis, arm, e);
                    self.report(DispatchReport::Warning(e));
                }
            }
        }
    }

    /// Drain inbound frames between jobs so status changes are still reported.
    fn pump_idle(&mut self) {
        let mut none_pending = Vec::new();

        for i in 0..self.links.len() {
            let arm = self.links[i].arm();

            loop {
                let bytes = match self.links[i].poll(Duration::from_millis(0)) {
                    Ok(Some(b)) => b,
                    Ok(None) => break,
                    Err(e) => {
                        trace!("Idle poll of the {} arm failed: {}", arm, e);
                        break;
                    }
                };

                match ArmFrame::decode(&bytes) {
                    Ok(frame) => self.handle_frame(arm, frame, &mut none_pending),
                    Err(e) => {
                        warn!("Discarding frame from the {} arm: {}", arm, e);
                        self.report(DispatchReport::Warning(format!(
                            "Discarded frame from the {} arm: {}",
                            arm, e
                        )));
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, arm: Arm, frame: ArmFrame, pending: &mut Vec<PendingMove>) {
        debug!("Received {}", frame);

        if frame.arm != arm {
            warn!("Frame {} arrived on the link to the {} arm, ignored", frame, arm);
            return;
        }

        if let Some((axis, index)) = frame.as_ack() {
            if self.params.ack_mode == AckMode::Frame
                && self.take_abandoned(arm, axis, Some(index))
            {
                debug!("Ack {} belongs to an abandoned move, ignored", frame);
                self.settle_abandoned(arm, axis, pending);
                return;
            }

            self.set_activity(arm, axis, AxisActivity::Idle);

            if self.params.ack_mode == AckMode::Frame {
                match pending
                    .iter()
                    .position(|p| p.arm == arm && p.axis == axis && p.index == index)
                {
                    Some(pos) => {
                        pending.remove(pos);
                    }
                    None => debug!("Unexpected ack {} from the {} arm", frame, arm),
                }
            }
        } else if let Some((axis, busy)) = frame.as_status() {
            if !busy
                && self.params.ack_mode == AckMode::StatusEdge
                && self.take_abandoned(arm, axis, None)
            {
                debug!("Ready {} belongs to an abandoned move, ignored", frame);
                self.settle_abandoned(arm, axis, pending);
                return;
            }

            let activity = match busy {
                true => AxisActivity::Busy,
                false => AxisActivity::Idle,
            };
            self.set_activity(arm, axis, activity);

            if self.params.ack_mode == AckMode::StatusEdge {
                if let Some(pos) = pending.iter().position(|p| p.arm == arm && p.axis == axis) {
                    if busy {
                        pending[pos].seen_busy = true;
                    } else if pending[pos].seen_busy {
                        pending.remove(pos);
                    }
                }
            }
        } else {
            debug!("Ignoring {} from the {} arm", frame, arm);
        }
    }

    /// Mark the axes of moves that will no longer be waited on as unknown.
    fn abandon(&mut self, pending: &[PendingMove]) {
        let expires = Instant::now() + self.params.ack_timeout();

        for p in pending.iter() {
            self.set_activity(p.arm, p.axis, AxisActivity::Unknown);
            self.abandoned.push(AbandonedMove {
                arm: p.arm,
                axis: p.axis,
                index: p.index,
                expires,
            });
        }
    }

    /// Remove the oldest live abandoned move matching the completion, if there is one. `index` is
    /// `None` for completions that carry no index.
    fn take_abandoned(&mut self, arm: Arm, axis: Axis, index: Option<i64>) -> bool {
        let now = Instant::now();
        self.abandoned.retain(|a| a.expires > now);

        match self.abandoned.iter().position(|a| {
            a.arm == arm && a.axis == axis && index.map(|i| i == a.index).unwrap_or(true)
        }) {
            Some(pos) => {
                self.abandoned.remove(pos);
                true
            }
            None => false,
        }
    }

    /// The abandoned move has finished, the axis is idle unless a newer move is running on it.
    fn settle_abandoned(&mut self, arm: Arm, axis: Axis, pending: &[PendingMove]) {
        if !pending.iter().any(|p| p.arm == arm && p.axis == axis) {
            self.set_activity(arm, axis, AxisActivity::Idle);
        }
    }

    fn set_activity(&mut self, arm: Arm, axis: Axis, activity: AxisActivity) {
        if self.activity.insert((arm, axis), activity) != Some(activity) {
            self.report(DispatchReport::Axis {
                arm,
                axis,
                activity,
            });
        }
    }

    /// Time given to each link per polling round.
    fn poll_slice(&self) -> Duration {
        let n = self.links.len().max(1) as u32;
        (self.params.poll_interval() / n).max(Duration::from_millis(1))
    }

    fn report(&self, report: DispatchReport) {
        // The owner going away is noticed through the job channel, nothing to do here
        self.reports.send(T::from(report)).ok();
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
