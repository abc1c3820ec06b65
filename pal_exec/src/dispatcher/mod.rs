//! # Arm dispatcher
//!
//! Sends the moves of a step to the arms and waits for every one of them to complete before
//! reporting the step's outcome. The dispatcher runs on its own worker thread, which owns the arm
//! links, so that the engine stays responsive and can cancel a wait at any time.
//!
//! Each dispatch carries an id. Cancelling a dispatch marks every id up to and including it as
//! cancelled, so a cancel can never leak onto a later dispatch.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod params;
mod worker;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{channel, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use comms_if::{
    eqpt::arm::{Arm, ArmFrame, Axis},
    tm::AxisActivity,
};
use log::{info, warn};
use util::script::Step;

use crate::run_ctrl::{SpeedTable, StepOutcome};

pub use params::{AckMode, ArmMapping, AxisMapping, Params};
use worker::{worker_thread, Job};

// -----------------------------------------------------------------------------------------------
// TRAITS
// -----------------------------------------------------------------------------------------------

/// A point-to-point link to one arm.
///
/// Frames sent on a link must arrive in order, and frames received from the arm must be returned
/// by [`ArmLink::poll`] in the order the arm sent them.
pub trait ArmLink: Send {
    /// The arm at the other end of this link.
    fn arm(&self) -> Arm;

    /// Send a frame to the arm.
    fn send(&mut self, frame: &ArmFrame) -> Result<(), LinkError>;

    /// Wait at most `timeout` for one inbound frame, returning its raw bytes.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError>;
}

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

/// Handle to the dispatcher worker.
pub struct Dispatcher {
    job_sender: Sender<Job>,
    cancel_upto: Arc<AtomicU64>,
    worker_jh: Option<JoinHandle<()>>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// Reports sent by the dispatcher to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchReport {
    /// The dispatch with the given id finished.
    Outcome { id: u64, outcome: StepOutcome },

    /// The activity of an axis changed.
    Axis {
        arm: Arm,
        axis: Axis,
        activity: AxisActivity,
    },

    /// Something went wrong that does not by itself fail a step.
    Warning(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Could not send to the {0} arm: {1}")]
    Send(Arm, String),

    #[error("Could not receive from the {0} arm: {1}")]
    Recv(Arm, String),

    #[error("The link to the {0} arm is closed")]
    Closed(Arm),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Axis {0} is routed to the {1} arm but no link to that arm exists")]
    MissingLink(Axis, Arm),

    #[error("More than one link was given for the {0} arm")]
    DuplicateLink(Arm),

    #[error("The dispatcher worker has stopped")]
    WorkerStopped,

    #[error("Could not start the dispatcher worker: {0}")]
    SpawnError(std::io::Error),
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl Dispatcher {
    /// Start the dispatcher worker with the given links.
    ///
    /// Reports are sent on `reports`, converted into the owner's message type.
    pub fn spawn<T>(
        links: Vec<Box<dyn ArmLink>>,
        params: Params,
        reports: Sender<T>,
    ) -> Result<Self, DispatchError>
    where
        T: From<DispatchReport> + Send + 'static,
    {
        for (i, link) in links.iter().enumerate() {
            if links[..i].iter().any(|l| l.arm() == link.arm()) {
                return Err(DispatchError::DuplicateLink(link.arm()));
            }
        }
        for axis in Axis::ALL.iter() {
            for arm in params.axis_mapping.arms(*axis) {
                if !links.iter().any(|l| l.arm() == *arm) {
                    return Err(DispatchError::MissingLink(*axis, *arm));
                }
            }
        }

        let (job_sender, job_receiver) = channel();
        let cancel_upto = Arc::new(AtomicU64::new(0));
        let cancel_clone = cancel_upto.clone();

        info!(
            "Starting dispatcher with {} link(s), ack mode {:?}, timeout {} ms",
            links.len(),
            params.ack_mode,
            params.ack_timeout_ms
        );

        let worker_jh = thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || worker_thread(links, params, cancel_clone, job_receiver, reports))
            .map_err(DispatchError::SpawnError)?;

        Ok(Self {
            job_sender,
            cancel_upto,
            worker_jh: Some(worker_jh),
        })
    }

    /// Dispatch a step. The outcome is reported with the given id.
    pub fn dispatch(
        &self,
        id: u64,
        cursor: usize,
        step: Step,
        speeds: SpeedTable,
    ) -> Result<(), DispatchError> {
        self.send(Job::Step {
            id,
            cursor,
            step,
            speeds,
        })
    }

    /// Abandon the wait of the dispatch with the given id, and of any earlier one.
    pub fn cancel(&self, id: u64) {
        // Ids are offset by one so that zero means nothing is cancelled
        self.cancel_upto.fetch_max(id + 1, Ordering::SeqCst);
    }

    /// Send every axis back to its reference position.
    pub fn zero(&self) -> Result<(), DispatchError> {
        self.send(Job::Zero)
    }

    /// Forward a speed override to the arms. Queued behind any step in flight.
    pub fn set_speed(&self, axis: Axis, speed: i64) -> Result<(), DispatchError> {
        self.send(Job::SetSpeed { axis, speed })
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn send(&self, job: Job) -> Result<(), DispatchError> {
        self.job_sender
            .send(job)
            .map_err(|_| DispatchError::WorkerStopped)
    }

    fn stop_worker(&mut self) {
        if let Some(jh) = self.worker_jh.take() {
            // Cancel whatever is in flight so the worker notices the shutdown promptly
            self.cancel_upto.store(u64::MAX, Ordering::SeqCst);
            self.job_sender.send(Job::Shutdown).ok();
            if jh.join().is_err() {
                warn!("Dispatcher worker panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// True if the dispatch with the given id has been cancelled.
pub(crate) fn is_cancelled(cancel_upto: &AtomicU64, id: u64) -> bool {
    cancel_upto.load(Ordering::SeqCst) > id
}
