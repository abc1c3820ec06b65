//! # Simulated arm
//!
//! An in-process [`ArmLink`] which behaves like an arm: each move is answered with a busy status,
//! then after the move duration an acknowledgement and a ready status. Used for dry runs and for
//! testing the engine without hardware.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use comms_if::eqpt::arm::{Arm, ArmFrame, Axis, CmdKind};
use log::{debug, trace};

use crate::dispatcher::{ArmLink, LinkError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A simulated arm.
pub struct SimArm {
    arm: Arm,
    move_duration: Duration,
    behaviour: SimBehaviour,

    /// Frames waiting to be returned by `poll`, sorted by the instant they are due.
    outbox: Vec<(Instant, Vec<u8>)>,

    sent: Arc<Mutex<Vec<ArmFrame>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How the simulated arm answers moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBehaviour {
    /// Busy status, acknowledgement then ready status.
    Nominal,

    /// Moves are never answered.
    Silent,

    /// Acknowledgements are sent with a broken checksum.
    CorruptAcks,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimArm {
    pub fn new(arm: Arm, move_duration: Duration) -> Self {
        Self::with_behaviour(arm, move_duration, SimBehaviour::Nominal)
    }

    pub fn with_behaviour(arm: Arm, move_duration: Duration, behaviour: SimBehaviour) -> Self {
        Self {
            arm,
            move_duration,
            behaviour,
            outbox: Vec::new(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared record of every frame sent to this arm, in order.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<ArmFrame>>> {
        self.sent.clone()
    }

    fn queue(&mut self, due: Instant, frame: ArmFrame) {
        self.queue_bytes(due, frame.encode().into_bytes());
    }

    fn queue_bytes(&mut self, due: Instant, bytes: Vec<u8>) {
        let pos = self
            .outbox
            .iter()
            .position(|(d, _)| *d > due)
            .unwrap_or_else(|| self.outbox.len());
        self.outbox.insert(pos, (due, bytes));
    }

    fn on_move(&mut self, axis: Axis, index: i64) {
        let now = Instant::now();
        let done = now + self.move_duration;

        match self.behaviour {
            SimBehaviour::Nominal => {
                self.queue(now, ArmFrame::status(self.arm, axis, true));
                self.queue(done, ArmFrame::ack(self.arm, axis, index));
                self.queue(done, ArmFrame::status(self.arm, axis, false));
            }
            SimBehaviour::Silent => (),
            SimBehaviour::CorruptAcks => {
                let mut ack = ArmFrame::ack(self.arm, axis, index).encode().into_bytes();
                // Flip a bit of the body so the checksum no longer matches
                ack[2] ^= 0x01;
                self.queue(now, ArmFrame::status(self.arm, axis, true));
                self.queue_bytes(done, ack);
            }
        }
    }
}

impl ArmLink for SimArm {
    fn arm(&self) -> Arm {
        self.arm
    }

    fn send(&mut self, frame: &ArmFrame) -> Result<(), LinkError> {
        if frame.arm != self.arm {
            return Err(LinkError::Send(
                self.arm,
                format!("frame {} is addressed to the {} arm", frame, frame.arm),
            ));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(frame.clone());
        }

        match (frame.kind, frame.params.as_slice()) {
            (CmdKind::Move, [code, index, _, _]) => match Axis::from_code(*code) {
                Some(axis) => self.on_move(axis, *index),
                None => debug!("Simulated {} arm ignoring {}", self.arm, frame),
            },
            (CmdKind::Zero, [code]) => {
                if let Some(axis) = Axis::from_code(*code) {
                    self.queue(Instant::now(), ArmFrame::status(self.arm, axis, false));
                }
            }
            _ => debug!("Simulated {} arm ignoring {}", self.arm, frame),
        }

        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let now = Instant::now();

        let due = match self.outbox.first() {
            Some((due, _)) => *due,
            None => {
                thread::sleep(timeout);
                return Ok(None);
            }
        };

        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }

        trace!("Simulated {} arm replying", self.arm);
        Ok(Some(self.outbox.remove(0).1))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn drain(sim: &mut SimArm) -> Vec<ArmFrame> {
        let mut frames = Vec::new();
        while let Some(b) = sim.poll(Duration::from_millis(50)).unwrap() {
            frames.push(ArmFrame::decode(&b).unwrap());
        }
        frames
    }

    #[test]
    fn test_move_is_answered() {
        let mut sim = SimArm::new(Arm::Right, Duration::from_millis(5));
        sim.send(&ArmFrame::move_axis(Arm::Right, Axis::Z, 2, 40, 100))
            .unwrap();

        assert_eq!(
            drain(&mut sim),
            vec![
                ArmFrame::status(Arm::Right, Axis::Z, true),
                ArmFrame::ack(Arm::Right, Axis::Z, 2),
                ArmFrame::status(Arm::Right, Axis::Z, false),
            ]
        );
        assert_eq!(sim.sent_log().lock().unwrap().len(), 1);
    }

    #[test]
    fn test_frames_for_other_arm_are_refused() {
        let mut sim = SimArm::new(Arm::Left, Duration::from_millis(5));
        assert!(sim
            .send(&ArmFrame::zero_axis(Arm::Right, Axis::X))
            .is_err());
    }

    #[test]
    fn test_corrupt_acks() {
        let mut sim =
            SimArm::with_behaviour(Arm::Left, Duration::from_millis(1), SimBehaviour::CorruptAcks);
        sim.send(&ArmFrame::move_axis(Arm::Left, Axis::X, 1, 10, 100))
            .unwrap();

        let busy = sim.poll(Duration::from_millis(50)).unwrap().unwrap();
        assert!(ArmFrame::decode(&busy).is_ok());
        let ack = sim.poll(Duration::from_millis(50)).unwrap().unwrap();
        assert!(ArmFrame::decode(&ack).is_err());
    }
}
