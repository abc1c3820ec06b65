//! # Arm Client
//!
//! Point-to-point link to a physical arm over a zmq `PAIR` socket. Each zmq message carries
//! exactly one encoded frame.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use comms_if::{
    eqpt::arm::{Arm, ArmFrame},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::trace;

use crate::dispatcher::{ArmLink, LinkError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Client end of an arm link
pub struct ArmClient {
    arm: Arm,
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArmClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ArmClient {
    /// Create a new client for the given arm.
    ///
    /// This function will not block until the arm connects.
    pub fn new(ctx: &zmq::Context, arm: Arm, endpoint: &str) -> Result<Self, ArmClientError> {
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            linger: 1,
            send_timeout: 100,
            ..SocketOptions::client(0)
        };

        let socket = MonitoredSocket::new(ctx, zmq::PAIR, socket_options, endpoint)
            .map_err(ArmClientError::SocketError)?;

        Ok(Self { arm, socket })
    }
}

impl ArmLink for ArmClient {
    fn arm(&self) -> Arm {
        self.arm
    }

    fn send(&mut self, frame: &ArmFrame) -> Result<(), LinkError> {
        if !self.socket.connected() {
            return Err(LinkError::Closed(self.arm));
        }

        self.socket
            .send(frame.encode().as_bytes(), 0)
            .map_err(|e| LinkError::Send(self.arm, e.to_string()))
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let ready = self
            .socket
            .poll(zmq::POLLIN, timeout.as_millis() as i64)
            .map_err(|e| LinkError::Recv(self.arm, e.to_string()))?;

        if ready == 0 {
            return Ok(None);
        }

        match self.socket.recv_bytes(zmq::DONTWAIT) {
            Ok(b) => {
                trace!("{} bytes from the {} arm", b.len(), self.arm);
                Ok(Some(b))
            }
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(LinkError::Recv(self.arm, e.to_string())),
        }
    }
}
