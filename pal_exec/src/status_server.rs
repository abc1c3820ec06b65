//! # Status Server
//!
//! Status events leave the engine through a [`StatusSink`]. The [`StatusServer`] publishes them as
//! JSON on a zmq `PUB` socket, and the [`ChannelSink`] forwards them to an in-process receiver.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::Sender;

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    tm::StatusEvent,
};
use log::warn;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Destination of status events. Publishing never blocks the engine and is never acknowledged.
pub trait StatusSink: Send {
    fn publish(&mut self, event: &StatusEvent);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Status server
pub struct StatusServer {
    socket: MonitoredSocket,
}

/// Sink forwarding events over a channel.
pub struct ChannelSink(pub Sender<StatusEvent>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StatusServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send status: {0}")]
    SendError(zmq::Error),

    #[error("Could not serialize the status: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StatusServer {
    /// Create a new instance of the status server.
    ///
    /// This function will not block until a subscriber connects.
    pub fn new(ctx: &zmq::Context, endpoint: &str) -> Result<Self, StatusServerError> {
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            linger: 1,
            send_timeout: 10,
            ..SocketOptions::server(10)
        };

        let socket = MonitoredSocket::new(ctx, zmq::PUB, socket_options, endpoint)
            .map_err(StatusServerError::SocketError)?;

        Ok(Self { socket })
    }

    pub fn send(&mut self, event: &StatusEvent) -> Result<(), StatusServerError> {
        let event_string = event
            .to_json()
            .map_err(StatusServerError::SerializationError)?;

        self.socket
            .send(&event_string, 0)
            .map_err(StatusServerError::SendError)
    }
}

impl StatusSink for StatusServer {
    fn publish(&mut self, event: &StatusEvent) {
        if let Err(e) = self.send(event) {
            warn!("StatusServer error: {}", e);
        }
    }
}

impl StatusSink for ChannelSink {
    fn publish(&mut self, event: &StatusEvent) {
        // Nobody listening is not an error for a status stream
        self.0.send(event.clone()).ok();
    }
}
