//! # Control Client
//!
//! Sends control requests to the executable's control server and waits for the responses.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    tc::{ControlRequest, ControlResponse},
};
use log::warn;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Control client
pub struct ControlClient {
    ctx: zmq::Context,
    endpoint: String,
    recv_timeout_ms: i32,
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ControlClientError {
    #[error("Socket error: {0}")]
    SocketError(#[from] MonitoredSocketError),

    #[error("Could not send the request: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive the response: {0}")]
    RecvError(zmq::Error),

    #[error("No response within {0} ms, is pal_exec running?")]
    Timeout(i32),

    #[error("Could not serialize the request: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not parse the response: {0}")]
    ResponseParseError(serde_json::Error),

    #[error("The server sent a response which was not valid UTF-8")]
    NonUtf8Response,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlClient {
    /// Create a new client.
    ///
    /// This function will not block until the server is reachable.
    pub fn new(
        ctx: &zmq::Context,
        endpoint: &str,
        recv_timeout_ms: i32,
    ) -> Result<Self, ControlClientError> {
        let socket = Self::connect(ctx, endpoint, recv_timeout_ms)?;

        Ok(Self {
            ctx: ctx.clone(),
            endpoint: endpoint.into(),
            recv_timeout_ms,
            socket,
        })
    }

    /// Send a request and wait for its response.
    ///
    /// If no response arrives the socket is recreated, a `REQ` socket cannot send again until it
    /// has received.
    pub fn request(
        &mut self,
        request: &ControlRequest,
    ) -> Result<ControlResponse, ControlClientError> {
        let request_str = request
            .to_json()
            .map_err(ControlClientError::SerializationError)?;

        self.socket
            .send(&request_str, 0)
            .map_err(ControlClientError::SendError)?;

        let response_str = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => return Err(ControlClientError::NonUtf8Response),
            Err(zmq::Error::EAGAIN) => {
                self.reset();
                return Err(ControlClientError::Timeout(self.recv_timeout_ms));
            }
            Err(e) => return Err(ControlClientError::RecvError(e)),
        };

        ControlResponse::from_json(&response_str).map_err(ControlClientError::ResponseParseError)
    }

    fn reset(&mut self) {
        match Self::connect(&self.ctx, &self.endpoint, self.recv_timeout_ms) {
            Ok(s) => self.socket = s,
            Err(e) => warn!("Could not recreate the control socket: {}", e),
        }
    }

    fn connect(
        ctx: &zmq::Context,
        endpoint: &str,
        recv_timeout_ms: i32,
    ) -> Result<MonitoredSocket, ControlClientError> {
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            linger: 1,
            send_timeout: 100,
            ..SocketOptions::client(recv_timeout_ms)
        };

        Ok(MonitoredSocket::new(
            ctx,
            zmq::REQ,
            socket_options,
            endpoint,
        )?)
    }
}
