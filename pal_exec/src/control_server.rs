//! # Control Server
//!
//! Receives control requests from an operator (console or dashboard bridge) on a zmq `REP`
//! socket. Every request received must be answered with exactly one response.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
    tc::{ControlRequest, ControlResponse},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Control server
pub struct ControlServer {
    socket: MonitoredSocket,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ControlServerError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send the response: {0}")]
    SendError(zmq::Error),

    #[error("Could not receive a request: {0}")]
    RecvError(zmq::Error),

    #[error("Could not serialize the response: {0}")]
    SerializationError(serde_json::Error),

    #[error("Could not parse the received request: {0}")]
    RequestParseError(serde_json::Error),

    #[error("The client sent a request which was not valid UTF-8")]
    NonUtf8Request,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlServer {
    /// Create a new instance of the control server.
    ///
    /// `recv_timeout_ms` bounds how long [`ControlServer::receive_request`] waits.
    pub fn new(
        ctx: &zmq::Context,
        endpoint: &str,
        recv_timeout_ms: i32,
    ) -> Result<Self, ControlServerError> {
        let socket_options = SocketOptions {
            connect_timeout: 1000,
            linger: 1,
            send_timeout: 100,
            ..SocketOptions::server(recv_timeout_ms)
        };

        let socket = MonitoredSocket::new(ctx, zmq::REP, socket_options, endpoint)
            .map_err(ControlServerError::SocketError)?;

        Ok(Self { socket })
    }

    /// Receive a single request.
    ///
    /// Returns `Ok(None)` if no request arrived within the receive timeout. After receiving a
    /// valid request the response must be sent with [`ControlServer::send_response`] before
    /// receiving another. If the request cannot be understood the rejection is sent by this
    /// function.
    pub fn receive_request(&self) -> Result<Option<ControlRequest>, ControlServerError> {
        let request_str = match self.socket.recv_string(0) {
            Ok(Ok(s)) => s,
            Ok(Err(_)) => {
                self.send_response(&ControlResponse::Rejected(
                    "Request is not valid UTF-8".into(),
                ))?;
                return Err(ControlServerError::NonUtf8Request);
            }
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(ControlServerError::RecvError(e)),
        };

        match ControlRequest::from_json(&request_str) {
            Ok(r) => Ok(Some(r)),
            Err(e) => {
                self.send_response(&ControlResponse::Rejected(format!(
                    "Could not parse the request: {}",
                    e
                )))?;
                Err(ControlServerError::RequestParseError(e))
            }
        }
    }

    /// Send the response to the last request received.
    pub fn send_response(&self, response: &ControlResponse) -> Result<(), ControlServerError> {
        let response_str = response
            .to_json()
            .map_err(ControlServerError::SerializationError)?;

        self.socket
            .send(&response_str, 0)
            .map_err(ControlServerError::SendError)
    }
}
