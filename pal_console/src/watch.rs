//! # Status watch
//!
//! Prints the executable's status stream. When the stream is lost the subscription is torn down,
//! and after a fixed back-off a new one is made.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{thread, time::Duration};

use color_eyre::{eyre::WrapErr, Result};
use comms_if::{
    net::{zmq, MonitoredSocket, SocketOptions},
    tm::StatusEvent,
};
use log::{info, warn};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Back-off before subscribing again after the stream is lost.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// How long a receive waits before the connection state is checked.
const RECV_TIMEOUT_MS: i32 = 500;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Watch the status stream forever.
pub fn watch(ctx: &zmq::Context, endpoint: &str) -> Result<()> {
    loop {
        let socket = MonitoredSocket::new(
            ctx,
            zmq::SUB,
            SocketOptions {
                linger: 0,
                ..SocketOptions::client(RECV_TIMEOUT_MS)
            },
            endpoint,
        )
        .wrap_err("Failed to subscribe to the status stream")?;

        info!("Subscribed to {}", endpoint);
        follow(&socket);

        warn!(
            "Status stream lost, subscribing again in {} s",
            RECONNECT_INTERVAL.as_secs()
        );
        drop(socket);
        thread::sleep(RECONNECT_INTERVAL);
    }
}

/// Print events until the stream is lost.
fn follow(socket: &MonitoredSocket) {
    let mut was_connected = false;

    loop {
        match socket.recv_string(0) {
            Ok(Ok(s)) => match StatusEvent::from_json(&s) {
                Ok(event) => println!("{}", event),
                Err(e) => warn!("Could not parse status event: {}", e),
            },
            Ok(Err(_)) => warn!("Status event was not valid UTF-8"),
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => {
                warn!("Status stream error: {}", e);
                return;
            }
        }

        let connected = socket.connected();
        if was_connected && !connected {
            return;
        }
        was_connected = connected;
    }
}
