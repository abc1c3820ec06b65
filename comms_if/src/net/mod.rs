//! # Network Module
//!
//! Networking abstractions over ZMQ, used for the control socket, the status stream and the arm
//! links.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use zmq::{Context, Socket, SocketEvent, SocketType};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How often the monitor thread checks for shutdown, in milliseconds.
const MONITOR_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Used to give each monitor a unique inproc endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A zmq socket whose connection state is tracked by a background monitor thread.
pub struct MonitoredSocket {
    socket: Socket,
    join_handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

/// Options applied to a monitored socket.
///
/// The zmq options correspond to those in the
/// [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt) documentation.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Bind to the endpoint rather than connect. Servers set this to `true`.
    pub bind: bool,

    /// Block in [`MonitoredSocket::new`] until the first connection is made. Servers set this to
    /// `false`.
    pub block_on_first_connect: bool,

    /// `ZMQ_LINGER`
    pub linger: i32,

    /// `ZMQ_RECONNECT_IVL`
    pub reconnect_ivl: i32,

    /// `ZMQ_CONNECT_TIMEOUT`
    pub connect_timeout: i32,

    /// `ZMQ_RCVTIMEO`, `-1` blocks forever
    pub recv_timeout: i32,

    /// `ZMQ_SNDTIMEO`, `-1` blocks forever
    pub send_timeout: i32,

    /// Topic prefix subscribed to when the socket is a `SUB`
    pub subscribe: Option<Vec<u8>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not connect the socket to {0}: {1:?}")]
    CouldNotConnect(String, Option<zmq::Error>),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a new monitored socket.
    ///
    /// ## Arguments
    /// - `ctx`: the zmq context which will be used to create the socket
    /// - `socket_type`: the type of zmq socket to create
    /// - `socket_options`: how to configure the socket
    /// - `endpoint`: a zmq endpoint string, such as `"tcp://localhost:4000"`
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        socket_options: SocketOptions,
        endpoint: &str,
    ) -> Result<Self, MonitoredSocketError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(false));

        let socket = ctx
            .socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // Attach the monitor before connecting so no event is missed
        let monitor_endpoint = format!(
            "inproc://pal_monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );
        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor
            .connect(&monitor_endpoint)
            .map_err(|e| MonitoredSocketError::CouldNotConnect(monitor_endpoint.clone(), Some(e)))?;

        socket_options.set(&socket)?;

        match socket_options.bind {
            false => socket.connect(endpoint),
            true => socket.bind(endpoint),
        }
        .map_err(|e| MonitoredSocketError::CouldNotConnect(endpoint.into(), Some(e)))?;

        if socket_options.block_on_first_connect {
            loop {
                match read_event(&monitor).map_err(MonitoredSocketError::EventReadError)? {
                    SocketEvent::CONNECTED => break,
                    SocketEvent::CONNECT_DELAYED | SocketEvent::CONNECT_RETRIED => continue,
                    _ => return Err(MonitoredSocketError::CouldNotConnect(endpoint.into(), None)),
                }
            }
            connected.store(true, Ordering::Relaxed);
        }

        // The monitor thread must wake periodically to see the shutdown flag
        monitor
            .set_rcvtimeo(MONITOR_POLL_MS)
            .map_err(|e| MonitoredSocketError::SocketOptionError("set_rcvtimeo".into(), e))?;

        let shutdown_clone = shutdown.clone();
        let connected_clone = connected.clone();
        let join_handle = thread::Builder::new()
            .name(format!("monitor {}", endpoint))
            .spawn(move || monitor_socket(monitor, shutdown_clone, connected_clone))
            .ok();

        Ok(Self {
            socket,
            join_handle,
            shutdown,
            connected,
        })
    }

    /// Return if the socket is connected or not.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl std::ops::DerefMut for MonitoredSocket {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}

impl SocketOptions {
    /// Options for a socket which binds and never blocks waiting for a peer.
    pub fn server(recv_timeout: i32) -> Self {
        Self {
            bind: true,
            block_on_first_connect: false,
            recv_timeout,
            ..Default::default()
        }
    }

    /// Options for a socket which connects without waiting for the peer to appear.
    pub fn client(recv_timeout: i32) -> Self {
        Self {
            bind: false,
            block_on_first_connect: false,
            recv_timeout,
            ..Default::default()
        }
    }

    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        set_sockopts!(
            socket,
            (set_linger, self.linger),
            (set_reconnect_ivl, self.reconnect_ivl),
            (set_connect_timeout, self.connect_timeout),
            (set_rcvtimeo, self.recv_timeout),
            (set_sndtimeo, self.send_timeout)
        );

        if let Ok(SocketType::SUB) = socket.get_socket_type() {
            let topic = self.subscribe.as_deref().unwrap_or(b"");
            set_sockopts!(socket, (set_subscribe, topic));
        }

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            bind: false,
            block_on_first_connect: true,
            linger: 0,
            reconnect_ivl: 100,
            connect_timeout: 0,
            recv_timeout: -1,
            send_timeout: 1000,
            subscribe: None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an event from a monitor socket.
///
/// Each event is two messages, the event id and value followed by the peer address.
fn read_event(socket: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = socket.recv_msg(0)?;
    let event = match msg.len() >= 2 {
        true => u16::from_ne_bytes([msg[0], msg[1]]),
        false => return Err(zmq::Error::EINVAL),
    };

    if socket.get_rcvmore()? {
        socket.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

fn monitor_socket(monitor: Socket, shutdown: Arc<AtomicBool>, connected: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Socket monitor stopped: {}", e);
                return;
            }
        };

        match event {
            SocketEvent::CONNECTED | SocketEvent::ACCEPTED => {
                connected.store(true, Ordering::Relaxed)
            }
            SocketEvent::DISCONNECTED => connected.store(false, Ordering::Relaxed),
            _ => (),
        }
    }
}
