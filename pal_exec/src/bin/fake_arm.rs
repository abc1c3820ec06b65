//! # Fake Arm Executable
//!
//! Stands in for the firmware of one arm: binds the arm's endpoint, decodes every frame the
//! engine sends and answers it the way the simulated arm does. Used to exercise the real network
//! path of `pal_exec` without hardware.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use std::time::Duration;
use structopt::StructOpt;

// Internal
use comms_if::{
    eqpt::arm::{Arm, ArmFrame},
    net::{zmq, MonitoredSocket, SocketOptions},
};
use pal_lib::{dispatcher::ArmLink, sim_arm::SimArm};
use util::logger::{logger_init_stdout, LevelFilter};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "fake_arm", about = "Simulated arm firmware for the palletizer")]
struct Opts {
    /// Arm to impersonate, `L` or `R`
    #[structopt(short, long, default_value = "L", parse(try_from_str = parse_arm))]
    arm: Arm,

    /// Endpoint to bind
    #[structopt(short, long, default_value = "tcp://*:5030")]
    endpoint: String,

    /// Time taken by each move, in milliseconds
    #[structopt(short, long, default_value = "500")]
    move_duration_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opts = Opts::from_args();

    logger_init_stdout(LevelFilter::Debug).wrap_err("Failed to initialise logging")?;

    info!("Fake {} arm on {}", opts.arm, opts.endpoint);

    let ctx = zmq::Context::new();
    let socket = MonitoredSocket::new(
        &ctx,
        zmq::PAIR,
        SocketOptions {
            linger: 1,
            ..SocketOptions::server(10)
        },
        &opts.endpoint,
    )
    .wrap_err("Failed to bind the arm socket")?;

    let mut sim = SimArm::new(opts.arm, Duration::from_millis(opts.move_duration_ms));

    loop {
        match socket.recv_bytes(0) {
            Ok(bytes) => match ArmFrame::decode(&bytes) {
                Ok(frame) => {
                    info!("Received {}", frame);
                    if let Err(e) = sim.send(&frame) {
                        warn!("{}", e);
                    }
                }
                Err(e) => warn!("Discarding frame: {}", e),
            },
            Err(zmq::Error::EAGAIN) => (),
            Err(e) => return Err(e).wrap_err("Failed to receive from the engine"),
        }

        while let Some(reply) = sim.poll(Duration::from_millis(0))? {
            socket
                .send(reply, 0)
                .wrap_err("Failed to send a reply to the engine")?;
        }
    }
}

fn parse_arm(s: &str) -> Result<Arm, String> {
    let mut chars = s.chars();
    match (chars.next().and_then(Arm::from_tag), chars.next()) {
        (Some(arm), None) => Ok(arm),
        _ => Err(format!("Unknown arm {:?}, expected L or R", s)),
    }
}
