//! Main palletizer executable entry point.
//!
//! # Architecture
//!
//! The executable starts the engine, which owns run control and the arm dispatcher, then feeds it
//! from one of two sources:
//!
//!     - Script mode (`pal_exec <script>`): the script is loaded and played once, the executable
//!       exits when the run completes or faults.
//!     - Remote mode (no arguments): control requests are received on the control server until
//!       the executable is killed.
//!
//! In both modes status events are published by the status server.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report, Result,
};
use log::{debug, info, warn};
use std::{env, thread, time::Duration};

// Internal
use comms_if::{
    eqpt::arm::Arm,
    net::zmq,
    tc::Directive,
    tm::RunState,
};
use pal_lib::{
    arm_client::ArmClient,
    control_server::{ControlServer, ControlServerError},
    dispatcher::{self, ArmLink},
    engine::{Engine, EngineHandle},
    params::PalExecParams,
    request_processor, run_ctrl,
    sim_arm::SimArm,
    status_server::StatusServer,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Period at which the engine status is polled in script mode.
const SCRIPT_POLL_PERIOD: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("pal_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Palletizer Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: PalExecParams =
        util::params::load("pal_exec.toml").wrap_err("Could not load exec params")?;
    let run_ctrl_params: run_ctrl::Params =
        util::params::load("run_ctrl.toml").wrap_err("Could not load RunCtrl params")?;
    let dispatcher_params: dispatcher::Params =
        util::params::load("dispatcher.toml").wrap_err("Could not load dispatcher params")?;

    info!("Exec parameters loaded");

    // ---- SELECT SOURCE ----

    let args: Vec<String> = env::args().collect();
    debug!("CLI arguments: {:?}", args);

    let script_path = match args.len() {
        1 => {
            info!("No script provided, remote control via the ControlServer will be used\n");
            None
        }
        2 => Some(args[1].clone()),
        n => {
            return Err(eyre!(
                "Expected either zero or one argument, found {}",
                n - 1
            ))
        }
    };

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let zmq_ctx = zmq::Context::new();

    let links = init_links(&zmq_ctx, &exec_params, &dispatcher_params)?;

    let status_server = StatusServer::new(&zmq_ctx, &exec_params.status_endpoint)
        .wrap_err("Failed to initialise the StatusServer")?;
    info!("StatusServer initialised");

    // ---- INITIALISE ENGINE ----

    let engine = Engine::spawn(
        run_ctrl_params,
        dispatcher_params,
        links,
        Box::new(status_server),
        Some(session.clone()),
    )
    .wrap_err("Failed to start the engine")?;
    info!("Engine initialised\n");

    // ---- RUN ----

    let result = match script_path {
        Some(path) => run_script(&engine.handle(), &path),
        None => {
            let control_server = ControlServer::new(
                &zmq_ctx,
                &exec_params.control_endpoint,
                exec_params.control_recv_timeout_ms,
            )
            .wrap_err("Failed to initialise the ControlServer")?;
            info!("ControlServer initialised, waiting for requests\n");

            serve(&engine.handle(), &control_server)
        }
    };

    // ---- SHUTDOWN ----

    engine.shutdown();
    info!("End of execution");
    session.exit();

    result
}

/// Create the link to each arm, real or simulated.
fn init_links(
    ctx: &zmq::Context,
    exec_params: &PalExecParams,
    dispatcher_params: &dispatcher::Params,
) -> Result<Vec<Box<dyn ArmLink>>> {
    let mut links: Vec<Box<dyn ArmLink>> = Vec::new();

    for &arm in Arm::ALL.iter() {
        if exec_params.simulate {
            if !dispatcher_params.axis_mapping.axes_of(arm).is_empty() {
                links.push(Box::new(SimArm::new(
                    arm,
                    util::time::millis(exec_params.sim_move_duration_ms),
                )));
                info!("Simulated {} arm initialised", arm);
            }
            continue;
        }

        let endpoint = match arm {
            Arm::Left => &exec_params.left_arm_endpoint,
            Arm::Right => &exec_params.right_arm_endpoint,
        };

        if let Some(endpoint) = endpoint {
            let client = ArmClient::new(ctx, arm, endpoint)
                .wrap_err_with(|| format!("Failed to initialise the {} ArmClient", arm))?;
            links.push(Box::new(client));
            info!("{} ArmClient initialised on {}", arm, endpoint);
        }
    }

    Ok(links)
}

/// Load the script, play it once and wait for the run to end.
fn run_script(engine: &EngineHandle, path: &str) -> Result<()> {
    info!("Loading script from \"{}\"", path);

    let num_steps = engine
        .load_script_file(path)
        .wrap_err("Failed to load the script")?;
    info!("Loaded script contains {} step(s)\n", num_steps);

    engine
        .directive(Directive::Play)
        .wrap_err("Failed to start the script")?;

    loop {
        thread::sleep(SCRIPT_POLL_PERIOD);

        let status = engine.status().wrap_err("Lost contact with the engine")?;
        match status.state {
            RunState::Idle => {
                info!("End of script reached");
                return Ok(());
            }
            RunState::Error => {
                return Err(eyre!(
                    "Script execution failed: {}",
                    status.last_error.unwrap_or_else(|| "unknown error".into())
                ))
            }
            _ => (),
        }
    }
}

/// Answer control requests until an unrecoverable error occurs.
fn serve(engine: &EngineHandle, server: &ControlServer) -> Result<(), Report> {
    loop {
        match server.receive_request() {
            Ok(Some(request)) => {
                let response = request_processor::exec(engine, &request);
                if let Err(e) = server.send_response(&response) {
                    warn!("Could not respond to request: {}", e);
                }
            }
            Ok(None) => (),
            Err(ControlServerError::RequestParseError(e)) => {
                warn!("Could not parse received request: {}", e)
            }
            Err(ControlServerError::NonUtf8Request) => {
                warn!("Received a request which was not valid UTF-8")
            }
            Err(e) => {
                return Err(e).wrap_err("An error occured while receiving control requests")
            }
        }
    }
}
