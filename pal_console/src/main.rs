//! # Palletizer Console
//!
//! Operator console for `pal_exec`. Lines starting with an upper-case word are sent as directives
//! (`PLAY`, `SPEED X 200`, `SPEED;G;300`, ...), lower-case words are console commands, see
//! `help`.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod control_client;
mod watch;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Result};
use log::warn;
use rustyline::{error::ReadlineError, history::DefaultHistory, Editor};
use structopt::{clap::AppSettings, StructOpt};

use comms_if::{
    net::zmq,
    tc::{ControlRequest, ControlResponse},
    tm::StatusReport,
};
use control_client::ControlClient;
use util::logger::{logger_init_stdout, LevelFilter};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "pal $ ";
const HISTORY_PATH: &str = ".pal_console_history";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "pal_console", about = "Operator console for the palletizer")]
struct Opts {
    /// Endpoint of the control server
    #[structopt(short, long, default_value = "tcp://localhost:5020")]
    control_endpoint: String,

    /// Endpoint of the status server
    #[structopt(short, long, default_value = "tcp://localhost:5021")]
    status_endpoint: String,

    /// Time to wait for each response, in milliseconds
    #[structopt(short, long, default_value = "2000")]
    timeout_ms: i32,

    #[structopt(subcommand)]
    mode: Option<Mode>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
enum Mode {
    /// Print the status stream, subscribing again whenever it is lost
    Watch,
}

/// Commands understood at the prompt.
#[derive(Debug, StructOpt)]
#[structopt(setting = AppSettings::NoBinaryName)]
enum ConsoleCmd {
    /// Upload a script file
    Load { path: String },

    /// Show the engine status
    Status,

    /// Show the loaded script
    Script,

    /// Leave the console
    Exit,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opts = Opts::from_args();

    logger_init_stdout(LevelFilter::Info).wrap_err("Failed to initialise logging")?;

    let ctx = zmq::Context::new();

    if let Some(Mode::Watch) = opts.mode {
        return watch::watch(&ctx, &opts.status_endpoint);
    }

    let mut client = ControlClient::new(&ctx, &opts.control_endpoint, opts.timeout_ms)
        .wrap_err("Failed to create the control client")?;

    let mut rl = Editor::<(), DefaultHistory>::new().wrap_err("Failed to start the line editor")?;
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).wrap_err("Could not read the command line"),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = rl.add_history_entry(line) {
            warn!("Could not add the line to the history: {}", e);
        }

        let request = match parse_line(line) {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match client.request(&request) {
            Ok(response) => print_response(response),
            Err(e) => println!("Error: {}", e),
        }
    }

    if let Err(e) = rl.save_history(HISTORY_PATH) {
        println!("Could not save history: {}", e);
    }
    println!("Exiting...");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Turn a console line into a request. `Ok(None)` means the console should exit.
fn parse_line(line: &str) -> Result<Option<ControlRequest>, String> {
    if line.starts_with(|c: char| c.is_ascii_uppercase()) {
        return Ok(Some(ControlRequest::Directive(line.into())));
    }

    let cmd = ConsoleCmd::from_iter_safe(line.split_whitespace()).map_err(|e| e.message)?;

    match cmd {
        ConsoleCmd::Load { path } => std::fs::read_to_string(&path)
            .map(|text| Some(ControlRequest::LoadScript(text)))
            .map_err(|e| format!("Could not read {:?}: {}", path, e)),
        ConsoleCmd::Status => Ok(Some(ControlRequest::GetStatus)),
        ConsoleCmd::Script => Ok(Some(ControlRequest::GetScript)),
        ConsoleCmd::Exit => Ok(None),
    }
}

fn print_response(response: ControlResponse) {
    match response {
        ControlResponse::Ok => println!("OK"),
        ControlResponse::Rejected(reason) => println!("Rejected: {}", reason),
        ControlResponse::Status(report) => print_status(&report),
        ControlResponse::Script(Some(text)) => println!("{}", text),
        ControlResponse::Script(None) => println!("No script loaded"),
    }
}

fn print_status(report: &StatusReport) {
    let cursor = match report.cursor {
        Some(c) => format!("{}/{}", c + 1, report.num_steps),
        None => "-".into(),
    };
    println!("State:  {} (step {})", report.state, cursor);

    if report.script_pending {
        println!("        new script staged for the next step boundary");
    }
    if let Some(ref e) = report.last_error {
        println!("Error:  {}", e);
    }

    for (axis, speed) in report.speed_overrides.iter() {
        println!("Speed:  {} = {}", axis, speed);
    }
    for a in report.axes.iter() {
        println!("Axis:   {} {} {}", a.arm, a.axis, a.activity);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("SPEED;G;300").unwrap(),
            Some(ControlRequest::Directive("SPEED;G;300".into()))
        );
        assert_eq!(parse_line("status").unwrap(), Some(ControlRequest::GetStatus));
        assert_eq!(parse_line("script").unwrap(), Some(ControlRequest::GetScript));
        assert_eq!(parse_line("exit").unwrap(), None);
        assert!(parse_line("load").is_err());
        assert!(parse_line("load /does/not/exist.txt").is_err());
        assert!(parse_line("jump").is_err());
    }
}
