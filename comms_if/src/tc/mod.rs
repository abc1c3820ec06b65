//! # Telecommand module
//!
//! Operator directives and the request/response pair exchanged over the engine's control
//! socket.
//!
//! Directives use the operator syntax `PLAY`, `PAUSE`, `STOP`, `IDLE`, `ZERO`,
//! `SPEED <axis> <value>` and `SPEED <value>`. The dashboard forms `SPEED;<axis>;<value>` and
//! `SPEED;<value>` are also accepted. Keywords are case sensitive, axis letters are not.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use crate::eqpt::arm::Axis;
use crate::tm::StatusReport;

// External
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static KEYWORDS_WITHOUT_ARGS: [(&str, Directive); 5] = [
    ("PLAY", Directive::Play),
    ("PAUSE", Directive::Pause),
    ("STOP", Directive::Stop),
    ("IDLE", Directive::Idle),
    ("ZERO", Directive::Zero),
];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// A run control directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// Start or resume the loaded script.
    Play,

    /// Hold after the step currently in flight.
    Pause,

    /// Abort the run and return to idle.
    Stop,

    /// Return to idle from any state, including error.
    Idle,

    /// Abort the run and return every axis to its reference position.
    Zero,

    /// Override the speed of one axis, or of every translational axis if `axis` is `None`.
    Speed { axis: Option<Axis>, value: i64 },
}

/// Errors raised while parsing a directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveParseError {
    #[error("Empty directive")]
    Empty,

    #[error("Unknown directive \"{0}\"")]
    Unknown(String),

    #[error("Directive \"{0}\" takes no arguments")]
    UnexpectedArguments(String),

    #[error(
        "Malformed speed directive \"{0}\", expected `SPEED <axis> <value>` or `SPEED <value>`"
    )]
    MalformedSpeed(String),

    #[error("Unknown axis \"{axis}\" in directive \"{text}\"")]
    UnknownAxis { text: String, axis: String },

    #[error("Speed value in directive \"{0}\" is not an integer")]
    InvalidSpeedValue(String),
}

/// Request sent to the engine's control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlRequest {
    /// A directive in operator syntax, parsed by the engine.
    Directive(String),

    /// Script text to parse and load.
    LoadScript(String),

    /// Request a snapshot of the engine status.
    GetStatus,

    /// Request the text of the loaded script.
    GetScript,
}

/// Response from the engine's control socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// The request was accepted.
    Ok,

    /// The request was rejected, the reason is given.
    Rejected(String),

    Status(StatusReport),

    /// Text of the loaded script, if any.
    Script(Option<String>),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Directive {
    /// Parse a directive from operator text.
    pub fn parse(text: &str) -> Result<Self, DirectiveParseError> {
        let trimmed = text.trim();

        let tokens: Vec<&str> = if trimmed.contains(';') {
            trimmed.split(';').map(|t| t.trim()).collect()
        } else {
            trimmed.split_whitespace().collect()
        };

        let keyword = match tokens.first() {
            Some(k) if !k.is_empty() => *k,
            _ => return Err(DirectiveParseError::Empty),
        };
        let args = &tokens[1..];

        if let Some((_, d)) = KEYWORDS_WITHOUT_ARGS.iter().find(|(k, _)| *k == keyword) {
            return match args.is_empty() {
                true => Ok(*d),
                false => Err(DirectiveParseError::UnexpectedArguments(trimmed.into())),
            };
        }

        if keyword != "SPEED" {
            return Err(DirectiveParseError::Unknown(trimmed.into()));
        }

        let (axis, value) = match args {
            [value] => (None, *value),
            [axis, value] => {
                let mut chars = axis.chars();
                let axis = match (chars.next(), chars.next()) {
                    (Some(c), None) => Axis::from_letter(c),
                    _ => None,
                }
                .ok_or_else(|| DirectiveParseError::UnknownAxis {
                    text: trimmed.into(),
                    axis: axis.to_string(),
                })?;
                (Some(axis), *value)
            }
            _ => return Err(DirectiveParseError::MalformedSpeed(trimmed.into())),
        };

        let value = value
            .parse::<i64>()
            .map_err(|_| DirectiveParseError::InvalidSpeedValue(trimmed.into()))?;

        Ok(Directive::Speed { axis, value })
    }
}

impl FromStr for Directive {
    type Err = DirectiveParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Directive::parse(s)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Play => write!(f, "PLAY"),
            Directive::Pause => write!(f, "PAUSE"),
            Directive::Stop => write!(f, "STOP"),
            Directive::Idle => write!(f, "IDLE"),
            Directive::Zero => write!(f, "ZERO"),
            Directive::Speed {
                axis: Some(a),
                value,
            } => write!(f, "SPEED {} {}", a, value),
            Directive::Speed { axis: None, value } => write!(f, "SPEED {}", value),
        }
    }
}

impl ControlRequest {
    /// Parse a request from a JSON packet.
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ControlResponse {
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
