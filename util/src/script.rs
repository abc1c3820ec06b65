//! # Motion script parser
//!
//! Parses palletizer motion scripts into an ordered list of steps. A script is a comma
//! separated list of moves, with steps separated by the `NEXT` keyword:
//!
//! ```text
//! X(1,10,100),Y(1,10,100),Z(1,10,100) NEXT
//! X(2,20,200),Y(2,20,200),Z(2,20,200)
//! ```
//!
//! Each move is `AXIS(index, position, speed)`. All moves of a step are dispatched together and
//! the step must complete before the next one starts. Whitespace, including newlines, is not
//! significant, and a single trailing `NEXT` is accepted since the dashboard writes one after
//! every step when saving.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use conquer_once::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};
use thiserror::Error;

// Internal
use comms_if::eqpt::arm::{Axis, SpeedLimits};

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

/// Tokens of a script. Whitespace matches no alternative and so is skipped, anything else that
/// is not a move, a `NEXT` or a comma is caught by the last alternative and rejected.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"(?P<move>(?P<axis>[A-Za-z])\s*\((?P<fields>[^()]*)\))|(?P<next>(?i:next)\b)|(?P<comma>,)|(?P<bad>[^\s,]+)",
    )
    .build()
    .expect("script token pattern is valid")
});

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A single axis move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub axis: Axis,

    /// 1-based ordinal of this move within its axis's own sequence.
    pub index: i64,

    /// Target position.
    pub position: i64,

    /// Speed, already clamped into the axis's range.
    pub speed: i64,
}

/// A speed which was outside its axis's range and has been clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedWarning {
    pub line: usize,
    pub column: usize,
    pub axis: Axis,
    pub requested: i64,
    pub applied: i64,
}

/// A set of moves dispatched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub moves: Vec<Move>,

    /// Clamping warnings raised while parsing this step.
    pub warnings: Vec<SpeedWarning>,
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    steps: Vec<Step>,
}

/// A script parsing error.
///
/// Line and column are 1-based and point at the start of the offending token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} at line {line}, column {column} (\"{token}\")")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub token: String,
    pub reason: ParseErrorReason,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorReason {
    #[error("Unknown axis '{0}'")]
    UnknownAxis(char),

    #[error("Field \"{0}\" is not an integer")]
    NotAnInteger(String),

    #[error("Expected 3 fields (index, position, speed), found {0}")]
    WrongFieldCount(usize),

    #[error("Task index {0} is below 1")]
    InvalidIndex(i64),

    #[error("Axis {0} appears more than once in the step")]
    DuplicateAxis(Axis),

    #[error("Expected ',' between moves")]
    MissingComma,

    #[error("Unexpected ','")]
    UnexpectedComma,

    #[error("Expected a move after ','")]
    DanglingComma,

    #[error("Empty step")]
    EmptyStep,

    #[error("Unrecognised token")]
    UnexpectedToken,

    #[error("Script contains no moves")]
    NoMoves,
}

/// Errors loading a script from a file.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not load the script from {0:?}: {1}")]
    ScriptLoadError(std::path::PathBuf, std::io::Error),

    #[error("Could not parse the script: {0}")]
    ParseError(#[from] ParseError),
}

/// What the parser saw last, used to check commas and step separators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    Start,
    Move,
    Comma,
    Next,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Script {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Number of steps in the script.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All clamping warnings in the script, in step order.
    pub fn warnings(&self) -> impl Iterator<Item = &SpeedWarning> {
        self.steps.iter().flat_map(|s| s.warnings.iter())
    }
}

impl Step {
    /// Get the move for the given axis, if this step has one.
    pub fn get(&self, axis: Axis) -> Option<&Move> {
        self.moves.iter().find(|m| m.axis == axis)
    }

    pub fn axes(&self) -> impl Iterator<Item = Axis> + '_ {
        self.moves.iter().map(|m| m.axis)
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({},{},{})",
            self.axis, self.index, self.position, self.speed
        )
    }
}

impl fmt::Display for SpeedWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "speed {} for axis {} at line {}, column {} clamped to {}",
            self.requested, self.axis, self.line, self.column, self.applied
        )
    }
}

/// Scripts display in the dashboard's save format, one step per line each ending in `NEXT`.
impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in self.steps.iter() {
            let moves: Vec<String> = step.moves.iter().map(|m| m.to_string()).collect();
            writeln!(f, "{} NEXT", moves.join(","))?;
        }
        Ok(())
    }
}

impl ParseError {
    fn new(text: &str, offset: usize, token: &str, reason: ParseErrorReason) -> Self {
        let (line, column) = position(text, offset);
        Self {
            line,
            column,
            token: token.to_string(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Parse a script using the reference speed limits.
pub fn parse(text: &str) -> Result<Script, ParseError> {
    parse_with_limits(text, &SpeedLimits::default())
}

/// Parse a script, clamping speeds into the given limits.
pub fn parse_with_limits(text: &str, limits: &SpeedLimits) -> Result<Script, ParseError> {
    let mut steps: Vec<Step> = Vec::new();
    let mut current = Step {
        moves: Vec::new(),
        warnings: Vec::new(),
    };
    let mut prev = Prev::Start;

    for caps in TOKEN_RE.captures_iter(text) {
        let tok = match caps.get(0) {
            Some(t) => t,
            None => continue,
        };
        let err = |reason| ParseError::new(text, tok.start(), tok.as_str(), reason);

        if caps.name("move").is_some() {
            if prev == Prev::Move {
                return Err(err(ParseErrorReason::MissingComma));
            }

            let letter = caps
                .name("axis")
                .and_then(|a| a.as_str().chars().next())
                .unwrap_or('?');
            let axis = Axis::from_letter(letter)
                .ok_or_else(|| err(ParseErrorReason::UnknownAxis(letter)))?;

            let fields: Vec<&str> = caps
                .name("fields")
                .map(|f| f.as_str().split(',').map(|s| s.trim()).collect())
                .unwrap_or_default();
            let values = match fields.as_slice() {
                [a, b, c] => [*a, *b, *c]
                    .iter()
                    .map(|f| {
                        f.parse::<i64>()
                            .map_err(|_| err(ParseErrorReason::NotAnInteger(f.to_string())))
                    })
                    .collect::<Result<Vec<i64>, ParseError>>()?,
                // A single empty field is what `X()` splits into
                [only] if only.is_empty() => return Err(err(ParseErrorReason::WrongFieldCount(0))),
                _ => return Err(err(ParseErrorReason::WrongFieldCount(fields.len()))),
            };

            if values[0] < 1 {
                return Err(err(ParseErrorReason::InvalidIndex(values[0])));
            }

            if current.get(axis).is_some() {
                return Err(err(ParseErrorReason::DuplicateAxis(axis)));
            }

            let requested = values[2];
            let speed = limits.range(axis).clamp(requested);
            if speed != requested {
                let (line, column) = position(text, tok.start());
                current.warnings.push(SpeedWarning {
                    line,
                    column,
                    axis,
                    requested,
                    applied: speed,
                });
            }

            current.moves.push(Move {
                axis,
                index: values[0],
                position: values[1],
                speed,
            });
            prev = Prev::Move;
        } else if caps.name("next").is_some() {
            match prev {
                Prev::Comma => return Err(err(ParseErrorReason::DanglingComma)),
                Prev::Start | Prev::Next => return Err(err(ParseErrorReason::EmptyStep)),
                Prev::Move => (),
            }

            steps.push(std::mem::replace(
                &mut current,
                Step {
                    moves: Vec::new(),
                    warnings: Vec::new(),
                },
            ));
            prev = Prev::Next;
        } else if caps.name("comma").is_some() {
            if prev != Prev::Move {
                return Err(err(ParseErrorReason::UnexpectedComma));
            }
            prev = Prev::Comma;
        } else {
            return Err(err(ParseErrorReason::UnexpectedToken));
        }
    }

    match prev {
        Prev::Comma => {
            return Err(ParseError::new(
                text,
                text.len(),
                "",
                ParseErrorReason::DanglingComma,
            ))
        }
        Prev::Move => steps.push(current),
        Prev::Start | Prev::Next => (),
    }

    if steps.is_empty() {
        return Err(ParseError::new(
            text,
            text.len(),
            "",
            ParseErrorReason::NoMoves,
        ));
    }

    Ok(Script { steps })
}

/// Load and parse a script file.
pub fn load<P: AsRef<Path>>(path: P, limits: &SpeedLimits) -> Result<(String, Script), ScriptError> {
    let text = fs::read_to_string(path.as_ref())
        .map_err(|e| ScriptError::ScriptLoadError(path.as_ref().to_path_buf(), e))?;
    let script = parse_with_limits(&text, limits)?;
    Ok((text, script))
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a byte offset into a 1-based line and column.
fn position(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
