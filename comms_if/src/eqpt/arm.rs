//! # Arm Equipment Interface
//!
//! Defines the axes and arms of the palletizer and the text frames exchanged with each arm.
//!
//! Every frame is printable ASCII:
//!
//! ```text
//! <ARM>#<KIND>(<p1>,<p2>,...,<pn>)*<CHK>
//! ```
//!
//! - `ARM` is `L` or `R`.
//! - `KIND` is a single character selecting the command, see [`CmdKind`].
//! - The parameter list is a comma separated list of signed integers. When there are no
//!   parameters the parentheses are omitted, for example `L#C*2C`.
//! - `CHK` is the 8-bit XOR of every byte before the `*`, as two upper case hex digits.
//!
//! The checksum is verified before any other part of the frame is inspected, so a corrupted frame
//! is always reported as a checksum mismatch rather than as a structural error.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Separates the arm tag from the command kind.
pub const ARM_SEPARATOR: char = '#';

/// Separates the frame body from the checksum.
pub const CHECKSUM_SEPARATOR: u8 = b'*';

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Inclusive range of speeds an axis accepts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedRange {
    pub min: i64,
    pub max: i64,
}

/// Speed ranges for each class of axis.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct SpeedLimits {
    /// Range shared by the `X`, `Y`, `Z` and `T` axes.
    pub translational: SpeedRange,

    /// Range of the gripper (`G`) axis.
    pub gripper: SpeedRange,
}

/// A single command frame addressed to, or received from, one arm.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArmFrame {
    pub arm: Arm,
    pub kind: CmdKind,
    pub params: Vec<i64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The independently addressable manipulators.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
pub enum Arm {
    Left,
    Right,
}

/// Axes driven by each arm.
///
/// `X`, `Y`, `Z` and `T` are translational axes, `G` is the gripper which has its own speed range.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
pub enum Axis {
    X,
    Y,
    Z,
    T,
    G,
}

/// The command carried by a frame.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum CmdKind {
    /// `H`: move to the home pose.
    Home,
    /// `G`: grip-and-drop sequence.
    Glad,
    /// `C`: cycle complete.
    Cycle,
    /// `M`: move one axis, params are `axis_code, index, position, speed`.
    Move,
    /// `Z`: return one axis to its reference position, params are `axis_code`.
    Zero,
    /// `V`: set the speed of one axis, params are `axis_code, speed`.
    SetSpeed,
    /// `A`: acknowledgement from the arm, params are `axis_code, index`.
    Ack,
    /// `S`: status from the arm, params are `axis_code, busy` where busy is `0` or `1`.
    Status,
}

/// Errors raised while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Checksum mismatch in frame \"{frame}\": computed {expected:02X}, frame carries {found:02X}")]
    ChecksumMismatch {
        frame: String,
        expected: u8,
        found: u8,
    },

    #[error("Malformed frame \"{frame}\": {reason}")]
    Malformed { frame: String, reason: &'static str },

    #[error("Unknown arm tag '{tag}' in frame \"{frame}\"")]
    UnknownArm { frame: String, tag: char },

    #[error("Unknown command kind '{kind}' in frame \"{frame}\"")]
    UnknownKind { frame: String, kind: char },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Arm {
    /// Both arms, left first.
    pub const ALL: [Arm; 2] = [Arm::Left, Arm::Right];

    /// The tag used for this arm on the wire.
    pub fn tag(self) -> char {
        match self {
            Arm::Left => 'L',
            Arm::Right => 'R',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'L' => Some(Arm::Left),
            'R' => Some(Arm::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arm::Left => write!(f, "LEFT"),
            Arm::Right => write!(f, "RIGHT"),
        }
    }
}

impl Axis {
    /// All axes in wire code order.
    pub const ALL: [Axis; 5] = [Axis::X, Axis::Y, Axis::Z, Axis::T, Axis::G];

    /// The axes that share the translational speed range.
    pub const TRANSLATIONAL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::T];

    /// The letter used for this axis in scripts and directives.
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::T => 'T',
            Axis::G => 'G',
        }
    }

    /// Parse an axis letter, ignoring case.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'T' => Some(Axis::T),
            'G' => Some(Axis::G),
            _ => None,
        }
    }

    /// Integer code identifying the axis in frame parameters.
    pub fn code(self) -> i64 {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::T => 3,
            Axis::G => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Axis::ALL.iter().copied().find(|a| a.code() == code)
    }

    pub fn is_translational(self) -> bool {
        !matches!(self, Axis::G)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl SpeedRange {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Bring the value inside the range.
    pub fn clamp(&self, value: i64) -> i64 {
        value.max(self.min).min(self.max)
    }
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            translational: SpeedRange::new(10, 1000),
            gripper: SpeedRange::new(10, 364),
        }
    }
}

impl SpeedLimits {
    /// Get the speed range which applies to the given axis.
    pub fn range(&self, axis: Axis) -> SpeedRange {
        match axis.is_translational() {
            true => self.translational,
            false => self.gripper,
        }
    }
}

impl CmdKind {
    pub fn to_char(self) -> char {
        match self {
            CmdKind::Home => 'H',
            CmdKind::Glad => 'G',
            CmdKind::Cycle => 'C',
            CmdKind::Move => 'M',
            CmdKind::Zero => 'Z',
            CmdKind::SetSpeed => 'V',
            CmdKind::Ack => 'A',
            CmdKind::Status => 'S',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'H' => Some(CmdKind::Home),
            'G' => Some(CmdKind::Glad),
            'C' => Some(CmdKind::Cycle),
            'M' => Some(CmdKind::Move),
            'Z' => Some(CmdKind::Zero),
            'V' => Some(CmdKind::SetSpeed),
            'A' => Some(CmdKind::Ack),
            'S' => Some(CmdKind::Status),
            _ => None,
        }
    }
}

impl ArmFrame {
    pub fn new(arm: Arm, kind: CmdKind, params: Vec<i64>) -> Self {
        Self { arm, kind, params }
    }

    /// Frame moving one axis to `position` at `speed`.
    pub fn move_axis(arm: Arm, axis: Axis, index: i64, position: i64, speed: i64) -> Self {
        Self::new(arm, CmdKind::Move, vec![axis.code(), index, position, speed])
    }

    /// Frame returning one axis to its reference position.
    pub fn zero_axis(arm: Arm, axis: Axis) -> Self {
        Self::new(arm, CmdKind::Zero, vec![axis.code()])
    }

    pub fn set_speed(arm: Arm, axis: Axis, speed: i64) -> Self {
        Self::new(arm, CmdKind::SetSpeed, vec![axis.code(), speed])
    }

    pub fn ack(arm: Arm, axis: Axis, index: i64) -> Self {
        Self::new(arm, CmdKind::Ack, vec![axis.code(), index])
    }

    pub fn status(arm: Arm, axis: Axis, busy: bool) -> Self {
        Self::new(arm, CmdKind::Status, vec![axis.code(), busy as i64])
    }

    /// Encode the frame into its wire representation.
    pub fn encode(&self) -> String {
        encode(self.arm, self.kind, &self.params)
    }

    /// Decode a frame from raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        decode(bytes).map(|(arm, kind, params)| Self { arm, kind, params })
    }

    /// If this frame is a well formed acknowledgement return the acknowledged axis and index.
    pub fn as_ack(&self) -> Option<(Axis, i64)> {
        match (self.kind, self.params.as_slice()) {
            (CmdKind::Ack, [code, index]) => Axis::from_code(*code).map(|a| (a, *index)),
            _ => None,
        }
    }

    /// If this frame is a well formed status report return the axis and whether it is busy.
    pub fn as_status(&self) -> Option<(Axis, bool)> {
        match (self.kind, self.params.as_slice()) {
            (CmdKind::Status, [code, busy]) if *busy == 0 || *busy == 1 => {
                Axis::from_code(*code).map(|a| (a, *busy == 1))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ArmFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compute the frame checksum over the given bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Encode a command into a frame.
pub fn encode(arm: Arm, kind: CmdKind, params: &[i64]) -> String {
    let mut body = format!("{}{}{}", arm.tag(), ARM_SEPARATOR, kind.to_char());

    if !params.is_empty() {
        let list: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        body.push('(');
        body.push_str(&list.join(","));
        body.push(')');
    }

    let chk = checksum(body.as_bytes());
    format!("{}{}{:02X}", body, CHECKSUM_SEPARATOR as char, chk)
}

/// Decode a frame.
///
/// A trailing line terminator is ignored. The frame is either decoded completely or rejected,
/// nothing is returned for a partially valid frame.
pub fn decode(bytes: &[u8]) -> Result<(Arm, CmdKind, Vec<i64>), FrameError> {
    let mut end = bytes.len();
    while end > 0 && (bytes[end - 1] == b'\n' || bytes[end - 1] == b'\r') {
        end -= 1;
    }
    let bytes = &bytes[..end];

    let frame = String::from_utf8_lossy(bytes).into_owned();
    let malformed = |reason: &'static str| FrameError::Malformed {
        frame: frame.clone(),
        reason,
    };

    // Split off the checksum and verify it before anything else
    let star = bytes
        .iter()
        .rposition(|&b| b == CHECKSUM_SEPARATOR)
        .ok_or_else(|| malformed("missing `*` checksum delimiter"))?;
    let (body, chk) = (&bytes[..star], &bytes[star + 1..]);

    let found = parse_hex_byte(chk).ok_or_else(|| malformed("checksum must be two hex digits"))?;
    let expected = checksum(body);
    if expected != found {
        return Err(FrameError::ChecksumMismatch {
            frame,
            expected,
            found,
        });
    }

    let body = std::str::from_utf8(body).map_err(|_| malformed("frame body is not ASCII"))?;
    let mut chars = body.chars();

    let tag = chars.next().ok_or_else(|| malformed("empty frame body"))?;
    let arm = Arm::from_tag(tag).ok_or_else(|| FrameError::UnknownArm {
        frame: frame.clone(),
        tag,
    })?;

    if chars.next() != Some(ARM_SEPARATOR) {
        return Err(malformed("expected `#` after the arm tag"));
    }

    let kind_char = chars
        .next()
        .ok_or_else(|| malformed("missing command kind"))?;
    let kind = CmdKind::from_char(kind_char).ok_or_else(|| FrameError::UnknownKind {
        frame: frame.clone(),
        kind: kind_char,
    })?;

    let rest = chars.as_str();
    let params = if rest.is_empty() {
        Vec::new()
    } else {
        let inner = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| malformed("parameters must be enclosed in parentheses"))?;

        if inner.is_empty() {
            return Err(malformed("an empty parameter list must omit the parentheses"));
        }

        inner
            .split(',')
            .map(|p| {
                p.parse::<i64>()
                    .map_err(|_| malformed("parameter is not an integer"))
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok((arm, kind, params))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn parse_hex_byte(digits: &[u8]) -> Option<u8> {
    if digits.len() != 2 {
        return None;
    }
    let hi = (digits[0] as char).to_digit(16)?;
    let lo = (digits[1] as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn arb_arm() -> impl Strategy<Value = Arm> {
        prop_oneof![Just(Arm::Left), Just(Arm::Right)]
    }

    fn arb_kind() -> impl Strategy<Value = CmdKind> {
        prop_oneof![
            Just(CmdKind::Home),
            Just(CmdKind::Glad),
            Just(CmdKind::Cycle),
            Just(CmdKind::Move),
            Just(CmdKind::Zero),
            Just(CmdKind::SetSpeed),
            Just(CmdKind::Ack),
            Just(CmdKind::Status),
        ]
    }

    #[test]
    fn test_encode_shape() {
        let frame = encode(Arm::Left, CmdKind::Home, &[3915, 390, 3840, 240, -30]);
        assert!(frame.starts_with("L#H(3915,390,3840,240,-30)*"));
        assert_eq!(frame.len(), "L#H(3915,390,3840,240,-30)*".len() + 2);

        // No parameters, no parentheses
        let frame = encode(Arm::Left, CmdKind::Cycle, &[]);
        assert_eq!(frame, "L#C*2C");
    }

    #[test]
    fn test_checksum_is_xor() {
        assert_eq!(checksum(b""), 0);
        assert_eq!(checksum(b"L#C"), 0x4C ^ 0x23 ^ 0x43);
    }

    #[test]
    fn test_decode_accepts_lower_case_checksum_and_newline() {
        let frame = ArmFrame::move_axis(Arm::Right, Axis::G, 2, 150, 364).encode();
        let lower = format!("{}\r\n", frame.to_lowercase().replacen("r#m", "R#M", 1));
        let decoded = ArmFrame::decode(lower.as_bytes()).unwrap();
        assert_eq!(decoded.arm, Arm::Right);
        assert_eq!(decoded.kind, CmdKind::Move);
        assert_eq!(decoded.params, vec![4, 2, 150, 364]);
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        let mut frame = encode(Arm::Left, CmdKind::Zero, &[1]);
        frame.replace_range(frame.len() - 2.., "00");
        assert!(matches!(
            decode(frame.as_bytes()),
            Err(FrameError::ChecksumMismatch { found: 0, .. })
        ));
    }

    #[test]
    fn test_decode_malformed() {
        let cases: [&[u8]; 5] = [b"L#M(1,2)", b"L#M(1,2)*0", b"L#M(1,2)*ZZ", b"", b"*00"];
        for case in cases.iter() {
            assert!(
                matches!(decode(case), Err(FrameError::Malformed { .. })),
                "{:?} should be malformed",
                String::from_utf8_lossy(case)
            );
        }

        // Structural errors behind a valid checksum
        for body in ["LM(1)", "L#M(1,2", "L#M()", "L#M(1,,2)", "L#M(a)", "L#M(1)x"].iter() {
            let frame = format!("{}*{:02X}", body, checksum(body.as_bytes()));
            assert!(
                matches!(decode(frame.as_bytes()), Err(FrameError::Malformed { .. })),
                "{} should be malformed",
                frame
            );
        }
    }

    #[test]
    fn test_decode_unknown_tags() {
        let body = "Q#M(1)";
        let frame = format!("{}*{:02X}", body, checksum(body.as_bytes()));
        assert!(matches!(
            decode(frame.as_bytes()),
            Err(FrameError::UnknownArm { tag: 'Q', .. })
        ));

        let body = "R#Q(1)";
        let frame = format!("{}*{:02X}", body, checksum(body.as_bytes()));
        assert!(matches!(
            decode(frame.as_bytes()),
            Err(FrameError::UnknownKind { kind: 'Q', .. })
        ));
    }

    #[test]
    fn test_ack_and_status_accessors() {
        let ack = ArmFrame::ack(Arm::Left, Axis::T, 7);
        assert_eq!(ack.as_ack(), Some((Axis::T, 7)));
        assert_eq!(ack.as_status(), None);

        let status = ArmFrame::status(Arm::Right, Axis::X, true);
        assert_eq!(status.as_status(), Some((Axis::X, true)));

        // Out of range busy flag is not a valid status
        let bad = ArmFrame::new(Arm::Right, CmdKind::Status, vec![0, 2]);
        assert_eq!(bad.as_status(), None);
    }

    #[test]
    fn test_speed_limits() {
        let limits = SpeedLimits::default();
        assert_eq!(limits.range(Axis::X).clamp(5), 10);
        assert_eq!(limits.range(Axis::Z).clamp(5000), 1000);
        assert_eq!(limits.range(Axis::G).clamp(2000), 364);
        assert_eq!(limits.range(Axis::G).clamp(364), 364);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            arm in arb_arm(),
            kind in arb_kind(),
            params in proptest::collection::vec(any::<i64>(), 0..12)
        ) {
            let frame = encode(arm, kind, &params);
            prop_assert_eq!(decode(frame.as_bytes()), Ok((arm, kind, params)));
        }

        #[test]
        fn prop_single_bit_flip_is_detected(
            arm in arb_arm(),
            kind in arb_kind(),
            params in proptest::collection::vec(-100_000i64..100_000, 0..8),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8
        ) {
            let frame = encode(arm, kind, &params);
            let mut bytes = frame.into_bytes();

            // Flip a bit somewhere in the body, before the checksum delimiter
            let body_len = bytes.len() - 3;
            bytes[pos.index(body_len)] ^= 1 << bit;

            let is_mismatch = matches!(decode(&bytes), Err(FrameError::ChecksumMismatch { .. }));
            prop_assert!(is_mismatch);
        }
    }
}
