//! # rotorsim-types
//!
//! Wire-format definitions for the rotator controller's UDP dialect, shared
//! between the bridge (`rotorbridge`, the real client) and the hardware
//! simulator (`rotorsim`, a stand-in server for local testing). Keeping the
//! command/reply/event encoding in one crate means the two sides can never
//! silently drift out of sync with each other.
//!
//! ## Wire shape
//! One UDP datagram = one command or one reply, ASCII, no length framing,
//! capped at [`MAX_DATAGRAM_LEN`] bytes. Position telemetry on the event
//! port uses the separate `"<axis>:<degrees>"` format handled by
//! [`PositionEvent`].

use std::fmt;

use thiserror::Error;

// ── Default network parameters ────────────────────────────────────────────

pub const DEFAULT_REQUEST_PORT: u16 = 8888;
pub const DEFAULT_EVENT_PORT: u16 = 8889;
pub const MAX_DATAGRAM_LEN: usize = 128;

pub const ACK: &str = "ack";
pub const NAK: &str = "nak";

// ── Axis ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Az,
    El,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::Az => "az",
            Axis::El => "el",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed wire payload: {0:?}")]
pub struct WireError(pub String);

// ── Position events (event port, "<axis>:<degrees>") ──────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionEvent {
    pub axis: Axis,
    pub degrees: i32,
}

impl PositionEvent {
    pub fn encode(&self) -> String {
        format!("{}:{}", self.axis, self.degrees)
    }

    pub fn parse(raw: &str) -> Result<Self, WireError> {
        let mut parts = raw.splitn(2, ':');
        let axis = match (parts.next(), parts.next()) {
            (Some("az"), Some(rest)) => (Axis::Az, rest),
            (Some("el"), Some(rest)) => (Axis::El, rest),
            _ => return Err(WireError(raw.to_string())),
        };
        let degrees = axis
            .1
            .trim()
            .parse::<i32>()
            .map_err(|_| WireError(raw.to_string()))?;
        Ok(PositionEvent {
            axis: axis.0,
            degrees,
        })
    }
}

// ── Command dialect (request port) ────────────────────────────────────────

/// Every command the controller's request-port dialect understands (§4.1).
/// `encode`/`parse` are inverses of each other so the bridge's client and
/// the simulator's server share exactly one definition of the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCommand {
    Poll,
    PresetCalAz(i64),
    PresetCalEl(i64),
    SetAzSpeed(i64),
    SetElSpeed(i64),
    CalibrateAz,
    CalibrateEl,
    HomeAz,
    HomeEl,
    MoveAz(i64),
    MoveEl(i64),
    NudgeAzFwd,
    NudgeAzRev,
    NudgeElFwd,
    NudgeElRev,
}

impl WireCommand {
    pub fn encode(&self) -> String {
        match self {
            WireCommand::Poll => "poll".to_string(),
            WireCommand::PresetCalAz(n) => format!("{n}a"),
            WireCommand::PresetCalEl(n) => format!("{n}b"),
            WireCommand::SetAzSpeed(p) => format!("{p}n"),
            WireCommand::SetElSpeed(p) => format!("{p}m"),
            WireCommand::CalibrateAz => "calaz".to_string(),
            WireCommand::CalibrateEl => "calel".to_string(),
            WireCommand::HomeAz => "homeaz".to_string(),
            WireCommand::HomeEl => "homeel".to_string(),
            WireCommand::MoveAz(d) => format!("{d}z"),
            WireCommand::MoveEl(d) => format!("{d}e"),
            WireCommand::NudgeAzFwd => "ngazfwd".to_string(),
            WireCommand::NudgeAzRev => "ngazrev".to_string(),
            WireCommand::NudgeElFwd => "ngelfwd".to_string(),
            WireCommand::NudgeElRev => "ngelrev".to_string(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, WireError> {
        let err = || WireError(raw.to_string());
        Ok(match raw {
            "poll" => WireCommand::Poll,
            "calaz" => WireCommand::CalibrateAz,
            "calel" => WireCommand::CalibrateEl,
            "homeaz" => WireCommand::HomeAz,
            "homeel" => WireCommand::HomeEl,
            "ngazfwd" => WireCommand::NudgeAzFwd,
            "ngazrev" => WireCommand::NudgeAzRev,
            "ngelfwd" => WireCommand::NudgeElFwd,
            "ngelrev" => WireCommand::NudgeElRev,
            _ => {
                let (digits, suffix) = split_trailing_alpha(raw);
                if digits.is_empty() || suffix.is_empty() {
                    return Err(err());
                }
                let n: i64 = digits.parse().map_err(|_| err())?;
                match suffix {
                    "a" => WireCommand::PresetCalAz(n),
                    "b" => WireCommand::PresetCalEl(n),
                    "n" => WireCommand::SetAzSpeed(n),
                    "m" => WireCommand::SetElSpeed(n),
                    "z" => WireCommand::MoveAz(n),
                    "e" => WireCommand::MoveEl(n),
                    _ => return Err(err()),
                }
            }
        })
    }
}

fn split_trailing_alpha(raw: &str) -> (&str, &str) {
    let split_at = raw
        .char_indices()
        .find(|(_, c)| c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw.split_at(split_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_event_round_trips() {
        let ev = PositionEvent {
            axis: Axis::Az,
            degrees: 123,
        };
        assert_eq!(PositionEvent::parse(&ev.encode()).unwrap(), ev);
    }

    #[test]
    fn position_event_rejects_garbage() {
        assert!(PositionEvent::parse("az").is_err());
        assert!(PositionEvent::parse("up:3").is_err());
        assert!(PositionEvent::parse("az:notanumber").is_err());
    }

    #[test]
    fn wire_command_round_trips_move() {
        let cmd = WireCommand::MoveAz(123);
        assert_eq!(cmd.encode(), "123z");
        assert_eq!(WireCommand::parse("123z").unwrap(), cmd);
    }

    #[test]
    fn wire_command_round_trips_preset_cal() {
        assert_eq!(WireCommand::parse("12345a").unwrap(), WireCommand::PresetCalAz(12345));
        assert_eq!(WireCommand::parse("6789b").unwrap(), WireCommand::PresetCalEl(6789));
    }

    #[test]
    fn wire_command_parses_fixed_tokens() {
        assert_eq!(WireCommand::parse("poll").unwrap(), WireCommand::Poll);
        assert_eq!(WireCommand::parse("calaz").unwrap(), WireCommand::CalibrateAz);
        assert_eq!(WireCommand::parse("ngelrev").unwrap(), WireCommand::NudgeElRev);
    }

    #[test]
    fn wire_command_rejects_unknown_suffix() {
        assert!(WireCommand::parse("123q").is_err());
        assert!(WireCommand::parse("nonsense").is_err());
    }
}
