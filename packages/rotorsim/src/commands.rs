//! Reply logic for the request-port command dialect (§4.1). Grounded on the
//! original `RotIf`/hardware controller's command set, mirrored byte-for-byte
//! via `rotorsim_types::WireCommand` so the bridge's client and this
//! simulator's server can never drift out of sync with each other.

use rotorsim_types::{WireCommand, ACK, NAK};

use crate::state::RotorState;

/// A fully calibrated controller reports a fixed pulse count per axis once
/// `CalibrateAz`/`CalibrateEl` completes; these values are arbitrary but
/// stable so repeated runs against this simulator are reproducible.
const AZ_CALIBRATION_PULSES: i64 = 12_000;
const EL_CALIBRATION_PULSES: i64 = 6_789;

/// Applies one parsed command to `state` and returns the reply payload to
/// send back on the request port.
pub fn handle(state: &mut RotorState, cmd: WireCommand) -> String {
    match cmd {
        WireCommand::Poll => if state.online { ACK.to_string() } else { NAK.to_string() },

        WireCommand::SetAzSpeed(pct) => {
            state.az.speed_pct = pct;
            ACK.to_string()
        }
        WireCommand::SetElSpeed(pct) => {
            state.el.speed_pct = pct;
            ACK.to_string()
        }

        WireCommand::PresetCalAz(pulses) => {
            state.az.calibration_pulses = pulses;
            ACK.to_string()
        }
        WireCommand::PresetCalEl(pulses) => {
            state.el.calibration_pulses = pulses;
            ACK.to_string()
        }

        WireCommand::CalibrateAz => {
            state.az.calibration_pulses = AZ_CALIBRATION_PULSES;
            state.az.degrees = 0.0;
            state.az.target = None;
            AZ_CALIBRATION_PULSES.to_string()
        }
        WireCommand::CalibrateEl => {
            state.el.calibration_pulses = EL_CALIBRATION_PULSES;
            state.el.degrees = 0.0;
            state.el.target = None;
            EL_CALIBRATION_PULSES.to_string()
        }

        WireCommand::HomeAz => {
            state.az.target = Some(0.0);
            ACK.to_string()
        }
        WireCommand::HomeEl => {
            state.el.target = Some(0.0);
            ACK.to_string()
        }

        WireCommand::MoveAz(deg) => {
            state.az.target = Some(deg as f64);
            ACK.to_string()
        }
        WireCommand::MoveEl(deg) => {
            state.el.target = Some(deg as f64);
            ACK.to_string()
        }

        WireCommand::NudgeAzFwd => {
            state.az.target = Some(state.az.degrees + 1.0);
            ACK.to_string()
        }
        WireCommand::NudgeAzRev => {
            state.az.target = Some(state.az.degrees - 1.0);
            ACK.to_string()
        }
        WireCommand::NudgeElFwd => {
            state.el.target = Some(state.el.degrees + 1.0);
            ACK.to_string()
        }
        WireCommand::NudgeElRev => {
            state.el.target = Some(state.el.degrees - 1.0);
            ACK.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_acks_while_online_and_naks_once_taken_offline() {
        let mut state = RotorState::new();
        assert_eq!(handle(&mut state, WireCommand::Poll), ACK);
        state.online = false;
        assert_eq!(handle(&mut state, WireCommand::Poll), NAK);
    }

    #[test]
    fn calibrate_az_reports_pulses_and_zeroes_position() {
        let mut state = RotorState::new();
        state.az.degrees = 45.0;
        let reply = handle(&mut state, WireCommand::CalibrateAz);
        assert_eq!(reply, AZ_CALIBRATION_PULSES.to_string());
        assert_eq!(state.az.degrees, 0.0);
    }

    #[test]
    fn move_az_sets_a_target_rather_than_jumping() {
        let mut state = RotorState::new();
        handle(&mut state, WireCommand::MoveAz(123));
        assert_eq!(state.az.target, Some(123.0));
        assert_eq!(state.az.degrees, 0.0);
    }

    #[test]
    fn nudge_el_fwd_advances_target_by_one_degree() {
        let mut state = RotorState::new();
        state.el.degrees = 30.0;
        handle(&mut state, WireCommand::NudgeElFwd);
        assert_eq!(state.el.target, Some(31.0));
    }
}
