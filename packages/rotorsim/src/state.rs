//! In-memory model of one az/el rotator controller (§4.1 wire dialect).
//! Grounded on `boat_sim.rs`'s plain `RwLock<State>` updated by a fixed-rate
//! physics tick, scaled down to two independent single-axis motors instead
//! of a 2-D boat.

use std::time::Duration;

/// One axis's slice of controller state: current position (in degrees, as
/// the controller reports it), an optional move-to target, speed in
/// percent-of-max (as the bridge's `SetAzSpeed`/`SetElSpeed` commands set
/// it), and the calibration pulse count `PresetCalAz`/`PresetCalEl` loads.
#[derive(Debug, Clone, Copy)]
pub struct Axis {
    pub degrees: f64,
    pub target: Option<f64>,
    pub speed_pct: i64,
    pub calibration_pulses: i64,
}

impl Axis {
    fn new(calibration_pulses: i64) -> Self {
        Axis {
            degrees: 0.0,
            target: None,
            speed_pct: 50,
            calibration_pulses,
        }
    }

    /// Degrees moved per tick at the current speed setting. 1% speed moves
    /// roughly `max_deg_per_sec / 100` degrees per second; a motor at 0%
    /// never moves, matching a real controller ignoring a zero-speed axis.
    fn step(&mut self, max_deg_per_sec: f64, tick: Duration) {
        let Some(target) = self.target else { return };
        let delta = target - self.degrees;
        if delta.abs() < 0.05 {
            self.degrees = target;
            self.target = None;
            return;
        }
        let rate = max_deg_per_sec * (self.speed_pct.max(0) as f64 / 100.0);
        let step = rate * tick.as_secs_f64();
        if step <= 0.0 {
            return;
        }
        self.degrees += delta.signum() * step.min(delta.abs());
    }
}

pub struct RotorState {
    pub az: Axis,
    pub el: Axis,
    pub online: bool,
}

impl RotorState {
    pub fn new() -> Self {
        RotorState {
            az: Axis::new(-1),
            el: Axis::new(-1),
            online: true,
        }
    }

    pub fn tick(&mut self, max_deg_per_sec: f64, tick: Duration) {
        self.az.step(max_deg_per_sec, tick);
        self.el.step(max_deg_per_sec, tick);
    }
}

impl Default for RotorState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_moves_toward_target_and_then_snaps_to_it() {
        let mut axis = Axis::new(0);
        axis.target = Some(10.0);
        axis.speed_pct = 100;
        for _ in 0..200 {
            axis.step(5.0, Duration::from_millis(100));
            if axis.target.is_none() {
                break;
            }
        }
        assert!(axis.target.is_none());
        assert!((axis.degrees - 10.0).abs() < 1e-6);
    }

    #[test]
    fn zero_speed_axis_never_moves() {
        let mut axis = Axis::new(0);
        axis.target = Some(90.0);
        axis.speed_pct = 0;
        axis.step(5.0, Duration::from_secs(10));
        assert_eq!(axis.degrees, 0.0);
        assert_eq!(axis.target, Some(90.0));
    }
}
