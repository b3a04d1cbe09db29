//! The rotator state machine (§4.3). Grounded on the original `RotIf`
//! (`coldStart`, `getPos`, `setPosAz`/`setPosEl`) for the domain algorithms
//! and on this codebase's `procedure_engine.rs` for the tick-driven,
//! single-writer state-machine shape (`RwLock<State>` mutated only from one
//! task, read freely from others).
//!
//! Calibration-absent startup is resolved against §7 point 6 and the
//! worked scenario in §8 ("saved calibration absent ⇒ Coordinator stays in
//! cal-manual"): the Coordinator never sends [`Command::ColdStart`] while
//! pending with no saved calibration, it moves the service straight to
//! `CalManual` and waits on the operator. `ColdStart`'s own
//! absent-calibration branch (§4.3 step 3, auto-calibrate) stays implemented
//! as written, since a future "force calibrate now" operator action or a
//! direct test can still reach it — see DESIGN.md.

use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rotorsim_types::{PositionEvent, WireCommand};

use crate::bus::{Command, ReplySink};
use crate::calibration::{CalibrationRecord, UNCALIBRATED};
use crate::config::Config;
use crate::rotator_client::RotatorClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Offline,
    Pending,
    StartingCal,
    CalFailed,
    CalManual,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotatorState {
    pub status: Status,
    pub cal_az: i64,
    pub cal_el: i64,
    pub deg_az: i32,
    pub deg_el: i32,
}

impl Default for RotatorState {
    fn default() -> Self {
        RotatorState {
            status: Status::Offline,
            cal_az: UNCALIBRATED,
            cal_el: UNCALIBRATED,
            deg_az: -1,
            deg_el: -1,
        }
    }
}

impl RotatorState {
    pub fn calibration_present(&self) -> bool {
        self.cal_az >= 0 && self.cal_el >= 0
    }
}

pub struct RotatorService {
    client: RotatorClient,
    state: RwLock<RotatorState>,
    az_motor_speed: i64,
    el_motor_speed: i64,
    probe_timeout: Duration,
    calibration_timeout: Duration,
    movement_timeout: Duration,
}

impl RotatorService {
    pub fn new(client: RotatorClient, config: &Config, persisted: Option<CalibrationRecord>) -> Self {
        let mut state = RotatorState::default();
        if let Some(record) = persisted {
            state.cal_az = record.az_pulses;
            state.cal_el = record.el_pulses;
        }
        RotatorService {
            client,
            state: RwLock::new(state),
            az_motor_speed: config.az_motor_speed,
            el_motor_speed: config.el_motor_speed,
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
            calibration_timeout: Duration::from_millis(config.calibration_timeout_ms),
            movement_timeout: Duration::from_millis(config.movement_timeout_ms),
        }
    }

    pub async fn snapshot(&self) -> RotatorState {
        *self.state.read().await
    }

    pub async fn current_calibration(&self) -> CalibrationRecord {
        let state = self.state.read().await;
        CalibrationRecord {
            az_pulses: state.cal_az,
            el_pulses: state.cal_el,
        }
    }

    /// Consumes commands and position events until cancelled. Intended to
    /// run as a single dedicated task — every mutation of `state` happens
    /// here, so no lock is ever held across an `.await` boundary from
    /// another task's perspective.
    pub async fn run(
        &self,
        mut command_rx: mpsc::Receiver<Command>,
        mut position_rx: mpsc::Receiver<PositionEvent>,
        ui_position_tx: mpsc::Sender<PositionEvent>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(cmd) = command_rx.recv() => self.handle_command(cmd).await,
                Some(event) = position_rx.recv() => {
                    self.apply_position_event(event).await;
                    let _ = ui_position_tx.send(event).await;
                }
                else => break,
            }
        }
    }

    async fn apply_position_event(&self, event: PositionEvent) {
        let mut state = self.state.write().await;
        match event.axis {
            rotorsim_types::Axis::Az => state.deg_az = event.degrees,
            rotorsim_types::Axis::El => state.deg_el = event.degrees,
        }
    }

    async fn handle_command(&self, cmd: Command) {
        match cmd {
            Command::Poll => {
                self.probe(Status::Offline, Status::Pending).await;
            }
            Command::IsOnline => {
                self.probe(Status::Online, Status::Offline).await;
            }
            Command::ColdStart => self.cold_start().await,
            Command::GetPos { az_hint, el_hint, reply } => {
                self.get_pos(az_hint, el_hint, reply).await;
            }
            Command::SetCalAz(n) => {
                self.state.write().await.cal_az = n;
            }
            Command::SetCalEl(n) => {
                self.state.write().await.cal_el = n;
            }
            Command::SetAzSpeed(pct) => {
                let _ = self
                    .client
                    .do_command(WireCommand::SetAzSpeed(pct), self.probe_timeout)
                    .await;
            }
            Command::SetElSpeed(pct) => {
                let _ = self
                    .client
                    .do_command(WireCommand::SetElSpeed(pct), self.probe_timeout)
                    .await;
            }
            Command::CalibrateAz => self.run_manual_calibration_az().await,
            Command::CalibrateEl => self.run_manual_calibration_el().await,
            Command::HomeAz => self.home_az().await,
            Command::HomeEl => self.home_el().await,
            Command::SetPosAz(deg) => self.set_pos_az(deg).await,
            Command::SetPosEl(deg) => self.set_pos_el(deg).await,
            Command::NudgeAzFwd => {
                let _ = self
                    .client
                    .do_command(WireCommand::NudgeAzFwd, self.probe_timeout)
                    .await;
            }
            Command::NudgeAzRev => {
                let _ = self
                    .client
                    .do_command(WireCommand::NudgeAzRev, self.probe_timeout)
                    .await;
            }
            Command::NudgeElFwd => {
                let _ = self
                    .client
                    .do_command(WireCommand::NudgeElFwd, self.probe_timeout)
                    .await;
            }
            Command::NudgeElRev => {
                let _ = self
                    .client
                    .do_command(WireCommand::NudgeElRev, self.probe_timeout)
                    .await;
            }
        }
    }

    /// Sends `poll`, and applies the `from -> to` transition iff the current
    /// status is `from` and the probe succeeded. Used both for the initial
    /// offline→pending probe and the online keep-alive (inverted: it is the
    /// *failure* path that drives online→offline there).
    async fn probe(&self, from: Status, to: Status) {
        let ok = self
            .client
            .do_command(WireCommand::Poll, self.probe_timeout)
            .await
            .map(|reply| reply == rotorsim_types::ACK)
            .unwrap_or(false);

        let mut state = self.state.write().await;
        if state.status != from {
            return;
        }
        let should_transition = if to == Status::Offline { !ok } else { ok };
        if should_transition {
            state.status = to;
        }
    }

    /// Called by the Coordinator once per tick when `status == CalFailed`;
    /// the transient failure state always resolves to `Offline` on the very
    /// next tick (§4.3).
    pub async fn resolve_transient_failure(&self) {
        let mut state = self.state.write().await;
        if state.status == Status::CalFailed {
            state.status = Status::Offline;
        }
    }

    async fn cold_start(&self) {
        {
            let state = self.state.read().await;
            if state.status == Status::Offline {
                return;
            }
        }

        let az_ok = self
            .client
            .do_command(WireCommand::SetAzSpeed(self.az_motor_speed), self.probe_timeout)
            .await
            .map(|r| r == rotorsim_types::ACK)
            .unwrap_or(false);
        let el_ok = self
            .client
            .do_command(WireCommand::SetElSpeed(self.el_motor_speed), self.probe_timeout)
            .await
            .map(|r| r == rotorsim_types::ACK)
            .unwrap_or(false);
        if !az_ok || !el_ok {
            warn!("cold start: motor speed command failed (az={az_ok}, el={el_ok})");
            self.state.write().await.status = Status::CalFailed;
            return;
        }

        let calibration_present = self.state.read().await.calibration_present();
        if calibration_present {
            self.preset_saved_calibration().await;
        } else {
            // Mirrors `rotif.py`'s `coldStart`: calibrate az first and bail
            // without attempting el if az itself already failed.
            self.run_manual_calibration_az().await;
            if self.state.read().await.status != Status::CalFailed {
                self.run_manual_calibration_el().await;
            }
        }
    }

    async fn preset_saved_calibration(&self) {
        let (cal_az, cal_el) = {
            let state = self.state.read().await;
            (state.cal_az, state.cal_el)
        };
        let az_ok = self
            .client
            .do_command(WireCommand::PresetCalAz(cal_az), self.probe_timeout)
            .await
            .map(|r| r == rotorsim_types::ACK)
            .unwrap_or(false);
        let el_ok = self
            .client
            .do_command(WireCommand::PresetCalEl(cal_el), self.probe_timeout)
            .await
            .map(|r| r == rotorsim_types::ACK)
            .unwrap_or(false);

        let mut state = self.state.write().await;
        state.status = if az_ok && el_ok { Status::Online } else { Status::CalFailed };
    }

    /// Runs a blocking end-to-end calibration of the azimuth axis only
    /// (§4.3 step 3's az half, and the operator-triggered `CalibrateAz`
    /// command). Mirrors `rotif.py`'s `calibrateAz`: the elevation axis is
    /// never touched. On success `cal_az`/`deg_az` are updated and, if the
    /// elevation axis is already calibrated too, the state advances to
    /// `Pending` so the next regular tick's preset-path cold start takes it
    /// the rest of the way to `Online`.
    async fn run_manual_calibration_az(&self) {
        self.state.write().await.status = Status::StartingCal;

        let result = self
            .client
            .do_command(WireCommand::CalibrateAz, self.calibration_timeout)
            .await
            .ok()
            .and_then(|payload| payload.parse::<i64>().ok());

        let mut state = self.state.write().await;
        match result {
            Some(az) => {
                info!("az calibration complete: {az}");
                state.cal_az = az;
                state.deg_az = 0;
                if state.cal_el >= 0 {
                    state.status = Status::Pending;
                }
            }
            None => {
                warn!("az calibration failed");
                state.status = Status::CalFailed;
            }
        }
    }

    /// Elevation-axis counterpart of [`Self::run_manual_calibration_az`];
    /// mirrors `rotif.py`'s `calibrateEl` and never touches the azimuth
    /// axis.
    async fn run_manual_calibration_el(&self) {
        self.state.write().await.status = Status::StartingCal;

        let result = self
            .client
            .do_command(WireCommand::CalibrateEl, self.calibration_timeout)
            .await
            .ok()
            .and_then(|payload| payload.parse::<i64>().ok());

        let mut state = self.state.write().await;
        match result {
            Some(el) => {
                info!("el calibration complete: {el}");
                state.cal_el = el;
                state.deg_el = 0;
                if state.cal_az >= 0 {
                    state.status = Status::Pending;
                }
            }
            None => {
                warn!("el calibration failed");
                state.status = Status::CalFailed;
            }
        }
    }

    /// Called once at startup (and whenever the rotator becomes pending
    /// with no saved calibration) to move the operator into the manual
    /// calibration flow rather than auto-calibrating silently.
    pub async fn enter_cal_manual_if_needed(&self) {
        let mut state = self.state.write().await;
        if state.status == Status::Pending && !state.calibration_present() {
            state.status = Status::CalManual;
        }
    }

    async fn home_az(&self) {
        let _ = self.client.do_command(WireCommand::HomeAz, self.movement_timeout).await;
        self.state.write().await.deg_az = 0;
    }

    async fn home_el(&self) {
        let _ = self.client.do_command(WireCommand::HomeEl, self.movement_timeout).await;
        self.state.write().await.deg_el = 0;
    }

    async fn set_pos_az(&self, deg: i32) {
        let unknown = self.state.read().await.deg_az < 0;
        if unknown {
            self.home_az().await;
        }
        let _ = self
            .client
            .do_command(WireCommand::MoveAz(deg as i64), self.movement_timeout)
            .await;
        self.state.write().await.deg_az = deg;
    }

    async fn set_pos_el(&self, deg: i32) {
        let unknown = self.state.read().await.deg_el < 0;
        if unknown {
            self.home_el().await;
        }
        let _ = self
            .client
            .do_command(WireCommand::MoveEl(deg as i64), self.movement_timeout)
            .await;
        self.state.write().await.deg_el = deg;
    }

    async fn get_pos(&self, az_hint: i32, el_hint: i32, reply: ReplySink) {
        let state = self.state.read().await;
        let (az, el) = if state.status == Status::Online {
            (state.deg_az, state.deg_el)
        } else {
            (az_hint, el_hint)
        };
        let _ = reply.send(format!("{:.6}\n{:.6}\n", az as f64, el as f64)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn echoing_controller(reply: &'static str) -> (RotatorClient, tokio::task::JoinHandle<()>) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 128];
            loop {
                match server.recv_from(&mut buf).await {
                    Ok((_, peer)) => {
                        let _ = server.send_to(reply.as_bytes(), peer).await;
                    }
                    Err(_) => break,
                }
            }
        });
        let client = RotatorClient::connect(&addr.ip().to_string(), addr.port()).await.unwrap();
        (client, handle)
    }

    /// Acks every command except `calaz`/`calel`, which it answers with a
    /// fixed pulse count, so cold start's motor-speed gate passes before the
    /// calibration step is exercised.
    async fn calibrating_controller(az_reply: &'static str, el_reply: &'static str) -> (RotatorClient, tokio::task::JoinHandle<()>) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 128];
            loop {
                match server.recv_from(&mut buf).await {
                    Ok((n, peer)) => {
                        let reply = match std::str::from_utf8(&buf[..n]).unwrap_or("").trim() {
                            "calaz" => az_reply,
                            "calel" => el_reply,
                            _ => rotorsim_types::ACK,
                        };
                        let _ = server.send_to(reply.as_bytes(), peer).await;
                    }
                    Err(_) => break,
                }
            }
        });
        let client = RotatorClient::connect(&addr.ip().to_string(), addr.port()).await.unwrap();
        (client, handle)
    }

    fn config() -> Config {
        let mut c = Config::default();
        c.probe_timeout_ms = 200;
        c.calibration_timeout_ms = 200;
        c.movement_timeout_ms = 200;
        c
    }

    #[tokio::test]
    async fn cold_start_presets_saved_calibration_and_goes_online() {
        let (client, _h) = echoing_controller("ack").await;
        let service = RotatorService::new(
            client,
            &config(),
            Some(CalibrationRecord { az_pulses: 12345, el_pulses: 6789 }),
        );
        service.state.write().await.status = Status::Pending;
        service.cold_start().await;
        let state = service.snapshot().await;
        assert_eq!(state.status, Status::Online);
        assert_eq!(state.cal_az, 12345);
        assert_eq!(state.cal_el, 6789);
    }

    #[tokio::test]
    async fn cold_start_auto_calibrates_when_absent() {
        let (client, _h) = calibrating_controller("12000", "6500").await;
        let service = RotatorService::new(client, &config(), None);
        service.state.write().await.status = Status::Pending;
        service.cold_start().await;
        let state = service.snapshot().await;
        assert_eq!(state.status, Status::Pending);
        assert_eq!(state.cal_az, 12000);
        assert_eq!(state.deg_az, 0);
        assert_eq!(state.cal_el, 6500);
        assert_eq!(state.deg_el, 0);
    }

    #[tokio::test]
    async fn run_manual_calibration_az_leaves_el_untouched() {
        let (client, _h) = calibrating_controller("12000", "6500").await;
        let service = RotatorService::new(client, &config(), None);
        service.run_manual_calibration_az().await;
        let state = service.snapshot().await;
        assert_eq!(state.cal_az, 12000);
        assert_eq!(state.cal_el, -1);
        assert_eq!(state.status, Status::StartingCal);
    }

    #[tokio::test]
    async fn run_manual_calibration_el_leaves_az_untouched() {
        let (client, _h) = calibrating_controller("12000", "6500").await;
        let service = RotatorService::new(client, &config(), None);
        service.run_manual_calibration_el().await;
        let state = service.snapshot().await;
        assert_eq!(state.cal_el, 6500);
        assert_eq!(state.cal_az, -1);
        assert_eq!(state.status, Status::StartingCal);
    }

    #[tokio::test]
    async fn cold_start_fails_closed_when_speed_command_naks() {
        let (client, _h) = echoing_controller("nak").await;
        let service = RotatorService::new(client, &config(), Some(CalibrationRecord { az_pulses: 1, el_pulses: 1 }));
        service.state.write().await.status = Status::Pending;
        service.cold_start().await;
        assert_eq!(service.snapshot().await.status, Status::CalFailed);
    }

    #[tokio::test]
    async fn set_pos_az_homes_first_when_position_unknown() {
        let (client, _h) = echoing_controller("ack").await;
        let service = RotatorService::new(client, &config(), None);
        assert_eq!(service.snapshot().await.deg_az, -1);
        service.set_pos_az(123).await;
        assert_eq!(service.snapshot().await.deg_az, 123);
    }

    #[tokio::test]
    async fn get_pos_echoes_hints_while_offline() {
        let (client, _h) = echoing_controller("ack").await;
        let service = RotatorService::new(client, &config(), None);
        let (tx, mut rx) = mpsc::channel(1);
        service.get_pos(10, 20, tx).await;
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, "10.000000\n20.000000\n");
    }

    #[tokio::test]
    async fn resolve_transient_failure_returns_to_offline() {
        let (client, _h) = echoing_controller("nak").await;
        let service = RotatorService::new(client, &config(), Some(CalibrationRecord { az_pulses: 1, el_pulses: 1 }));
        service.state.write().await.status = Status::CalFailed;
        service.resolve_transient_failure().await;
        assert_eq!(service.snapshot().await.status, Status::Offline);
    }
}
