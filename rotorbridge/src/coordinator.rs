//! Lifecycle and state-machine orchestrator (§4.7). Grounded on this
//! codebase's `main.rs::run_engine_tick` / `auto_director.rs` interval-loop
//! pattern for the periodic tick, and on `procedure_engine.rs` for the
//! idea of a single orchestrator owning session lifetimes rather than
//! scattering start/stop logic across callers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rotorsim_types::PositionEvent;

use crate::bus::{Command, LogEvent, LogLevel, MessageBus};
use crate::calibration::CalibrationRecord;
use crate::cat_ft817::Ft817Cat;
use crate::cat_service::CatService;
use crate::config::Config;
use crate::event_receiver;
use crate::rig_protocol_server::{RigProtocolServer, RigState};
use crate::rot_protocol_server::RotProtocolServer;
use crate::rotator_client::RotatorClient;
use crate::rotator_service::{RotatorService, RotatorState, Status};
use crate::worker::Worker;

const TICK_INTERVAL: Duration = Duration::from_millis(300);
const OFFLINE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const ONLINE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const SINK_CAPACITY: usize = 200;

pub struct Coordinator {
    config: Config,
    calibration_path: PathBuf,
    root_token: CancellationToken,

    bus: MessageBus,
    log_rx: Mutex<tokio::sync::mpsc::Receiver<LogEvent>>,
    position_rx: Mutex<tokio::sync::mpsc::Receiver<PositionEvent>>,

    rotator_service: Arc<RotatorService>,
    rotator_worker: Mutex<Option<Worker>>,
    event_worker: Mutex<Option<Worker>>,

    rot_server: Arc<RotProtocolServer>,
    rot_worker: Mutex<Option<Worker>>,

    rig_server: Arc<RigProtocolServer>,
    rig_worker: Mutex<Option<Worker>>,

    cat: Arc<dyn CatService>,
    cat_enabled: Mutex<bool>,

    log_sink: Mutex<VecDeque<LogEvent>>,
    position_sink: Mutex<VecDeque<PositionEvent>>,
    last_poll: Mutex<Instant>,
}

impl Coordinator {
    pub async fn new(config: Config, calibration_path: PathBuf) -> anyhow::Result<Arc<Self>> {
        let persisted = CalibrationRecord::load(&calibration_path).await;

        let client = RotatorClient::connect(&config.controller_host, config.request_port).await?;
        let rotator_service = Arc::new(RotatorService::new(client, &config, persisted));

        let (bus, receivers) = MessageBus::new();
        let root_token = CancellationToken::new();

        // EventReceiver publishes position telemetry onto the bus's own
        // position channel; RotatorService consumes it there, applies it to
        // RotatorState, and re-emits onto this second, UI-facing channel
        // (§4.2/§4.3) — Coordinator only ever reads the post-processed copy.
        let (ui_position_tx, ui_position_rx) = tokio::sync::mpsc::channel(256);

        let service_for_run = rotator_service.clone();
        let rotator_worker = Worker::spawn("rotator-service", &root_token, move |token| async move {
            service_for_run
                .run(receivers.rotator_rx, receivers.position_rx, ui_position_tx, token)
                .await;
        });

        let event_worker = Worker::spawn("event-receiver", &root_token, {
            let bind_host = config.bind_host.clone();
            let event_port = config.event_port;
            let position_tx = bus.position_tx.clone();
            move |token| async move {
                event_receiver::run(&bind_host, event_port, position_tx, token).await;
            }
        });

        let cat: Arc<dyn CatService> = Arc::new(Ft817Cat::new(
            config.cat_device.clone(),
            config.cat_baud,
            bus.cat_response_tx.clone(),
        ));

        let rot_server = RotProtocolServer::new(config.bind_host.clone(), config.rot_port, bus.rotator_tx.clone());

        let rig_server = RigProtocolServer::new(
            config.bind_host.clone(),
            config.rig_port,
            cat.clone(),
            receivers.cat_response_rx,
            config.ptt_crossover_hz,
            Duration::from_millis(config.cat_rendezvous_timeout_ms),
        );

        Ok(Arc::new(Coordinator {
            config,
            calibration_path,
            root_token,
            bus,
            log_rx: Mutex::new(receivers.log_rx),
            position_rx: Mutex::new(ui_position_rx),
            rotator_service,
            rotator_worker: Mutex::new(Some(rotator_worker)),
            event_worker: Mutex::new(Some(event_worker)),
            rot_server,
            rot_worker: Mutex::new(None),
            rig_server,
            rig_worker: Mutex::new(None),
            cat,
            cat_enabled: Mutex::new(false),
            log_sink: Mutex::new(VecDeque::with_capacity(SINK_CAPACITY)),
            position_sink: Mutex::new(VecDeque::with_capacity(SINK_CAPACITY)),
            last_poll: Mutex::new(Instant::now() - OFFLINE_POLL_INTERVAL),
        }))
    }

    pub fn command_queue(&self) -> tokio::sync::mpsc::Sender<Command> {
        self.bus.rotator_tx.clone()
    }

    pub fn rig_server(&self) -> Arc<RigProtocolServer> {
        self.rig_server.clone()
    }

    pub async fn rotator_snapshot(&self) -> RotatorState {
        self.rotator_service.snapshot().await
    }

    pub async fn rig_snapshot(&self) -> RigState {
        self.rig_server.snapshot().await
    }

    pub async fn recent_logs(&self) -> Vec<LogEvent> {
        self.log_sink.lock().await.iter().cloned().collect()
    }

    pub async fn recent_positions(&self) -> Vec<PositionEvent> {
        self.position_sink.lock().await.iter().copied().collect()
    }

    /// Starts the rotctld server if it is not already running. Idempotent:
    /// a double-enable stops the previous task before starting a fresh one
    /// rather than leaking a second listener (§8 round-trip property).
    pub async fn enable_rotator_tracking(self: &Arc<Self>) {
        let mut guard = self.rot_worker.lock().await;
        if let Some(worker) = guard.take() {
            worker.terminate_and_join().await;
        }
        let server = self.rot_server.clone();
        let worker = Worker::spawn("rot-protocol-server", &self.root_token, move |token| async move {
            if let Err(e) = server.run(token).await {
                error!("rotctld server exited: {e}");
            }
        });
        *guard = Some(worker);
        info!("rotator tracking enabled");
    }

    pub async fn disable_rotator_tracking(&self) {
        if let Some(worker) = self.rot_worker.lock().await.take() {
            worker.terminate_and_join().await;
        }
        info!("rotator tracking disabled");
    }

    pub async fn enable_rig_tracking(self: &Arc<Self>) {
        let mut guard = self.rig_worker.lock().await;
        if let Some(worker) = guard.take() {
            worker.terminate_and_join().await;
        }
        let server = self.rig_server.clone();
        let worker = Worker::spawn("rig-protocol-server", &self.root_token, move |token| async move {
            if let Err(e) = server.run(token).await {
                error!("rigctld server exited: {e}");
            }
        });
        *guard = Some(worker);
        info!("rig tracking enabled");
    }

    pub async fn disable_rig_tracking(&self) {
        if let Some(worker) = self.rig_worker.lock().await.take() {
            worker.terminate_and_join().await;
        }
        info!("rig tracking disabled");
    }

    pub async fn enable_cat(&self) {
        let mut enabled = self.cat_enabled.lock().await;
        if *enabled {
            info!("CAT already enabled, ignoring duplicate enable");
            return;
        }
        *enabled = self.cat.run().await;
        if !*enabled {
            error!("CAT backend failed to start");
        }
    }

    pub async fn disable_cat(&self) {
        let mut enabled = self.cat_enabled.lock().await;
        if *enabled {
            self.cat.terminate().await;
        }
        *enabled = false;
    }

    /// Runs the ~300ms coordinator tick until cancelled (§4.7). Drains the
    /// log and position queues, then evaluates one state-machine step.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        self.drain_logs().await;
        self.drain_positions().await;
        self.evaluate_rotator_state().await;
    }

    async fn drain_logs(&self) {
        let mut rx = self.log_rx.lock().await;
        let mut sink = self.log_sink.lock().await;
        while let Ok(event) = rx.try_recv() {
            if sink.len() >= SINK_CAPACITY {
                sink.pop_front();
            }
            sink.push_back(event);
        }
    }

    async fn drain_positions(&self) {
        let mut rx = self.position_rx.lock().await;
        let mut sink = self.position_sink.lock().await;
        while let Ok(event) = rx.try_recv() {
            if sink.len() >= SINK_CAPACITY {
                sink.pop_front();
            }
            sink.push_back(event);
        }
    }

    async fn evaluate_rotator_state(&self) {
        let state = self.rotator_service.snapshot().await;
        match state.status {
            Status::CalFailed => {
                self.rotator_service.resolve_transient_failure().await;
            }
            Status::Pending => {
                self.rotator_service.enter_cal_manual_if_needed().await;
                if self.rotator_service.snapshot().await.status == Status::Pending {
                    self.maybe_poll(OFFLINE_POLL_INTERVAL, Command::ColdStart).await;
                }
            }
            Status::Offline => {
                self.maybe_poll(OFFLINE_POLL_INTERVAL, Command::Poll).await;
            }
            Status::Online => {
                self.maybe_poll(ONLINE_POLL_INTERVAL, Command::IsOnline).await;
            }
            Status::StartingCal | Status::CalManual => {}
        }
    }

    async fn maybe_poll(&self, cadence: Duration, command: Command) {
        let mut last_poll = self.last_poll.lock().await;
        if last_poll.elapsed() < cadence {
            return;
        }
        *last_poll = Instant::now();
        let _ = self.bus.rotator_tx.send(command).await;
    }

    /// Operator-triggered manual calibration, reachable from `CalManual`
    /// (§4.3). Mirrors `rotui.py`'s `__onCalibrate`: az and el are queued as
    /// two independent commands, each calibrating only its own axis.
    pub async fn trigger_manual_calibration(&self) {
        let _ = self.bus.rotator_tx.send(Command::CalibrateAz).await;
        let _ = self.bus.rotator_tx.send(Command::CalibrateEl).await;
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.bus.log(level, message);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stops every worker and persists the current calibration, if any
    /// (§4.7 clean shutdown).
    pub async fn shutdown(self: Arc<Self>) {
        self.disable_rotator_tracking().await;
        self.disable_rig_tracking().await;
        self.disable_cat().await;

        self.root_token.cancel();
        if let Some(worker) = self.rotator_worker.lock().await.take() {
            worker.join().await;
        }
        if let Some(worker) = self.event_worker.lock().await.take() {
            worker.join().await;
        }

        let calibration = self.rotator_service.current_calibration().await;
        calibration.save(&self.calibration_path).await;
    }
}
