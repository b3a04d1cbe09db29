//! # bus
//!
//! `MessageBus` — the four bounded producer/consumer queues that carry
//! everything between subsystems. Per the cyclic-reference redesign flag
//! (§9): Coordinator, RotatorService, the protocol servers, and CATService
//! never hold a handle to one another directly, only to queues and reply
//! sinks. `MessageBus::new` is called once at startup; the `Senders` half is
//! cheap to clone and handed to every producer, the `Receivers` half is
//! destructured once and each receiver moved into the single task that
//! consumes it.

use tokio::sync::mpsc;

use rotorsim_types::PositionEvent;

pub const CHANNEL_CAPACITY: usize = 256;

// ── Log queue ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
}

// ── Rotator command queue ─────────────────────────────────────────────────

/// A reply sink is just a sender of response lines — typically a protocol
/// session's send queue. `get_pos` replies by pushing directly into it
/// rather than by routing a return value back through the command queue.
pub type ReplySink = mpsc::Sender<String>;

#[derive(Debug)]
pub enum Command {
    Poll,
    IsOnline,
    ColdStart,
    GetPos {
        az_hint: i32,
        el_hint: i32,
        reply: ReplySink,
    },
    SetCalAz(i64),
    SetCalEl(i64),
    SetAzSpeed(i64),
    SetElSpeed(i64),
    CalibrateAz,
    CalibrateEl,
    HomeAz,
    HomeEl,
    SetPosAz(i32),
    SetPosEl(i32),
    NudgeAzFwd,
    NudgeAzRev,
    NudgeElFwd,
    NudgeElRev,
}

// ── CAT command + response queue ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatOpKind {
    Lock,
    PttSet,
    PttGet,
    FreqSet,
    FreqGet,
    ModeSet,
    ModeGet,
    TxStatus,
}

#[derive(Debug, Clone)]
pub enum CatCommand {
    Lock,
    PttSet(bool),
    PttGet,
    FreqSet(u64),
    FreqGet,
    ModeSet(String),
    ModeGet,
    TxStatus,
}

impl CatCommand {
    pub fn kind(&self) -> CatOpKind {
        match self {
            CatCommand::Lock => CatOpKind::Lock,
            CatCommand::PttSet(_) => CatOpKind::PttSet,
            CatCommand::PttGet => CatOpKind::PttGet,
            CatCommand::FreqSet(_) => CatOpKind::FreqSet,
            CatCommand::FreqGet => CatOpKind::FreqGet,
            CatCommand::ModeSet(_) => CatOpKind::ModeSet,
            CatCommand::ModeGet => CatOpKind::ModeGet,
            CatCommand::TxStatus => CatOpKind::TxStatus,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatResponse {
    pub ok: bool,
    pub op: CatOpKind,
    pub data: String,
}

// ── The bus itself ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MessageBus {
    pub log_tx: mpsc::Sender<LogEvent>,
    pub rotator_tx: mpsc::Sender<Command>,
    pub position_tx: mpsc::Sender<PositionEvent>,
    pub cat_response_tx: mpsc::Sender<CatResponse>,
}

pub struct BusReceivers {
    pub log_rx: mpsc::Receiver<LogEvent>,
    pub rotator_rx: mpsc::Receiver<Command>,
    pub position_rx: mpsc::Receiver<PositionEvent>,
    pub cat_response_rx: mpsc::Receiver<CatResponse>,
}

impl MessageBus {
    pub fn new() -> (Self, BusReceivers) {
        let (log_tx, log_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (rotator_tx, rotator_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (position_tx, position_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cat_response_tx, cat_response_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            MessageBus {
                log_tx,
                rotator_tx,
                position_tx,
                cat_response_tx,
            },
            BusReceivers {
                log_rx,
                rotator_rx,
                position_rx,
                cat_response_rx,
            },
        )
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self.log_tx.try_send(LogEvent {
            level,
            message: message.into(),
        });
    }
}
