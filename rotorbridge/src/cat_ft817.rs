//! Concrete `CATService` backend for the Yaesu FT-817 family (§4.4.1).
//! Grounded directly on an FT-817 CAT driver found in the retrieval pack
//! (`sgrams-trx-rs`'s `trx-backend-ft817` crate): 5-byte `[p1,p2,p3,p4,cmd]`
//! frames, BCD frequency encoding, a dummy all-zero frame before power-on to
//! let the rig's CPU wake and lock onto CAT framing, and a mode-set frame
//! sent twice with a short settle delay since the rig occasionally misses
//! the first one. Command opcodes below are the same byte values used
//! there.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use crate::bus::{CatCommand, CatOpKind, CatResponse};
use crate::cat_service::CatService;
use crate::error::CatError;

const CMD_SET_FREQ: u8 = 0x01;
const CMD_READ_STATUS: u8 = 0x03;
const CMD_SET_MODE: u8 = 0x07;
const CMD_PTT_ON: u8 = 0x08;
const CMD_PTT_OFF: u8 = 0x88;
const CMD_POWER_ON: u8 = 0x0F;
const CMD_POWER_OFF: u8 = 0x8F;
const CMD_LOCK: u8 = 0x00;
const CMD_UNLOCK: u8 = 0x80;
const CMD_READ_METER: u8 = 0xE7;

const READ_TIMEOUT: Duration = Duration::from_millis(800);
const MODE_RETRY_DELAY: Duration = Duration::from_millis(80);
const POWER_ON_SETTLE: Duration = Duration::from_millis(120);

pub struct Ft817Cat {
    device: String,
    baud: u32,
    port: Mutex<Option<SerialStream>>,
    locked: Mutex<bool>,
    response_tx: mpsc::Sender<CatResponse>,
}

impl Ft817Cat {
    pub fn new(device: String, baud: u32, response_tx: mpsc::Sender<CatResponse>) -> Self {
        Ft817Cat {
            device,
            baud,
            port: Mutex::new(None),
            locked: Mutex::new(false),
            response_tx,
        }
    }

    async fn write_frame(port: &mut SerialStream, frame: &[u8; 5]) -> std::io::Result<()> {
        port.write_all(frame).await?;
        port.flush().await
    }

    async fn read_exact_timeout(port: &mut SerialStream, buf: &mut [u8], op: &'static str) -> Result<(), CatError> {
        timeout(READ_TIMEOUT, port.read_exact(buf))
            .await
            .map_err(|_| CatError::Timeout { op })?
            .map_err(|source| CatError::Write { op, source })?;
        Ok(())
    }

    fn emit(&self, ok: bool, op: CatOpKind, data: impl Into<String>) {
        let response = CatResponse { ok, op, data: data.into() };
        let _ = self.response_tx.try_send(response);
    }
}

#[async_trait]
impl CatService for Ft817Cat {
    async fn run(&self) -> bool {
        let mut builder = tokio_serial::new(&self.device, self.baud);
        builder = builder.timeout(READ_TIMEOUT);
        let mut port = match builder.open_native_async() {
            Ok(port) => port,
            Err(e) => {
                warn!("opening CAT device {}: {e}", self.device);
                return false;
            }
        };

        let dummy = [0u8; 5];
        if let Err(e) = port.write_all(&dummy).await {
            warn!("CAT power-on dummy frame failed: {e}");
            return false;
        }
        let _ = port.flush().await;
        tokio::time::sleep(POWER_ON_SETTLE).await;

        let frame = [0x00, 0x00, 0x00, 0x00, CMD_POWER_ON];
        if let Err(e) = Ft817Cat::write_frame(&mut port, &frame).await {
            warn!("CAT power-on frame failed: {e}");
            return false;
        }
        let _ = port.clear(ClearBuffer::Input);

        *self.port.lock().await = Some(port);
        debug!("CAT link up on {}", self.device);
        true
    }

    async fn terminate(&self) {
        let mut guard = self.port.lock().await;
        if let Some(mut port) = guard.take() {
            let frame = [0x00, 0x00, 0x00, 0x00, CMD_POWER_OFF];
            let _ = Ft817Cat::write_frame(&mut port, &frame).await;
        }
    }

    async fn do_command(&self, cmd: CatCommand) -> Result<(), CatError> {
        let kind = cmd.kind();
        let mut guard = self.port.lock().await;
        let port = guard.as_mut().ok_or(CatError::NotRunning)?;

        match cmd {
            CatCommand::Lock => {
                let frame = [0x00, 0x00, 0x00, 0x00, CMD_LOCK];
                Ft817Cat::write_frame(port, &frame)
                    .await
                    .map_err(|source| CatError::Write { op: "lock", source })?;
                let mut buf = [0u8; 1];
                let _ = Ft817Cat::read_exact_timeout(port, &mut buf, "lock").await;
                *self.locked.lock().await = true;
                self.emit(true, kind, "");
            }
            CatCommand::PttSet(on) => {
                let opcode = if on { CMD_PTT_ON } else { CMD_PTT_OFF };
                let frame = [0x00, 0x00, 0x00, 0x00, opcode];
                Ft817Cat::write_frame(port, &frame)
                    .await
                    .map_err(|source| CatError::Write { op: "ptt_set", source })?;
                self.emit(true, kind, if on { "1" } else { "0" });
            }
            CatCommand::PttGet => {
                // FT-817 CAT has no dedicated "get PTT" opcode; the last
                // commanded state is the only source of truth available
                // over this link, so RigProtocolServer tracks it itself
                // (§4.6) rather than round-tripping through here.
                self.emit(true, kind, "");
            }
            CatCommand::FreqSet(hz) => {
                let bcd = encode_freq_bcd(hz);
                let frame = [bcd[0], bcd[1], bcd[2], bcd[3], CMD_SET_FREQ];
                Ft817Cat::write_frame(port, &frame)
                    .await
                    .map_err(|source| CatError::Write { op: "freq_set", source })?;
                self.emit(true, kind, hz.to_string());
            }
            CatCommand::FreqGet => {
                let _ = port.clear(ClearBuffer::Input);
                let frame = [0x00, 0x00, 0x00, 0x00, CMD_READ_STATUS];
                Ft817Cat::write_frame(port, &frame)
                    .await
                    .map_err(|source| CatError::Write { op: "freq_get", source })?;
                let mut buf = [0u8; 5];
                Ft817Cat::read_exact_timeout(port, &mut buf, "freq_get").await?;
                let hz = decode_freq_bcd([buf[0], buf[1], buf[2], buf[3]]);
                self.emit(true, kind, hz.to_string());
            }
            CatCommand::ModeSet(mode) => {
                let code = mode_to_native(&mode);
                let frame = [code, 0x00, 0x00, 0x00, CMD_SET_MODE];
                Ft817Cat::write_frame(port, &frame)
                    .await
                    .map_err(|source| CatError::Write { op: "mode_set", source })?;
                tokio::time::sleep(MODE_RETRY_DELAY).await;
                let _ = Ft817Cat::write_frame(port, &frame).await;
                self.emit(true, kind, mode);
            }
            CatCommand::ModeGet => {
                let _ = port.clear(ClearBuffer::Input);
                let frame = [0x00, 0x00, 0x00, 0x00, CMD_READ_STATUS];
                Ft817Cat::write_frame(port, &frame)
                    .await
                    .map_err(|source| CatError::Write { op: "mode_get", source })?;
                let mut buf = [0u8; 5];
                Ft817Cat::read_exact_timeout(port, &mut buf, "mode_get").await?;
                self.emit(true, kind, self.mode_for_id(buf[4]));
            }
            CatCommand::TxStatus => {
                let frame = [0x00, 0x00, 0x00, 0x00, CMD_READ_METER];
                Ft817Cat::write_frame(port, &frame)
                    .await
                    .map_err(|source| CatError::Write { op: "tx_status", source })?;
                let mut buf = [0u8; 1];
                Ft817Cat::read_exact_timeout(port, &mut buf, "tx_status").await?;
                self.emit(true, kind, buf[0].to_string());
            }
        }
        Ok(())
    }

    fn mode_for_id(&self, raw: u8) -> &'static str {
        match raw {
            0x00 => "lsb",
            0x01 => "usb",
            0x02 => "cw",
            0x03 => "cwr",
            0x04 => "am",
            0x06 => "wfm",
            0x08 => "fm",
            0x0A => "dig",
            0x0C => "pkt",
            _ => "unknown",
        }
    }

    fn bandwidth_for_mode(&self, mode: &str) -> &'static str {
        match mode {
            "lsb" | "usb" => "2400",
            "cw" | "cwr" => "500",
            "am" => "6000",
            "fm" => "15000",
            "wfm" => "230000",
            "dig" | "pkt" | "rtty" | "rttyr" => "3000",
            "dv" => "9000",
            _ => "0",
        }
    }
}

fn mode_to_native(canonical: &str) -> u8 {
    match canonical {
        "lsb" => 0x00,
        "usb" => 0x01,
        "cw" => 0x02,
        "cwr" => 0x03,
        "am" => 0x04,
        "wfm" => 0x06,
        "fm" => 0x08,
        "dig" | "pkt" | "rtty" | "rttyr" | "dv" => 0x0A,
        _ => 0x00,
    }
}

fn encode_freq_bcd(hz: u64) -> [u8; 4] {
    let units = hz / 10;
    let digits = [
        (units / 1_000_000) % 100,
        (units / 10_000) % 100,
        (units / 100) % 100,
        units % 100,
    ];
    let mut out = [0u8; 4];
    for (i, d) in digits.iter().enumerate() {
        out[i] = (((d / 10) << 4) | (d % 10)) as u8;
    }
    out
}

fn decode_freq_bcd(bytes: [u8; 4]) -> u64 {
    let mut units: u64 = 0;
    for byte in bytes {
        let hi = (byte >> 4) as u64;
        let lo = (byte & 0x0F) as u64;
        units = units * 100 + hi * 10 + lo;
    }
    units * 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_round_trips_a_representative_frequency() {
        let hz = 435_850_000;
        let encoded = encode_freq_bcd(hz);
        assert_eq!(decode_freq_bcd(encoded), hz);
    }

    #[test]
    fn unknown_native_mode_maps_to_unknown_not_a_panic() {
        let backend = Ft817Cat::new("/dev/null".to_string(), 9600, mpsc::channel(1).0);
        assert_eq!(backend.mode_for_id(0xFF), "unknown");
    }

    #[test]
    fn bandwidth_lookup_covers_every_canonical_mode() {
        let backend = Ft817Cat::new("/dev/null".to_string(), 9600, mpsc::channel(1).0);
        for mode in crate::cat_service::CANONICAL_MODES {
            assert_ne!(backend.bandwidth_for_mode(mode), "0", "missing bandwidth for {mode}");
        }
    }
}
