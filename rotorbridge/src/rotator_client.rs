//! UDP transport to the rotator controller (§4.1-§4.2). Grounded on the
//! original `RotIf.__doCommand` (send one datagram, wait for one reply with
//! a timeout, treat a timeout as communication failure rather than a
//! semantic nak) and on this codebase's `uwb_hub.rs` socket-handling style:
//! bind once, never let a single bad exchange take the whole client down.
//!
//! `RotatorClient` only moves bytes; deciding what a reply *means* (ack vs.
//! nak, cold-start sequencing, calibration bookkeeping) is `RotatorService`'s
//! job.

use std::net::SocketAddr;
use std::time::Duration;

use rotorsim_types::{WireCommand, MAX_DATAGRAM_LEN};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

use crate::error::RotatorClientError;

pub struct RotatorClient {
    socket: Mutex<UdpSocket>,
    target: SocketAddr,
}

impl RotatorClient {
    pub async fn connect(host: &str, port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let target = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address resolved")
            })?;
        Ok(RotatorClient {
            socket: Mutex::new(socket),
            target,
        })
    }

    /// Sends one command and waits for one reply, serialized against any
    /// other in-flight exchange on this client. A socket-level error or a
    /// timeout both surface as `Err` — the caller treats either as "the
    /// controller did not answer", matching the original's nak-on-timeout
    /// behavior.
    pub async fn do_command(
        &self,
        cmd: WireCommand,
        timeout: Duration,
    ) -> Result<String, RotatorClientError> {
        let op = cmd.op_name();
        let payload = cmd.encode();
        let socket = self.socket.lock().await;

        socket
            .send_to(payload.as_bytes(), self.target)
            .await
            .map_err(|source| RotatorClientError::Send { op, source })?;

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        let (n, _) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| RotatorClientError::Recv {
                op,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "no reply"),
            })?
            .map_err(|source| RotatorClientError::Recv { op, source })?;

        std::str::from_utf8(&buf[..n])
            .map(|s| s.trim().to_string())
            .map_err(|_| RotatorClientError::InvalidReply { op })
    }
}

trait OpName {
    fn op_name(&self) -> &'static str;
}

impl OpName for WireCommand {
    fn op_name(&self) -> &'static str {
        match self {
            WireCommand::Poll => "poll",
            WireCommand::PresetCalAz(_) => "preset_cal_az",
            WireCommand::PresetCalEl(_) => "preset_cal_el",
            WireCommand::SetAzSpeed(_) => "set_az_speed",
            WireCommand::SetElSpeed(_) => "set_el_speed",
            WireCommand::CalibrateAz => "calibrate_az",
            WireCommand::CalibrateEl => "calibrate_el",
            WireCommand::HomeAz => "home_az",
            WireCommand::HomeEl => "home_el",
            WireCommand::MoveAz(_) => "move_az",
            WireCommand::MoveEl(_) => "move_el",
            WireCommand::NudgeAzFwd => "nudge_az_fwd",
            WireCommand::NudgeAzRev => "nudge_az_rev",
            WireCommand::NudgeElFwd => "nudge_el_fwd",
            WireCommand::NudgeElRev => "nudge_el_rev",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_command_against_a_loopback_echo() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_LEN];
            if let Ok((n, peer)) = echo.recv_from(&mut buf).await {
                let _ = echo.send_to(b"ack", peer).await;
                let _ = &buf[..n];
            }
        });

        let client = RotatorClient::connect(&echo_addr.ip().to_string(), echo_addr.port())
            .await
            .unwrap();
        let reply = client
            .do_command(WireCommand::Poll, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(reply, "ack");
    }

    #[tokio::test]
    async fn times_out_when_nothing_answers() {
        let dead = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);

        let client = RotatorClient::connect(&dead_addr.ip().to_string(), dead_addr.port())
            .await
            .unwrap();
        let result = client
            .do_command(WireCommand::Poll, Duration::from_millis(50))
            .await;
        assert!(result.is_err());
    }
}
