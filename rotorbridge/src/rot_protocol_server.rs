//! rotctld-dialect TCP server (§4.5). Grounded on the original
//! `AntListenerThread` in `satif.py`: bind-retry, one connection at a time,
//! a line accumulator, and a self-terminating accept loop driven by `q` or
//! peer disconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::Command;
use crate::error::ProtocolServerError;
use crate::protocol_session::{bind_with_retry, is_disconnect, LineAccumulator, ProtocolSession, BIND_RETRIES, BIND_RETRY_DELAY};

const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 512;

pub struct RotProtocolServer {
    bind_host: String,
    port: u16,
    rotator_tx: mpsc::Sender<Command>,
    /// Last position the tracker itself requested via `P`, echoed back by
    /// `p` while the rotator is offline (§4.3 getPos).
    last_hint: Mutex<(i32, i32)>,
}

impl RotProtocolServer {
    pub fn new(bind_host: String, port: u16, rotator_tx: mpsc::Sender<Command>) -> Arc<Self> {
        Arc::new(RotProtocolServer {
            bind_host,
            port,
            rotator_tx,
            last_hint: Mutex::new((-1, -1)),
        })
    }

    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<(), ProtocolServerError> {
        let listener = bind_with_retry(&self.bind_host, self.port, BIND_RETRIES, BIND_RETRY_DELAY).await?;
        info!("rotctld server listening on {}:{}", self.bind_host, self.port);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("rotctld: tracker connected from {peer}");
                            self.clone().serve(stream, token.clone()).await;
                            info!("rotctld: session ended, accepting again");
                        }
                        Err(e) => warn!("rotctld accept error: {e}"),
                    }
                }
            }
        }
    }

    async fn serve(self: Arc<Self>, mut stream: TcpStream, token: CancellationToken) {
        let mut session = ProtocolSession::new();
        let mut accumulator = LineAccumulator::default();
        let mut flush_ticker = tokio::time::interval(FLUSH_INTERVAL);
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let mut restart = false;
            tokio::select! {
                _ = token.cancelled() => return,
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            info!("rotctld: peer closed connection");
                            return;
                        }
                        Ok(n) => match std::str::from_utf8(&buf[..n]) {
                            Ok(chunk) => {
                                for line in accumulator.push(chunk) {
                                    if self.handle_line(&line, &mut session).await {
                                        restart = true;
                                    }
                                }
                            }
                            Err(_) => warn!("rotctld: discarding non-utf8 input"),
                        },
                        Err(e) if is_disconnect(&e) => {
                            info!("rotctld: peer disconnected: {e}");
                            return;
                        }
                        Err(e) => {
                            warn!("rotctld: read error: {e}");
                            return;
                        }
                    }
                }
                _ = flush_ticker.tick() => {}
            }

            for line in session.drain_for_send() {
                if let Err(e) = stream.write_all(line.as_bytes()).await {
                    warn!("rotctld: write error: {e}");
                    return;
                }
            }
            if restart {
                return;
            }
        }
    }

    /// Returns `true` if this line requested a restart (`q`).
    async fn handle_line(&self, line: &str, session: &mut ProtocolSession) -> bool {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("p") => {
                let (az_hint, el_hint) = *self.last_hint.lock().await;
                let reply = session.reply_sink();
                let _ = self
                    .rotator_tx
                    .send(Command::GetPos { az_hint, el_hint, reply })
                    .await;
                false
            }
            Some("P") => {
                let az = tokens.next().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0) as i32;
                let el = tokens.next().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0) as i32;
                *self.last_hint.lock().await = (az, el);
                let _ = self.rotator_tx.send(Command::SetPosAz(az)).await;
                let _ = self.rotator_tx.send(Command::SetPosEl(el)).await;
                session.push("RPRT 0\n");
                false
            }
            Some("S") => {
                session.push("RPRT 0\n");
                false
            }
            Some("q") => {
                session.push("RPRT 0\n");
                true
            }
            Some(other) => {
                warn!("rotctld: unrecognized command {other:?}");
                session.push("RPRT 0\n");
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn p_echoes_last_hint_when_rotator_never_answers() {
        let (rotator_tx, mut rotator_rx) = mpsc::channel(8);
        let server = RotProtocolServer::new("127.0.0.1".to_string(), 0, rotator_tx);
        *server.last_hint.lock().await = (10, 20);

        let mut session = ProtocolSession::new();
        server.handle_line("p", &mut session).await;

        match rotator_rx.recv().await.unwrap() {
            Command::GetPos { az_hint, el_hint, .. } => {
                assert_eq!((az_hint, el_hint), (10, 20));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_pos_enqueues_az_then_el_and_updates_hint() {
        let (rotator_tx, mut rotator_rx) = mpsc::channel(8);
        let server = RotProtocolServer::new("127.0.0.1".to_string(), 0, rotator_tx);
        let mut session = ProtocolSession::new();

        let restart = server.handle_line("P 123.4 45.6", &mut session).await;
        assert!(!restart);

        match rotator_rx.recv().await.unwrap() {
            Command::SetPosAz(deg) => assert_eq!(deg, 123),
            other => panic!("expected SetPosAz first, got {other:?}"),
        }
        match rotator_rx.recv().await.unwrap() {
            Command::SetPosEl(deg) => assert_eq!(deg, 45),
            other => panic!("expected SetPosEl second, got {other:?}"),
        }
        assert_eq!(*server.last_hint.lock().await, (123, 45));
        assert_eq!(session.drain_for_send(), vec!["RPRT 0\n".to_string()]);
    }

    #[tokio::test]
    async fn q_requests_restart() {
        let (rotator_tx, _rx) = mpsc::channel(8);
        let server = RotProtocolServer::new("127.0.0.1".to_string(), 0, rotator_tx);
        let mut session = ProtocolSession::new();
        assert!(server.handle_line("q", &mut session).await);
        assert_eq!(session.drain_for_send(), vec!["RPRT 0\n".to_string()]);
    }

    #[tokio::test]
    async fn unknown_command_still_replies_ok() {
        let (rotator_tx, _rx) = mpsc::channel(8);
        let server = RotProtocolServer::new("127.0.0.1".to_string(), 0, rotator_tx);
        let mut session = ProtocolSession::new();
        assert!(!server.handle_line("bogus", &mut session).await);
        assert_eq!(session.drain_for_send(), vec!["RPRT 0\n".to_string()]);
    }
}
