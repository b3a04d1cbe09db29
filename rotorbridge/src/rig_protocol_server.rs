//! rigctld-dialect TCP server and PTT crossover state machine (§4.6).
//! Grounded on the original `RigListenerThread`/`manualSetPtt` in
//! `rigif.py`: same bind-retry and single-session shape as the rotator
//! server, plus the CAT response rendezvous (discard-and-retry against a
//! shared, multi-producer reply queue) and the crossover heuristic for
//! split-frequency satellite operation.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{CatCommand, CatOpKind, CatResponse};
use crate::cat_service::{self, CatService};
use crate::error::ProtocolServerError;
use crate::protocol_session::{bind_with_retry, is_disconnect, LineAccumulator, ProtocolSession, BIND_RETRIES, BIND_RETRY_DELAY};

const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct RigState {
    pub ptt_intent: bool,
    pub rig_ptt: bool,
    pub last_freq_hz: i64,
}

pub struct RigProtocolServer {
    bind_host: String,
    port: u16,
    cat: Arc<dyn CatService>,
    cat_response_rx: Mutex<mpsc::Receiver<CatResponse>>,
    ptt_crossover_hz: i64,
    cat_rendezvous_timeout: Duration,
    state: Mutex<RigState>,
}

impl RigProtocolServer {
    pub fn new(
        bind_host: String,
        port: u16,
        cat: Arc<dyn CatService>,
        cat_response_rx: mpsc::Receiver<CatResponse>,
        ptt_crossover_hz: u64,
        cat_rendezvous_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(RigProtocolServer {
            bind_host,
            port,
            cat,
            cat_response_rx: Mutex::new(cat_response_rx),
            ptt_crossover_hz: ptt_crossover_hz as i64,
            cat_rendezvous_timeout,
            state: Mutex::new(RigState::default()),
        })
    }

    pub async fn snapshot(&self) -> RigState {
        *self.state.lock().await
    }

    /// Operator surface (§6): set transmit intent. Clearing it keys the
    /// transmitter off unconditionally, regardless of the current band.
    pub async fn manual_set_ptt(&self, intent: bool) {
        let mut state = self.state.lock().await;
        state.ptt_intent = intent;
        if !intent {
            let _ = self.cat.do_command(CatCommand::PttSet(false)).await;
            state.rig_ptt = false;
        }
    }

    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<(), ProtocolServerError> {
        let listener = bind_with_retry(&self.bind_host, self.port, BIND_RETRIES, BIND_RETRY_DELAY).await?;
        info!("rigctld server listening on {}:{}", self.bind_host, self.port);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!("rigctld: tracker connected from {peer}");
                            self.clone().serve(stream, token.clone()).await;
                            info!("rigctld: session ended, accepting again");
                        }
                        Err(e) => warn!("rigctld accept error: {e}"),
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
                            info!("rigctld: peer closed connection");
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
                            Err(_) => warn!("rigctld: discarding non-utf8 input"),
                        },
                        Err(e) if is_disconnect(&e) => {
                            info!("rigctld: peer disconnected: {e}");
                            return;
                        }
                        Err(e) => {
                            warn!("rigctld: read error: {e}");
                            return;
                        }
                    }
                }
                _ = flush_ticker.tick() => {}
            }

            for line in session.drain_for_send() {
                if let Err(e) = stream.write_all(line.as_bytes()).await {
                    warn!("rigctld: write error: {e}");
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
            Some("F") => {
                let Some(hz) = tokens.next().and_then(|s| s.parse::<i64>().ok()) else {
                    warn!("rigctld: malformed F command: {line:?}");
                    session.push("RPRT 0\n");
                    return false;
                };
                let _ = self.cat.do_command(CatCommand::FreqSet(hz.max(0) as u64)).await;
                self.apply_frequency(hz).await;
                session.push("RPRT 0\n");
                false
            }
            Some("f") => {
                let _ = self.cat.do_command(CatCommand::FreqGet).await;
                match self.await_cat_reply(CatOpKind::FreqGet).await {
                    Some(resp) => session.push(format!("{}\n", resp.data)),
                    None => {
                        warn!("rigctld: timed out waiting for frequency reply");
                        session.push("RPRT -1\n");
                    }
                }
                false
            }
            Some("M") => {
                let mode = tokens.next().unwrap_or("").to_string();
                let _ = self.cat.do_command(CatCommand::ModeSet(mode)).await;
                session.push("RPRT 0\n");
                false
            }
            Some("m") => {
                let _ = self.cat.do_command(CatCommand::ModeGet).await;
                match self.await_cat_reply(CatOpKind::ModeGet).await {
                    Some(resp) => {
                        let bandwidth = self.cat.bandwidth_for_mode(&resp.data);
                        session.push(format!("{} {}\n", resp.data, bandwidth));
                    }
                    None => {
                        warn!("rigctld: timed out waiting for mode reply");
                        session.push("RPRT -1\n");
                    }
                }
                false
            }
            Some("t") => {
                let ptt_intent = self.state.lock().await.ptt_intent;
                session.push(if ptt_intent { "1\n" } else { "0\n" });
                false
            }
            Some("q") => {
                session.push("RPRT 0\n");
                true
            }
            Some(other) => {
                warn!("rigctld: unrecognized command {other:?}");
                session.push("RPRT 0\n");
                false
            }
            None => false,
        }
    }

    /// PTT crossover (§4.6, §8 boundary: strict inequality at the
    /// threshold). `last_freq_hz` always advances to `new_hz`, whether or
    /// not the crossover fired.
    async fn apply_frequency(&self, new_hz: i64) {
        let mut state = self.state.lock().await;
        if state.ptt_intent && (new_hz - state.last_freq_hz).abs() > self.ptt_crossover_hz {
            let _ = self.cat.do_command(CatCommand::PttSet(true)).await;
            state.rig_ptt = true;
        }
        state.last_freq_hz = new_hz;
    }

    async fn await_cat_reply(&self, expected: CatOpKind) -> Option<CatResponse> {
        let deadline = tokio::time::Instant::now() + self.cat_rendezvous_timeout;
        let mut rx = self.cat_response_rx.lock().await;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(resp)) if cat_service::matches(&resp, expected) => return Some(resp),
                Ok(Some(resp)) => {
                    warn!("rigctld: discarding CAT reply for {:?} while awaiting {:?}", resp.op, expected);
                }
                Ok(None) | Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubCat {
        sent_ptt: AtomicBool,
    }

    #[async_trait]
    impl CatService for StubCat {
        async fn run(&self) -> bool {
            true
        }
        async fn terminate(&self) {}
        async fn do_command(&self, cmd: CatCommand) -> Result<(), crate::error::CatError> {
            if matches!(cmd, CatCommand::PttSet(true)) {
                self.sent_ptt.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
        fn mode_for_id(&self, _raw: u8) -> &'static str {
            "usb"
        }
        fn bandwidth_for_mode(&self, _mode: &str) -> &'static str {
            "2400"
        }
    }

    fn server() -> Arc<RigProtocolServer> {
        let (_tx, rx) = mpsc::channel(8);
        let cat = Arc::new(StubCat { sent_ptt: AtomicBool::new(false) });
        RigProtocolServer::new("127.0.0.1".to_string(), 0, cat, rx, 100_000, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn frequency_jump_exactly_at_threshold_does_not_key_ptt() {
        let server = server();
        server.state.lock().await.ptt_intent = true;
        server.state.lock().await.last_freq_hz = 145_800_000;
        server.apply_frequency(145_800_000 + 100_000).await;
        assert!(!server.snapshot().await.rig_ptt);
        assert_eq!(server.snapshot().await.last_freq_hz, 145_900_000);
    }

    #[tokio::test]
    async fn frequency_jump_one_hz_past_threshold_keys_ptt() {
        let server = server();
        server.state.lock().await.ptt_intent = true;
        server.state.lock().await.last_freq_hz = 145_800_000;
        server.apply_frequency(145_800_000 + 100_001).await;
        assert!(server.snapshot().await.rig_ptt);
    }

    #[tokio::test]
    async fn last_freq_hz_advances_even_when_crossover_does_not_fire() {
        let server = server();
        server.state.lock().await.ptt_intent = false;
        server.state.lock().await.last_freq_hz = 1_000_000;
        server.apply_frequency(50_000_000).await;
        assert_eq!(server.snapshot().await.last_freq_hz, 50_000_000);
        assert!(!server.snapshot().await.rig_ptt);
    }

    #[tokio::test]
    async fn get_ptt_reports_intent_not_actual_keyed_state() {
        let server = server();
        server.state.lock().await.ptt_intent = false;
        server.state.lock().await.rig_ptt = true;
        let mut session = ProtocolSession::new();
        server.handle_line("t", &mut session).await;
        assert_eq!(session.drain_for_send(), vec!["0\n".to_string()]);
    }

    #[tokio::test]
    async fn manual_clear_ptt_keys_off_regardless_of_band() {
        let server = server();
        server.state.lock().await.ptt_intent = true;
        server.state.lock().await.rig_ptt = true;
        server.manual_set_ptt(false).await;
        let state = server.snapshot().await;
        assert!(!state.ptt_intent);
        assert!(!state.rig_ptt);
    }

    #[tokio::test]
    async fn f_reply_times_out_when_no_cat_response_arrives() {
        let server = server();
        let mut session = ProtocolSession::new();
        server.handle_line("f", &mut session).await;
        assert_eq!(session.drain_for_send(), vec!["RPRT -1\n".to_string()]);
    }

    #[tokio::test]
    async fn await_cat_reply_skips_mismatched_head_of_queue() {
        let (tx, rx) = mpsc::channel(8);
        let cat = Arc::new(StubCat { sent_ptt: AtomicBool::new(false) });
        let server = RigProtocolServer::new("127.0.0.1".to_string(), 0, cat, rx, 100_000, Duration::from_millis(200));

        tx.send(CatResponse { ok: true, op: CatOpKind::ModeGet, data: "usb".to_string() }).await.unwrap();
        tx.send(CatResponse { ok: true, op: CatOpKind::FreqGet, data: "435850000".to_string() }).await.unwrap();

        let reply = server.await_cat_reply(CatOpKind::FreqGet).await.unwrap();
        assert_eq!(reply.data, "435850000");
    }
}
