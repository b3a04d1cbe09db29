//! Shared plumbing for the two hamlib-protocol TCP servers (§4.5, §4.6).
//! Grounded on the original `AntListenerThread`/`RigListenerThread` (bind
//! with retry, single accepted connection, line accumulator, reply queue
//! popped most-recent-first) with the disconnect detection redesigned per
//! §9 REDESIGN FLAGS to match on `std::io::ErrorKind` instead of
//! platform error-code substrings.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::warn;

use crate::bus::ReplySink;
use crate::error::ProtocolServerError;

pub const BIND_RETRIES: u32 = 5;
pub const BIND_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Binds `bind_host:port`, retrying on `AddrInUse` up to `retries` times
/// with `delay` between attempts (§4.5, §7 point 2).
pub async fn bind_with_retry(
    bind_host: &str,
    port: u16,
    retries: u32,
    delay: Duration,
) -> Result<TcpListener, ProtocolServerError> {
    let addr = format!("{bind_host}:{port}");
    let mut last_err = None;
    for attempt in 0..=retries {
        match TcpListener::bind(&addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!("bind {addr} failed (attempt {}/{}): {e}", attempt + 1, retries + 1);
                last_err = Some(e);
                if attempt < retries {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(ProtocolServerError::BindExhausted {
        addr,
        retries,
        source: last_err.expect("at least one bind attempt was made"),
    })
}

/// Classifies an I/O error as a peer disconnect per §10.2, rather than
/// string-matching a platform error code (§9 REDESIGN FLAGS).
pub fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}

/// Accumulates partial reads and yields complete newline-terminated lines.
#[derive(Default)]
pub struct LineAccumulator {
    buffer: String,
}

impl LineAccumulator {
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            lines.push(line);
            self.buffer.drain(..=pos);
        }
        lines
    }
}

/// Per-connection reply queue. Producers (including async rotator/CAT
/// replies) push onto an mpsc channel; the session's write side drains the
/// channel into a `VecDeque` and pops from the tail, so the most recently
/// queued line is sent first — matching the observed source convention
/// (§4.5) rather than strict FIFO.
pub struct ProtocolSession {
    reply_rx: mpsc::Receiver<String>,
    reply_tx: mpsc::Sender<String>,
    queue: VecDeque<String>,
}

impl ProtocolSession {
    pub fn new() -> Self {
        let (reply_tx, reply_rx) = mpsc::channel(64);
        ProtocolSession {
            reply_rx,
            reply_tx,
            queue: VecDeque::new(),
        }
    }

    /// A cloneable sink any async reply source (e.g. `RotatorService`'s
    /// `get_pos`) can hold onto independently of this session's lifetime.
    pub fn reply_sink(&self) -> ReplySink {
        self.reply_tx.clone()
    }

    /// Queues an immediate reply line (e.g. `"RPRT 0\n"`), same path as an
    /// async reply.
    pub fn push(&mut self, line: impl Into<String>) {
        let _ = self.reply_tx.try_send(line.into());
    }

    fn drain_channel(&mut self) {
        while let Ok(line) = self.reply_rx.try_recv() {
            self.queue.push_back(line);
        }
    }

    /// Pulls every line currently available, most-recently-queued first.
    pub fn drain_for_send(&mut self) -> Vec<String> {
        self.drain_channel();
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(line) = self.queue.pop_back() {
            out.push(line);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_accumulator_splits_complete_lines_and_keeps_partial_tail() {
        let mut acc = LineAccumulator::default();
        let lines = acc.push("p\nP 12");
        assert_eq!(lines, vec!["p".to_string()]);
        let lines = acc.push("3.4 45\n");
        assert_eq!(lines, vec!["123.4 45".to_string()]);
    }

    #[test]
    fn line_accumulator_strips_trailing_cr() {
        let mut acc = LineAccumulator::default();
        let lines = acc.push("q\r\n");
        assert_eq!(lines, vec!["q".to_string()]);
    }

    #[tokio::test]
    async fn drain_for_send_pops_most_recent_first() {
        let mut session = ProtocolSession::new();
        session.push("first");
        session.push("second");
        session.push("third");
        assert_eq!(
            session.drain_for_send(),
            vec!["third".to_string(), "second".to_string(), "first".to_string()]
        );
        assert!(session.is_empty());
    }

    #[test]
    fn disconnect_classification_matches_expected_error_kinds() {
        assert!(is_disconnect(&std::io::Error::from(std::io::ErrorKind::ConnectionReset)));
        assert!(is_disconnect(&std::io::Error::from(std::io::ErrorKind::BrokenPipe)));
        assert!(!is_disconnect(&std::io::Error::from(std::io::ErrorKind::TimedOut)));
    }
}
