//! Position-event UDP listener (§4.3). Grounded on the original `EvntIf`
//! thread (bind the event port, block on `recvfrom`, parse `"axis:degrees"`,
//! hand the result to a callback) and on this codebase's `uwb_hub.rs`
//! recv-loop convention: log and keep listening on a bad datagram rather
//! than let one malformed packet kill the worker.

use tokio_util::sync::CancellationToken;
use tracing::warn;

use rotorsim_types::{PositionEvent, MAX_DATAGRAM_LEN};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Binds `bind_host:event_port` and forwards every well-formed
/// [`PositionEvent`] onto `position_tx` until cancelled. Bind failure is
/// logged and the task exits without panicking, matching the rest of this
/// codebase's never-crash-the-process posture for best-effort subsystems.
pub async fn run(
    bind_host: &str,
    event_port: u16,
    position_tx: mpsc::Sender<PositionEvent>,
    token: CancellationToken,
) {
    let socket = match UdpSocket::bind((bind_host, event_port)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("event receiver could not bind {bind_host}:{event_port}: {e}");
            return;
        }
    };

    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, _peer)) => {
                        match std::str::from_utf8(&buf[..n]) {
                            Ok(raw) => match PositionEvent::parse(raw.trim()) {
                                Ok(event) => {
                                    let _ = position_tx.send(event).await;
                                }
                                Err(e) => warn!("discarding malformed position event: {e}"),
                            },
                            Err(_) => warn!("discarding non-utf8 position event datagram"),
                        }
                    }
                    Err(e) => warn!("event receiver recv error: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotorsim_types::Axis;

    #[tokio::test]
    async fn forwards_well_formed_events_and_ignores_garbage() {
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let child = token.clone();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        drop(listener);

        let handle = tokio::spawn(run(
            "127.0.0.1",
            listen_addr.port(),
            tx,
            child,
        ));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        sender.send_to(b"garbage", listen_addr).await.unwrap();
        sender.send_to(b"az:123", listen_addr).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        token.cancel();
        handle.await.unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event, PositionEvent { axis: Axis::Az, degrees: 123 });
        assert!(rx.try_recv().is_err());
    }
}
