//! UDP transmitter for position telemetry (§4.2). Grounded on
//! `udp_tx.rs`'s `UdpTransmitter`: a send failure is logged and otherwise
//! ignored, never allowed to take the simulator down.

use rotorsim_types::{Axis, PositionEvent};
use tokio::net::UdpSocket;
use tracing::warn;

pub struct EventTransmitter {
    socket: UdpSocket,
    target: String,
}

impl EventTransmitter {
    pub async fn bind(target: String) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(EventTransmitter { socket, target })
    }

    pub async fn send(&self, axis: Axis, degrees: i32) {
        let payload = PositionEvent { axis, degrees }.encode();
        if let Err(e) = self.socket.send_to(payload.as_bytes(), &self.target).await {
            warn!("position event send to {}: {e}", self.target);
        }
    }
}
