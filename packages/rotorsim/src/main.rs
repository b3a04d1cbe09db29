//! rotorsim — stand-in UDP hardware simulator for the az/el rotator
//! controller (§4.1-§4.2). Runs two concurrent loops, mirroring
//! `uwb-simulator`'s split between a physics tick and a network-facing
//! task: a request-port command server that answers exactly like the real
//! controller, and a fixed-rate tick that advances both axes toward their
//! commanded targets and streams position telemetry out the event port.

mod commands;
mod state;
mod udp_tx;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rotorsim_types::{Axis, WireCommand, DEFAULT_EVENT_PORT, DEFAULT_REQUEST_PORT, MAX_DATAGRAM_LEN};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{info, warn};

use state::RotorState;
use udp_tx::EventTransmitter;

#[derive(Parser, Debug)]
#[command(name = "rotorsim", about = "Az/el rotator controller simulator")]
struct Args {
    /// Address this process binds both UDP sockets on.
    #[arg(long, default_value = "127.0.0.1")]
    bind_host: String,
    /// Command/reply port (mirrors the bridge's `request_port`).
    #[arg(long, default_value_t = DEFAULT_REQUEST_PORT)]
    request_port: u16,
    /// Address the bridge's event listener is bound on, for telemetry.
    #[arg(long, default_value = "127.0.0.1:8889")]
    event_target: String,
    /// Physics tick rate.
    #[arg(long, default_value_t = 20)]
    tick_hz: u64,
    /// Maximum motor slew rate at 100% speed, in degrees/second.
    #[arg(long, default_value_t = 12.0)]
    max_deg_per_sec: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rotorsim=info".into()))
        .init();

    let args = Args::parse();
    info!(
        "rotorsim listening on {}:{} (events -> {})",
        args.bind_host, args.request_port, args.event_target
    );

    let state = Arc::new(Mutex::new(RotorState::new()));

    let socket = match UdpSocket::bind((args.bind_host.as_str(), args.request_port)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("failed to bind {}:{}: {e}", args.bind_host, args.request_port);
            std::process::exit(1);
        }
    };

    let events = match EventTransmitter::bind(args.event_target.clone()).await {
        Ok(tx) => tx,
        Err(e) => {
            warn!("failed to bind event transmitter socket: {e}");
            std::process::exit(1);
        }
    };

    let tick_state = state.clone();
    let tick_period = Duration::from_millis(1000 / args.tick_hz.max(1));
    tokio::spawn(async move {
        run_physics(tick_state, events, tick_period, args.max_deg_per_sec).await;
    });

    run_command_server(socket, state).await;
}

/// Advances both axes once per tick and emits a telemetry datagram whenever
/// a degree-rounded position actually changed since the last tick, rather
/// than flooding the event port at the full tick rate (§4.2).
async fn run_physics(state: Arc<Mutex<RotorState>>, events: EventTransmitter, period: Duration, max_deg_per_sec: f64) {
    let mut ticker = tokio::time::interval(period);
    let mut last_az = i32::MIN;
    let mut last_el = i32::MIN;
    loop {
        ticker.tick().await;
        let (az, el) = {
            let mut state = state.lock().await;
            state.tick(max_deg_per_sec, period);
            (state.az.degrees.round() as i32, state.el.degrees.round() as i32)
        };
        if az != last_az {
            events.send(Axis::Az, az).await;
            last_az = az;
        }
        if el != last_el {
            events.send(Axis::El, el).await;
            last_el = el;
        }
    }
}

async fn run_command_server(socket: UdpSocket, state: Arc<Mutex<RotorState>>) {
    let mut buf = [0u8; MAX_DATAGRAM_LEN];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("command socket recv error: {e}");
                continue;
            }
        };
        let Ok(raw) = std::str::from_utf8(&buf[..n]) else {
            warn!("discarding non-utf8 command from {peer}");
            continue;
        };
        let reply = match WireCommand::parse(raw.trim()) {
            Ok(cmd) => {
                let mut state = state.lock().await;
                commands::handle(&mut state, cmd)
            }
            Err(e) => {
                warn!("unrecognized command from {peer}: {e}");
                rotorsim_types::NAK.to_string()
            }
        };
        if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
            warn!("reply send to {peer} failed: {e}");
        }
    }
}
