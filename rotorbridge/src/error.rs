//! Typed error enums at each subsystem boundary (§10.2). `anyhow` takes over
//! at the binary's outermost edges — `main` and the worker task boundaries —
//! where subsystem errors are unified for logging and graceful task exit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RotatorClientError {
    #[error("sending {op} to controller failed: {source}")]
    Send {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("waiting for {op} reply from controller failed: {source}")]
    Recv {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("reply to {op} was not valid UTF-8")]
    InvalidReply { op: &'static str },
}

#[derive(Debug, Error)]
pub enum CatError {
    #[error("opening serial port {device} failed: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("writing CAT frame for {op} failed: {source}")]
    Write {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out waiting for a CAT reply to {op}")]
    Timeout { op: &'static str },
    #[error("CAT worker is not running")]
    NotRunning,
}

#[derive(Debug, Error)]
pub enum ProtocolServerError {
    #[error("binding {addr} failed after {retries} retries: {source}")]
    BindExhausted {
        addr: String,
        retries: u32,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: ini::Error,
    },
}
