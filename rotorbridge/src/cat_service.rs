//! `CATService` contract (§4.4). One concrete backend — the FT-817-family
//! serial driver in `cat_ft817.rs` — implements this trait; a CI-V backend
//! is named in the external-interfaces section but intentionally left
//! unimplemented (no reference framing to ground it on, see DESIGN.md).

use async_trait::async_trait;

use crate::bus::{CatCommand, CatOpKind, CatResponse};
use crate::error::CatError;

/// Canonical mode names shared by every backend's `mode_for_id` /
/// `bandwidth_for_mode` translation (§4.4).
pub const CANONICAL_MODES: &[&str] = &[
    "lsb", "usb", "cw", "cwr", "am", "fm", "dig", "pkt", "rtty", "rttyr", "wfm", "dv",
];

#[async_trait]
pub trait CatService: Send + Sync {
    /// Opens the serial port and starts the worker task. Returns `false`
    /// (logged) rather than propagating a panic on failure, per §4.4's
    /// "Failure during run() is reported by a boolean return."
    async fn run(&self) -> bool;

    /// Closes the port and joins the worker task.
    async fn terminate(&self);

    /// Submits a command; the reply (if any) arrives asynchronously on the
    /// CAT response queue tagged with `cmd.kind()`.
    async fn do_command(&self, cmd: CatCommand) -> Result<(), CatError>;

    /// Translates a transceiver-native mode code to the canonical set.
    /// Never fails: an unrecognized native code maps to `"unknown"` rather
    /// than erroring, since the transceiver itself may report a mode this
    /// backend has no canonical mapping for.
    fn mode_for_id(&self, raw: u8) -> &'static str;

    /// The IF passband bandwidth conventionally associated with a
    /// canonical mode name, for the `m` (get mode) rigctld reply.
    fn bandwidth_for_mode(&self, mode: &str) -> &'static str;
}

/// Matches a pending CAT command against an op kind for the rigctld
/// response-rendezvous loop (§4.6).
pub fn matches(response: &CatResponse, expected: CatOpKind) -> bool {
    response.op == expected
}
