//! Interruptible waits for long-running requests.
//!
//! While a request is in flight the socket is polled with a bounded wait. Each
//! time the wait expires the caller's interrupt predicate is consulted; the first
//! time it answers `true` a single cancel byte is written. Polling then carries
//! on until the server answers. The answer, which may be the server's
//! acknowledgment of the cancel, is returned unchanged.
use std::{io::Write, time::Duration};

use log::debug;

use crate::{
    error::RaaError,
    protocol::{LineTransport, TimedRead},
};

/// Outcome of [`await_reply`]: the answer line, and whether a cancel was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub line: String,
    pub cancelled: bool,
}

pub fn await_reply<R, W, F>(
    transport: &mut LineTransport<R, W>,
    poll: Duration,
    mut interrupt: F,
) -> Result<Reply, RaaError>
where
    R: TimedRead,
    W: Write,
    F: FnMut() -> bool,
{
    let mut cancelled = false;
    loop {
        if let Some(line) = transport.poll_line(poll)? {
            return Ok(Reply { line, cancelled });
        }
        if !cancelled && interrupt() {
            debug!("interrupt requested, cancelling request in flight");
            transport.send_cancel()?;
            cancelled = true;
        }
    }
}
