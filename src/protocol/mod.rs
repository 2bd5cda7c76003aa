//! Wire codec for the ACNUC remote access protocol.
//!
//! The protocol is ASCII and line oriented. A request is a single line made of a
//! command token followed by `&key=value` pairs. An answer is one or more
//! `\n`-terminated lines; multi-line answers announce their size in a leading
//! field such as `nl=<count>`.
//!
//! # Key Components
//!
//! - [`Request`]: builder for one request line, with quote protection.
//! - [`ResponseRecord`]: transient field map parsed from one answer line.
//! - [`LineTransport`]: the duplex stream. Accumulates physical reads into logical
//!   lines, detects the server-update sentinel, polls with a bounded wait and
//!   switches to the zlib filter for bulk transfers.
//!
//! # Sentinels
//!
//! - `acnuc stop for update` ends the whole session, not only the current call.
//! - `<command> END.` closes a streaming answer.
//! - the single byte 27 written by the client asks the server to cancel the
//!   request in flight. Its acknowledgment is still drained like any answer.
#[cfg(test)]
pub(crate) mod mock;
mod request;
mod response;
mod transport;

pub use request::{Request, protect_quotes, unprotect_quotes};
pub use response::{ResponseRecord, take_quoted};
pub use transport::{
    BulkStream, CANCEL_MARKER, Chunk, LineTransport, PHYSICAL_READ_SIZE, SERVER_UPDATE_MESSAGE,
    TimedRead,
};
