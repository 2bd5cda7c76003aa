use std::{
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    net::TcpStream,
    time::Duration,
};

use flate2::bufread::ZlibDecoder;
use log::{trace, warn};

use crate::error::RaaError;

use super::Request;

/// Line the server sends in place of any answer while a database update runs.
pub const SERVER_UPDATE_MESSAGE: &str = "acnuc stop for update";

/// Byte the client writes mid-request to ask the server to abandon it (ESC).
pub const CANCEL_MARKER: u8 = 27;

/// Largest piece handed back by one physical read.
pub const PHYSICAL_READ_SIZE: usize = 5000;

/// Read side of a connection that supports a bounded wait.
pub trait TimedRead: Read {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimedRead for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }
}

/// Result of one physical read: at most [`PHYSICAL_READ_SIZE`] bytes, and
/// whether the newline ending the logical line was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Open,
    Down,
}

/// Synchronous line transport: one request out, one logical response in.
pub struct LineTransport<R: TimedRead, W: Write> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    state: LinkState,
}

impl<R: TimedRead, W: Write> LineTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            state: LinkState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn writer_ref(&self) -> &W {
        self.writer.get_ref()
    }

    /// Writes and flushes one request line.
    pub fn send(&mut self, request: &Request) -> Result<(), RaaError> {
        self.ensure_open()?;
        trace!("-> {}", request.to_line().trim_end());
        let written = self
            .writer
            .write_all(request.to_line().as_bytes())
            .and_then(|_| self.writer.flush());
        written.map_err(|e| self.fail(e.into()))
    }

    /// Sends `request` and returns the first logical line of the answer.
    pub fn exchange(&mut self, request: &Request) -> Result<String, RaaError> {
        self.send(request)?;
        self.read_line()
    }

    /// One physical read, stopping at a newline or after
    /// [`PHYSICAL_READ_SIZE`] bytes.
    pub fn read_chunk(&mut self) -> Result<Chunk, RaaError> {
        self.ensure_open()?;
        let mut bytes = Vec::new();
        let mut complete = false;

        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.fail(e.into())),
            };
            if available.is_empty() {
                if bytes.is_empty() {
                    return Err(self.fail(RaaError::ConnectionDown));
                }
                break;
            }

            let room = PHYSICAL_READ_SIZE - bytes.len();
            let window = &available[..available.len().min(room)];
            if let Some(pos) = window.iter().position(|b| *b == b'\n') {
                bytes.extend_from_slice(&window[..=pos]);
                self.reader.consume(pos + 1);
                complete = true;
                break;
            }
            let taken = window.len();
            bytes.extend_from_slice(window);
            self.reader.consume(taken);
            if bytes.len() == PHYSICAL_READ_SIZE {
                break;
            }
        }

        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if complete && text == SERVER_UPDATE_MESSAGE {
            return Err(self.fail(RaaError::ServerUpdate));
        }
        Ok(Chunk { text, complete })
    }

    /// Accumulates physical reads until a complete line was seen.
    pub fn read_line(&mut self) -> Result<String, RaaError> {
        let mut line = String::new();
        loop {
            let chunk = self.read_chunk()?;
            line.push_str(&chunk.text);
            if chunk.complete {
                trace!("<- {line}");
                return Ok(line);
            }
        }
    }

    pub fn read_lines(&mut self, count: usize) -> Result<Vec<String>, RaaError> {
        (0..count).map(|_| self.read_line()).collect()
    }

    /// Waits at most `wait` for an answer to start arriving. Once it does, the
    /// whole line is read without a timeout.
    pub fn poll_line(&mut self, wait: Duration) -> Result<Option<String>, RaaError> {
        self.ensure_open()?;
        if !self.reader.buffer().is_empty() {
            return self.read_line().map(Some);
        }

        if let Err(e) = self.reader.get_ref().set_read_timeout(Some(wait)) {
            return Err(self.fail(e.into()));
        }
        let polled = loop {
            match self.reader.fill_buf() {
                Ok(buf) => break Ok(!buf.is_empty()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    break Err(None);
                }
                Err(e) => break Err(Some(e)),
            }
        };
        if let Err(e) = self.reader.get_ref().set_read_timeout(None) {
            return Err(self.fail(e.into()));
        }

        match polled {
            Ok(true) => self.read_line().map(Some),
            Ok(false) => Err(self.fail(RaaError::ConnectionDown)),
            Err(None) => Ok(None),
            Err(Some(e)) => Err(self.fail(e.into())),
        }
    }

    /// Writes the single cancel byte and flushes.
    pub fn send_cancel(&mut self) -> Result<(), RaaError> {
        self.ensure_open()?;
        warn!("sending cancel marker");
        let written = self
            .writer
            .write_all(&[CANCEL_MARKER])
            .and_then(|_| self.writer.flush());
        written.map_err(|e| self.fail(e.into()))
    }

    /// Switches the read side to the compressed stream that follows a bulk
    /// request. Plain reads resume once the returned stream is finished.
    pub fn bulk(&mut self) -> Result<BulkStream<'_, R, W>, RaaError> {
        self.ensure_open()?;
        Ok(BulkStream {
            lines: BufReader::new(ZlibDecoder::new(&mut self.reader)),
            writer: &mut self.writer,
            state: &mut self.state,
        })
    }

    /// Writes `quit` without waiting for anything.
    pub fn shutdown(&mut self) {
        if self.is_open() {
            let _ = self
                .writer
                .write_all(b"quit\n")
                .and_then(|_| self.writer.flush());
            self.state = LinkState::Down;
        }
    }

    fn ensure_open(&self) -> Result<(), RaaError> {
        match self.state {
            LinkState::Open => Ok(()),
            LinkState::Down => Err(RaaError::SessionClosed),
        }
    }

    fn fail(&mut self, err: RaaError) -> RaaError {
        if err.is_fatal() {
            warn!("connection terminated: {err}");
            self.state = LinkState::Down;
        }
        err
    }
}

/// Line reader over the compressed section of the byte stream.
pub struct BulkStream<'a, R: TimedRead, W: Write> {
    lines: BufReader<ZlibDecoder<&'a mut BufReader<R>>>,
    writer: &'a mut BufWriter<W>,
    state: &'a mut LinkState,
}

impl<R: TimedRead, W: Write> BulkStream<'_, R, W> {
    pub fn read_line(&mut self) -> Result<String, RaaError> {
        let mut bytes = Vec::new();
        let read = match self.lines.read_until(b'\n', &mut bytes) {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e.into())),
        };
        if read == 0 {
            return Err(self.fail(RaaError::ConnectionDown));
        }
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn send_cancel(&mut self) -> Result<(), RaaError> {
        warn!("sending cancel marker during bulk transfer");
        let written = self
            .writer
            .write_all(&[CANCEL_MARKER])
            .and_then(|_| self.writer.flush());
        written.map_err(|e| self.fail(e.into()))
    }

    /// Consumes the compressed stream up to its end so plain reads line up
    /// with the next answer.
    pub fn finish(mut self) -> Result<(), RaaError> {
        match io::copy(&mut self.lines, &mut io::sink()) {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fail(e.into())),
        }
    }

    fn fail(&mut self, err: RaaError) -> RaaError {
        warn!("connection terminated during bulk transfer: {err}");
        *self.state = LinkState::Down;
        err
    }
}
