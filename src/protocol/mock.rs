//! In-memory stand-ins for a socket, used by unit tests.
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    time::Duration,
};

use crate::{config::SessionConfig, session::Session};

use super::{LineTransport, TimedRead};

enum Step {
    Bytes(Vec<u8>),
    Stall,
}

/// Read side replaying a fixed script of server output.
#[derive(Default)]
pub(crate) struct ScriptedReader {
    steps: VecDeque<Step>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(lines: &[&str]) -> Self {
        lines.iter().fold(Self::new(), |reader, l| reader.line(l))
    }

    pub fn line(self, line: &str) -> Self {
        self.bytes(format!("{line}\n").as_bytes())
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.steps.push_back(Step::Bytes(bytes.to_vec()));
        self
    }

    /// The next read times out.
    pub fn stall(mut self) -> Self {
        self.steps.push_back(Step::Stall);
        self
    }
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Step::Stall) => Err(io::Error::new(io::ErrorKind::WouldBlock, "stalled")),
            Some(Step::Bytes(bytes)) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.steps.push_front(Step::Bytes(bytes[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }
}

impl TimedRead for ScriptedReader {
    fn set_read_timeout(&self, _: Option<Duration>) -> io::Result<()> {
        Ok(())
    }
}

/// Write side keeping everything the client sent.
#[derive(Default)]
pub(crate) struct RecordingWriter {
    out: Vec<u8>,
}

impl RecordingWriter {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.out).into_owned()
    }

    /// Request lines sent so far, without their terminators.
    pub fn requests(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }

    pub fn cancel_markers(&self) -> usize {
        self.out.iter().filter(|b| **b == super::CANCEL_MARKER).count()
    }
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) type MockTransport = LineTransport<ScriptedReader, RecordingWriter>;

pub(crate) fn transport(reader: ScriptedReader) -> MockTransport {
    LineTransport::new(reader, RecordingWriter::default())
}

pub(crate) type MockSession = Session<ScriptedReader, RecordingWriter>;

/// A session past its banner, answering with `lines` in order.
pub(crate) fn session(lines: &[&str]) -> MockSession {
    let reader = ScriptedReader::lines(&["OK acnuc socket started"]);
    let reader = lines.iter().fold(reader, |reader, l| reader.line(l));
    Session::from_streams(
        reader,
        RecordingWriter::default(),
        "localhost",
        5558,
        SessionConfig::default(),
    )
    .unwrap()
}
