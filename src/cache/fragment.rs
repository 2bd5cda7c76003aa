//! Sequence fragment window.
//!
//! Holds one window of residues of one sequence. Reads inside the window are
//! served locally; a miss fetches a new window starting at the requested
//! position. A short window means the sequence ended there, and that bound is
//! remembered so reads past it return nothing without a round trip.
use std::io::Write;

use log::trace;

use crate::{
    error::RaaError,
    protocol::{LineTransport, Request, TimedRead},
};

#[derive(Debug)]
pub struct FragmentCache {
    window: usize,
    seq: Option<u32>,
    /// 1-based position of `buffer[0]`.
    start: u32,
    buffer: Vec<u8>,
    /// Last valid position of `seq`, once a short window revealed it.
    last_position: Option<u32>,
}

impl FragmentCache {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            seq: None,
            start: 0,
            buffer: Vec::new(),
            last_position: None,
        }
    }

    pub fn covers(&self, seq: u32, position: u32) -> bool {
        self.seq == Some(seq)
            && position >= self.start
            && ((position - self.start) as usize) < self.buffer.len()
    }

    fn past_end(&self, seq: u32, position: u32) -> bool {
        self.seq == Some(seq) && self.last_position.is_some_and(|last| position > last)
    }

    pub fn clear(&mut self) {
        self.seq = None;
        self.start = 0;
        self.buffer.clear();
        self.last_position = None;
    }

    /// Returns up to `length` residues of `seq` from 1-based `first`. A result
    /// shorter than `length` means the sequence ended.
    pub fn read<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        seq: u32,
        first: u32,
        length: usize,
    ) -> Result<Vec<u8>, RaaError> {
        let mut out = Vec::with_capacity(length.min(self.window));
        if first == 0 {
            return Ok(out);
        }

        let mut position = first;
        while out.len() < length {
            if !self.covers(seq, position) {
                if self.past_end(seq, position) || self.fetch(transport, seq, position)? == 0 {
                    break;
                }
            }
            let offset = (position - self.start) as usize;
            let take = (self.buffer.len() - offset).min(length - out.len());
            out.extend_from_slice(&self.buffer[offset..offset + take]);
            position += take as u32;
        }
        Ok(out)
    }

    fn fetch<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        seq: u32,
        first: u32,
    ) -> Result<usize, RaaError> {
        let request = Request::new("gfrag")
            .arg("number", seq)
            .arg("start", first)
            .arg("length", self.window);
        let line = transport.exchange(&request)?;

        let data = match line.strip_prefix("length=").and_then(|l| l.split_once('&')) {
            Some((_, data)) => data.as_bytes(),
            None if line.starts_with("code=") => return Ok(0),
            None => {
                return Err(RaaError::decode(
                    "gfrag",
                    format!("expected length=..&data, got {:?}", truncate(&line)),
                ));
            }
        };
        if data.is_empty() {
            return Ok(0);
        }

        let data = &data[..data.len().min(self.window)];
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.seq = Some(seq);
        self.start = first;
        self.last_position = if data.len() < self.window {
            Some(first + data.len() as u32 - 1)
        } else {
            None
        };
        trace!(
            "fragment window seq={seq} start={first} len={} end={:?}",
            data.len(),
            self.last_position
        );
        Ok(data.len())
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(40) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::mock::{ScriptedReader, transport};

    use super::*;

    #[test]
    fn second_read_is_served_from_window() {
        let mut link = transport(ScriptedReader::lines(&["length=10&ACGTACGTAC"]));
        let mut cache = FragmentCache::new(10);

        let first = cache.read(&mut link, 3, 2, 5).unwrap();
        let again = cache.read(&mut link, 3, 2, 5).unwrap();

        assert_eq!(first, b"ACGTA");
        assert_eq!(first, again);
        assert_eq!(link.writer_ref().requests().len(), 1);
    }

    #[test]
    fn long_read_fetches_successive_windows() {
        let reader = ScriptedReader::lines(&["length=4&ACGT", "length=4&TTGG", "length=2&CA"]);
        let mut link = transport(reader);
        let mut cache = FragmentCache::new(4);

        let seq = cache.read(&mut link, 8, 1, 10).unwrap();

        assert_eq!(seq, b"ACGTTTGGCA");
        assert_eq!(
            link.writer_ref().requests(),
            vec![
                "gfrag&number=8&start=1&length=4",
                "gfrag&number=8&start=5&length=4",
                "gfrag&number=8&start=9&length=4",
            ]
        );
    }

    #[test]
    fn known_end_short_circuits() {
        let mut link = transport(ScriptedReader::lines(&["length=3&ACG"]));
        let mut cache = FragmentCache::new(10);

        assert_eq!(cache.read(&mut link, 1, 1, 3).unwrap(), b"ACG");
        assert!(cache.read(&mut link, 1, 4, 10).unwrap().is_empty());
        assert!(cache.read(&mut link, 1, 50, 1).unwrap().is_empty());
        assert_eq!(link.writer_ref().requests().len(), 1);
    }

    #[test]
    fn partial_result_when_server_runs_dry() {
        let reader = ScriptedReader::lines(&["length=4&GTAC", "length=0&"]);
        let mut link = transport(reader);
        let mut cache = FragmentCache::new(4);

        assert_eq!(cache.read(&mut link, 2, 7, 10).unwrap(), b"GTAC");
    }

    #[test]
    fn decode_failure_leaves_window_untouched() {
        let reader = ScriptedReader::lines(&["length=6&AAAAAA", "what?"]);
        let mut link = transport(reader);
        let mut cache = FragmentCache::new(6);

        cache.read(&mut link, 1, 1, 6).unwrap();
        let err = cache.read(&mut link, 2, 1, 6).unwrap_err();
        assert!(matches!(err, RaaError::Decode { command: "gfrag", .. }));

        assert_eq!(cache.read(&mut link, 1, 2, 3).unwrap(), b"AAA");
        assert_eq!(link.writer_ref().requests().len(), 2);
    }
}
