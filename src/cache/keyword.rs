//! Blocks of keywords matching a wildcard pattern.
use std::{collections::VecDeque, io::Write};

use log::trace;

use crate::{
    error::RaaError,
    protocol::{LineTransport, Request, ResponseRecord, TimedRead, unprotect_quotes},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub rank: u32,
    pub name: String,
}

#[derive(Debug)]
pub struct KeywordCache {
    block: usize,
    pending: VecDeque<KeywordMatch>,
    /// Rank of the match last handed out, where the next block resumes.
    last: u32,
    /// The last block was short, so the server has nothing further.
    exhausted: bool,
}

impl KeywordCache {
    pub fn new(block: usize) -> Self {
        Self {
            block: block.max(1),
            pending: VecDeque::new(),
            last: 0,
            exhausted: true,
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.last = 0;
        self.exhausted = true;
    }

    /// Starts a new search and returns its first match. `*` matches any run of
    /// characters, `@` exactly one.
    pub fn start<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        pattern: &str,
    ) -> Result<Option<KeywordMatch>, RaaError> {
        self.clear();
        let request = Request::new("nextmatchkey")
            .arg("num", 2)
            .quoted("pattern", pattern)
            .arg("count", self.block);
        self.fetch(transport, &request)?;
        self.next(transport)
    }

    /// Next match of the current search.
    pub fn next<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
    ) -> Result<Option<KeywordMatch>, RaaError> {
        loop {
            if let Some(hit) = self.pending.pop_front() {
                self.last = hit.rank;
                return Ok(Some(hit));
            }
            if self.exhausted {
                return Ok(None);
            }
            let request = Request::new("nextmatchkey")
                .arg("num", self.last)
                .arg("count", self.block);
            self.fetch(transport, &request)?;
        }
    }

    fn fetch<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        request: &Request,
    ) -> Result<(), RaaError> {
        self.exhausted = true;
        let head = transport.exchange(request)?;
        let head = ResponseRecord::parse("nextmatchkey", &head)?;
        head.expect_ok()?;
        let count: usize = head.require("count")?;

        let lines = transport.read_lines(count)?;
        let mut block = VecDeque::with_capacity(count);
        for line in &lines {
            block.push_back(parse_match(line)?);
        }
        trace!("nextmatchkey: block of {count}");
        self.pending = block;
        self.exhausted = count < self.block;
        Ok(())
    }
}

/// `num=<rank>&name=<rest of line>`; the name may itself contain `&`.
fn parse_match(line: &str) -> Result<KeywordMatch, RaaError> {
    let bad = || RaaError::decode("nextmatchkey", format!("bad match line {line:?}"));
    let (rank, rest) = line
        .strip_prefix("num=")
        .and_then(|l| l.split_once('&'))
        .ok_or_else(bad)?;
    let rank = rank.trim().parse().map_err(|_| bad())?;
    let name = rest.split_once('=').map(|(_, name)| name).ok_or_else(bad)?;
    Ok(KeywordMatch {
        rank,
        name: unprotect_quotes(name).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use crate::protocol::mock::{ScriptedReader, transport};

    use super::*;

    #[test]
    fn short_block_ends_search() {
        let reader = ScriptedReader::lines(&["code=0&count=2", "num=40&name=HEMOGLOBIN", "num=52&name=HEME & IRON"]);
        let mut link = transport(reader);
        let mut cache = KeywordCache::new(2001);

        let first = cache.start(&mut link, "HEM*").unwrap().unwrap();
        assert_eq!(first.rank, 40);
        let second = cache.next(&mut link).unwrap().unwrap();
        assert_eq!(second.name, "HEME & IRON");
        assert_eq!(cache.next(&mut link).unwrap(), None);
        assert_eq!(
            link.writer_ref().requests(),
            vec![r#"nextmatchkey&num=2&pattern="HEM*"&count=2001"#]
        );
    }

    #[test]
    fn full_block_asks_for_more() {
        let reader = ScriptedReader::lines(&[
            "code=0&count=2",
            "num=7&name=A1",
            "num=8&name=A2",
            "code=0&count=0",
        ]);
        let mut link = transport(reader);
        let mut cache = KeywordCache::new(2);

        assert_eq!(cache.start(&mut link, "A@").unwrap().unwrap().rank, 7);
        assert_eq!(cache.next(&mut link).unwrap().unwrap().rank, 8);
        assert_eq!(cache.next(&mut link).unwrap(), None);
        assert_eq!(
            link.writer_ref().requests()[1],
            "nextmatchkey&num=8&count=2"
        );
        assert_eq!(cache.next(&mut link).unwrap(), None);
        assert_eq!(link.writer_ref().requests().len(), 2);
    }

    #[test]
    fn no_match() {
        let mut link = transport(ScriptedReader::lines(&["code=0&count=0"]));
        let mut cache = KeywordCache::new(2001);

        assert_eq!(cache.start(&mut link, "ZZZ*").unwrap(), None);
    }
}
