//! Ring of short-list links.
//!
//! Short lists are chains of (value, next) cells stored in the SHRT file. One
//! `readshrt` request returns a run of consecutive cells of a chain, which are
//! kept as (pointer, value, next) triples in a fixed-size ring.
use std::{collections::VecDeque, io::Write};

use log::trace;

use crate::{
    error::RaaError,
    protocol::{LineTransport, Request, ResponseRecord, TimedRead},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    point: u32,
    value: u32,
    next: u32,
}

#[derive(Debug)]
pub struct ShortLinkCache {
    capacity: usize,
    batch: usize,
    ring: VecDeque<Link>,
}

impl ShortLinkCache {
    pub fn new(capacity: usize, batch: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            batch: batch.clamp(1, capacity),
            ring: VecDeque::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Value stored at `point` and the pointer to the next cell (0 at the end
    /// of the chain). `total` is the number of records of the SHRT file.
    pub fn lookup<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        point: u32,
        total: u32,
    ) -> Result<Option<(u32, u32)>, RaaError> {
        if point < 2 || point > total {
            return Ok(None);
        }
        if let Some(hit) = self.find(point) {
            return Ok(Some(hit));
        }
        if !self.load(transport, point)? {
            return Ok(None);
        }
        self.find(point).map(Some).ok_or_else(|| {
            RaaError::decode("readshrt", format!("answer does not start at cell {point}"))
        })
    }

    /// Every value of the chain starting at `head`. A chain longer than the
    /// file, i.e. one looping back on itself past `head`, fails to decode.
    pub fn walk<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        head: u32,
        total: u32,
    ) -> Result<Vec<u32>, RaaError> {
        let mut values = Vec::new();
        let mut point = head;
        while point != 0 {
            // A chain has at most one cell per record of the file.
            if values.len() >= total as usize {
                return Err(RaaError::decode(
                    "readshrt",
                    format!("chain from cell {head} does not end within {total} cells"),
                ));
            }
            let Some((value, next)) = self.lookup(transport, point, total)? else {
                break;
            };
            values.push(value);
            if next == head {
                break;
            }
            point = next;
        }
        Ok(values)
    }

    fn find(&self, point: u32) -> Option<(u32, u32)> {
        self.ring
            .iter()
            .find(|link| link.point == point)
            .map(|link| (link.value, link.next))
    }

    fn load<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        point: u32,
    ) -> Result<bool, RaaError> {
        let request = Request::new("readshrt")
            .arg("num", point)
            .arg("max", self.batch);
        let line = transport.exchange(&request)?;
        let rec = ResponseRecord::parse("readshrt", &line)?;
        rec.expect_ok()?;
        let count: usize = rec.require("n")?;
        if count == 0 {
            return Ok(false);
        }

        let numbers = rec
            .bare(0)
            .unwrap_or_default()
            .split(',')
            .map(|v| v.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| RaaError::decode("readshrt", "bad number in cell list"))?;
        if numbers.len() < 2 * count {
            return Err(RaaError::decode(
                "readshrt",
                format!("announced {count} cells, got {} numbers", numbers.len()),
            ));
        }

        let mut previous = point;
        for pair in numbers.chunks_exact(2).take(count) {
            if self.ring.len() == self.capacity {
                self.ring.pop_front();
            }
            self.ring.push_back(Link {
                point: previous,
                value: pair[0],
                next: pair[1],
            });
            previous = pair[1];
        }
        trace!("readshrt: {count} cells from {point}");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::mock::{ScriptedReader, transport};

    use super::*;

    #[test]
    fn one_batch_answers_the_whole_chain() {
        let mut link = transport(ScriptedReader::lines(&["code=0&n=3&17,30,18,31,19,0"]));
        let mut cache = ShortLinkCache::new(100, 50);

        assert_eq!(cache.lookup(&mut link, 12, 1000).unwrap(), Some((17, 30)));
        assert_eq!(cache.lookup(&mut link, 30, 1000).unwrap(), Some((18, 31)));
        assert_eq!(cache.lookup(&mut link, 31, 1000).unwrap(), Some((19, 0)));
        assert_eq!(
            link.writer_ref().requests(),
            vec!["readshrt&num=12&max=50"]
        );
    }

    #[test]
    fn walk_collects_values() {
        let reader = ScriptedReader::lines(&["code=0&n=2&5,40,6,41", "code=0&n=1&7,0"]);
        let mut link = transport(reader);
        let mut cache = ShortLinkCache::new(100, 2);

        assert_eq!(cache.walk(&mut link, 20, 1000).unwrap(), vec![5, 6, 7]);
        assert_eq!(link.writer_ref().requests()[1], "readshrt&num=41&max=2");
    }

    #[test]
    fn ring_evicts_oldest() {
        let reader = ScriptedReader::lines(&["code=0&n=2&1,3,2,4", "code=0&n=2&5,6,7,8", "code=0&n=1&1,3"]);
        let mut link = transport(reader);
        let mut cache = ShortLinkCache::new(3, 2);

        cache.lookup(&mut link, 2, 100).unwrap();
        cache.lookup(&mut link, 10, 100).unwrap();
        // cell 2 was pushed out by the second batch
        assert_eq!(cache.lookup(&mut link, 2, 100).unwrap(), Some((1, 3)));
        assert_eq!(link.writer_ref().requests().len(), 3);
    }

    #[test]
    fn out_of_range_pointer_is_absence() {
        let mut link = transport(ScriptedReader::new());
        let mut cache = ShortLinkCache::new(100, 50);

        assert_eq!(cache.lookup(&mut link, 1, 10).unwrap(), None);
        assert_eq!(cache.lookup(&mut link, 11, 10).unwrap(), None);
        assert!(link.writer_ref().requests().is_empty());
    }

    #[test]
    fn looping_chain_fails_instead_of_growing() {
        let mut link = transport(ScriptedReader::lines(&["code=0&n=2&5,41,6,41"]));
        let mut cache = ShortLinkCache::new(100, 50);

        let err = cache.walk(&mut link, 20, 50).unwrap_err();
        assert!(matches!(err, RaaError::Decode { command: "readshrt", .. }));
        assert_eq!(link.writer_ref().requests().len(), 1);
    }
}
