//! Block of consecutive annotation lines.
//!
//! Annotation text is addressed by (division, byte offset). A fetch brings back
//! a block of lines; the offset of each line is the offset of the block plus the
//! lengths of the lines before it, each counted with its newline.
use std::io::Write;

use log::trace;

use crate::{
    error::RaaError,
    protocol::{LineTransport, Request, TimedRead},
};

#[derive(Debug)]
pub struct AnnotationCache {
    block: usize,
    div: Option<u32>,
    /// Offset of `lines[0]`.
    first: u64,
    /// Offset just past the last line of the block.
    end: u64,
    lines: Vec<String>,
    /// Index of the line last handed out.
    current: usize,
    current_offset: u64,
}

impl AnnotationCache {
    pub fn new(block: usize) -> Self {
        Self {
            block: block.max(1),
            div: None,
            first: 0,
            end: 0,
            lines: Vec::new(),
            current: 0,
            current_offset: 0,
        }
    }

    pub fn clear(&mut self) {
        self.div = None;
        self.lines.clear();
        self.first = 0;
        self.end = 0;
        self.current = 0;
        self.current_offset = 0;
    }

    /// Division and offset of the line last returned.
    pub fn current_address(&self) -> Option<(u32, u64)> {
        self.div.map(|div| (div, self.current_offset))
    }

    /// The annotation line starting at `offset` in division `div`.
    pub fn read_at<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        div: u32,
        offset: u64,
    ) -> Result<Option<String>, RaaError> {
        if let Some(index) = self.locate(div, offset) {
            self.current = index;
            self.current_offset = offset;
            return Ok(Some(self.lines[index].clone()));
        }

        let request = Request::new("read_annots")
            .arg("offset", offset)
            .arg("div", div)
            .arg("nl", self.block);
        transport.send(&request)?;
        self.load(transport, "read_annots", div, offset)
    }

    /// The line following the one last returned, fetching the next block when
    /// the current one is used up.
    pub fn read_next<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
    ) -> Result<Option<String>, RaaError> {
        let Some(div) = self.div else {
            return Ok(None);
        };
        if self.current + 1 < self.lines.len() {
            self.current_offset += self.lines[self.current].len() as u64 + 1;
            self.current += 1;
            return Ok(Some(self.lines[self.current].clone()));
        }

        let offset = self.end;
        transport.send(&Request::new("next_annots").arg("nl", self.block))?;
        self.load(transport, "next_annots", div, offset)
    }

    fn locate(&self, div: u32, offset: u64) -> Option<usize> {
        if self.div != Some(div) || offset < self.first || offset >= self.end {
            return None;
        }
        let mut start = self.first;
        for (index, line) in self.lines.iter().enumerate() {
            if start == offset {
                return Some(index);
            }
            start += line.len() as u64 + 1;
        }
        None
    }

    fn load<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        command: &'static str,
        div: u32,
        offset: u64,
    ) -> Result<Option<String>, RaaError> {
        let head = transport.read_line()?;
        let Some(rest) = head.strip_prefix("nl=") else {
            if head.starts_with("code=") {
                self.clear();
                return Ok(None);
            }
            return Err(RaaError::decode(command, format!("expected nl=, got {head:?}")));
        };
        let (count, mut first_line) = rest.split_once('&').unwrap_or((rest, ""));
        let count: usize = count
            .trim()
            .parse()
            .map_err(|_| RaaError::decode(command, format!("bad line count in {head:?}")))?;
        if count == 0 {
            self.clear();
            return Ok(None);
        }
        if command == "next_annots" {
            if let Some(after) = first_line.strip_prefix("offset=") {
                first_line = after.split_once('&').map(|(_, line)| line).unwrap_or("");
            }
        }

        let mut lines = Vec::with_capacity(count);
        lines.push(first_line.to_string());
        lines.extend(transport.read_lines(count - 1)?);

        let span: u64 = lines.iter().map(|l| l.len() as u64 + 1).sum();
        trace!("{command}: {count} lines at div={div} offset={offset}");
        self.div = Some(div);
        self.first = offset;
        self.end = offset + span;
        self.current = 0;
        self.current_offset = offset;
        self.lines = lines;
        Ok(Some(self.lines[0].clone()))
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::mock::{ScriptedReader, transport};

    use super::*;

    fn block() -> ScriptedReader {
        ScriptedReader::lines(&["nl=3&ID   AB000001", "AC   AB000001;", "DE   test entry"])
    }

    #[test]
    fn lines_of_a_block_are_served_locally() {
        let mut link = transport(block());
        let mut cache = AnnotationCache::new(3);

        assert_eq!(
            cache.read_at(&mut link, 2, 100).unwrap().as_deref(),
            Some("ID   AB000001")
        );
        assert_eq!(
            cache.read_next(&mut link).unwrap().as_deref(),
            Some("AC   AB000001;")
        );
        assert_eq!(cache.current_address(), Some((2, 114)));

        // 100 + 14 + 15
        assert_eq!(
            cache.read_at(&mut link, 2, 129).unwrap().as_deref(),
            Some("DE   test entry")
        );
        assert_eq!(
            link.writer_ref().requests(),
            vec!["read_annots&offset=100&div=2&nl=3"]
        );
    }

    #[test]
    fn rereading_an_address_is_idempotent() {
        let mut link = transport(block());
        let mut cache = AnnotationCache::new(3);

        cache.read_at(&mut link, 2, 100).unwrap();
        let first = cache.read_at(&mut link, 2, 114).unwrap();
        let again = cache.read_at(&mut link, 2, 114).unwrap();
        assert_eq!(first.as_deref(), Some("AC   AB000001;"));
        assert_eq!(first, again);
        assert_eq!(cache.current_address(), Some((2, 114)));
        assert_eq!(link.writer_ref().requests().len(), 1);
    }

    #[test]
    fn unaligned_offset_refetches() {
        let reader = block().line("nl=1&C entry");
        let mut link = transport(reader);
        let mut cache = AnnotationCache::new(3);

        cache.read_at(&mut link, 2, 100).unwrap();
        assert_eq!(
            cache.read_at(&mut link, 2, 105).unwrap().as_deref(),
            Some("C entry")
        );
        assert!(cache.read_at(&mut link, 3, 105).is_err());
    }

    #[test]
    fn continuation_skips_offset_token() {
        let reader = block().line("nl=2&offset=144&SQ   Sequence").line("//");
        let mut link = transport(reader);
        let mut cache = AnnotationCache::new(3);

        cache.read_at(&mut link, 2, 100).unwrap();
        cache.read_next(&mut link).unwrap();
        cache.read_next(&mut link).unwrap();
        assert_eq!(
            cache.read_next(&mut link).unwrap().as_deref(),
            Some("SQ   Sequence")
        );
        assert_eq!(cache.current_address(), Some((2, 145)));
        assert_eq!(cache.read_next(&mut link).unwrap().as_deref(), Some("//"));
        assert_eq!(link.writer_ref().requests()[1], "next_annots&nl=3");
    }

    #[test]
    fn empty_block_is_absence() {
        let mut link = transport(ScriptedReader::lines(&["nl=0&"]));
        let mut cache = AnnotationCache::new(50);

        assert_eq!(cache.read_at(&mut link, 1, 0).unwrap(), None);
        assert_eq!(cache.read_next(&mut link).unwrap(), None);
        assert_eq!(link.writer_ref().requests().len(), 1);
    }
}
