//! Page of list elements for forward iteration.
//!
//! Walking a list asks the server for the elements after a given one, a page at
//! a time. Successive calls that continue from the element last returned are
//! answered from the page.
use std::io::Write;

use log::trace;

use crate::{
    error::RaaError,
    protocol::{LineTransport, Request, ResponseRecord, TimedRead},
};

/// One member of a list, with the location of its annotations when the server
/// sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListElement {
    pub rank: u32,
    pub name: String,
    pub length: u32,
    pub offset: Option<u64>,
    pub div: Option<u32>,
}

#[derive(Debug)]
pub struct ListPageCache {
    page: usize,
    list: Option<u32>,
    /// Element the page was fetched after.
    anchor: u32,
    /// `None` marks the end of the list.
    entries: Vec<Option<ListElement>>,
    cursor: Option<usize>,
}

impl ListPageCache {
    pub fn new(page: usize) -> Self {
        Self {
            page: page.max(1),
            list: None,
            anchor: 0,
            entries: Vec::new(),
            cursor: None,
        }
    }

    pub fn clear(&mut self) {
        self.list = None;
        self.anchor = 0;
        self.entries.clear();
        self.cursor = None;
    }

    /// Drops the page if it belongs to `list`, e.g. after the list changed.
    pub fn invalidate(&mut self, list: u32) {
        if self.list == Some(list) {
            self.clear();
        }
    }

    /// The element of list `list` that follows element `first`; `first == 0`
    /// starts from the beginning.
    pub fn next_element<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        list: u32,
        first: u32,
    ) -> Result<Option<ListElement>, RaaError> {
        if let Some(hit) = self.advance(list, first) {
            return Ok(hit);
        }
        self.fetch(transport, list, first)?;
        Ok(self.advance(list, first).flatten())
    }

    /// `Some(answer)` when the page can answer.
    fn advance(&mut self, list: u32, first: u32) -> Option<Option<ListElement>> {
        if self.list != Some(list) {
            return None;
        }
        let expected = match self.cursor {
            None => self.anchor,
            Some(index) => self.entries[index].as_ref()?.rank,
        };
        let index = self.cursor.map_or(0, |i| i + 1);
        if expected != first || index >= self.entries.len() {
            return None;
        }
        self.cursor = Some(index);
        Some(self.entries[index].clone())
    }

    fn fetch<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        list: u32,
        first: u32,
    ) -> Result<(), RaaError> {
        let request = Request::new("nexteltinlist")
            .arg("lrank", list)
            .arg("first", first)
            .arg("count", self.page);
        transport.send(&request)?;

        // Read the whole page before decoding any line.
        let mut lines = Vec::new();
        while lines.len() < self.page {
            let line = transport.read_line()?;
            let last = ends_page(&line);
            lines.push(line);
            if last {
                break;
            }
        }

        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            let rec = ResponseRecord::parse("nexteltinlist", line)?;
            let next: u32 = rec.require("next")?;
            if next == 0 {
                entries.push(None);
                break;
            }
            entries.push(Some(ListElement {
                rank: next,
                name: rec.text("name").unwrap_or_default(),
                length: rec.int("length").unwrap_or(0),
                offset: rec.int("offset"),
                div: rec.int("div"),
            }));
        }
        trace!("list {list}: page of {} after {first}", entries.len());

        self.list = Some(list);
        self.anchor = first;
        self.entries = entries;
        self.cursor = None;
        Ok(())
    }
}

/// `next=0`, or an error answer carrying a code instead of an element.
fn ends_page(line: &str) -> bool {
    match ResponseRecord::parse("nexteltinlist", line) {
        Ok(rec) => match rec.int::<u32>("next") {
            Some(next) => next == 0,
            None => rec.get("code").is_some(),
        },
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::mock::{ScriptedReader, transport};

    use super::*;

    fn element(rank: u32, name: &str) -> String {
        format!("next={rank}&name={name}&length=120&offset=4400&div=1")
    }

    #[test]
    fn walk_is_served_from_one_page() {
        let reader = ScriptedReader::lines(&[&element(7, "HS001"), &element(9, "HS002"), "next=0"]);
        let mut link = transport(reader);
        let mut cache = ListPageCache::new(50);

        let a = cache.next_element(&mut link, 3, 0).unwrap().unwrap();
        assert_eq!(a.rank, 7);
        assert_eq!(a.name, "HS001");
        assert_eq!(a.offset, Some(4400));
        let b = cache.next_element(&mut link, 3, a.rank).unwrap().unwrap();
        assert_eq!(b.rank, 9);
        assert_eq!(cache.next_element(&mut link, 3, b.rank).unwrap(), None);

        assert_eq!(
            link.writer_ref().requests(),
            vec!["nexteltinlist&lrank=3&first=0&count=50"]
        );
    }

    #[test]
    fn full_page_continues_from_last_element() {
        let reader = ScriptedReader::lines(&[&element(4, "A"), &element(5, "B"), "next=0"]);
        let mut link = transport(reader);
        let mut cache = ListPageCache::new(1);

        assert_eq!(cache.next_element(&mut link, 2, 0).unwrap().unwrap().rank, 4);
        assert_eq!(cache.next_element(&mut link, 2, 4).unwrap().unwrap().rank, 5);
        assert_eq!(cache.next_element(&mut link, 2, 5).unwrap(), None);
        assert_eq!(
            link.writer_ref().requests(),
            vec![
                "nexteltinlist&lrank=2&first=0&count=1",
                "nexteltinlist&lrank=2&first=4&count=1",
                "nexteltinlist&lrank=2&first=5&count=1",
            ]
        );
    }

    #[test]
    fn jumping_elsewhere_refetches() {
        let reader = ScriptedReader::lines(&[&element(7, "X"), "next=0", &element(30, "Y"), "next=0"]);
        let mut link = transport(reader);
        let mut cache = ListPageCache::new(50);

        cache.next_element(&mut link, 3, 0).unwrap();
        assert_eq!(cache.next_element(&mut link, 3, 20).unwrap().unwrap().name, "Y");
        assert_eq!(link.writer_ref().requests().len(), 2);
    }

    #[test]
    fn missing_next_field_fails() {
        let mut link = transport(ScriptedReader::lines(&["code=3"]));
        let mut cache = ListPageCache::new(50);

        let err = cache.next_element(&mut link, 9, 0).unwrap_err();
        assert!(matches!(err, RaaError::Decode { command: "nexteltinlist", .. }));
    }

    #[test]
    fn bad_line_mid_page_leaves_stream_in_step() {
        let reader = ScriptedReader::lines(&[
            &element(7, "A"),
            "garbage",
            &element(9, "B"),
            "next=0",
            "code=0&count=2",
        ]);
        let mut link = transport(reader);
        let mut cache = ListPageCache::new(50);

        let err = cache.next_element(&mut link, 4, 0).unwrap_err();
        assert!(matches!(err, RaaError::Decode { command: "nexteltinlist", .. }));
        assert_eq!(link.read_line().unwrap(), "code=0&count=2");

        // nothing from the failed page was kept
        assert!(cache.advance(4, 0).is_none());
    }
}
