//! SMJ table, loaded once per database.
//!
//! The SMJ file holds the small controlled vocabularies of a database
//! (molecule types, divisions, journals, status values). It is short, so the
//! whole table is fetched on first use and kept until the database is closed.
use std::io::Write;

use log::debug;

use crate::{
    error::RaaError,
    protocol::{LineTransport, Request, ResponseRecord, TimedRead},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmjEntry {
    pub name: String,
    pub plong: u32,
    pub libel: Option<String>,
}

#[derive(Debug, Default)]
pub struct StaticTableCache {
    /// Indexed by record number; records 0 and 1 are never used.
    table: Option<Vec<Option<SmjEntry>>>,
}

impl StaticTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.table = None;
    }

    /// Record `num` of the SMJ file. `total` is the record count reported by
    /// `readfirstrec`.
    pub fn lookup<R: TimedRead, W: Write>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        num: u32,
        total: u32,
    ) -> Result<Option<SmjEntry>, RaaError> {
        if self.table.is_none() {
            self.table = Some(load(transport, total)?);
        }
        Ok(self
            .table
            .as_ref()
            .and_then(|table| table.get(num as usize).cloned().flatten()))
    }
}

fn load<R: TimedRead, W: Write>(
    transport: &mut LineTransport<R, W>,
    total: u32,
) -> Result<Vec<Option<SmjEntry>>, RaaError> {
    let mut table = vec![None; total as usize + 1];
    if total < 2 {
        return Ok(table);
    }

    let request = Request::new("readsmj").arg("num", 2).arg("nl", total - 1);
    let head = transport.exchange(&request)?;
    let head = ResponseRecord::parse("readsmj", &head)?;
    head.expect_ok()?;
    let count: usize = head.require("nl")?;

    // Read every announced line before rejecting anything so the stream
    // stays aligned.
    let lines = transport.read_lines(count)?;
    for line in &lines {
        let rec = ResponseRecord::parse("readsmj", line)?;
        let num: usize = rec.require("recnum")?;
        let slot = table.get_mut(num).ok_or_else(|| {
            RaaError::decode("readsmj", format!("record {num} beyond table of {total}"))
        })?;
        *slot = Some(SmjEntry {
            name: rec.text("name").unwrap_or_default(),
            plong: rec.int("plong").unwrap_or(0),
            libel: rec.text("libel"),
        });
    }
    debug!("loaded {count} SMJ records");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use crate::protocol::mock::{ScriptedReader, transport};

    use super::*;

    fn smj_answer() -> ScriptedReader {
        ScriptedReader::lines(&[
            "code=0&nl=3",
            r#"recnum=2&name="00DNA"&plong=0"#,
            r#"recnum=3&name="04ROD"&plong=11&libel="Rodent sequences""#,
            r#"recnum=4&name="06STATUS PRELIMINARY"&plong=0"#,
        ])
    }

    #[test]
    fn table_is_fetched_once() {
        let mut link = transport(smj_answer());
        let mut cache = StaticTableCache::new();

        let rod = cache.lookup(&mut link, 3, 4).unwrap().unwrap();
        assert_eq!(rod.name, "04ROD");
        assert_eq!(rod.plong, 11);
        assert_eq!(rod.libel.as_deref(), Some("Rodent sequences"));

        assert_eq!(cache.lookup(&mut link, 2, 4).unwrap().unwrap().name, "00DNA");
        assert_eq!(cache.lookup(&mut link, 1, 4).unwrap(), None);
        assert_eq!(cache.lookup(&mut link, 9, 4).unwrap(), None);
        assert_eq!(link.writer_ref().requests(), vec!["readsmj&num=2&nl=3"]);
    }

    #[test]
    fn rejected_load_is_retried() {
        let reader = ScriptedReader::lines(&["code=3"]).line("code=0&nl=0");
        let mut link = transport(reader);
        let mut cache = StaticTableCache::new();

        assert!(cache.lookup(&mut link, 2, 4).is_err());
        assert_eq!(cache.lookup(&mut link, 2, 4).unwrap(), None);
        assert_eq!(cache.lookup(&mut link, 3, 4).unwrap(), None);
        assert_eq!(link.writer_ref().requests().len(), 2);
    }
}
