//! Server-side bit-lists.
//!
//! Lists live on the server and are addressed by rank. Every call that may
//! change a list's content drops the cached page of that list.
use std::io::{self, Write};

use log::{debug, warn};

use crate::{
    cancel::{Reply, await_reply},
    error::RaaError,
    protocol::{Request, ResponseRecord, TimedRead},
    session::Session,
};

const SAVELIST_END: &str = "savelist END.";

/// What the elements of a list are ranks of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Sequences,
    Keywords,
    Species,
}

impl ListKind {
    fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("SQ") => ListKind::Sequences,
            Some("KW") => ListKind::Keywords,
            _ => ListKind::Species,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ListKind::Sequences => "SQ",
            ListKind::Keywords => "KW",
            ListKind::Species => "SP",
        }
    }
}

/// The list a query produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryList {
    pub rank: u32,
    pub count: u32,
    pub kind: ListKind,
    /// Subsequences are replaced by their parent sequence.
    pub locus: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListState {
    pub name: String,
    pub count: u32,
    pub kind: ListKind,
    pub locus: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeLists {
    pub free: u32,
    /// Annotation line kinds the database knows, e.g. `ALL`, `AC`, `FT`.
    pub annotation_kinds: Vec<String>,
}

/// Criterion a `modifylist` applies to each element of a sequence list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter<'a> {
    /// e.g. `> 10000`
    Length(&'a str),
    /// e.g. `< 1/jan/2001`
    Date(&'a str),
    /// A string searched in the sequences' annotations.
    Scan(&'a str),
}

impl ListFilter<'_> {
    fn parts(&self) -> (&'static str, &str) {
        match self {
            ListFilter::Length(c) => ("length", c),
            ListFilter::Date(c) => ("date", c),
            ListFilter::Scan(c) => ("scan", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredList {
    pub rank: u32,
    /// Elements examined before the server stopped, when it reports it.
    pub processed: Option<u32>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    Names,
    Accessions,
}

impl<R: TimedRead, W: Write> Session<R, W> {
    /// Runs a retrieval query and names the resulting list `name`.
    pub fn query(&mut self, query: &str, name: &str) -> Result<QueryList, RaaError> {
        let request = Request::new("proc_query")
            .quoted("query", query)
            .quoted("name", name);
        let rec = self.checked(&request)?;
        let list = QueryList {
            rank: rec.require("lrank")?,
            count: rec.int("count").unwrap_or(0),
            kind: ListKind::from_wire(rec.get("type")),
            locus: rec.get("locus") == Some("T"),
        };
        self.caches.list_page.invalidate(list.rank);
        debug!("query {query:?} gave list {} of {} elements", list.rank, list.count);
        Ok(list)
    }

    pub fn free_lists(&mut self) -> Result<FreeLists, RaaError> {
        let rec = self.checked(&Request::new("countfreelists"))?;
        let annotation_kinds = rec
            .get("annotlines")
            .map(|kinds| kinds.split('|').map(str::to_string).collect())
            .unwrap_or_default();
        Ok(FreeLists {
            free: rec.int("free").unwrap_or(0),
            annotation_kinds,
        })
    }

    /// Rank of a new empty list named `name`. An existing list of that name is
    /// reused.
    pub fn empty_list(&mut self, name: &str) -> Result<u32, RaaError> {
        let line = self
            .transport
            .exchange(&Request::new("getemptylist").quoted("name", name))?;
        let rec = ResponseRecord::parse("getemptylist", &line)?;
        match rec.code()? {
            0 | 3 => {
                let rank = rec.require("lrank")?;
                self.caches.list_page.invalidate(rank);
                Ok(rank)
            }
            _ => Err(rejected(&rec)),
        }
    }

    /// Renames a list. False when another list already has `name`.
    pub fn rename_list(&mut self, list: u32, name: &str) -> Result<bool, RaaError> {
        let request = Request::new("setlistname")
            .arg("lrank", list)
            .quoted("name", name);
        let line = self.transport.exchange(&request)?;
        let rec = ResponseRecord::parse("setlistname", &line)?;
        match rec.code()? {
            0 => Ok(true),
            3 => Ok(false),
            _ => Err(rejected(&rec)),
        }
    }

    pub fn list_rank(&mut self, name: &str) -> Result<Option<u32>, RaaError> {
        let line = self
            .transport
            .exchange(&Request::new("getlistrank").quoted("name", name))?;
        let rec = ResponseRecord::parse("getlistrank", &line)?;
        Ok(rec.int::<u32>("lrank").filter(|rank| *rank != 0))
    }

    pub fn list_state(&mut self, list: u32) -> Result<Option<ListState>, RaaError> {
        let line = self
            .transport
            .exchange(&Request::new("getliststate").arg("lrank", list))?;
        let rec = ResponseRecord::parse("getliststate", &line)?;
        if rec.code()? != 0 {
            return Ok(None);
        }
        Ok(Some(ListState {
            name: rec.text("name").unwrap_or_default(),
            count: rec.int("count").unwrap_or(0),
            kind: ListKind::from_wire(rec.get("type")),
            locus: rec.get("locus").is_some_and(|l| l.starts_with('T')),
        }))
    }

    pub fn set_list_state(&mut self, list: u32, kind: ListKind, locus: bool) -> Result<(), RaaError> {
        let request = Request::new("setliststate")
            .arg("lrank", list)
            .arg("locus", if locus { 'T' } else { 'F' })
            .arg("type", kind.as_str());
        self.acknowledged(&request, list)
    }

    pub fn release_list(&mut self, list: u32) -> Result<(), RaaError> {
        self.caches.list_page.invalidate(list);
        self.checked(&Request::new("releaselist").arg("lrank", list))
            .map(drop)
    }

    /// Removes every element of `list`.
    pub fn clear_list(&mut self, list: u32) -> Result<(), RaaError> {
        self.acknowledged(&Request::new("zerolist").arg("lrank", list), list)
    }

    /// Overwrites list `to` with the content of list `from`.
    pub fn copy_list(&mut self, from: u32, to: u32) -> Result<(), RaaError> {
        let request = Request::new("copylist").arg("lfrom", from).arg("lto", to);
        self.acknowledged(&request, to)
    }

    /// Number of elements in `list`.
    pub fn list_count(&mut self, list: u32) -> Result<u32, RaaError> {
        self.checked(&Request::new("bcount").arg("lrank", list))?
            .require("count")
    }

    pub fn set_bit(&mut self, list: u32, num: u32) -> Result<(), RaaError> {
        let request = Request::new("bit1").arg("lrank", list).arg("num", num);
        self.acknowledged(&request, list)
    }

    pub fn clear_bit(&mut self, list: u32, num: u32) -> Result<(), RaaError> {
        let request = Request::new("bit0").arg("lrank", list).arg("num", num);
        self.acknowledged(&request, list)
    }

    pub fn test_bit(&mut self, list: u32, num: u32) -> Result<bool, RaaError> {
        let request = Request::new("btest").arg("lrank", list).arg("num", num);
        let line = self.transport.exchange(&request)?;
        let rec = ResponseRecord::parse("btest", &line)?;
        Ok(rec.code()? == 0 && rec.has_bare("on"))
    }

    /// Total residues of the sequences of `list`; can exceed 32 bits.
    pub fn residue_count(&mut self, list: u32) -> Result<u64, RaaError> {
        self.checked(&Request::new("residuecount").arg("lrank", list))?
            .require("count")
    }

    /// Number of subsequences of the sequences of `list`.
    pub fn subsequence_count(&mut self, list: u32) -> Result<u32, RaaError> {
        let line = self
            .transport
            .exchange(&Request::new("countsubseqs").arg("lrank", list))?;
        ResponseRecord::parse("countsubseqs", &line)?.require("count")
    }

    /// Ranks of every list in use.
    pub fn list_ranks(&mut self) -> Result<Vec<u32>, RaaError> {
        let line = self.transport.exchange(&Request::new("alllistranks"))?;
        let rec = ResponseRecord::parse("alllistranks", &line)?;
        let count: usize = rec.require("count")?;
        if count == 0 {
            return Ok(Vec::new());
        }
        rec.bare(0)
            .unwrap_or_default()
            .split(',')
            .take(count)
            .map(|rank| {
                rank.trim()
                    .parse()
                    .map_err(|_| RaaError::decode("alllistranks", format!("bad rank {rank:?}")))
            })
            .collect()
    }

    /// Writes the names or accession numbers of `list` to `out`, one per line
    /// after `prefix`. Returns the number of lines written.
    ///
    /// The answer is read to its end marker even when `out` fails, so the
    /// session stays usable; the first write error is returned afterwards as
    /// the non-fatal [`RaaError::Output`].
    pub fn save_list<O: io::Write>(
        &mut self,
        list: u32,
        format: SaveFormat,
        prefix: Option<&str>,
        out: &mut O,
    ) -> Result<usize, RaaError> {
        let kind = match format {
            SaveFormat::Names => 'N',
            SaveFormat::Accessions => 'A',
        };
        let request = Request::new("savelist").arg("lrank", list).arg("type", kind);
        self.checked(&request)?;

        let mut written = 0;
        let mut failure = None;
        loop {
            let line = self.transport.read_line()?;
            if line == SAVELIST_END {
                break;
            }
            if failure.is_some() {
                continue;
            }
            let result = match prefix {
                Some(prefix) => writeln!(out, "{prefix}{line}"),
                None => writeln!(out, "{line}"),
            };
            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!("savelist output failed, draining answer: {e}");
                    failure = Some(e);
                }
            }
        }
        match failure {
            Some(e) => Err(RaaError::Output(e)),
            None => Ok(written),
        }
    }

    /// Builds a new list from the elements of `list` that pass `filter`.
    ///
    /// The wait polls every `cancel_poll` and asks `interrupt` whether to give
    /// up; a cancelled run still yields the list built so far.
    pub fn filter_list<F>(
        &mut self,
        list: u32,
        filter: ListFilter<'_>,
        interrupt: F,
    ) -> Result<FilteredList, RaaError>
    where
        F: FnMut() -> bool,
    {
        let (kind, criterion) = filter.parts();
        let request = Request::new("modifylist")
            .arg("lrank", list)
            .arg("type", kind)
            .quoted("operation", criterion);
        self.transport.send(&request)?;
        let Reply { line, cancelled } =
            await_reply(&mut self.transport, self.config.cancel_poll, interrupt)?;

        let rec = ResponseRecord::parse("modifylist", &line)?;
        rec.expect_ok()?;
        let rank = rec.require("lrank")?;
        self.caches.list_page.invalidate(rank);
        if cancelled {
            warn!("modifylist on list {list} was cancelled");
        }
        Ok(FilteredList {
            rank,
            processed: rec.int("processed"),
            cancelled,
        })
    }

    fn checked(&mut self, request: &Request) -> Result<ResponseRecord, RaaError> {
        let line = self.transport.exchange(request)?;
        let rec = ResponseRecord::parse(request.command(), &line)?;
        rec.expect_ok()?;
        Ok(rec)
    }

    /// For commands whose answer may carry no code at all.
    fn acknowledged(&mut self, request: &Request, list: u32) -> Result<(), RaaError> {
        self.caches.list_page.invalidate(list);
        let line = self.transport.exchange(request)?;
        let rec = ResponseRecord::parse(request.command(), &line)?;
        match rec.int::<i32>("code") {
            Some(code) if code != 0 => Err(rejected(&rec)),
            _ => Ok(()),
        }
    }
}

fn rejected(rec: &ResponseRecord) -> RaaError {
    RaaError::Rejected {
        command: rec.command(),
        code: rec.int("code").unwrap_or(-1),
        message: rec.text("message"),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::SessionConfig,
        protocol::mock::{MockSession, RecordingWriter, ScriptedReader, session},
    };

    use super::*;

    fn requests(session: &MockSession) -> Vec<String> {
        session.transport.writer_ref().requests()
    }

    #[test]
    fn query_returns_new_list() {
        let mut s = session(&["code=0&lrank=3&count=120&type=SQ&locus=F"]);

        let list = s.query(r#"k="RIBOSOMAL RNA""#, "rrna").unwrap();
        assert_eq!(
            list,
            QueryList {
                rank: 3,
                count: 120,
                kind: ListKind::Sequences,
                locus: false
            }
        );
        assert_eq!(
            requests(&s),
            vec![r#"proc_query&query="k=\"RIBOSOMAL RNA\""&name="rrna""#]
        );
    }

    #[test]
    fn rejected_query_carries_message() {
        let mut s = session(&[r#"code=3&message="unknown keyword""#, "code=0&count=0"]);

        match s.query("k=nope", "l").unwrap_err() {
            RaaError::Rejected { code, message, .. } => {
                assert_eq!(code, 3);
                assert_eq!(message.as_deref(), Some("unknown keyword"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(s.list_count(2).unwrap(), 0);
    }

    #[test]
    fn free_lists_and_annotation_kinds() {
        let mut s = session(&["code=0&free=48&annotlines=ALL|AC|FT|SQ"]);

        let free = s.free_lists().unwrap();
        assert_eq!(free.free, 48);
        assert_eq!(free.annotation_kinds, vec!["ALL", "AC", "FT", "SQ"]);
    }

    #[test]
    fn list_naming() {
        let mut s = session(&[
            "code=3&lrank=5",
            "code=3",
            "lrank=0",
            r#"code=0&name="mine"&count=7&type=KW&locus=F"#,
        ]);

        assert_eq!(s.empty_list("mine").unwrap(), 5);
        assert!(!s.rename_list(5, "taken").unwrap());
        assert_eq!(s.list_rank("ghost").unwrap(), None);
        let state = s.list_state(5).unwrap().unwrap();
        assert_eq!(state.name, "mine");
        assert_eq!(state.kind, ListKind::Keywords);
    }

    #[test]
    fn bit_operations() {
        let mut s = session(&["code=0", "code=0&on", "code=0", "code=0&off"]);

        s.set_bit(4, 17).unwrap();
        assert!(s.test_bit(4, 17).unwrap());
        s.clear_bit(4, 17).unwrap();
        assert!(!s.test_bit(4, 17).unwrap());
        assert_eq!(
            requests(&s),
            vec![
                "bit1&lrank=4&num=17",
                "btest&lrank=4&num=17",
                "bit0&lrank=4&num=17",
                "btest&lrank=4&num=17",
            ]
        );
    }

    #[test]
    fn counts_and_ranks() {
        let mut s = session(&[
            "code=0&count=6000000000",
            "count=12",
            "count=3&2,3,9",
        ]);

        assert_eq!(s.residue_count(3).unwrap(), 6_000_000_000);
        assert_eq!(s.subsequence_count(3).unwrap(), 12);
        assert_eq!(s.list_ranks().unwrap(), vec![2, 3, 9]);
    }

    #[test]
    fn save_list_streams_to_writer() {
        let mut s = session(&["code=0", "HSHBB", "HSHBD", SAVELIST_END, "code=0&count=2"]);
        let mut out = Vec::new();

        let n = s
            .save_list(3, SaveFormat::Names, Some("> "), &mut out)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, b"> HSHBB\n> HSHBD\n");
        assert_eq!(requests(&s), vec!["savelist&lrank=3&type=N"]);
        assert_eq!(s.list_count(3).unwrap(), 2);
    }

    struct Broken;

    impl io::Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_writer_still_drains_answer() {
        let mut s = session(&["code=0", "A1", "A2", SAVELIST_END, "code=0&count=2"]);

        let err = s
            .save_list(3, SaveFormat::Accessions, None, &mut Broken)
            .unwrap_err();
        assert!(matches!(err, RaaError::Output(_)));
        assert!(!err.is_fatal());
        assert!(s.is_open());
        assert_eq!(s.list_count(3).unwrap(), 2);
    }

    #[test]
    fn filter_list_survives_cancel() {
        let reader = ScriptedReader::lines(&["OK acnuc socket started"])
            .stall()
            .stall()
            .line("code=0&lrank=8&processed=40");
        let mut s = Session::from_streams(
            reader,
            RecordingWriter::default(),
            "localhost",
            5558,
            SessionConfig::default(),
        )
        .unwrap();

        let filtered = s
            .filter_list(3, ListFilter::Length("> 1000"), || true)
            .unwrap();
        assert_eq!(
            filtered,
            FilteredList {
                rank: 8,
                processed: Some(40),
                cancelled: true
            }
        );
        assert_eq!(s.transport.writer_ref().cancel_markers(), 1);
        assert!(
            s.transport
                .writer_ref()
                .text()
                .starts_with("modifylist&lrank=3&type=length&operation=\"> 1000\"\n")
        );
    }
}
