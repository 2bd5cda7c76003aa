//! Single-record accessors of the index files.
//!
//! Each call maps to one request. The last sequence, species and keyword read
//! are kept, since callers tend to ask for the same record several times in a
//! row.
use std::io::Write;

use log::trace;

use crate::{
    error::RaaError,
    protocol::{Request, ResponseRecord, TimedRead},
    session::{RecordFile, Session},
};

/// Summary of one sequence from `readsub` and `seq_to_annots`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub rank: u32,
    pub name: String,
    pub length: u32,
    /// SMJ record of the sequence type.
    pub kind: u32,
    /// Set for a parent sequence rather than a subsequence.
    pub locus: bool,
    /// Pointer to the EXT chain; negated for parent sequences.
    pub extension: i64,
    pub keywords: u32,
    pub frame: u32,
    pub genetic_code: u32,
    /// Division and offset of the first annotation line.
    pub annotations: Option<(u32, u64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocusInfo {
    pub sub: u32,
    pub pnuc: u32,
    pub species: u32,
    pub host: u32,
    pub references: u32,
    pub molecule: u32,
    pub accessions: u32,
    pub organelle: u32,
    pub date: String,
}

/// A species or keyword record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub rank: u32,
    pub name: String,
    pub libel: Option<String>,
    pub sequences: u32,
    pub descendants: u32,
    pub synonym: u32,
    /// Only species records carry a host list.
    pub host: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessionEntry {
    pub name: String,
    pub sequences: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    pub parent: u32,
    pub start: u32,
    pub end: u32,
    pub next: u32,
}

/// One block of a long list and the pointer to the block after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongListBlock {
    pub values: Vec<u32>,
    pub next: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceAttributes {
    pub rank: u32,
    pub name: String,
    pub length: u32,
    pub frame: u32,
    pub genetic_code: u32,
    pub accession: Option<String>,
    pub species: Option<String>,
    pub description: Option<String>,
    pub sequence: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceId<'a> {
    Name(&'a str),
    Rank(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateTarget {
    List(u32),
    Sequence(u32),
}

/// What `extractseqs` cuts out of each sequence. Bounds read like `45,155`,
/// `-100,100` or `E-10,e+100`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinateOperation<'a> {
    Simple,
    Fragment {
        bounds: &'a str,
        min_bounds: Option<&'a str>,
    },
    Feature {
        name: &'a str,
    },
    Region {
        feature: &'a str,
        bounds: &'a str,
        min_bounds: Option<&'a str>,
    },
}

/// A piece of sequence; `start > end` means the complementary strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinate {
    pub seq: u32,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Default)]
pub(crate) struct RecordCache {
    sequence: Option<SequenceInfo>,
    species: Option<DictionaryEntry>,
    keyword: Option<DictionaryEntry>,
}

impl RecordCache {
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

const COORDINATES_END: &str = "extractseqs END.";

impl<R: TimedRead, W: Write> Session<R, W> {
    /// Sequence `rank`, or `None` when no such sequence exists.
    pub fn sequence(&mut self, rank: u32) -> Result<Option<SequenceInfo>, RaaError> {
        let total = self.database().map_or(u32::MAX, |db| db.total_sequences);
        if rank < 2 || rank > total {
            return Ok(None);
        }
        if let Some(seq) = self.records.sequence.as_ref().filter(|s| s.rank == rank) {
            return Ok(Some(seq.clone()));
        }

        let line = self
            .transport
            .exchange(&Request::new("seq_to_annots").arg("number", rank))?;
        let rec = ResponseRecord::parse("seq_to_annots", &line)?;
        let annotations = match rec.code()? {
            0 => Some((rec.require("div")?, rec.require("offset")?)),
            _ => None,
        };

        let line = self
            .transport
            .exchange(&Request::new("readsub").arg("num", rank))?;
        let rec = ResponseRecord::parse("readsub", &line)?;
        if rec.code()? != 0 {
            return Ok(None);
        }
        let locus = rec.int::<u32>("is_sub").unwrap_or(0) > 0;
        let toext: i64 = rec.int("toext").unwrap_or(0);
        let seq = SequenceInfo {
            rank,
            name: rec.require("name")?,
            length: rec.int("length").unwrap_or(0),
            kind: rec.int("type").unwrap_or(0),
            locus,
            extension: if locus { -toext } else { toext },
            keywords: rec.int("plkey").unwrap_or(0),
            frame: rec.int("frame").unwrap_or(0),
            genetic_code: rec.int("genet").unwrap_or(0),
            annotations,
        };
        trace!("sequence {rank} is {}", seq.name);
        self.records.sequence = Some(seq.clone());
        Ok(Some(seq))
    }

    /// First annotation line of sequence `rank`.
    pub fn first_annotation_line(&mut self, rank: u32) -> Result<Option<String>, RaaError> {
        let Some((div, offset)) = self.sequence(rank)?.and_then(|s| s.annotations) else {
            return Ok(None);
        };
        self.read_annotation(div, offset)
    }

    pub fn locus(&mut self, rank: u32) -> Result<Option<LocusInfo>, RaaError> {
        let Some(rec) = self.read_record("readloc", rank)? else {
            return Ok(None);
        };
        Ok(Some(LocusInfo {
            sub: rec.int("sub").unwrap_or(0),
            pnuc: rec.int("pnuc").unwrap_or(0),
            species: rec.int("spec").unwrap_or(0),
            host: rec.int("host").unwrap_or(0),
            references: rec.int("plref").unwrap_or(0),
            molecule: rec.int("molec").unwrap_or(0),
            accessions: rec.int("placc").unwrap_or(0),
            organelle: rec.int("org").unwrap_or(0),
            date: rec.text("date").unwrap_or_default(),
        }))
    }

    pub fn species(&mut self, rank: u32) -> Result<Option<DictionaryEntry>, RaaError> {
        if let Some(hit) = self.records.species.as_ref().filter(|e| e.rank == rank) {
            return Ok(Some(hit.clone()));
        }
        let entry = self.dictionary_entry("readspec", rank)?;
        if let Some(entry) = &entry {
            self.records.species = Some(entry.clone());
        }
        Ok(entry)
    }

    pub fn keyword(&mut self, rank: u32) -> Result<Option<DictionaryEntry>, RaaError> {
        if let Some(hit) = self.records.keyword.as_ref().filter(|e| e.rank == rank) {
            return Ok(Some(hit.clone()));
        }
        let entry = self.dictionary_entry("readkey", rank)?;
        if let Some(entry) = &entry {
            self.records.keyword = Some(entry.clone());
        }
        Ok(entry)
    }

    pub fn accession(&mut self, rank: u32) -> Result<Option<AccessionEntry>, RaaError> {
        let Some(rec) = self.read_record("readacc", rank)? else {
            return Ok(None);
        };
        Ok(Some(AccessionEntry {
            name: rec.require("name")?,
            sequences: rec.int("plsub").unwrap_or(0),
        }))
    }

    pub fn extension(&mut self, rank: u32) -> Result<Option<Extension>, RaaError> {
        let Some(rec) = self.read_record("readext", rank)? else {
            return Ok(None);
        };
        Ok(Some(Extension {
            parent: rec.int("mere").unwrap_or(0),
            start: rec.int("debut").unwrap_or(0),
            end: rec.int("fin").unwrap_or(0),
            next: rec.int("next").unwrap_or(0),
        }))
    }

    /// Block `rank` of the LNG file, at most `sub_in_lng` values.
    pub fn long_list(&mut self, rank: u32) -> Result<Option<LongListBlock>, RaaError> {
        let limit = self
            .database()
            .map_or_else(|| crate::session::Schema::default().sub_in_lng, |db| db.schema.sub_in_lng);
        let Some(rec) = self.read_record("readlng", rank)? else {
            return Ok(None);
        };
        let count: usize = rec.require("n")?;
        if count == 0 {
            return Ok(None);
        }
        let values = rec
            .bare(0)
            .unwrap_or_default()
            .split(',')
            .take(count.min(limit))
            .map(|v| v.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| RaaError::decode("readlng", "bad value in list block"))?;
        Ok(Some(LongListBlock {
            values,
            next: rec.int("next").unwrap_or(0),
        }))
    }

    /// Rank of keyword `name`.
    pub fn keyword_rank(&mut self, name: &str) -> Result<Option<u32>, RaaError> {
        let request = Request::new("iknum").quoted("name", name).arg("type", "KW");
        self.rank_lookup(&request)
    }

    /// Rank of species `name`.
    pub fn species_rank(&mut self, name: &str) -> Result<Option<u32>, RaaError> {
        let request = Request::new("iknum").quoted("name", name).arg("type", "SP");
        self.rank_lookup(&request)
    }

    /// Rank of the sequence named `name`.
    pub fn sequence_rank(&mut self, name: &str) -> Result<Option<u32>, RaaError> {
        self.rank_lookup(&Request::new("isenum").quoted("name", name))
    }

    /// Rank of `name` in the AUT, BIB, ACC, SMJ or SUB index.
    pub fn index_rank(&mut self, file: RecordFile, name: &str) -> Result<Option<u32>, RaaError> {
        if !matches!(
            file,
            RecordFile::Aut | RecordFile::Bib | RecordFile::Acc | RecordFile::Smj | RecordFile::Sub
        ) {
            return Ok(None);
        }
        let request = Request::new("fcode").quoted("name", name).arg("type", file);
        self.rank_lookup(&request)
    }

    /// Attributes of a sequence given by name, accession or rank, with its
    /// full sequence when `with_sequence` is set.
    pub fn attributes(
        &mut self,
        id: SequenceId<'_>,
        with_sequence: bool,
    ) -> Result<Option<SequenceAttributes>, RaaError> {
        let flag = if with_sequence { 'T' } else { 'F' };
        let request = match id {
            SequenceId::Name(name) => Request::new("getattributes").arg("id", name),
            SequenceId::Rank(rank) => Request::new("getattributes").arg("rank", rank),
        }
        .arg("seq", flag);
        let line = self.transport.exchange(&request)?;
        let rec = ResponseRecord::parse("getattributes", &line)?;
        if rec.code()? != 0 {
            return Ok(None);
        }

        let sequence = if with_sequence {
            let line = self.transport.read_line()?;
            Some(line.strip_prefix("seq=").unwrap_or(&line).to_string())
        } else {
            None
        };
        Ok(Some(SequenceAttributes {
            rank: rec.int("rank").unwrap_or(0),
            name: rec.require("name")?,
            length: rec.int("length").unwrap_or(0),
            frame: rec.int("fr").unwrap_or(0),
            genetic_code: rec.int("gc").unwrap_or(0),
            accession: rec.text("acc"),
            species: rec.get("spec").map(species_case),
            description: rec.text("descr"),
            sequence,
        }))
    }

    /// Coordinate series of the pieces `operation` extracts from each target
    /// sequence, one series per sequence.
    pub fn coordinates(
        &mut self,
        target: CoordinateTarget,
        operation: &CoordinateOperation<'_>,
    ) -> Result<Vec<Vec<Coordinate>>, RaaError> {
        let request = match target {
            CoordinateTarget::List(rank) => Request::new("extractseqs").arg("lrank", rank),
            CoordinateTarget::Sequence(rank) => Request::new("extractseqs").arg("seqnum", rank),
        }
        .arg("format", "coordinates");
        let request = match operation {
            CoordinateOperation::Simple => request.arg("operation", "simple"),
            CoordinateOperation::Fragment { bounds, .. } => request
                .arg("operation", "fragment")
                .arg("bounds", bounds),
            CoordinateOperation::Feature { name } => {
                request.arg("operation", "feature").arg("feature", name)
            }
            CoordinateOperation::Region {
                feature, bounds, ..
            } => request
                .arg("operation", "region")
                .arg("feature", feature)
                .arg("bounds", bounds),
        };
        let request = match operation {
            CoordinateOperation::Fragment {
                min_bounds: Some(min),
                ..
            }
            | CoordinateOperation::Region {
                min_bounds: Some(min),
                ..
            } => request.arg("minbounds", min),
            _ => request,
        };

        let line = self.transport.exchange(&request)?;
        ResponseRecord::parse("extractseqs", &line)?.expect_ok()?;

        let mut lines = Vec::new();
        loop {
            let line = self.transport.read_line()?;
            if line.starts_with(COORDINATES_END) {
                break;
            }
            lines.push(line);
        }
        lines.iter().map(|line| parse_coordinates(line)).collect()
    }

    /// `None` for a non-zero code, i.e. no such record.
    fn read_record(
        &mut self,
        command: &'static str,
        rank: u32,
    ) -> Result<Option<ResponseRecord>, RaaError> {
        let line = self
            .transport
            .exchange(&Request::new(command).arg("num", rank))?;
        let rec = ResponseRecord::parse(command, &line)?;
        Ok((rec.code()? == 0).then_some(rec))
    }

    fn dictionary_entry(
        &mut self,
        command: &'static str,
        rank: u32,
    ) -> Result<Option<DictionaryEntry>, RaaError> {
        let Some(rec) = self.read_record(command, rank)? else {
            return Ok(None);
        };
        Ok(Some(DictionaryEntry {
            rank,
            name: rec.require("name")?,
            libel: rec.text("libel").filter(|l| !l.is_empty()),
            sequences: rec.int("plsub").unwrap_or(0),
            descendants: rec.int("desc").unwrap_or(0),
            synonym: rec.int("syno").unwrap_or(0),
            host: if command == "readspec" {
                rec.int("host")
            } else {
                None
            },
        }))
    }

    /// Answers carry the rank as the value of their first field, 0 when the
    /// name is unknown.
    fn rank_lookup(&mut self, request: &Request) -> Result<Option<u32>, RaaError> {
        let line = self.transport.exchange(request)?;
        let value = line
            .split_once('=')
            .map(|(_, v)| v.split('&').next().unwrap_or_default().trim())
            .ok_or_else(|| RaaError::decode(request.command(), format!("no value in {line:?}")))?;
        let rank: u32 = value.parse().map_err(|_| {
            RaaError::decode(request.command(), format!("bad rank {value:?}"))
        })?;
        Ok((rank != 0).then_some(rank))
    }
}

/// `Homo sapiens` from `HOMO SAPIENS`.
fn species_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_string() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// `a=<seq>&b=<start>&c=<end>|...|`: one triple per `|`-terminated segment.
fn parse_coordinates(line: &str) -> Result<Vec<Coordinate>, RaaError> {
    let bad = || RaaError::decode("extractseqs", format!("bad coordinate line {line:?}"));
    let mut series = Vec::new();
    let mut segments: Vec<&str> = line.split('|').collect();
    segments.pop();
    for segment in segments {
        let numbers = segment
            .split('&')
            .map(|field| {
                field
                    .split_once('=')
                    .and_then(|(_, v)| v.trim().parse::<u32>().ok())
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(bad)?;
        let [seq, start, end] = numbers[..] else {
            return Err(bad());
        };
        series.push(Coordinate { seq, start, end });
    }
    Ok(series)
}
