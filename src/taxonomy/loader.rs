//! Bulk load of the whole taxonomy through the compressed channel.
//!
//! `zlibloadtaxonomy` answers with a zlib stream holding a `code=0&total=N`
//! header, one line per taxon and a final `loadtaxonomy END.` line. The stream
//! is always read through to that line, even after a cancel or a bad record,
//! because plain-text answers only resume once the compressed section ends.
use std::io::Write;

use log::{debug, info, warn};

use crate::{
    error::RaaError,
    protocol::{BulkStream, LineTransport, Request, ResponseRecord, TimedRead},
};

use super::tree::{TaxonRecord, TaxonomyTree, TreeBuilder};

const END_MARKER: &str = "loadtaxonomy END.";

/// What the progress callback wants after each percent of the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Interrupt,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Built(TaxonomyTree),
    /// The caller interrupted the load; nothing was kept.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Streaming,
    Built,
    Aborted,
}

#[derive(Debug)]
pub struct TaxonomyLoader {
    state: LoadState,
    root_name: String,
}

impl TaxonomyLoader {
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            state: LoadState::Idle,
            root_name: root_name.into(),
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Runs the bulk request. `progress` receives the percentage read so far,
    /// at most once per percent.
    pub fn load<R, W, F>(
        &mut self,
        transport: &mut LineTransport<R, W>,
        mut progress: F,
    ) -> Result<LoadOutcome, RaaError>
    where
        R: TimedRead,
        W: Write,
        F: FnMut(u8) -> Progress,
    {
        transport.send(&Request::new("zlibloadtaxonomy"))?;
        self.state = LoadState::Streaming;
        info!("loading taxonomy");

        // A non-fatal failure still reads the compressed section to its end.
        let streamed = {
            let mut bulk = transport.bulk()?;
            let result = self.stream(&mut bulk, &mut progress);
            match result {
                Ok(streamed) => bulk.finish().map(|_| streamed),
                Err(e) if !e.is_fatal() => bulk.finish().and(Err(e)),
                Err(e) => Err(e),
            }
        };

        let streamed = match streamed {
            Ok(streamed) => streamed,
            Err(e) => {
                self.state = LoadState::Aborted;
                return Err(e);
            }
        };

        match streamed {
            Streamed::Interrupted => {
                self.state = LoadState::Aborted;
                // Swallows a cancel acknowledgment arriving after the stream.
                transport.exchange(&Request::new("null_command"))?;
                warn!("taxonomy load interrupted, partial tree discarded");
                Ok(LoadOutcome::Interrupted)
            }
            Streamed::Complete(builder) => match builder.finish(&self.root_name) {
                Ok(tree) => {
                    self.state = LoadState::Built;
                    info!("taxonomy loaded: {} taxa", tree.len());
                    Ok(LoadOutcome::Built(tree))
                }
                Err(reason) => {
                    self.state = LoadState::Aborted;
                    Err(RaaError::decode("zlibloadtaxonomy", reason))
                }
            },
        }
    }

    fn stream<R, W, F>(
        &self,
        bulk: &mut BulkStream<'_, R, W>,
        progress: &mut F,
    ) -> Result<Streamed, RaaError>
    where
        R: TimedRead,
        W: Write,
        F: FnMut(u8) -> Progress,
    {
        let head = bulk.read_line()?;
        let head = ResponseRecord::parse("zlibloadtaxonomy", &head)?;
        head.expect_ok()?;
        let total: usize = head.require("total")?;
        debug!("taxonomy stream announces {total} taxa");

        let mut builder = TreeBuilder::with_capacity(total);
        let mut failure = None;
        let mut interrupted = false;
        let mut seen = 0usize;
        let mut reported = 0u8;

        loop {
            let line = bulk.read_line()?;
            if line == END_MARKER {
                break;
            }

            if !interrupted && failure.is_none() {
                let inserted = TaxonRecord::parse(&line).and_then(|rec| builder.insert(rec));
                if let Err(reason) = inserted {
                    warn!("bad taxonomy record, draining stream: {reason}");
                    failure = Some(reason);
                }
            }

            seen += 1;
            let percent = (seen * 100 / total.max(1)).min(100) as u8;
            if percent > reported {
                reported = percent;
                if progress(percent) == Progress::Interrupt && !interrupted {
                    bulk.send_cancel()?;
                    interrupted = true;
                }
            }
        }

        if let Some(reason) = failure {
            return Err(RaaError::decode("zlibloadtaxonomy", reason));
        }
        Ok(if interrupted {
            Streamed::Interrupted
        } else {
            Streamed::Complete(builder)
        })
    }
}

enum Streamed {
    Complete(TreeBuilder),
    Interrupted,
}

#[cfg(test)]
mod tests {
    use flate2::{Compression, write::ZlibEncoder};

    use crate::protocol::mock::{ScriptedReader, transport};

    use super::*;

    fn compressed(lines: &[&str]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        for line in lines {
            encoder.write_all(line.as_bytes()).unwrap();
            encoder.write_all(b"\n").unwrap();
        }
        encoder.finish().unwrap()
    }

    fn taxonomy() -> Vec<u8> {
        compressed(&[
            "code=0&total=4",
            r#"2&0&0&"ROOT""#,
            r#"3&2&4&"BACTERIA"&"ID:2""#,
            r#"4&3&6&"ESCHERICHIA COLI"&"ID:562""#,
            r#"5&-4&0&"E. COLI""#,
            END_MARKER,
        ])
    }

    #[test]
    fn builds_tree_and_reports_progress() {
        let reader = ScriptedReader::new().bytes(&taxonomy()).line("code=0&n=1&4,0");
        let mut link = transport(reader);
        let mut loader = TaxonomyLoader::new("life");
        let mut reports = Vec::new();

        let outcome = loader
            .load(&mut link, |pct| {
                reports.push(pct);
                Progress::Continue
            })
            .unwrap();

        let LoadOutcome::Built(tree) = outcome else {
            panic!("load was not completed");
        };
        assert_eq!(loader.state(), LoadState::Built);
        assert_eq!(reports, vec![25, 50, 75, 100]);
        assert_eq!(tree.root().unwrap().name, "life");
        assert_eq!(tree.root().unwrap().count, 10);
        assert_eq!(tree.find_by_name("e. coli").unwrap().rank, 4);
        assert_eq!(tree.find_by_tid(562).unwrap().name, "ESCHERICHIA COLI");

        // plain text resumes after the compressed section
        assert_eq!(link.read_line().unwrap(), "code=0&n=1&4,0");
    }

    #[test]
    fn interrupt_drains_stream_and_resynchronises() {
        let reader = ScriptedReader::new()
            .bytes(&taxonomy())
            .line("code=0")
            .line("code=0&count=3");
        let mut link = transport(reader);
        let mut loader = TaxonomyLoader::new("root");
        let mut calls = 0;

        let outcome = loader
            .load(&mut link, |_| {
                calls += 1;
                Progress::Interrupt
            })
            .unwrap();

        assert!(matches!(outcome, LoadOutcome::Interrupted));
        assert_eq!(loader.state(), LoadState::Aborted);
        assert_eq!(calls, 4);
        assert_eq!(link.writer_ref().cancel_markers(), 1);
        assert!(link.writer_ref().text().ends_with("null_command\n"));

        let next = link.exchange(&Request::new("bcount").arg("lrank", 3)).unwrap();
        assert_eq!(next, "code=0&count=3");
    }

    #[test]
    fn bad_record_fails_after_draining() {
        let stream = compressed(&[
            "code=0&total=3",
            r#"2&0&0&"ROOT""#,
            "garbage",
            r#"3&2&1&"VIRUSES""#,
            END_MARKER,
        ]);
        let reader = ScriptedReader::new().bytes(&stream).line("code=0&next");
        let mut link = transport(reader);
        let mut loader = TaxonomyLoader::new("root");

        let err = loader.load(&mut link, |_| Progress::Continue).unwrap_err();
        assert!(matches!(err, RaaError::Decode { command: "zlibloadtaxonomy", .. }));
        assert_eq!(loader.state(), LoadState::Aborted);
        assert!(link.is_open());
        assert_eq!(link.read_line().unwrap(), "code=0&next");
    }
}
