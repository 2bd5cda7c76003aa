//! Connection and database lifecycle.
//!
//! A [`Session`] owns one socket to an ACNUC server, the database opened on it
//! and every cache filled from that database. Requests are strictly sequential:
//! each call sends one request and reads its whole answer before returning.
//!
//! ```no_run
//! use racnuc::{Session, SessionConfig};
//!
//! let mut session = Session::open("pbil.univ-lyon1.fr", 5558, SessionConfig::default())?;
//! session.open_database("embl", || None)?;
//! let residues = session.read_fragment(1, 1, 60)?;
//! println!("{}", String::from_utf8_lossy(&residues));
//! session.close()?;
//! # Ok::<(), racnuc::RaaError>(())
//! ```
use std::{
    collections::HashMap,
    fmt,
    hint::black_box,
    io::Write,
    net::{TcpStream, ToSocketAddrs},
};

use log::{debug, info, warn};

use crate::{
    cache::{KeywordMatch, ListElement, ResponseCaches, SmjEntry},
    config::{RaaAddress, SessionConfig},
    error::{ProtocolCode, RaaError},
    protocol::{LineTransport, Request, ResponseRecord, TimedRead},
    records::RecordCache,
    registry::Registration,
    taxonomy::{LoadOutcome, Progress, TaxonomyLoader, TaxonomyTree},
};

/// Flavour of the open database, from the `type=` field of `acnucopen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    GenBank,
    Embl,
    SwissProt,
    Nbrf,
    Other,
}

impl DatabaseKind {
    fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("GENBANK") => DatabaseKind::GenBank,
            Some("EMBL") => DatabaseKind::Embl,
            Some("SWISSPROT") => DatabaseKind::SwissProt,
            Some("NBRF") => DatabaseKind::Nbrf,
            _ => DatabaseKind::Other,
        }
    }
}

/// Field widths declared by the server. Older servers omit them, in which case
/// the defaults below apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    pub mnemo_length: usize,
    pub species_width: usize,
    pub keyword_width: usize,
    pub author_width: usize,
    pub bib_width: usize,
    pub smj_width: usize,
    pub accession_length: usize,
    pub text_width: usize,
    pub sub_in_lng: usize,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            mnemo_length: 16,
            species_width: 40,
            keyword_width: 40,
            author_width: 20,
            bib_width: 40,
            smj_width: 20,
            accession_length: 13,
            text_width: 60,
            sub_in_lng: 63,
        }
    }
}

impl Schema {
    fn from_record(rec: &ResponseRecord) -> Self {
        let d = Self::default();
        Self {
            mnemo_length: rec.int("L_MNEMO").unwrap_or(d.mnemo_length),
            species_width: rec.int("WIDTH_SP").unwrap_or(d.species_width),
            keyword_width: rec.int("WIDTH_KW").unwrap_or(d.keyword_width),
            author_width: rec.int("WIDTH_AUT").unwrap_or(d.author_width),
            bib_width: rec.int("WIDTH_BIB").unwrap_or(d.bib_width),
            smj_width: rec.int("WIDTH_SMJ").unwrap_or(d.smj_width),
            accession_length: rec.int("ACC_LENGTH").unwrap_or(d.accession_length),
            text_width: rec.int("lrtxt").unwrap_or(d.text_width),
            sub_in_lng: rec.int("SUBINLNG").unwrap_or(d.sub_in_lng),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub name: String,
    pub kind: DatabaseKind,
    pub total_sequences: u32,
    pub total_species: u32,
    pub total_keywords: u32,
    pub schema: Schema,
}

impl Database {
    /// Largest species or keyword rank.
    pub fn max_index(&self) -> u32 {
        self.total_species.max(self.total_keywords)
    }

    /// 32-bit words needed for a bit-list over species or keywords.
    pub fn index_words(&self) -> u32 {
        self.max_index().saturating_sub(1) / 32 + 1
    }
}

/// One entry of the server's database catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownDatabase {
    pub name: String,
    pub online: bool,
    pub description: Option<String>,
}

/// Index files whose record count `readfirstrec` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordFile {
    Aut,
    Bib,
    Acc,
    Smj,
    Sub,
    Loc,
    Key,
    Spec,
    Shrt,
    Lng,
    Ext,
    Txt,
}

impl RecordFile {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordFile::Aut => "AUT",
            RecordFile::Bib => "BIB",
            RecordFile::Acc => "ACC",
            RecordFile::Smj => "SMJ",
            RecordFile::Sub => "SUB",
            RecordFile::Loc => "LOC",
            RecordFile::Key => "KEY",
            RecordFile::Spec => "SPEC",
            RecordFile::Shrt => "SHRT",
            RecordFile::Lng => "LNG",
            RecordFile::Ext => "EXT",
            RecordFile::Txt => "TXT",
        }
    }
}

impl fmt::Display for RecordFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Session<R: TimedRead = TcpStream, W: Write = TcpStream> {
    pub(crate) transport: LineTransport<R, W>,
    pub(crate) config: SessionConfig,
    pub(crate) caches: ResponseCaches,
    pub(crate) records: RecordCache,
    host: String,
    port: u16,
    database: Option<Database>,
    first_records: HashMap<RecordFile, u32>,
    taxonomy: Option<TaxonomyTree>,
    registration: Registration,
}

impl Session {
    /// Connects to `host:port`, reads the banner and announces the client id.
    pub fn open(host: &str, port: u16, config: SessionConfig) -> Result<Self, RaaError> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|_| RaaError::Protocol(ProtocolCode::BadServerName))?
            .collect();
        if addrs.is_empty() {
            return Err(RaaError::Protocol(ProtocolCode::BadServerName));
        }

        let stream = TcpStream::connect(&addrs[..]).map_err(|e| {
            warn!("cannot connect to {host}:{port}: {e}");
            RaaError::Protocol(ProtocolCode::CannotOpenSocket)
        })?;
        let writer = stream.try_clone()?;
        Self::from_streams(stream, writer, host, port, config)
    }

    /// Opens a session on `address` and the database it names, if any.
    pub fn connect<F>(
        address: &RaaAddress,
        config: SessionConfig,
        password: F,
    ) -> Result<Self, RaaError>
    where
        F: FnOnce() -> Option<String>,
    {
        let mut session = Self::open(&address.host, address.port, config)?;
        if let Some(db) = &address.database {
            session.open_database(db, password)?;
        }
        Ok(session)
    }
}

impl<R: TimedRead, W: Write> Session<R, W> {
    /// Starts a session over already connected streams.
    pub fn from_streams(
        reader: R,
        writer: W,
        host: &str,
        port: u16,
        config: SessionConfig,
    ) -> Result<Self, RaaError> {
        let mut transport = LineTransport::new(reader, writer);
        let banner = transport.read_line()?;
        if banner.trim().is_empty() {
            return Err(RaaError::BadBanner(banner));
        }
        debug!("server banner: {banner}");

        if let Some(id) = &config.client_id {
            transport.exchange(&Request::new("clientid").quoted("id", id))?;
        }

        info!("connected to {host}:{port}");
        Ok(Self {
            transport,
            caches: ResponseCaches::new(config.fragment_window),
            records: RecordCache::default(),
            config,
            host: host.to_string(),
            port,
            database: None,
            first_records: HashMap::new(),
            taxonomy: None,
            registration: Registration::acquire(host, port),
        })
    }

    pub fn id(&self) -> u64 {
        self.registration.id()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// False once a fatal error ended the connection.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    /// Opens database `name`. `password` is called only when the server asks
    /// for one.
    pub fn open_database<F>(&mut self, name: &str, password: F) -> Result<&Database, RaaError>
    where
        F: FnOnce() -> Option<String>,
    {
        let line = self
            .transport
            .exchange(&Request::new("acnucopen").arg("db", name))?;
        let mut rec = ResponseRecord::parse("acnucopen", &line)?;
        let mut code = rec.code()?;

        if code == i32::from(ProtocolCode::BadPassword) {
            let challenge = line
                .strip_prefix("code=6&challenge=")
                .map(str::to_string)
                .or_else(|| rec.text("challenge"))
                .ok_or_else(|| RaaError::decode("acnucopen", "password asked without challenge"))?;
            let supplied = password();
            let refused = supplied.is_none();
            // Answer even without a password so the server is not left waiting.
            let reply = challenge_reply(&challenge, name, supplied.unwrap_or_default());
            let line = self
                .transport
                .exchange(&Request::raw("reply", format!("reply={reply}")))?;
            rec = ResponseRecord::parse("acnucopen", &line)?;
            code = if refused {
                i32::from(ProtocolCode::BadPassword)
            } else {
                rec.code()?
            };
        }

        if code != 0 {
            let code = ProtocolCode::from(code);
            warn!("cannot open database {name}: {code}");
            return Err(RaaError::Protocol(code));
        }

        self.reset_database_state();
        let database = Database {
            name: name.to_string(),
            kind: DatabaseKind::from_wire(rec.get("type")),
            total_sequences: rec.int("totseqs").unwrap_or(0),
            total_species: rec.int("totspecs").unwrap_or(0),
            total_keywords: rec.int("totkeys").unwrap_or(0),
            schema: Schema::from_record(&rec),
        };
        info!(
            "opened database {name} ({:?}, {} sequences)",
            database.kind, database.total_sequences
        );
        self.registration.set_database(Some(name));
        Ok(self.database.insert(database))
    }

    /// Detaches the open database; the socket stays usable for another open.
    pub fn close_database(&mut self) -> Result<(), RaaError> {
        let Some(database) = self.database.take() else {
            return Ok(());
        };
        self.reset_database_state();
        self.registration.set_database(None);
        self.transport.exchange(&Request::new("acnucclose"))?;
        debug!("closed database {}", database.name);
        Ok(())
    }

    /// Closes the open database, if any, then the connection.
    pub fn close(mut self) -> Result<(), RaaError> {
        let closed = if self.transport.is_open() {
            self.close_database()
        } else {
            Ok(())
        };
        self.transport.shutdown();
        info!("session {} to {}:{} closed", self.id(), self.host, self.port);
        closed
    }

    /// Databases served by the server.
    pub fn known_databases(&mut self) -> Result<Vec<KnownDatabase>, RaaError> {
        let head = self.transport.exchange(&Request::new("knowndbs"))?;
        let head = ResponseRecord::parse("knowndbs", &head)?;
        let count: usize = head.require("nl")?;
        let lines = self.transport.read_lines(count)?;
        Ok(lines.iter().map(|line| parse_known_database(line)).collect())
    }

    /// Record count of an index file, asked once per database.
    pub fn first_record(&mut self, file: RecordFile) -> Result<u32, RaaError> {
        if let Some(count) = self.first_records.get(&file) {
            return Ok(*count);
        }
        let line = self
            .transport
            .exchange(&Request::new("readfirstrec").arg("type", file))?;
        let rec = ResponseRecord::parse("readfirstrec", &line)?;
        match rec.int::<u32>("count") {
            Some(count) => {
                self.first_records.insert(file, count);
                Ok(count)
            }
            None => {
                rec.expect_ok()?;
                Err(RaaError::decode("readfirstrec", "missing field `count`"))
            }
        }
    }

    /// Residues `first..first + length` (1-based) of sequence `seq`. A
    /// shorter result means the sequence ended.
    pub fn read_fragment(
        &mut self,
        seq: u32,
        first: u32,
        length: usize,
    ) -> Result<Vec<u8>, RaaError> {
        self.caches
            .fragment
            .read(&mut self.transport, seq, first, length)
    }

    /// Annotation line at `offset` of division `div`.
    pub fn read_annotation(&mut self, div: u32, offset: u64) -> Result<Option<String>, RaaError> {
        self.caches
            .annotation
            .read_at(&mut self.transport, div, offset)
    }

    /// Annotation line after the one last read.
    pub fn next_annotation(&mut self) -> Result<Option<String>, RaaError> {
        self.caches.annotation.read_next(&mut self.transport)
    }

    /// Division and offset of the annotation line last read.
    pub fn annotation_address(&self) -> Option<(u32, u64)> {
        self.caches.annotation.current_address()
    }

    /// Element of list `list` after element `first` (0 for the first one).
    pub fn next_in_list(&mut self, list: u32, first: u32) -> Result<Option<ListElement>, RaaError> {
        self.caches
            .list_page
            .next_element(&mut self.transport, list, first)
    }

    /// Value at `point` of the short-list file and the pointer to the next cell.
    pub fn short_link(&mut self, point: u32) -> Result<Option<(u32, u32)>, RaaError> {
        let total = self.first_record(RecordFile::Shrt)?;
        self.caches
            .short_link
            .lookup(&mut self.transport, point, total)
    }

    /// Every value of the short list starting at `head`.
    pub fn short_list(&mut self, head: u32) -> Result<Vec<u32>, RaaError> {
        let total = self.first_record(RecordFile::Shrt)?;
        self.caches.short_link.walk(&mut self.transport, head, total)
    }

    /// Record `num` of the SMJ table.
    pub fn smj(&mut self, num: u32) -> Result<Option<SmjEntry>, RaaError> {
        let total = self.first_record(RecordFile::Smj)?;
        self.caches
            .static_table
            .lookup(&mut self.transport, num, total)
    }

    /// First keyword matching `pattern` (`*` any run, `@` any one character).
    pub fn match_keywords(&mut self, pattern: &str) -> Result<Option<KeywordMatch>, RaaError> {
        self.caches.keyword.start(&mut self.transport, pattern)
    }

    /// Next keyword matching the pattern of the last [`Self::match_keywords`].
    pub fn next_keyword_match(&mut self) -> Result<Option<KeywordMatch>, RaaError> {
        self.caches.keyword.next(&mut self.transport)
    }

    /// Loads the species tree once per database. `None` when `progress`
    /// interrupted the load.
    pub fn load_taxonomy<F>(
        &mut self,
        root_name: &str,
        progress: F,
    ) -> Result<Option<&TaxonomyTree>, RaaError>
    where
        F: FnMut(u8) -> Progress,
    {
        if self.taxonomy.is_none() {
            let mut loader = TaxonomyLoader::new(root_name);
            match loader.load(&mut self.transport, progress)? {
                LoadOutcome::Built(tree) => self.taxonomy = Some(tree),
                LoadOutcome::Interrupted => return Ok(None),
            }
        }
        Ok(self.taxonomy.as_ref())
    }

    pub fn taxonomy(&self) -> Option<&TaxonomyTree> {
        self.taxonomy.as_ref()
    }

    fn reset_database_state(&mut self) {
        self.caches.clear();
        self.records.clear();
        self.first_records.clear();
        self.taxonomy = None;
    }
}

impl<R: TimedRead, W: Write> Drop for Session<R, W> {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}

impl<R: TimedRead, W: Write> fmt::Debug for Session<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database.as_ref().map(|db| &db.name))
            .field("open", &self.transport.is_open())
            .finish()
    }
}

/// `md5(challenge:db:md5(password))` in lowercase hex. The password and the
/// intermediate text are overwritten once used.
fn challenge_reply(challenge: &str, database: &str, password: String) -> String {
    let inner = format!("{:x}", md5::compute(password.as_bytes()));
    wipe(password);
    let material = format!("{challenge}:{database}:{inner}");
    wipe(inner);
    let reply = format!("{:x}", md5::compute(material.as_bytes()));
    wipe(material);
    reply
}

fn wipe(secret: String) {
    let mut bytes = secret.into_bytes();
    bytes.fill(0);
    black_box(&bytes);
}

/// `name|status|description`; an `OFF` status marks the database offline.
fn parse_known_database(line: &str) -> KnownDatabase {
    let mut parts = line.splitn(3, '|');
    let name = parts.next().unwrap_or_default().trim().to_string();
    let status = parts
        .next()
        .map(|s| s.replace('\t', " ").trim().to_ascii_uppercase());
    let text = parts.next();
    let online = status.as_deref() != Some("OFF");
    let description = match (status, text) {
        (Some(_), Some(text)) if !online => Some(format!("(offline) {text}")),
        (Some(_), Some(text)) => Some(text.to_string()),
        _ => None,
    };
    KnownDatabase {
        name,
        online,
        description,
    }
}
