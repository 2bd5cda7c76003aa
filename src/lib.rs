pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod lists;
pub mod protocol;
pub mod records;
pub mod registry;
pub mod session;
pub mod taxonomy;

pub use config::{RaaAddress, SessionConfig};
pub use error::{ProtocolCode, RaaError};
pub use lists::{FilteredList, ListFilter, ListKind, ListState, QueryList, SaveFormat};
pub use records::{
    Coordinate, CoordinateOperation, CoordinateTarget, DictionaryEntry, SequenceAttributes,
    SequenceId, SequenceInfo,
};
pub use registry::{SessionSummary, open_sessions};
pub use session::{Database, DatabaseKind, KnownDatabase, RecordFile, Session};
pub use taxonomy::{Progress, TaxonNode, TaxonomyTree};
