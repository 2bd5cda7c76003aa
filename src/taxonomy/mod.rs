//! Species classification of the open database.
//!
//! - [`loader`]: the streaming bulk load, with progress and interruption.
//! - [`tree`]: the resulting rank-indexed arena and its lookups.
pub mod loader;
pub mod tree;

pub use loader::{LoadOutcome, LoadState, Progress, TaxonomyLoader};
pub use tree::{ROOT_RANK, TaxonNode, TaxonRecord, TaxonomyTree, TreeBuilder, label_tid};
