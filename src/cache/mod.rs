//! Per-session response caches.
//!
//! Each cache owns one kind of server answer and decides for itself when a
//! request can be served locally. Every cache is tied to the database open on
//! its session and is emptied when that database is closed.
//!
//! A cache is filled only from a fully decoded answer. When decoding fails the
//! previous contents stay as they were.
pub mod annotation;
pub mod fragment;
pub mod keyword;
pub mod list_page;
pub mod short_link;
pub mod static_table;

pub use annotation::AnnotationCache;
pub use fragment::FragmentCache;
pub use keyword::{KeywordCache, KeywordMatch};
pub use list_page::{ListElement, ListPageCache};
pub use short_link::ShortLinkCache;
pub use static_table::{SmjEntry, StaticTableCache};

pub mod sizes {
    /// Annotation lines fetched per block.
    pub const ANNOTATION_BLOCK: usize = 50;
    /// List elements fetched per page.
    pub const LIST_PAGE: usize = 50;
    /// Short-list cells kept in the ring.
    pub const SHORT_LINK_RING: usize = 100;
    /// Short-list cells asked for per request.
    pub const SHORT_LINK_BATCH: usize = 50;
    /// Matching keywords fetched per block.
    pub const KEYWORD_BLOCK: usize = 2001;
}

/// All caches of one session.
#[derive(Debug)]
pub struct ResponseCaches {
    pub fragment: FragmentCache,
    pub annotation: AnnotationCache,
    pub list_page: ListPageCache,
    pub short_link: ShortLinkCache,
    pub static_table: StaticTableCache,
    pub keyword: KeywordCache,
}

impl ResponseCaches {
    pub fn new(fragment_window: usize) -> Self {
        Self {
            fragment: FragmentCache::new(fragment_window),
            annotation: AnnotationCache::new(sizes::ANNOTATION_BLOCK),
            list_page: ListPageCache::new(sizes::LIST_PAGE),
            short_link: ShortLinkCache::new(sizes::SHORT_LINK_RING, sizes::SHORT_LINK_BATCH),
            static_table: StaticTableCache::new(),
            keyword: KeywordCache::new(sizes::KEYWORD_BLOCK),
        }
    }

    pub fn clear(&mut self) {
        self.fragment.clear();
        self.annotation.clear();
        self.list_page.clear();
        self.short_link.clear();
        self.static_table.clear();
        self.keyword.clear();
    }
}
