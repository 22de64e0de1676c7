//! # recall-search
//!
//! BM25 full-text search for agent-recall entries using Tantivy.
//!
//! [`LexicalSearcher`] implements the retrieval pipeline's lexical
//! collaborators ([`recall_retrieval::ScoredLexicalSearch`] and
//! [`recall_retrieval::LexicalSearch`]).
//!
//! ## Features
//! - In-RAM index for ephemeral stores, MmapDirectory for persistence
//! - One document per entry: type, id, and searchable text
//! - Per-type top-k with BM25 scores
//! - Incremental upserts and deletes

pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod schema;
pub mod searcher;

pub use document::entry_to_doc;
pub use error::SearchError;
pub use index::{open_or_create_index, LexicalIndex, LexicalIndexConfig};
pub use indexer::EntryIndexer;
pub use schema::{build_entry_schema, EntrySchema};
pub use searcher::LexicalSearcher;
