//! # recall-types
//!
//! Shared domain types for the agent-recall system.
//!
//! This crate defines the core data structures used throughout the system:
//! - Entries: typed memory records (guidelines, knowledge, tools, experiences)
//! - Scopes: the global/org/project/session hierarchy entries live in
//! - Queries: retrieval requests, filters and ranked results
//! - Settings: layered configuration, including per-component pipeline config
//!
//! ## Usage
//!
//! ```rust
//! use recall_types::{EntryType, QueryRequest, ScopeRef, ScopeType};
//!
//! let request = QueryRequest::new(
//!     vec![EntryType::Guideline, EntryType::Tool],
//!     vec![ScopeRef::new(ScopeType::Project, "proj-1"), ScopeRef::global()],
//! )
//! .with_search("how to configure the database");
//! assert!(request.validate().is_ok());
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod query;

pub use config::{
    HierarchicalConfig, HierarchicalOverride, LexicalConfig, PipelineConfig, PipelineOverrides,
    RankingConfig, RewriteConfig, RewriteOverride, SemanticConfig, Settings, TagsConfig,
    TagsOverride,
};
pub use entry::{
    new_entry_id, Entry, EntryType, PerType, ScopeRef, ScopeType, ScopedEntry, GLOBAL_SCOPE_ID,
};
pub use error::RecallError;
pub use query::{
    PriorityRange, QueryRequest, QueryResultItem, RelatedTo, ResponseMeta, SearchStrategy,
    TagFilter,
};
