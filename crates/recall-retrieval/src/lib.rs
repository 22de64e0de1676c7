//! # recall-retrieval
//!
//! Query pipeline for the agent-recall memory store.
//!
//! A query flows through a fixed sequence of stages, each reading and
//! extending a per-query [`PipelineContext`]:
//!
//! - **Rewrite**: classify intent and expand the search text into weighted variants
//! - **Lexical**: full-text search over every variant, scores fused by max
//! - **Semantic**: vector similarity over every variant, scores fused by max
//! - **Hierarchical**: coarse-to-fine traversal of a summary hierarchy
//! - **Fetch**: load candidate entries along the scope chain (required)
//! - **Tags**: attach tags to fetched entries (required only for tag filters)
//! - **Filter**: scope dedup, relation, tag, text, priority and date predicates
//! - **Rank**: weighted scoring, deterministic ordering, paging
//!
//! Collaborators (repositories, search backends, rewriter) are trait
//! objects bundled in [`Capabilities`]. Optional collaborators may be absent
//! or fail; the pipeline degrades instead of failing the query.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use recall_retrieval::mock::MockEntryRepository;
//! use recall_retrieval::{Capabilities, RetrievalPipeline};
//! use recall_types::{EntryType, PipelineConfig, QueryRequest, ScopeRef};
//!
//! # tokio_test_block(async {
//! let pipeline = RetrievalPipeline::new(
//!     Capabilities::new(Arc::new(MockEntryRepository::default())),
//!     PipelineConfig::default(),
//! );
//! let request = QueryRequest::new(vec![EntryType::Knowledge], vec![ScopeRef::global()])
//!     .with_search("database");
//! let response = pipeline.execute(request).await.unwrap();
//! assert!(response.results.is_empty());
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod classifier;
pub mod collaborators;
pub mod context;
pub mod error;
pub mod hierarchy;
pub mod mock;
pub mod pipeline;
pub mod rank;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use classifier::{ClassificationResult, ClassifierConfig, IntentClassifier, IntentRule};
pub use collaborators::{
    BatchTagRepository, Capabilities, Embedder, EntryRepository, HierarchicalRequest,
    HierarchicalResult, HierarchicalRetriever, LexicalSearch, QueryRewriteService,
    RelationRepository, RetrievalStep, RewriteFlags, RewriteResult, ScoredLexicalSearch,
    SemanticSearch, TagRepository,
};
pub use context::{merge_max, PipelineContext};
pub use error::{CollaboratorError, PipelineError};
pub use hierarchy::{cosine_similarity, LeafEntry, SummaryHierarchy, SummaryNode};
pub use pipeline::RetrievalPipeline;
pub use rank::{page, rank_entries};
pub use types::{
    FilteredEntry, HierarchicalState, PipelineDiagnostics, QueryIntent, QueryResponse,
    QuerySource, RewriteStrategy, ScoredEntryRef, ScoredId, SearchQuery, SkipReason,
    SkippedStage, Stage,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::collaborators::Capabilities;
    pub use crate::error::PipelineError;
    pub use crate::pipeline::RetrievalPipeline;
    pub use crate::types::{QueryIntent, QueryResponse, SkipReason, Stage};
}
