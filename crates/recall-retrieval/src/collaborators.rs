//! External collaborator contracts.
//!
//! The pipeline never talks to a database, index or model directly. Each
//! backend is reached through one of the traits below, and the set a
//! pipeline was built with is described by [`Capabilities`]. Only the entry
//! repository is mandatory; every other collaborator is optional and its
//! stage degrades to a no-op when it is absent or failing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use recall_types::{EntryType, PerType, RelatedTo, ScopeRef, ScopeType, ScopedEntry};

use crate::error::CollaboratorError;
use crate::types::{QueryIntent, RewriteStrategy, ScoredEntryRef, ScoredId, SearchQuery};

/// Full-text search returning BM25-style scores per type.
#[async_trait]
pub trait ScoredLexicalSearch: Send + Sync {
    async fn search_with_scores(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<Vec<ScoredId>>, CollaboratorError>;
}

/// Full-text search that only reports which ids matched.
#[async_trait]
pub trait LexicalSearch: Send + Sync {
    async fn search(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<HashSet<String>>, CollaboratorError>;
}

/// Vector similarity search across entry types.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Return up to `limit` entries with similarity in [0, 1].
    async fn search(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<Vec<ScoredEntryRef>, CollaboratorError>;
}

/// Parameters for a coarse-to-fine summary traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalRequest {
    pub query: String,
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,

    /// Cap on leaf entries returned
    pub max_results: usize,

    /// Beam widening factor per level
    pub expansion_factor: usize,

    /// Minimum similarity for a node to be selected
    pub min_similarity: f32,
}

/// Statistics for one traversed summary level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalStep {
    pub level: u8,
    pub summaries_searched: usize,
    pub summaries_matched: usize,
    pub time_ms: u64,
}

/// Output of a summary traversal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalResult {
    /// Leaf entries, best first
    pub entries: Vec<ScoredEntryRef>,
    pub steps: Vec<RetrievalStep>,
    pub total_time_ms: u64,
}

/// Coarse-to-fine retrieval over a tree of summaries.
#[async_trait]
pub trait HierarchicalRetriever: Send + Sync {
    /// Whether any summaries exist for the scope.
    async fn has_summaries(
        &self,
        scope_type: ScopeType,
        scope_id: Option<&str>,
    ) -> Result<bool, CollaboratorError>;

    async fn retrieve(
        &self,
        request: &HierarchicalRequest,
    ) -> Result<HierarchicalResult, CollaboratorError>;
}

/// Tag lookup for many types in one call.
#[async_trait]
pub trait BatchTagRepository: Send + Sync {
    async fn get_tags_batch(
        &self,
        ids: &PerType<Vec<String>>,
    ) -> Result<HashMap<String, Vec<String>>, CollaboratorError>;
}

/// Tag lookup for one type at a time.
#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn get_tags(
        &self,
        entry_type: EntryType,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, CollaboratorError>;
}

/// The store of entries.
#[async_trait]
pub trait EntryRepository: Send + Sync {
    /// Fetch every entry of the given types that lives in any scope of the
    /// chain. Each row carries the index of the scope it was found at.
    async fn fetch_by_scope_chain(
        &self,
        scope_chain: &[ScopeRef],
        types: &[EntryType],
    ) -> Result<PerType<Vec<ScopedEntry>>, CollaboratorError>;
}

/// Explicit relations between entries.
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Ids of entries of the given types related to `target`.
    async fn related_ids(
        &self,
        target: &RelatedTo,
        types: &[EntryType],
    ) -> Result<PerType<HashSet<String>>, CollaboratorError>;
}

/// Which rewrite techniques a caller asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteFlags {
    pub hyde: bool,
    pub expansion: bool,
    pub decomposition: bool,
}

impl RewriteFlags {
    pub fn any(&self) -> bool {
        self.hyde || self.expansion || self.decomposition
    }
}

/// Output of a query rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteResult {
    pub queries: Vec<SearchQuery>,
    pub intent: QueryIntent,
    pub strategy: RewriteStrategy,
}

/// Produces weighted query variants (HyDE, expansion, decomposition).
#[async_trait]
pub trait QueryRewriteService: Send + Sync {
    async fn rewrite(
        &self,
        text: &str,
        intent: QueryIntent,
        flags: RewriteFlags,
    ) -> Result<RewriteResult, CollaboratorError>;
}

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

/// The collaborators a pipeline was built with.
///
/// Built once and shared by every query; collaborators are expected to be
/// safe for concurrent use.
#[derive(Clone)]
pub struct Capabilities {
    pub entries: Arc<dyn EntryRepository>,

    /// Preferred lexical backend; contributes scores to ranking
    pub lexical_scored: Option<Arc<dyn ScoredLexicalSearch>>,

    /// Fallback lexical backend used when no scored backend is present
    pub lexical: Option<Arc<dyn LexicalSearch>>,

    pub semantic: Option<Arc<dyn SemanticSearch>>,

    pub hierarchical: Option<Arc<dyn HierarchicalRetriever>>,

    pub tags_batch: Option<Arc<dyn BatchTagRepository>>,

    pub tags: Option<Arc<dyn TagRepository>>,

    pub relations: Option<Arc<dyn RelationRepository>>,

    pub rewriter: Option<Arc<dyn QueryRewriteService>>,
}

impl Capabilities {
    /// Capabilities with only the required entry repository.
    pub fn new(entries: Arc<dyn EntryRepository>) -> Self {
        Self {
            entries,
            lexical_scored: None,
            lexical: None,
            semantic: None,
            hierarchical: None,
            tags_batch: None,
            tags: None,
            relations: None,
            rewriter: None,
        }
    }

    /// Builder: attach a scored lexical backend
    pub fn with_scored_lexical(mut self, search: Arc<dyn ScoredLexicalSearch>) -> Self {
        self.lexical_scored = Some(search);
        self
    }

    /// Builder: attach a scoreless lexical backend
    pub fn with_lexical(mut self, search: Arc<dyn LexicalSearch>) -> Self {
        self.lexical = Some(search);
        self
    }

    /// Builder: attach a semantic backend
    pub fn with_semantic(mut self, search: Arc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(search);
        self
    }

    /// Builder: attach a summary hierarchy
    pub fn with_hierarchical(mut self, retriever: Arc<dyn HierarchicalRetriever>) -> Self {
        self.hierarchical = Some(retriever);
        self
    }

    /// Builder: attach a batched tag repository
    pub fn with_batch_tags(mut self, tags: Arc<dyn BatchTagRepository>) -> Self {
        self.tags_batch = Some(tags);
        self
    }

    /// Builder: attach a per-type tag repository
    pub fn with_tags(mut self, tags: Arc<dyn TagRepository>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Builder: attach a relation repository
    pub fn with_relations(mut self, relations: Arc<dyn RelationRepository>) -> Self {
        self.relations = Some(relations);
        self
    }

    /// Builder: attach a query rewrite service
    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriteService>) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    pub fn has_lexical(&self) -> bool {
        self.lexical_scored.is_some() || self.lexical.is_some()
    }

    pub fn has_tags(&self) -> bool {
        self.tags_batch.is_some() || self.tags.is_some()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("lexical_scored", &self.lexical_scored.is_some())
            .field("lexical", &self.lexical.is_some())
            .field("semantic", &self.semantic.is_some())
            .field("hierarchical", &self.hierarchical.is_some())
            .field("tags_batch", &self.tags_batch.is_some())
            .field("tags", &self.tags.is_some())
            .field("relations", &self.relations.is_some())
            .field("rewriter", &self.rewriter.is_some())
            .finish()
    }
}
