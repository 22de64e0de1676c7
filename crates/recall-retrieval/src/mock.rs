//! In-memory collaborators for testing.
//!
//! Every mock is configured through builder methods and records how often
//! it was called. Failure and delay knobs make it possible to exercise the
//! pipeline's degradation paths without a real backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use recall_types::{Entry, EntryType, PerType, RelatedTo, ScopeRef, ScopeType, ScopedEntry};

use crate::collaborators::{
    BatchTagRepository, Embedder, EntryRepository, HierarchicalRequest, HierarchicalResult,
    HierarchicalRetriever, LexicalSearch, QueryRewriteService, RelationRepository,
    RetrievalStep, RewriteFlags, RewriteResult, ScoredLexicalSearch, SemanticSearch,
    TagRepository,
};
use crate::error::CollaboratorError;
use crate::types::{QueryIntent, QuerySource, RewriteStrategy, ScoredEntryRef, ScoredId, SearchQuery};

async fn simulate(delay: Option<Duration>, fail: bool, name: &str) -> Result<(), CollaboratorError> {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if fail {
        return Err(CollaboratorError::Unavailable(format!("{} failed", name)));
    }
    Ok(())
}

/// Mock entry repository.
///
/// Entries added with [`with_entry`](Self::with_entry) are matched against
/// the scope chain by scope. Rows added with [`with_row`](Self::with_row)
/// are returned verbatim at the given scope index.
#[derive(Default)]
pub struct MockEntryRepository {
    entries: Vec<Entry>,
    rows: Vec<ScopedEntry>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockEntryRepository {
    pub fn with_entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_entries(mut self, entries: impl IntoIterator<Item = Entry>) -> Self {
        self.entries.extend(entries);
        self
    }

    /// Add a raw row at a fixed scope index.
    pub fn with_row(mut self, entry: Entry, scope_index: usize) -> Self {
        self.rows.push(ScopedEntry::new(entry, scope_index));
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntryRepository for MockEntryRepository {
    async fn fetch_by_scope_chain(
        &self,
        scope_chain: &[ScopeRef],
        types: &[EntryType],
    ) -> Result<PerType<Vec<ScopedEntry>>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate(self.delay, self.fail, "entry repository").await?;

        let mut result: PerType<Vec<ScopedEntry>> =
            types.iter().map(|t| (*t, Vec::new())).collect();

        for (index, scope) in scope_chain.iter().enumerate() {
            for entry in &self.entries {
                if entry.scope_type == scope.scope_type
                    && entry.scope_id == scope.scope_id
                    && types.contains(&entry.entry_type)
                {
                    result
                        .entry(entry.entry_type)
                        .or_default()
                        .push(ScopedEntry::new(entry.clone(), index));
                }
            }
        }

        for row in &self.rows {
            if types.contains(&row.entry.entry_type) && row.scope_index < scope_chain.len() {
                result
                    .entry(row.entry.entry_type)
                    .or_default()
                    .push(row.clone());
            }
        }

        Ok(result)
    }
}

/// Mock lexical backend keyed by exact query text.
///
/// Implements both the scored and the scoreless lexical traits.
#[derive(Default)]
pub struct MockLexicalSearch {
    hits: HashMap<String, PerType<Vec<ScoredId>>>,
    failing_queries: HashSet<String>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_limit: AtomicUsize,
}

impl MockLexicalSearch {
    pub fn with_hit(
        mut self,
        query: &str,
        entry_type: EntryType,
        id: &str,
        score: f32,
    ) -> Self {
        self.hits
            .entry(query.to_string())
            .or_default()
            .entry(entry_type)
            .or_default()
            .push(ScoredId::new(id, score));
        self
    }

    /// Fail only when searching this exact text.
    pub fn with_failing_query(mut self, query: &str) -> Self {
        self.failing_queries.insert(query.to_string());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Per-type limit passed to the most recent search.
    pub fn last_limit(&self) -> usize {
        self.last_limit.load(Ordering::SeqCst)
    }

    async fn lookup(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<Vec<ScoredId>>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        let fail = self.fail || self.failing_queries.contains(text);
        simulate(self.delay, fail, "lexical search").await?;

        let mut result: PerType<Vec<ScoredId>> =
            types.iter().map(|t| (*t, Vec::new())).collect();
        if let Some(per_type) = self.hits.get(text) {
            for (entry_type, hits) in per_type {
                if let Some(slot) = result.get_mut(entry_type) {
                    slot.extend(hits.iter().take(limit).cloned());
                }
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl ScoredLexicalSearch for MockLexicalSearch {
    async fn search_with_scores(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<Vec<ScoredId>>, CollaboratorError> {
        self.lookup(text, types, limit).await
    }
}

#[async_trait]
impl LexicalSearch for MockLexicalSearch {
    async fn search(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<HashSet<String>>, CollaboratorError> {
        let scored = self.lookup(text, types, limit).await?;
        Ok(scored
            .into_iter()
            .map(|(t, hits)| (t, hits.into_iter().map(|h| h.id).collect()))
            .collect())
    }
}

/// Mock semantic backend keyed by exact query text.
#[derive(Default)]
pub struct MockSemanticSearch {
    hits: HashMap<String, Vec<ScoredEntryRef>>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_limit: AtomicUsize,
}

impl MockSemanticSearch {
    pub fn with_hit(mut self, query: &str, entry_type: EntryType, id: &str, score: f32) -> Self {
        self.hits
            .entry(query.to_string())
            .or_default()
            .push(ScoredEntryRef::new(id, entry_type, score));
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_limit(&self) -> usize {
        self.last_limit.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticSearch for MockSemanticSearch {
    async fn search(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<Vec<ScoredEntryRef>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);
        simulate(self.delay, self.fail, "semantic search").await?;

        Ok(self
            .hits
            .get(text)
            .map(|hits| {
                hits.iter()
                    .filter(|h| types.contains(&h.entry_type))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Mock summary hierarchy returning a fixed candidate list.
#[derive(Default)]
pub struct MockHierarchicalRetriever {
    summarized_scopes: HashSet<(ScopeType, Option<String>)>,
    result: HierarchicalResult,
    fail: bool,
    delay: Option<Duration>,
    retrieve_calls: AtomicUsize,
}

impl MockHierarchicalRetriever {
    /// Report summaries for a scope.
    pub fn with_summaries_for(mut self, scope: &ScopeRef) -> Self {
        self.summarized_scopes
            .insert((scope.scope_type, scope.scope_id.clone()));
        self
    }

    /// Leaf candidates returned by every traversal (two levels deep).
    pub fn with_candidates(mut self, candidates: Vec<ScoredEntryRef>) -> Self {
        self.result = HierarchicalResult {
            steps: vec![
                RetrievalStep {
                    level: 2,
                    summaries_searched: 1,
                    summaries_matched: 1,
                    time_ms: 0,
                },
                RetrievalStep {
                    level: 1,
                    summaries_searched: 2,
                    summaries_matched: 1,
                    time_ms: 0,
                },
            ],
            entries: candidates,
            total_time_ms: 1,
        };
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HierarchicalRetriever for MockHierarchicalRetriever {
    async fn has_summaries(
        &self,
        scope_type: ScopeType,
        scope_id: Option<&str>,
    ) -> Result<bool, CollaboratorError> {
        Ok(self
            .summarized_scopes
            .contains(&(scope_type, scope_id.map(str::to_string))))
    }

    async fn retrieve(
        &self,
        request: &HierarchicalRequest,
    ) -> Result<HierarchicalResult, CollaboratorError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        simulate(self.delay, self.fail, "hierarchical retriever").await?;

        let mut result = self.result.clone();
        result.entries.truncate(request.max_results);
        Ok(result)
    }
}

/// Mock tag repository implementing both the batched and per-type lookups.
#[derive(Default)]
pub struct MockTagRepository {
    tags: HashMap<String, Vec<String>>,
    fail: bool,
    delay: Option<Duration>,
    batch_calls: AtomicUsize,
    per_type_calls: AtomicUsize,
}

impl MockTagRepository {
    pub fn with_tags(mut self, id: &str, tags: &[&str]) -> Self {
        self.tags
            .insert(id.to_string(), tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn per_type_calls(&self) -> usize {
        self.per_type_calls.load(Ordering::SeqCst)
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a String>) -> HashMap<String, Vec<String>> {
        ids.filter_map(|id| self.tags.get(id).map(|tags| (id.clone(), tags.clone())))
            .collect()
    }
}

#[async_trait]
impl BatchTagRepository for MockTagRepository {
    async fn get_tags_batch(
        &self,
        ids: &PerType<Vec<String>>,
    ) -> Result<HashMap<String, Vec<String>>, CollaboratorError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        simulate(self.delay, self.fail, "tag repository").await?;
        Ok(self.collect(ids.values().flatten()))
    }
}

#[async_trait]
impl TagRepository for MockTagRepository {
    async fn get_tags(
        &self,
        _entry_type: EntryType,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, CollaboratorError> {
        self.per_type_calls.fetch_add(1, Ordering::SeqCst);
        simulate(self.delay, self.fail, "tag repository").await?;
        Ok(self.collect(ids.iter()))
    }
}

/// Mock relation repository.
#[derive(Default)]
pub struct MockRelationRepository {
    relations: Vec<(RelatedTo, EntryType, String)>,
    fail: bool,
}

impl MockRelationRepository {
    /// Relate `(entry_type, id)` to the target entry.
    pub fn with_relation(
        mut self,
        target_id: &str,
        target_type: EntryType,
        entry_type: EntryType,
        id: &str,
    ) -> Self {
        self.relations.push((
            RelatedTo {
                id: target_id.to_string(),
                entry_type: target_type,
            },
            entry_type,
            id.to_string(),
        ));
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl RelationRepository for MockRelationRepository {
    async fn related_ids(
        &self,
        target: &RelatedTo,
        types: &[EntryType],
    ) -> Result<PerType<HashSet<String>>, CollaboratorError> {
        simulate(None, self.fail, "relation repository").await?;

        let mut result: PerType<HashSet<String>> =
            types.iter().map(|t| (*t, HashSet::new())).collect();
        for (related, entry_type, id) in &self.relations {
            if related == target {
                if let Some(slot) = result.get_mut(entry_type) {
                    slot.insert(id.clone());
                }
            }
        }
        Ok(result)
    }
}

/// Mock rewrite service returning the original text plus fixed variants.
pub struct MockRewriteService {
    variants: Vec<SearchQuery>,
    strategy: RewriteStrategy,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl Default for MockRewriteService {
    fn default() -> Self {
        Self {
            variants: Vec::new(),
            strategy: RewriteStrategy::Expansion,
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockRewriteService {
    pub fn with_variant(mut self, text: &str, weight: f32, source: QuerySource) -> Self {
        self.variants.push(SearchQuery::new(text, weight, source));
        self
    }

    pub fn with_strategy(mut self, strategy: RewriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryRewriteService for MockRewriteService {
    async fn rewrite(
        &self,
        text: &str,
        intent: QueryIntent,
        _flags: RewriteFlags,
    ) -> Result<RewriteResult, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate(self.delay, self.fail, "rewrite service").await?;

        let mut queries = vec![SearchQuery::original(text)];
        queries.extend(self.variants.iter().cloned());
        Ok(RewriteResult {
            queries,
            intent,
            strategy: self.strategy,
        })
    }
}

/// Mock embedder returning fixed vectors for known texts.
///
/// Unknown text is an error so tests notice unexpected queries.
#[derive(Default)]
pub struct MockEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| CollaboratorError::Backend(format!("no embedding for '{}'", text)))
    }
}
