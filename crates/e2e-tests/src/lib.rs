//! End-to-end test infrastructure for agent-recall.
//!
//! Provides a shared [`TestHarness`] wiring real collaborators through the
//! retrieval pipeline: an in-memory entry store (entries, tags, relations),
//! an on-disk Tantivy index, a bag-of-words vector search and a summary
//! hierarchy built from the same fixture entries.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use recall_retrieval::{
    cosine_similarity, BatchTagRepository, Capabilities, CollaboratorError, Embedder,
    EntryRepository, LeafEntry, RelationRepository, RetrievalPipeline, ScoredEntryRef,
    SemanticSearch, SummaryHierarchy, SummaryNode, TagRepository,
};
use recall_search::{EntryIndexer, LexicalIndex, LexicalIndexConfig, LexicalSearcher};
use recall_types::{
    Entry, EntryType, PerType, PipelineConfig, RelatedTo, ScopeRef, ScopeType, ScopedEntry,
    Settings,
};

/// Dimension of the hashed bag-of-words embeddings.
pub const EMBEDDING_DIM: usize = 256;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to the
/// default settings' log level. Safe to call from every test.
pub fn init_test_tracing() {
    let level = Settings::default().log_level;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level)),
        )
        .with_test_writer()
        .try_init();
}

fn lock_error<E: std::fmt::Display>(e: E) -> CollaboratorError {
    CollaboratorError::Backend(format!("Store lock error: {}", e))
}

/// Entries, tags and relations held in memory.
#[derive(Default)]
pub struct InMemoryEntryStore {
    entries: RwLock<Vec<Entry>>,
    tags: RwLock<HashMap<String, Vec<String>>>,
    relations: RwLock<Vec<(RelatedTo, EntryType, String)>>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: Entry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|e| e.id != entry.id);
            entries.push(entry);
        }
    }

    pub fn tag(&self, id: &str, tags: &[&str]) {
        if let Ok(mut map) = self.tags.write() {
            map.insert(id.to_string(), tags.iter().map(|t| t.to_string()).collect());
        }
    }

    /// Record that entry `id` of `entry_type` is related to the target.
    pub fn relate(&self, target_id: &str, target_type: EntryType, entry_type: EntryType, id: &str) {
        if let Ok(mut relations) = self.relations.write() {
            relations.push((
                RelatedTo {
                    id: target_id.to_string(),
                    entry_type: target_type,
                },
                entry_type,
                id.to_string(),
            ));
        }
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    fn tags_for<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Result<HashMap<String, Vec<String>>, CollaboratorError> {
        let map = self.tags.read().map_err(lock_error)?;
        Ok(ids
            .filter_map(|id| map.get(id).map(|tags| (id.clone(), tags.clone())))
            .collect())
    }
}

#[async_trait]
impl EntryRepository for InMemoryEntryStore {
    async fn fetch_by_scope_chain(
        &self,
        scope_chain: &[ScopeRef],
        types: &[EntryType],
    ) -> Result<PerType<Vec<ScopedEntry>>, CollaboratorError> {
        let entries = self.entries.read().map_err(lock_error)?;
        let mut rows: PerType<Vec<ScopedEntry>> = types.iter().map(|t| (*t, Vec::new())).collect();

        for entry in entries.iter() {
            let Some(slot) = rows.get_mut(&entry.entry_type) else {
                continue;
            };
            let position = scope_chain
                .iter()
                .position(|s| s.scope_type == entry.scope_type && s.scope_id == entry.scope_id);
            if let Some(scope_index) = position {
                slot.push(ScopedEntry::new(entry.clone(), scope_index));
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl BatchTagRepository for InMemoryEntryStore {
    async fn get_tags_batch(
        &self,
        ids: &PerType<Vec<String>>,
    ) -> Result<HashMap<String, Vec<String>>, CollaboratorError> {
        self.tags_for(ids.values().flatten())
    }
}

#[async_trait]
impl TagRepository for InMemoryEntryStore {
    async fn get_tags(
        &self,
        _entry_type: EntryType,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, CollaboratorError> {
        self.tags_for(ids.iter())
    }
}

#[async_trait]
impl RelationRepository for InMemoryEntryStore {
    async fn related_ids(
        &self,
        target: &RelatedTo,
        types: &[EntryType],
    ) -> Result<PerType<HashSet<String>>, CollaboratorError> {
        let relations = self.relations.read().map_err(lock_error)?;
        let mut ids: PerType<HashSet<String>> =
            types.iter().map(|t| (*t, HashSet::new())).collect();
        for (related_to, entry_type, id) in relations.iter() {
            if related_to != target {
                continue;
            }
            if let Some(set) = ids.get_mut(entry_type) {
                set.insert(id.clone());
            }
        }
        Ok(ids)
    }
}

/// Deterministic hashed bag-of-words embedder.
///
/// Lowercased alphanumeric tokens are hashed into a fixed number of
/// buckets and the vector is L2-normalized, so texts sharing words have
/// positive cosine similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; EMBEDDING_DIM];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % EMBEDDING_DIM as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Ok(Self::embed_text(text))
    }
}

/// Brute-force cosine search over embedded entries.
#[derive(Default)]
pub struct VectorSemanticSearch {
    vectors: RwLock<Vec<(String, EntryType, Vec<f32>)>>,
}

impl VectorSemanticSearch {
    pub fn add(&self, entry: &Entry) {
        if let Ok(mut vectors) = self.vectors.write() {
            vectors.push((
                entry.id.clone(),
                entry.entry_type,
                HashingEmbedder::embed_text(&entry.searchable_text()),
            ));
        }
    }
}

#[async_trait]
impl SemanticSearch for VectorSemanticSearch {
    async fn search(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<Vec<ScoredEntryRef>, CollaboratorError> {
        let query = HashingEmbedder::embed_text(text);
        let vectors = self.vectors.read().map_err(lock_error)?;
        let mut hits: Vec<ScoredEntryRef> = vectors
            .iter()
            .filter(|(_, entry_type, _)| types.contains(entry_type))
            .map(|(id, entry_type, vector)| {
                ScoredEntryRef::new(
                    id.clone(),
                    *entry_type,
                    cosine_similarity(&query, vector).clamp(0.0, 1.0),
                )
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub store: Arc<InMemoryEntryStore>,
    pub index: LexicalIndex,
    pub indexer: EntryIndexer,
    pub searcher: Arc<LexicalSearcher>,
    pub semantic: Arc<VectorSemanticSearch>,
    pub hierarchy: Arc<SummaryHierarchy>,
}

impl TestHarness {
    /// Create a harness with an empty on-disk index.
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index = LexicalIndex::open_or_create(LexicalIndexConfig::in_dir(
            temp_dir.path().join("lexical-index"),
        ))
        .expect("Failed to open lexical index");
        let indexer = EntryIndexer::new(&index).expect("Failed to create indexer");
        let searcher = Arc::new(LexicalSearcher::new(&index).expect("Failed to create searcher"));

        Self {
            _temp_dir: temp_dir,
            store: Arc::new(InMemoryEntryStore::new()),
            index,
            indexer,
            searcher,
            semantic: Arc::new(VectorSemanticSearch::default()),
            hierarchy: Arc::new(SummaryHierarchy::new(Arc::new(HashingEmbedder))),
        }
    }

    /// Store, index and embed entries, then make them searchable.
    pub fn seed(&self, entries: &[Entry]) {
        for entry in entries {
            self.store.insert(entry.clone());
            self.semantic.add(entry);
        }
        self.indexer
            .upsert_batch(entries)
            .expect("Failed to index entries");
        self.indexer.commit().expect("Failed to commit index");
        self.searcher.reload().expect("Failed to reload searcher");
    }

    /// Build a two-level summary tree for `scope`.
    ///
    /// Each group becomes a level-1 summary over its entries; a single
    /// level-2 root summarizes all groups. Summary embeddings embed the
    /// concatenated text of everything beneath them.
    pub fn summarize(&self, scope: &ScopeRef, groups: &[(&str, &[&str])]) {
        let entries: HashMap<String, Entry> = self
            .store
            .entries()
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let mut root_text = Vec::new();
        let mut root_children = Vec::new();
        for (group_id, ids) in groups {
            let mut group_text = Vec::new();
            for id in ids.iter() {
                let entry = entries
                    .get(*id)
                    .unwrap_or_else(|| panic!("Unknown fixture entry {}", id));
                let text = entry.searchable_text();
                self.hierarchy
                    .add_leaf(
                        scope,
                        LeafEntry {
                            id: entry.id.clone(),
                            entry_type: entry.entry_type,
                            embedding: HashingEmbedder::embed_text(&text),
                        },
                    )
                    .expect("Failed to add leaf");
                group_text.push(text);
            }
            let text = group_text.join(" ");
            self.hierarchy
                .add_summary(
                    scope,
                    SummaryNode {
                        id: group_id.to_string(),
                        level: 1,
                        embedding: HashingEmbedder::embed_text(&text),
                        children: ids.iter().map(|id| id.to_string()).collect(),
                    },
                )
                .expect("Failed to add summary");
            root_text.push(text);
            root_children.push(group_id.to_string());
        }

        self.hierarchy
            .add_summary(
                scope,
                SummaryNode {
                    id: format!("{}-root", scope),
                    level: 2,
                    embedding: HashingEmbedder::embed_text(&root_text.join(" ")),
                    children: root_children,
                },
            )
            .expect("Failed to add root summary");
    }

    /// Every real collaborator: scored lexical, semantic, hierarchy, tags, relations.
    pub fn full_capabilities(&self) -> Capabilities {
        Capabilities::new(self.store.clone())
            .with_scored_lexical(self.searcher.clone())
            .with_semantic(self.semantic.clone())
            .with_hierarchical(self.hierarchy.clone())
            .with_batch_tags(self.store.clone())
            .with_tags(self.store.clone())
            .with_relations(self.store.clone())
    }

    /// Only the entry store.
    pub fn minimal_capabilities(&self) -> Capabilities {
        Capabilities::new(self.store.clone())
    }

    pub fn pipeline(&self, config: PipelineConfig) -> RetrievalPipeline {
        RetrievalPipeline::new(self.full_capabilities(), config)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn project_scope() -> ScopeRef {
    ScopeRef::new(ScopeType::Project, "proj-1")
}

pub fn org_scope() -> ScopeRef {
    ScopeRef::new(ScopeType::Org, "org-1")
}

/// Project, then org, then global.
pub fn scope_chain() -> Vec<ScopeRef> {
    vec![project_scope(), org_scope(), ScopeRef::global()]
}

/// Fixed base time so ordering tests are reproducible.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Build an entry created `days` after [`base_time`].
pub fn entry(
    id: &str,
    entry_type: EntryType,
    scope: &ScopeRef,
    name: &str,
    content: &str,
    days: i64,
) -> Entry {
    Entry::new(id, entry_type, scope, name, base_time() + Duration::days(days)).with_content(content)
}

/// A time-ordered entry id in the same format the store generates.
pub fn fresh_id() -> String {
    ulid::Ulid::new().to_string()
}

/// A small memory covering every entry type across the scope chain.
pub fn fixture_entries() -> Vec<Entry> {
    let project = project_scope();
    let org = org_scope();
    let global = ScopeRef::global();
    vec![
        entry(
            "g-proj-sql",
            EntryType::Guideline,
            &project,
            "sql-style",
            "Write postgres migrations with explicit transactions",
            1,
        )
        .with_priority(8),
        entry(
            "g-global-sql",
            EntryType::Guideline,
            &global,
            "sql-style",
            "Generic SQL style for any database",
            0,
        )
        .with_priority(5),
        entry(
            "g-org-review",
            EntryType::Guideline,
            &org,
            "code-review",
            "Every change needs one approving review",
            2,
        )
        .with_priority(3),
        entry(
            "k-pg-port",
            EntryType::Knowledge,
            &project,
            "postgres-port",
            "The postgres database listens on port 5433 in staging",
            3,
        ),
        entry(
            "k-pg-pool",
            EntryType::Knowledge,
            &project,
            "postgres-pool",
            "Connection pool size for the postgres database is 20",
            4,
        ),
        entry(
            "k-redis",
            EntryType::Knowledge,
            &org,
            "redis-cache",
            "Redis cache keys expire after one hour",
            5,
        ),
        entry(
            "k-frontend",
            EntryType::Knowledge,
            &global,
            "frontend-build",
            "The frontend bundle is built with vite",
            6,
        ),
        entry(
            "t-psql",
            EntryType::Tool,
            &project,
            "psql",
            "Interactive postgres shell for the staging database",
            2,
        ),
        entry(
            "x-outage",
            EntryType::Experience,
            &project,
            "pool-exhaustion",
            "Postgres pool exhaustion caused an outage; raised the pool size",
            7,
        ),
    ]
}

/// Seed the fixture entries, their tags and relations.
pub fn seeded_harness() -> TestHarness {
    let harness = TestHarness::new();
    harness.seed(&fixture_entries());

    harness.store.tag("k-pg-port", &["database", "postgres"]);
    harness.store.tag("k-pg-pool", &["database", "postgres", "performance"]);
    harness.store.tag("k-redis", &["cache"]);
    harness.store.tag("x-outage", &["incident", "postgres"]);
    harness.store.tag("t-psql", &["cli", "deprecated"]);

    harness
        .store
        .relate("x-outage", EntryType::Experience, EntryType::Knowledge, "k-pg-pool");
    harness
        .store
        .relate("x-outage", EntryType::Experience, EntryType::Tool, "t-psql");

    harness
}
