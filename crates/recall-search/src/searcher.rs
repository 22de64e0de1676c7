//! BM25 search over indexed entries.
//!
//! Each requested entry type runs as its own query so every type gets its
//! own top-`limit` slice. Query text is parsed leniently: syntax the parser
//! cannot use is dropped instead of failing the search.
//!
//! Tantivy searches block, so the collaborator impls run them on the
//! blocking pool. The caller's timeout can then fire while a search is in
//! flight, and concurrent variants search in parallel.

use std::collections::HashSet;

use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{Index, IndexReader, TantivyDocument, Term};
use tracing::{debug, info};

use recall_retrieval::{CollaboratorError, LexicalSearch, ScoredId, ScoredLexicalSearch};
use recall_types::{EntryType, PerType};

use crate::error::SearchError;
use crate::index::LexicalIndex;
use crate::schema::EntrySchema;

/// Searcher implementing both lexical collaborator traits.
///
/// Clones share the same reader, so a `reload` is visible to all of them.
#[derive(Clone)]
pub struct LexicalSearcher {
    index: Index,
    reader: IndexReader,
    schema: EntrySchema,
}

impl LexicalSearcher {
    pub fn new(index: &LexicalIndex) -> Result<Self, SearchError> {
        Ok(Self {
            index: index.index().clone(),
            reader: index.reader()?,
            schema: index.schema().clone(),
        })
    }

    /// Reload the reader to see recent commits.
    pub fn reload(&self) -> Result<(), SearchError> {
        self.reader.reload()?;
        debug!("Reloaded search reader");
        Ok(())
    }

    /// Top `limit` BM25 hits per requested type.
    ///
    /// Every requested type has an entry in the result, possibly empty.
    pub fn search_scored(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<Vec<ScoredId>>, SearchError> {
        let mut results: PerType<Vec<ScoredId>> =
            types.iter().map(|t| (*t, Vec::new())).collect();
        if text.trim().is_empty() || limit == 0 {
            return Ok(results);
        }

        let parser = QueryParser::for_index(&self.index, vec![self.schema.text]);
        let searcher = self.reader.searcher();
        for (entry_type, hits) in results.iter_mut() {
            let (text_query, errors) = parser.parse_query_lenient(text);
            if !errors.is_empty() {
                debug!(query = text, errors = errors.len(), "Dropped unparseable query parts");
            }
            let type_query = TermQuery::new(
                Term::from_field_text(self.schema.entry_type, entry_type.as_str()),
                IndexRecordOption::Basic,
            );
            let query = BooleanQuery::new(vec![
                (Occur::Must, text_query),
                (Occur::Must, Box::new(type_query) as Box<dyn Query>),
            ]);

            for (score, address) in searcher.search(&query, &TopDocs::with_limit(limit))? {
                let doc: TantivyDocument = searcher.doc(address)?;
                if let Some(id) = doc.get_first(self.schema.entry_id).and_then(|v| v.as_str()) {
                    hits.push(ScoredId::new(id, score));
                }
            }
        }

        info!(
            query = text,
            results = results.values().map(Vec::len).sum::<usize>(),
            "Lexical search complete"
        );
        Ok(results)
    }

    /// [`search_scored`](Self::search_scored) on the blocking thread pool.
    async fn search_blocking(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<Vec<ScoredId>>, CollaboratorError> {
        let searcher = self.clone();
        let text = text.to_string();
        let types = types.to_vec();
        let results =
            tokio::task::spawn_blocking(move || searcher.search_scored(&text, &types, limit))
                .await
                .map_err(|e| CollaboratorError::Backend(format!("Search task failed: {}", e)))??;
        Ok(results)
    }

    /// Number of live documents visible to the current reader.
    pub fn num_docs(&self) -> u64 {
        self.reader
            .searcher()
            .segment_readers()
            .iter()
            .map(|r| r.num_docs() as u64)
            .sum()
    }
}

#[async_trait]
impl ScoredLexicalSearch for LexicalSearcher {
    async fn search_with_scores(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<Vec<ScoredId>>, CollaboratorError> {
        self.search_blocking(text, types, limit).await
    }
}

#[async_trait]
impl LexicalSearch for LexicalSearcher {
    async fn search(
        &self,
        text: &str,
        types: &[EntryType],
        limit: usize,
    ) -> Result<PerType<HashSet<String>>, CollaboratorError> {
        let scored = self.search_blocking(text, types, limit).await?;
        Ok(scored
            .into_iter()
            .map(|(t, hits)| (t, hits.into_iter().map(|h| h.id).collect()))
            .collect())
    }
}
