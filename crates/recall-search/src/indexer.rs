//! Entry indexer.
//!
//! Wraps IndexWriter for shared access via Arc<Mutex>. Changes are not
//! visible to searchers until commit() and a reader reload.

use std::sync::{Arc, Mutex, MutexGuard};

use tantivy::{IndexWriter, Term};
use tracing::{debug, info, warn};

use recall_types::Entry;

use crate::document::entry_to_doc;
use crate::error::SearchError;
use crate::index::LexicalIndex;
use crate::schema::EntrySchema;

/// Adds, replaces and removes entry documents.
pub struct EntryIndexer {
    writer: Arc<Mutex<IndexWriter>>,
    schema: EntrySchema,
}

impl EntryIndexer {
    pub fn new(index: &LexicalIndex) -> Result<Self, SearchError> {
        Ok(Self {
            writer: Arc::new(Mutex::new(index.writer()?)),
            schema: index.schema().clone(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexWriter>, SearchError> {
        self.writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))
    }

    /// Index an entry, replacing any document with the same id.
    pub fn upsert(&self, entry: &Entry) -> Result<(), SearchError> {
        let writer = self.lock()?;
        writer.delete_term(Term::from_field_text(self.schema.entry_id, &entry.id));
        writer.add_document(entry_to_doc(&self.schema, entry))?;

        debug!(entry_id = %entry.id, entry_type = %entry.entry_type, "Indexed entry");
        Ok(())
    }

    /// Index many entries under one lock.
    pub fn upsert_batch(&self, entries: &[Entry]) -> Result<usize, SearchError> {
        let writer = self.lock()?;
        for entry in entries {
            writer.delete_term(Term::from_field_text(self.schema.entry_id, &entry.id));
            writer.add_document(entry_to_doc(&self.schema, entry))?;
        }

        debug!(count = entries.len(), "Indexed entry batch");
        Ok(entries.len())
    }

    pub fn delete(&self, entry_id: &str) -> Result<(), SearchError> {
        let writer = self.lock()?;
        writer.delete_term(Term::from_field_text(self.schema.entry_id, entry_id));
        debug!(entry_id, "Deleted entry");
        Ok(())
    }

    /// Commit pending changes. Expensive; batch upserts between commits.
    pub fn commit(&self) -> Result<u64, SearchError> {
        let opstamp = self.lock()?.commit()?;
        info!(opstamp, "Committed index changes");
        Ok(opstamp)
    }

    /// Discard uncommitted changes.
    pub fn rollback(&self) -> Result<u64, SearchError> {
        let opstamp = self.lock()?.rollback()?;
        warn!(opstamp, "Rolled back index changes");
        Ok(opstamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use recall_types::{EntryType, ScopeRef};

    fn entry(id: &str, name: &str) -> Entry {
        Entry::new(id, EntryType::Knowledge, &ScopeRef::global(), name, Utc::now())
    }

    fn num_docs(index: &LexicalIndex) -> u64 {
        let reader = index.reader().unwrap();
        reader
            .searcher()
            .segment_readers()
            .iter()
            .map(|r| r.num_docs() as u64)
            .sum()
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let index = LexicalIndex::create_in_ram();
        let indexer = EntryIndexer::new(&index).unwrap();

        indexer.upsert(&entry("k1", "version one")).unwrap();
        indexer.commit().unwrap();
        indexer.upsert(&entry("k1", "version two")).unwrap();
        indexer.commit().unwrap();

        assert_eq!(num_docs(&index), 1);
    }

    #[test]
    fn test_batch_and_delete() {
        let index = LexicalIndex::create_in_ram();
        let indexer = EntryIndexer::new(&index).unwrap();

        let entries: Vec<Entry> = (0..4).map(|i| entry(&format!("k{}", i), "db")).collect();
        assert_eq!(indexer.upsert_batch(&entries).unwrap(), 4);
        indexer.commit().unwrap();
        assert_eq!(num_docs(&index), 4);

        indexer.delete("k2").unwrap();
        indexer.commit().unwrap();
        assert_eq!(num_docs(&index), 3);
    }

    #[test]
    fn test_rollback_discards_pending() {
        let index = LexicalIndex::create_in_ram();
        let indexer = EntryIndexer::new(&index).unwrap();

        indexer.upsert(&entry("k1", "pending")).unwrap();
        indexer.rollback().unwrap();
        indexer.commit().unwrap();

        assert_eq!(num_docs(&index), 0);
    }
}
