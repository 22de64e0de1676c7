//! Tantivy index management.
//!
//! An index lives either in RAM (tests, ephemeral stores) or in a directory
//! backed by MmapDirectory.

use std::path::{Path, PathBuf};

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use recall_types::Settings;

use crate::error::SearchError;
use crate::schema::{build_entry_schema, EntrySchema};

/// Default memory budget for IndexWriter (50MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Lexical index configuration
#[derive(Debug, Clone)]
pub struct LexicalIndexConfig {
    /// Index directory; None keeps the index in RAM
    pub index_path: Option<PathBuf>,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl Default for LexicalIndexConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }
}

impl LexicalIndexConfig {
    pub fn in_dir(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: Some(index_path.into()),
            ..Default::default()
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }

    /// Persistent index at `Settings::search_index_path`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::in_dir(&settings.search_index_path)
    }
}

/// Wrapper for a Tantivy index with schema access.
pub struct LexicalIndex {
    index: Index,
    schema: EntrySchema,
    config: LexicalIndexConfig,
}

impl LexicalIndex {
    /// Create an empty in-memory index.
    pub fn create_in_ram() -> Self {
        let schema = build_entry_schema();
        let index = Index::create_in_ram(schema.schema().clone());
        debug!("Created in-memory lexical index");
        Self {
            index,
            schema,
            config: LexicalIndexConfig::default(),
        }
    }

    /// Open the configured index, creating it if needed.
    pub fn open_or_create(config: LexicalIndexConfig) -> Result<Self, SearchError> {
        let Some(path) = config.index_path.clone() else {
            return Ok(Self {
                config,
                ..Self::create_in_ram()
            });
        };

        let index = open_or_create_index(&path)?;
        let schema = EntrySchema::from_schema(index.schema())?;
        info!(path = ?path, "Opened lexical index");

        Ok(Self {
            index,
            schema,
            config,
        })
    }

    pub fn schema(&self) -> &EntrySchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Create an IndexWriter with the configured memory budget
    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let memory_budget = self.config.writer_memory_mb * 1024 * 1024;
        let writer = self.index.writer(memory_budget)?;
        debug!(
            memory_mb = self.config.writer_memory_mb,
            "Created index writer"
        );
        Ok(writer)
    }

    /// Create a reader that only reloads when asked to.
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(reader)
    }

    /// Directory of a persistent index
    pub fn path(&self) -> Option<&Path> {
        self.config.index_path.as_deref()
    }
}

/// Open an existing index directory or create a new one.
pub fn open_or_create_index(path: &Path) -> Result<Index, SearchError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        Ok(Index::open_in_dir(path)?)
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let schema = build_entry_schema();
        Ok(Index::create_in_dir(path, schema.schema().clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_in_dir_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let config = LexicalIndexConfig::in_dir(temp_dir.path());

        let first = LexicalIndex::open_or_create(config.clone()).unwrap();
        assert_eq!(first.path(), Some(temp_dir.path()));
        assert!(temp_dir.path().join("meta.json").exists());

        let reopened = LexicalIndex::open_or_create(config).unwrap();
        assert_eq!(reopened.schema().text, first.schema().text);
    }

    #[test]
    fn test_default_config_is_in_ram() {
        let index = LexicalIndex::open_or_create(LexicalIndexConfig::default()).unwrap();
        assert!(index.path().is_none());
        let _writer = index.writer().unwrap();
        let _reader = index.reader().unwrap();
    }

    #[test]
    fn test_config_from_settings() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings {
            search_index_path: temp_dir.path().join("lexical").to_string_lossy().to_string(),
            ..Default::default()
        };

        let index = LexicalIndex::open_or_create(LexicalIndexConfig::from_settings(&settings))
            .unwrap();
        assert_eq!(index.path(), Some(temp_dir.path().join("lexical").as_path()));
        assert!(temp_dir.path().join("lexical").join("meta.json").exists());
    }

    #[test]
    fn test_config_with_memory() {
        let config = LexicalIndexConfig::in_dir("/tmp/test").with_memory_mb(100);
        assert_eq!(config.writer_memory_mb, 100);
    }
}
