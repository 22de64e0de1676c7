//! Memory entry types.
//!
//! Entries are the unit of storage in the recall store. Each entry has a
//! type (guideline, knowledge, tool, experience) and lives at exactly one
//! scope level. The same logical entry may be defined at several levels of
//! a scope chain; the most specific definition wins at query time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Map keyed by entry type.
///
/// A `BTreeMap` keeps iteration order stable across runs, which makes
/// pipeline output deterministic.
pub type PerType<T> = BTreeMap<EntryType, T>;

/// Kind of memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Rules and conventions an agent should follow
    Guideline,
    /// Facts and reference material
    Knowledge,
    /// Tool definitions (commands, scripts, APIs)
    Tool,
    /// Past episodes and what was learned from them
    Experience,
}

impl EntryType {
    /// Every entry type, in canonical order.
    pub const ALL: [EntryType; 4] = [
        EntryType::Guideline,
        EntryType::Knowledge,
        EntryType::Tool,
        EntryType::Experience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Guideline => "guideline",
            EntryType::Knowledge => "knowledge",
            EntryType::Tool => "tool",
            EntryType::Experience => "experience",
        }
    }

    /// Parse from string, returning None for unknown types.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "guideline" => Some(EntryType::Guideline),
            "knowledge" => Some(EntryType::Knowledge),
            "tool" => Some(EntryType::Tool),
            "experience" => Some(EntryType::Experience),
            _ => None,
        }
    }
}

impl std::str::FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown entry type: {}", s))
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Level of the scope hierarchy an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Global,
    Org,
    Project,
    Session,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Global => "global",
            ScopeType::Org => "org",
            ScopeType::Project => "project",
            ScopeType::Session => "session",
        }
    }
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentinel scope id used for dedup keys when an entry has no scope id.
pub const GLOBAL_SCOPE_ID: &str = "global";

/// A single link in a scope chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRef {
    pub scope_type: ScopeType,

    /// None for the global scope
    #[serde(default)]
    pub scope_id: Option<String>,
}

impl ScopeRef {
    pub fn new(scope_type: ScopeType, scope_id: impl Into<String>) -> Self {
        Self {
            scope_type,
            scope_id: Some(scope_id.into()),
        }
    }

    /// The global scope.
    pub fn global() -> Self {
        Self {
            scope_type: ScopeType::Global,
            scope_id: None,
        }
    }
}

impl std::fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope_id {
            Some(id) => write!(f, "{}:{}", self.scope_type, id),
            None => write!(f, "{}", self.scope_type),
        }
    }
}

/// A stored memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry identifier
    pub id: String,

    pub entry_type: EntryType,

    /// Scope level the entry was written at
    pub scope_type: ScopeType,

    /// Scope identifier (None for global entries)
    #[serde(default)]
    pub scope_id: Option<String>,

    /// Logical name; unique per (scope_type, scope_id, entry_type)
    pub name: String,

    /// Optional display title (knowledge and experience entries)
    #[serde(default)]
    pub title: Option<String>,

    /// Body text
    #[serde(default)]
    pub content: String,

    /// Priority, meaningful for guidelines only
    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub category: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Type-specific payload (tool parameters, experience outcome, ...)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Entry {
    pub fn new(
        id: impl Into<String>,
        entry_type: EntryType,
        scope: &ScopeRef,
        name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            entry_type,
            scope_type: scope.scope_type,
            scope_id: scope.scope_id.clone(),
            name: name.into(),
            title: None,
            content: String::new(),
            priority: None,
            category: None,
            created_at,
            metadata: serde_json::Value::Null,
        }
    }

    /// Builder: set content
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Builder: set title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builder: set priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Builder: set category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Builder: set type-specific metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Key identifying "the same logical entry" across scope levels.
    pub fn dedup_key(&self) -> (ScopeType, String, String) {
        (
            self.scope_type,
            self.scope_id
                .clone()
                .unwrap_or_else(|| GLOBAL_SCOPE_ID.to_string()),
            self.name.clone(),
        )
    }

    /// All searchable text of the entry, joined with newlines.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.name.as_str()];
        if let Some(title) = &self.title {
            parts.push(title);
        }
        if !self.content.is_empty() {
            parts.push(&self.content);
        }
        parts.join("\n")
    }
}

/// Generate a new time-ordered entry id.
pub fn new_entry_id() -> String {
    ulid::Ulid::new().to_string()
}

/// An entry as returned by a scope-chain fetch, tagged with the position
/// of the scope it was found at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedEntry {
    pub entry: Entry,

    /// Index into the scope chain; 0 is the most specific scope
    pub scope_index: usize,
}

impl ScopedEntry {
    pub fn new(entry: Entry, scope_index: usize) -> Self {
        Self { entry, scope_index }
    }
}
