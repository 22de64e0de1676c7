//! Tantivy schema for entry search.
//!
//! One document per entry. The entry type is an exact-match field so a
//! query can be restricted to a single type; the searchable text is the
//! entry's name, title and content.

use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct EntrySchema {
    schema: Schema,
    /// "guideline", "knowledge", "tool" or "experience" (STRING | STORED)
    pub entry_type: Field,
    /// Primary key (STRING | STORED)
    pub entry_id: Field,
    /// Name, title and content (TEXT)
    pub text: Field,
}

impl EntrySchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Recover field handles from an index opened on disk
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| SearchError::SchemaMismatch(format!("missing {} field", name)))
        };
        let entry_type = field("entry_type")?;
        let entry_id = field("entry_id")?;
        let text = field("text")?;

        Ok(Self {
            schema,
            entry_type,
            entry_id,
            text,
        })
    }
}

/// Build the entry search schema.
pub fn build_entry_schema() -> EntrySchema {
    let mut schema_builder = Schema::builder();

    let entry_type = schema_builder.add_text_field("entry_type", STRING | STORED);
    let entry_id = schema_builder.add_text_field("entry_id", STRING | STORED);
    let text = schema_builder.add_text_field("text", TEXT);

    EntrySchema {
        schema: schema_builder.build(),
        entry_type,
        entry_id,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schema() {
        let schema = build_entry_schema();
        assert!(schema.schema().get_field("entry_type").is_ok());
        assert!(schema.schema().get_field("entry_id").is_ok());
        assert!(schema.schema().get_field("text").is_ok());
    }

    #[test]
    fn test_from_schema() {
        let original = build_entry_schema();
        let rebuilt = EntrySchema::from_schema(original.schema().clone()).unwrap();
        assert_eq!(rebuilt.entry_type, original.entry_type);
        assert_eq!(rebuilt.entry_id, original.entry_id);
        assert_eq!(rebuilt.text, original.text);
    }

    #[test]
    fn test_from_foreign_schema_fails() {
        let mut builder = Schema::builder();
        builder.add_text_field("doc_id", STRING);
        let result = EntrySchema::from_schema(builder.build());
        assert!(matches!(result, Err(SearchError::SchemaMismatch(_))));
    }
}
