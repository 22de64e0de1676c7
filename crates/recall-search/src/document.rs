//! Mapping from entries to Tantivy documents.

use tantivy::doc;
use tantivy::TantivyDocument;

use recall_types::Entry;

use crate::schema::EntrySchema;

/// Convert an entry to an indexable document.
pub fn entry_to_doc(schema: &EntrySchema, entry: &Entry) -> TantivyDocument {
    doc!(
        schema.entry_type => entry.entry_type.as_str(),
        schema.entry_id => entry.id.clone(),
        schema.text => entry.searchable_text()
    )
}
