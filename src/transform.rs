//! Full-load transform pass: flatten, then normalize, one entity at a time.
use tracing::{info, warn};

use crate::config::Entity;
use crate::flatten::DocumentFlattener;
use crate::model::Document;
use crate::normalize;

/// Flatten and normalize every document of one entity into its normalized
/// row set. A document that fails to flatten is logged and skipped; the
/// rest of the batch continues.
pub fn transform_entity(entity: &Entity, documents: &[Document]) -> Vec<Document> {
    if documents.is_empty() {
        warn!(entity = %entity.name, "no documents to transform");
        return Vec::new();
    }

    let flattener = DocumentFlattener::new(entity.nested_fields.clone());
    let mut rows = Vec::with_capacity(documents.len());
    let mut skipped = 0usize;
    for doc in documents {
        match flattener.flatten(doc) {
            Ok(flat) => rows.extend(flat),
            Err(err) => {
                skipped += 1;
                warn!(entity = %entity.name, %err, "document failed to flatten, skipping");
            }
        }
    }

    let normalized = normalize::normalize_batch(rows);
    info!(
        entity = %entity.name,
        documents = documents.len(),
        rows = normalized.len(),
        skipped,
        "transform complete"
    );
    normalized
}
