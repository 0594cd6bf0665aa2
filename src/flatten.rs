//! Cross-product flattening of nested array fields.
//!
//! One document expands into `n1 x n2 x ...` flat rows, one per combination
//! of designated nested-field elements. The expansion is an explicit fold:
//! fields are processed in document order and each designated field maps the
//! row set produced so far to the next row set.
use serde_json::Value;
use tracing::warn;

use crate::error::SyncError;
use crate::model::{name_label, Document};

/// What to do when a designated field holds an empty sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptySequencePolicy {
    /// The cross product with an empty set is empty: the whole document is
    /// dropped from the output.
    DropDocument,
    /// Omit the field from the cross product and keep the document.
    KeepWithoutField,
}

/// Active policy. An empty designated sequence drops the document; the
/// flattened row count stays the exact product of the element counts.
pub const EMPTY_SEQUENCE_POLICY: EmptySequencePolicy = EmptySequencePolicy::DropDocument;

/// Expands a single document into flat rows by cross-producting the
/// designated nested array fields.
#[derive(Debug, Clone)]
pub struct DocumentFlattener {
    nested_fields: Vec<String>,
    policy: EmptySequencePolicy,
}

impl DocumentFlattener {
    pub fn new(nested_fields: Vec<String>) -> Self {
        Self {
            nested_fields,
            policy: EMPTY_SEQUENCE_POLICY,
        }
    }

    #[cfg(test)]
    pub fn with_policy(nested_fields: Vec<String>, policy: EmptySequencePolicy) -> Self {
        Self {
            nested_fields,
            policy,
        }
    }

    /// Flatten one document. Row count is the product of the designated
    /// fields' element counts; non-designated fields are copied into every
    /// row unchanged. Errors abort only this document, never the batch.
    pub fn flatten(&self, doc: &Document) -> Result<Vec<Document>, SyncError> {
        let seed: Vec<Document> = vec![Document::new()];
        doc.iter().try_fold(seed, |rows, (field, value)| {
            if self.is_designated(field) {
                if let Value::Array(elements) = value {
                    return self.expand_field(rows, field, elements);
                }
            }
            // Non-designated (or designated but not a sequence): copy into
            // every accumulated row.
            Ok(rows
                .into_iter()
                .map(|mut row| {
                    row.insert(field.clone(), value.clone());
                    row
                })
                .collect())
        })
    }

    fn is_designated(&self, field: &str) -> bool {
        self.nested_fields.iter().any(|f| f == field)
    }

    /// One fold step: the cross product of the accumulated rows with the
    /// field's elements.
    fn expand_field(
        &self,
        rows: Vec<Document>,
        field: &str,
        elements: &[Value],
    ) -> Result<Vec<Document>, SyncError> {
        if elements.is_empty() {
            return match self.policy {
                EmptySequencePolicy::DropDocument => {
                    warn!(field, "empty nested sequence, dropping document");
                    Ok(Vec::new())
                }
                EmptySequencePolicy::KeepWithoutField => Ok(rows),
            };
        }

        let mut expanded = Vec::with_capacity(rows.len() * elements.len());
        for element in elements {
            let scalar = element_scalar(field, element)?;
            for row in &rows {
                let mut next = row.clone();
                next.insert(field.to_string(), scalar.clone());
                expanded.push(next);
            }
        }
        Ok(expanded)
    }
}

/// Scalar value contributed by one nested element. An object exposing a
/// `"name"` label contributes only the label; the rest of the object is
/// stripped. An object without one cannot become a flat cell.
fn element_scalar(field: &str, element: &Value) -> Result<Value, SyncError> {
    match element {
        Value::Object(_) => match name_label(element) {
            Some(label) => Ok(Value::String(label.to_string())),
            None => Err(SyncError::transform(
                field,
                "nested object element has no \"name\" label",
            )),
        },
        Value::Array(_) => Err(SyncError::transform(
            field,
            "nested element is itself a sequence",
        )),
        scalar => Ok(scalar.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().unwrap().clone()
    }

    fn flatten(fields: &[&str], d: &Document) -> Vec<Document> {
        DocumentFlattener::new(fields.iter().map(|s| s.to_string()).collect())
            .flatten(d)
            .unwrap()
    }

    #[test]
    fn row_count_is_product_of_element_counts() {
        let d = doc(json!({
            "title": "A",
            "authors": [{"name": "X"}, {"name": "Y"}],
            "tags": [{"name": "T1"}, {"name": "T2"}, {"name": "T3"}]
        }));
        let rows = flatten(&["authors", "tags"], &d);
        assert_eq!(rows.len(), 6);
        for row in &rows {
            assert_eq!(row.get("title"), Some(&json!("A")));
            assert!(row.get("authors").unwrap().is_string());
            assert!(row.get("tags").unwrap().is_string());
        }
    }

    #[test]
    fn name_labels_replace_nested_objects() {
        let d = doc(json!({
            "title": "A",
            "authors": [{"name": "X"}, {"name": "Y"}],
            "tags": [{"name": "T1"}]
        }));
        let rows = flatten(&["authors", "tags"], &d);
        assert_eq!(
            rows,
            vec![
                doc(json!({"title": "A", "authors": "X", "tags": "T1"})),
                doc(json!({"title": "A", "authors": "Y", "tags": "T1"})),
            ]
        );
    }

    #[test]
    fn scalar_elements_pass_through() {
        let d = doc(json!({"id": 1, "tags": ["red", "blue"]}));
        let rows = flatten(&["tags"], &d);
        assert_eq!(
            rows,
            vec![
                doc(json!({"id": 1, "tags": "red"})),
                doc(json!({"id": 1, "tags": "blue"})),
            ]
        );
    }

    #[test]
    fn empty_sequence_drops_the_document() {
        // Deliberate policy, not an accident: the cross product with an
        // empty set is empty.
        assert_eq!(EMPTY_SEQUENCE_POLICY, EmptySequencePolicy::DropDocument);
        let d = doc(json!({"title": "A", "authors": [], "tags": [{"name": "T"}]}));
        assert!(flatten(&["authors", "tags"], &d).is_empty());
    }

    #[test]
    fn keep_without_field_policy_retains_the_document() {
        let d = doc(json!({"title": "A", "authors": [], "tags": [{"name": "T"}]}));
        let rows = DocumentFlattener::with_policy(
            vec!["authors".into(), "tags".into()],
            EmptySequencePolicy::KeepWithoutField,
        )
        .flatten(&d)
        .unwrap();
        assert_eq!(rows, vec![doc(json!({"title": "A", "tags": "T"}))]);
    }

    #[test]
    fn designated_field_that_is_not_a_sequence_is_copied() {
        let d = doc(json!({"title": "A", "authors": "single"}));
        let rows = flatten(&["authors"], &d);
        assert_eq!(rows, vec![doc(json!({"title": "A", "authors": "single"}))]);
    }

    #[test]
    fn non_designated_sequences_are_not_expanded() {
        let d = doc(json!({"title": "A", "extras": [1, 2, 3]}));
        let rows = flatten(&["authors"], &d);
        assert_eq!(rows, vec![doc(json!({"title": "A", "extras": [1, 2, 3]}))]);
    }

    #[test]
    fn unlabeled_object_element_is_a_transform_error() {
        let d = doc(json!({"title": "A", "authors": [{"id": 3}]}));
        let err = DocumentFlattener::new(vec!["authors".into()])
            .flatten(&d)
            .unwrap_err();
        assert!(matches!(err, SyncError::Transform { .. }));
    }

    #[test]
    fn later_fields_thread_through_earlier_expansions() {
        let d = doc(json!({
            "authors": ["X", "Y"],
            "year": 1999,
            "tags": ["a", "b"]
        }));
        let rows = flatten(&["authors", "tags"], &d);
        assert_eq!(rows.len(), 4);
        // Every combination appears exactly once, with the interleaved
        // scalar copied into each.
        for author in ["X", "Y"] {
            for tag in ["a", "b"] {
                assert!(rows.iter().any(|r| {
                    r.get("authors") == Some(&json!(author))
                        && r.get("tags") == Some(&json!(tag))
                        && r.get("year") == Some(&json!(1999))
                }));
            }
        }
    }
}
