//! Batch normalization: duplicate removal and per-column type consistency.
//!
//! Columns are classified by their dominant value type across the whole
//! batch, then every cell is coerced to that type with fixed defaults for
//! missing or unparseable values. Column names are normalized independently
//! of cell content. The pass is idempotent: a normalized batch re-normalizes
//! to itself.
use std::collections::{BTreeMap, HashSet};

use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::model::{parse_timestamp, Document, EPOCH_SENTINEL, TEMPORAL_FORMAT};

/// Dominant value class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Numeric,
    Temporal,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Numeric => "numeric",
            ColumnType::Temporal => "temporal",
        }
    }
}

/// Normalize a batch of flattened rows.
///
/// Steps, in order: column-name normalization, exact-duplicate removal,
/// column classification, per-column coercion (missing columns are filled
/// into every row so the batch ends with a uniform column set). An empty
/// batch is returned unchanged. A column that fails to coerce is logged and
/// left as-is; the remaining columns still normalize.
pub fn normalize_batch(rows: Vec<Document>) -> Vec<Document> {
    if rows.is_empty() {
        warn!("empty batch, returning without normalization");
        return rows;
    }

    let renamed: Vec<Document> = rows.into_iter().map(normalize_row_names).collect();
    let mut deduped = drop_duplicates(renamed);

    for (column, ty) in classify_columns(&deduped) {
        if let Err(err) = coerce_column(&mut deduped, &column, ty) {
            warn!(column = %column, %err, "column normalization failed, leaving column as-is");
        }
    }
    deduped
}

/// Normalized form of a column name: trimmed, lower-cased, spaces replaced
/// by underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Classify every column appearing anywhere in the batch, in first-seen
/// order. Exposed so the staging loader can derive column types for DDL.
pub fn classify_columns(rows: &[Document]) -> Vec<(String, ColumnType)> {
    let mut order: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !order.iter().any(|k| k == key) {
                order.push(key.clone());
            }
        }
    }
    order
        .into_iter()
        .map(|column| {
            let ty = dominant_type(rows, &column);
            (column, ty)
        })
        .collect()
}

fn normalize_row_names(row: Document) -> Document {
    let mut out = Document::new();
    for (key, value) in row {
        let normalized = normalize_column_name(&key);
        if out.contains_key(&normalized) {
            warn!(column = %normalized, "column name collision after normalization, keeping later value");
        }
        out.insert(normalized, value);
    }
    out
}

/// Exact-duplicate removal across all columns, first occurrence wins.
/// The comparison key is a key-sorted rendering so field order is irrelevant.
fn drop_duplicates(rows: Vec<Document>) -> Vec<Document> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let canonical: BTreeMap<&String, &Value> = row.iter().collect();
        let key = serde_json::to_string(&canonical).unwrap_or_default();
        if seen.insert(key) {
            out.push(row);
        }
    }
    out
}

/// Most frequent value class among the column's non-missing cells. Ties and
/// all-missing columns resolve to text.
fn dominant_type(rows: &[Document], column: &str) -> ColumnType {
    let mut text = 0usize;
    let mut numeric = 0usize;
    let mut temporal = 0usize;
    for row in rows {
        match row.get(column) {
            None | Some(Value::Null) => {}
            Some(Value::Number(_)) | Some(Value::Bool(_)) => numeric += 1,
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    // Blank cells carry no type evidence.
                } else if trimmed.parse::<f64>().is_ok() {
                    numeric += 1;
                } else if parse_timestamp(trimmed).is_some() {
                    temporal += 1;
                } else {
                    text += 1;
                }
            }
            Some(_) => text += 1,
        }
    }
    if text >= numeric && text >= temporal {
        ColumnType::Text
    } else if numeric >= temporal {
        ColumnType::Numeric
    } else {
        ColumnType::Temporal
    }
}

fn coerce_column(rows: &mut [Document], column: &str, ty: ColumnType) -> Result<(), SyncError> {
    for row in rows.iter_mut() {
        let coerced = coerce_value(row.get(column), column, ty)?;
        row.insert(column.to_string(), coerced);
    }
    Ok(())
}

fn coerce_value(value: Option<&Value>, column: &str, ty: ColumnType) -> Result<Value, SyncError> {
    let coerced = match ty {
        ColumnType::Text => match value {
            None | Some(Value::Null) => Value::String("unknown".to_string()),
            Some(Value::String(s)) => Value::String(s.trim().to_lowercase()),
            Some(other) => Value::String(other.to_string().trim().to_lowercase()),
        },
        ColumnType::Numeric => match value {
            None | Some(Value::Null) => Value::Number(Number::from(0)),
            Some(Value::Number(n)) => Value::Number(n.clone()),
            Some(Value::Bool(b)) => Value::Number(Number::from(i64::from(*b))),
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(v) => Value::Number(
                    Number::from_f64(v)
                        .ok_or_else(|| SyncError::transform(column, "non-finite numeric value"))?,
                ),
                Err(_) => {
                    debug!(column, value = %s, "unparseable numeric, defaulting to 0");
                    Value::Number(Number::from(0))
                }
            },
            Some(_) => Value::Number(Number::from(0)),
        },
        ColumnType::Temporal => {
            let parsed = value
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .unwrap_or(*EPOCH_SENTINEL);
            Value::String(parsed.format(TEMPORAL_FORMAT).to_string())
        }
    };
    Ok(coerced)
}
