use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::SyncError;

/// A semi-structured document as read from the source store. Field order is
/// preserved, so transformation passes see fields in document order.
pub type Document = Map<String, Value>;

/// Canonical rendering for temporal column values after normalization.
pub const TEMPORAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Watermark used when the sink holds no rows for an entity yet.
pub static DEFAULT_WATERMARK: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());

/// Sentinel for missing or unparseable temporal values.
pub static EPOCH_SENTINEL: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());

/// Normalize a timestamp given in any of the accepted wire forms to UTC.
///
/// Accepts RFC 3339, `T`- or space-separated seconds (with optional
/// fractional part), and bare dates. Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()));
    }
    None
}

/// The `"name"` label of an object-valued nested element, if it has one.
pub fn name_label(value: &Value) -> Option<&str> {
    value
        .as_object()
        .and_then(|obj| obj.get("name"))
        .and_then(Value::as_str)
}

/// Render one element of a multi-valued field as a scalar string.
/// Objects contribute their `"name"` label when present, anything else its
/// JSON rendering.
pub fn element_to_string(value: &Value) -> String {
    if let Some(label) = name_label(value) {
        return label.to_string();
    }
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Typed record for the `books` entity. All defaults for absent source
/// fields live in [`BookRecord::from_document`], nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub book_id: i64,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub publication_year: Option<i64>,
    pub isbn: Option<String>,
    pub average_rating: Option<f64>,
    pub tags: Option<String>,
    pub image_url: Option<String>,
    pub modified_date: Option<DateTime<Utc>>,
    pub last_modified_date: Option<DateTime<Utc>>,
}

impl BookRecord {
    /// Build a record from a raw document, coercing field values:
    /// - multi-valued fields are comma-joined into a scalar string,
    /// - numeric fields present but unparseable coerce to 0,
    /// - absent or null fields stay `None` (NULL in the sink),
    /// - timestamps are normalized through [`parse_timestamp`].
    ///
    /// A document without a usable natural key is a transform error.
    pub fn from_document(doc: &Document) -> Result<Self, SyncError> {
        let book_id = match doc.get("book_id") {
            Some(Value::Number(n)) if n.as_i64().is_some() => n.as_i64().unwrap(),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| SyncError::transform("book_id", format!("not an integer: {s:?}")))?,
            other => {
                return Err(SyncError::transform(
                    "book_id",
                    format!("missing or non-scalar natural key: {other:?}"),
                ))
            }
        };

        Ok(Self {
            book_id,
            title: opt_string(doc.get("title")),
            authors: opt_joined(doc.get("authors")),
            publication_year: opt_i64(doc.get("publication_year")),
            isbn: opt_string(doc.get("isbn")),
            average_rating: opt_f64(doc.get("average_rating")),
            tags: opt_joined(doc.get("tags")),
            image_url: opt_string(doc.get("image_url")),
            modified_date: opt_timestamp(doc.get("modified_date")),
            last_modified_date: opt_timestamp(doc.get("last_modified_date")),
        })
    }
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Comma-join a multi-valued field. A scalar already serialized upstream
/// passes through unchanged.
fn opt_joined(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(element_to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Some(other) => opt_string(Some(other)),
    }
}

fn opt_i64(value: Option<&Value>) -> Option<i64> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => Some(s.trim().parse::<i64>().unwrap_or(0)),
        Some(_) => Some(0),
    }
}

fn opt_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => Some(s.trim().parse::<f64>().unwrap_or(0.0)),
        Some(_) => Some(0.0),
    }
}

fn opt_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value.and_then(Value::as_str).and_then(parse_timestamp)
}

/// Result of applying one delta record to the sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncOutcome {
    Inserted { key: i64 },
    Updated { key: i64 },
    Failed { key: Option<i64>, reason: String },
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Inserted { .. } => "inserted",
            SyncOutcome::Updated { .. } => "updated",
            SyncOutcome::Failed { .. } => "failed",
        }
    }
}

/// Aggregate result of one incremental sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub table: String,
    pub watermark: DateTime<Utc>,
    pub fetched: usize,
    pub outcomes: Vec<SyncOutcome>,
}

impl CycleSummary {
    pub fn inserted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Inserted { .. }))
            .count()
    }

    pub fn updated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Updated { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Failed { .. }))
            .count()
    }
}

/// Verdict of a per-entity count comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    Matched,
    Mismatched,
    /// Zero records on either side, or a fetch failure: excluded from the
    /// matched/mismatched comparison.
    Skipped,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Matched => "matched",
            Verdict::Mismatched => "mismatched",
            Verdict::Skipped => "skipped",
        }
    }
}

/// Per-entity reconciliation report. Purely observational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityReconciliation {
    pub entity: String,
    pub source_count: u64,
    pub sink_count: u64,
    pub verdict: Verdict,
}

impl EntityReconciliation {
    pub fn matched(&self) -> bool {
        self.verdict == Verdict::Matched
    }
}
