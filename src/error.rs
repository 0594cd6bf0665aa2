//! Error taxonomy for the sync pipeline.
//!
//! Each variant carries enough context (entity, key, column, field) to
//! reproduce the failure from the logs alone. Recovery happens as close to
//! the origin as possible: per document in the transform pass, per column in
//! the normalizer, per record in the loader, per entity in the reconciler.
//! Only `Connection` is allowed to abort a whole cycle.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Source or sink unreachable. Fatal for the cycle; nothing has been
    /// written when this is raised at cycle start.
    #[error("connection failure ({store}): {reason}")]
    Connection { store: &'static str, reason: String },

    /// A batch or cursor read from the source failed. The affected batch is
    /// treated as empty and the run continues with partial data.
    #[error("extraction failed for collection '{collection}': {reason}")]
    Extraction { collection: String, reason: String },

    /// Flattening or normalization failed for one document, field, or
    /// column. The offending unit is skipped.
    #[error("transform failed at '{unit}': {reason}")]
    Transform { unit: String, reason: String },

    /// One record failed its insert or update. Other records proceed.
    #[error("upsert failed for key '{key}' in '{table}': {reason}")]
    Upsert {
        table: String,
        key: String,
        reason: String,
    },

    /// A count fetch failed during verification. That entity is skipped.
    #[error("reconciliation failed for entity '{entity}': {reason}")]
    Reconciliation { entity: String, reason: String },
}

impl SyncError {
    pub fn connection(store: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Connection {
            store,
            reason: err.to_string(),
        }
    }

    pub fn extraction(collection: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Extraction {
            collection: collection.into(),
            reason: err.to_string(),
        }
    }

    pub fn transform(unit: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Transform {
            unit: unit.into(),
            reason: err.to_string(),
        }
    }

    pub fn upsert(table: impl Into<String>, key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Upsert {
            table: table.into(),
            key: key.into(),
            reason: err.to_string(),
        }
    }

    pub fn reconciliation(entity: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Reconciliation {
            entity: entity.into(),
            reason: err.to_string(),
        }
    }
}
