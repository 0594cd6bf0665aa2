//! Post-load verification: aggregate count comparison per entity.
//!
//! Count-only by design — no row-level diffing. The pass never mutates
//! data and never aborts: a fetch failure or a zero count on either side
//! skips that entity's verdict and the loop continues.
use tracing::{error, info, warn};

use crate::config::Entity;
use crate::db::{self, Pool};
use crate::error::SyncError;
use crate::model::{EntityReconciliation, Verdict};
use crate::source::DocumentSource;

/// Compare source and sink cardinalities for every configured entity.
pub async fn reconcile_entities(
    pool: &Pool,
    source: &dyn DocumentSource,
    entities: &[Entity],
) -> Vec<EntityReconciliation> {
    let mut report = Vec::with_capacity(entities.len());
    for entity in entities {
        report.push(reconcile_entity(pool, source, entity).await);
    }
    report
}

async fn reconcile_entity(
    pool: &Pool,
    source: &dyn DocumentSource,
    entity: &Entity,
) -> EntityReconciliation {
    let skipped = |source_count, sink_count| EntityReconciliation {
        entity: entity.name.clone(),
        source_count,
        sink_count,
        verdict: Verdict::Skipped,
    };

    let source_count = match source.count_documents(&entity.name).await {
        Ok(count) => count,
        Err(err) => {
            let err = SyncError::reconciliation(entity.name.as_str(), err);
            error!(%err, "source count failed, skipping entity");
            return skipped(0, 0);
        }
    };

    let sink_count = match sink_count(pool, entity).await {
        Ok(count) => count,
        Err(err) => {
            let err = SyncError::reconciliation(entity.name.as_str(), err);
            error!(%err, "sink count failed, skipping entity");
            return skipped(source_count, 0);
        }
    };

    // Nothing to reconcile is not a mismatch.
    if source_count == 0 || sink_count == 0 {
        warn!(
            entity = %entity.name,
            source_count,
            sink_count,
            "zero records on one side, skipping comparison"
        );
        return skipped(source_count, sink_count);
    }

    let verdict = if source_count == sink_count {
        info!(entity = %entity.name, count = source_count, "record counts match");
        Verdict::Matched
    } else {
        warn!(
            entity = %entity.name,
            source_count,
            sink_count,
            "record count mismatch"
        );
        Verdict::Mismatched
    };
    EntityReconciliation {
        entity: entity.name.clone(),
        source_count,
        sink_count,
        verdict,
    }
}

/// Sink-side cardinality: distinct natural keys for keyed entities (the
/// flattened table may hold several rows per logical record), plain row
/// count otherwise.
async fn sink_count(pool: &Pool, entity: &Entity) -> Result<u64, sqlx::Error> {
    match &entity.natural_key {
        Some(key) => db::count_distinct_keys(pool, entity.table(), key).await,
        None => db::count_rows(pool, entity.table()).await,
    }
}
