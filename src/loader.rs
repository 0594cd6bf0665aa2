//! Watermark-based change capture against the relational sink.
//!
//! One incremental cycle: read the watermark from the sink, fetch the
//! source delta strictly newer than it, and apply each record as an
//! existence-checked insert-or-update. Commits are per record; one bad
//! record is reported and the loop moves on. There is no locking: a
//! concurrent writer can race the existence check, which is an accepted
//! non-guarantee of this protocol.
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Entity;
use crate::db::{self, Pool};
use crate::error::SyncError;
use crate::model::{BookRecord, CycleSummary, Document, SyncOutcome, DEFAULT_WATERMARK};
use crate::normalize;
use crate::source::DocumentSource;
use crate::transform;

/// Watermark for the next incremental fetch: the maximum
/// `last_modified_date` in the sink table, or the fixed default when the
/// table has no rows. Computed fresh every cycle, never cached.
pub async fn sink_watermark(pool: &Pool, table: &str) -> Result<DateTime<Utc>, SyncError> {
    let max = db::max_last_modified(pool, table)
        .await
        .map_err(|err| SyncError::connection("sink", err))?;
    Ok(max.unwrap_or(*DEFAULT_WATERMARK))
}

/// Run one incremental sync cycle for a keyed entity.
///
/// Only connection-level failures abort the cycle; every per-record failure
/// becomes a [`SyncOutcome::Failed`] in the returned summary.
pub async fn run_incremental(
    pool: &Pool,
    source: &dyn DocumentSource,
    entity: &Entity,
) -> Result<CycleSummary, SyncError> {
    let run_id = Uuid::new_v4();
    let table = entity.table();
    let watermark = sink_watermark(pool, table).await?;
    info!(%run_id, table, %watermark, "starting incremental cycle");

    let delta = match source.fetch_modified_since(&entity.name, watermark).await {
        Ok(delta) => delta,
        Err(err @ SyncError::Connection { .. }) => return Err(err),
        Err(err) => {
            warn!(%run_id, table, %err, "delta fetch failed, treating batch as empty");
            Vec::new()
        }
    };
    if delta.is_empty() {
        info!(%run_id, table, "no new or updated records");
    }

    let mut outcomes = Vec::with_capacity(delta.len());
    for doc in &delta {
        outcomes.push(upsert_document(pool, table, doc).await);
    }

    let summary = CycleSummary {
        run_id,
        table: table.to_string(),
        watermark,
        fetched: delta.len(),
        outcomes,
    };
    info!(
        %run_id,
        table,
        fetched = summary.fetched,
        inserted = summary.inserted(),
        updated = summary.updated(),
        failed = summary.failed(),
        "incremental cycle complete"
    );
    Ok(summary)
}

/// Apply one delta record: check existence by natural key, then overwrite
/// all mutable fields or create a new row. Never panics; every failure path
/// returns a `Failed` outcome carrying the key when one was parsed.
async fn upsert_document(pool: &Pool, table: &str, doc: &Document) -> SyncOutcome {
    let record = match BookRecord::from_document(doc) {
        Ok(record) => record,
        Err(err) => {
            warn!(table, %err, "record rejected before upsert");
            return SyncOutcome::Failed {
                key: None,
                reason: err.to_string(),
            };
        }
    };
    let key = record.book_id;

    let exists = match db::book_exists(pool, table, key).await {
        Ok(exists) => exists,
        Err(err) => {
            let err = SyncError::upsert(table, key.to_string(), err);
            warn!(%err, "existence check failed");
            return SyncOutcome::Failed {
                key: Some(key),
                reason: err.to_string(),
            };
        }
    };

    let applied = if exists {
        db::update_book(pool, table, &record).await
    } else {
        db::insert_book(pool, table, &record).await
    };
    match applied {
        Ok(()) if exists => {
            info!(table, book_id = key, "updated existing record");
            SyncOutcome::Updated { key }
        }
        Ok(()) => {
            info!(table, book_id = key, "inserted new record");
            SyncOutcome::Inserted { key }
        }
        Err(err) => {
            let err = SyncError::upsert(table, key.to_string(), err);
            warn!(%err, "upsert failed, continuing with next record");
            SyncOutcome::Failed {
                key: Some(key),
                reason: err.to_string(),
            }
        }
    }
}

/// Full-load path: extract every document per entity, flatten + normalize,
/// and replace the entity's `<table>_flat` staging table with the result.
///
/// A failed extraction leaves that entity's batch empty (warned, not
/// hidden); a failed staging write skips that entity; both let the
/// remaining entities proceed.
pub async fn run_full_load(
    pool: &Pool,
    source: &dyn DocumentSource,
    entities: &[Entity],
) -> Result<(), SyncError> {
    for entity in entities {
        let documents = match source.fetch_all(&entity.name).await {
            Ok(docs) => docs,
            Err(err @ SyncError::Connection { .. }) => return Err(err),
            Err(err) => {
                warn!(entity = %entity.name, %err, "extraction failed, treating batch as empty");
                Vec::new()
            }
        };

        let rows = transform::transform_entity(entity, &documents);
        if rows.is_empty() {
            warn!(entity = %entity.name, "nothing to load, skipping staging replace");
            continue;
        }

        let columns = normalize::classify_columns(&rows);
        let staging = format!("{}_flat", entity.table());
        match db::replace_flat_rows(pool, &staging, &columns, &rows).await {
            Ok(written) => info!(entity = %entity.name, table = %staging, written, "staging table replaced"),
            Err(err) => {
                let err = SyncError::upsert(staging.as_str(), "-", err);
                warn!(%err, "staging replace failed, continuing with next entity");
            }
        }
    }
    Ok(())
}
