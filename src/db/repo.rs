use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::db::model::BookRow;
use crate::error::SyncError;
use crate::model::{parse_timestamp, BookRecord, Document};
use crate::normalize::ColumnType;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool, SyncError> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .map_err(|err| SyncError::connection("sink", err))?;
    // WAL, stricter durability, and a deliberate lock-wait timeout.
    for pragma in [
        "PRAGMA journal_mode=WAL;",
        "PRAGMA synchronous=FULL;",
        "PRAGMA busy_timeout=5000;",
    ] {
        sqlx::query(pragma)
            .execute(&pool)
            .await
            .map_err(|err| SyncError::connection("sink", err))?;
    }
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the
/// parent directory exists. In-memory URLs and non-sqlite schemes pass
/// through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let expanded = match path.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path.to_string(),
        },
        None => path.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded}");
    if let Some(q) = query {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), SyncError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| SyncError::connection("sink", err))
}

/// Table and column names come from configuration, not user data, but they
/// still cannot be bound as parameters; restrict them to identifier
/// characters before interpolation.
fn sql_ident(name: &str) -> Result<&str, sqlx::Error> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(name)
    } else {
        Err(sqlx::Error::Protocol(format!(
            "invalid SQL identifier: {name:?}"
        )))
    }
}

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Maximum `last_modified_date` in the sink table, normalized from its
/// stored text form. `None` when the table has no rows.
#[instrument(skip_all)]
pub async fn max_last_modified(
    pool: &Pool,
    table: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let table = sql_ident(table)?;
    let raw: Option<String> =
        sqlx::query_scalar(&format!("SELECT MAX(last_modified_date) FROM {table}"))
            .fetch_one(pool)
            .await?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

#[instrument(skip_all)]
pub async fn book_exists(pool: &Pool, table: &str, book_id: i64) -> Result<bool, sqlx::Error> {
    let table = sql_ident(table)?;
    let count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE book_id = ?"))
            .bind(book_id)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

#[instrument(skip_all)]
pub async fn insert_book(pool: &Pool, table: &str, record: &BookRecord) -> Result<(), sqlx::Error> {
    let table = sql_ident(table)?;
    sqlx::query(&format!(
        "INSERT INTO {table} (book_id, title, authors, publication_year, isbn, \
         average_rating, tags, image_url, modified_date, last_modified_date) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(record.book_id)
    .bind(&record.title)
    .bind(&record.authors)
    .bind(record.publication_year)
    .bind(&record.isbn)
    .bind(record.average_rating)
    .bind(&record.tags)
    .bind(&record.image_url)
    .bind(record.modified_date.as_ref().map(fmt_ts))
    .bind(record.last_modified_date.as_ref().map(fmt_ts))
    .execute(pool)
    .await?;
    Ok(())
}

/// Overwrite all mutable fields for the record's natural key.
#[instrument(skip_all)]
pub async fn update_book(pool: &Pool, table: &str, record: &BookRecord) -> Result<(), sqlx::Error> {
    let table = sql_ident(table)?;
    sqlx::query(&format!(
        "UPDATE {table} SET title = ?, authors = ?, publication_year = ?, isbn = ?, \
         average_rating = ?, tags = ?, image_url = ?, modified_date = ?, \
         last_modified_date = ? WHERE book_id = ?"
    ))
    .bind(&record.title)
    .bind(&record.authors)
    .bind(record.publication_year)
    .bind(&record.isbn)
    .bind(record.average_rating)
    .bind(&record.tags)
    .bind(&record.image_url)
    .bind(record.modified_date.as_ref().map(fmt_ts))
    .bind(record.last_modified_date.as_ref().map(fmt_ts))
    .bind(record.book_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_book(
    pool: &Pool,
    table: &str,
    book_id: i64,
) -> Result<Option<BookRow>, sqlx::Error> {
    let table = sql_ident(table)?;
    sqlx::query_as::<_, BookRow>(&format!(
        "SELECT book_id, title, authors, publication_year, isbn, average_rating, \
         tags, image_url, modified_date, last_modified_date FROM {table} WHERE book_id = ?"
    ))
    .bind(book_id)
    .fetch_optional(pool)
    .await
}

#[instrument(skip_all)]
pub async fn count_rows(pool: &Pool, table: &str) -> Result<u64, sqlx::Error> {
    let table = sql_ident(table)?;
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count as u64)
}

/// Distinct natural keys in the sink table. The flattened form of a keyed
/// entity may hold several rows per logical record, so reconciliation
/// counts keys, not rows.
#[instrument(skip_all)]
pub async fn count_distinct_keys(
    pool: &Pool,
    table: &str,
    key_column: &str,
) -> Result<u64, sqlx::Error> {
    let table = sql_ident(table)?;
    let key_column = sql_ident(key_column)?;
    let count: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(DISTINCT {key_column}) FROM {table}"))
            .fetch_one(pool)
            .await?;
    Ok(count as u64)
}

/// Replace the contents of a full-load staging table with a normalized
/// batch. The table is re-created from the batch's column classification:
/// numeric columns map to REAL, everything else to TEXT.
#[instrument(skip_all)]
pub async fn replace_flat_rows(
    pool: &Pool,
    table: &str,
    columns: &[(String, ColumnType)],
    rows: &[Document],
) -> Result<u64, sqlx::Error> {
    let table = sql_ident(table)?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(pool)
        .await?;

    let column_defs = columns
        .iter()
        .map(|(name, ty)| {
            let sql_type = match ty {
                ColumnType::Numeric => "REAL",
                ColumnType::Text | ColumnType::Temporal => "TEXT",
            };
            sql_ident(name).map(|n| format!("{n} {sql_type}"))
        })
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    sqlx::query(&format!("CREATE TABLE {table} ({column_defs})"))
        .execute(pool)
        .await?;

    if rows.is_empty() {
        return Ok(0);
    }

    let column_names = columns
        .iter()
        .map(|(name, _)| sql_ident(name).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = format!("INSERT INTO {table} ({column_names}) VALUES ({placeholders})");

    let mut written = 0u64;
    for row in rows {
        let mut query = sqlx::query(&insert);
        for (name, ty) in columns {
            query = match (ty, row.get(name)) {
                (ColumnType::Numeric, Some(value)) => query.bind(value.as_f64().unwrap_or(0.0)),
                (ColumnType::Numeric, None) => query.bind(0.0f64),
                (_, Some(serde_json::Value::String(s))) => query.bind(s.clone()),
                (_, Some(value)) => query.bind(value.to_string()),
                (_, None) => query.bind("unknown".to_string()),
            };
        }
        query.execute(pool).await?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("sqlite::memory:?cache=shared"),
            "sqlite::memory:?cache=shared"
        );
    }

    #[test]
    fn non_sqlite_schemes_pass_through() {
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn file_urls_are_rebuilt_with_double_slash() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested/books.db");
        let url = format!("sqlite:{}", path.display());
        let rebuilt = prepare_sqlite_url(&url);
        assert_eq!(rebuilt, format!("sqlite://{}", path.display()));
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn identifiers_are_restricted() {
        assert!(sql_ident("books").is_ok());
        assert!(sql_ident("books_flat").is_ok());
        assert!(sql_ident("books; DROP TABLE books").is_err());
        assert!(sql_ident("").is_err());
    }
}
