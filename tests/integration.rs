use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};

use booksync::config::Entity;
use booksync::db;
use booksync::error::SyncError;
use booksync::loader::{run_full_load, run_incremental};
use booksync::model::{parse_timestamp, BookRecord, Document, Verdict};
use booksync::reconcile::reconcile_entities;
use booksync::source::DocumentSource;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Clone, Default)]
struct StaticSource {
    collections: HashMap<String, Vec<Document>>,
    failing: HashSet<String>,
}

impl StaticSource {
    fn insert(mut self, collection: &str, docs: Vec<Document>) -> Self {
        self.collections.insert(collection.to_string(), docs);
        self
    }

    fn failing(mut self, collection: &str) -> Self {
        self.failing.insert(collection.to_string());
        self
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, SyncError> {
        if self.failing.contains(collection) {
            return Err(SyncError::extraction(collection, "simulated source failure"));
        }
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }

    async fn fetch_modified_since(
        &self,
        collection: &str,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<Document>, SyncError> {
        let all = self.fetch_all(collection).await?;
        Ok(all
            .into_iter()
            .filter(|doc| {
                doc.get("last_modified_date")
                    .and_then(|v| v.as_str())
                    .and_then(parse_timestamp)
                    .map(|ts| ts > watermark)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, SyncError> {
        self.fetch_all(collection).await.map(|d| d.len() as u64)
    }
}

fn books_entity() -> Entity {
    Entity {
        name: "books".into(),
        table: None,
        natural_key: Some("book_id".into()),
        nested_fields: vec!["authors".into(), "tags".into()],
    }
}

fn book_doc(book_id: i64, title: &str, modified: &str) -> Document {
    json!({
        "book_id": book_id,
        "title": title,
        "authors": [{"name": "X"}, {"name": "Y"}],
        "tags": [{"name": "T1"}],
        "average_rating": 4.0,
        "last_modified_date": modified
    })
    .as_object()
    .unwrap()
    .clone()
}

#[tokio::test]
async fn empty_sink_syncs_and_reconciles_matched() {
    let pool = setup_pool().await;
    let source = StaticSource::default().insert(
        "books",
        vec![
            book_doc(1, "one", "2024-01-01T00:00:00Z"),
            book_doc(2, "two", "2024-01-02T00:00:00Z"),
            book_doc(3, "three", "2024-01-03T00:00:00Z"),
        ],
    );
    let entity = books_entity();

    // All three records are newer than the default watermark.
    let summary = run_incremental(&pool, &source, &entity).await.unwrap();
    assert_eq!(summary.inserted(), 3);

    let report = reconcile_entities(&pool, &source, &[entity]).await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].source_count, 3);
    assert_eq!(report[0].sink_count, 3);
    assert_eq!(report[0].verdict, Verdict::Matched);
    assert!(report[0].matched());
}

#[tokio::test]
async fn mismatched_counts_are_reported() {
    let pool = setup_pool().await;
    let source = StaticSource::default()
        .insert("books", vec![book_doc(1, "one", "2024-01-01T00:00:00Z")]);
    let entity = books_entity();
    run_incremental(&pool, &source, &entity).await.unwrap();

    // A row the source never produced: counts diverge.
    let stray = BookRecord::from_document(&book_doc(99, "stray", "2024-01-05T00:00:00Z")).unwrap();
    db::insert_book(&pool, "books", &stray).await.unwrap();

    let report = reconcile_entities(&pool, &source, &[entity]).await;
    assert_eq!(report[0].source_count, 1);
    assert_eq!(report[0].sink_count, 2);
    assert_eq!(report[0].verdict, Verdict::Mismatched);
}

#[tokio::test]
async fn zero_counts_are_skipped_not_mismatched() {
    let pool = setup_pool().await;
    let source = StaticSource::default().insert("books", vec![]);
    let report = reconcile_entities(&pool, &source, &[books_entity()]).await;
    assert_eq!(report[0].source_count, 0);
    assert_eq!(report[0].sink_count, 0);
    assert_eq!(report[0].verdict, Verdict::Skipped);
    assert!(!report[0].matched());
}

#[tokio::test]
async fn source_fetch_failure_skips_entity_but_not_others() {
    let pool = setup_pool().await;
    let source = StaticSource::default()
        .insert("books", vec![book_doc(1, "one", "2024-01-01T00:00:00Z")])
        .failing("ratings");
    let books = books_entity();
    run_incremental(&pool, &source, &books).await.unwrap();

    let ratings = Entity {
        name: "ratings".into(),
        table: None,
        natural_key: None,
        nested_fields: vec![],
    };
    let report = reconcile_entities(&pool, &source, &[ratings, books]).await;
    assert_eq!(report.len(), 2);
    assert_eq!(report[0].verdict, Verdict::Skipped);
    assert_eq!(report[1].verdict, Verdict::Matched);
}

#[tokio::test]
async fn full_load_builds_cross_product_staging_table() {
    let pool = setup_pool().await;
    let source = StaticSource::default().insert(
        "books",
        vec![
            // 2 authors x 1 tag = 2 rows
            book_doc(1, "one", "2024-01-01T00:00:00Z"),
            // 2 authors x 1 tag = 2 rows
            book_doc(2, "two", "2024-01-02T00:00:00Z"),
        ],
    );

    run_full_load(&pool, &source, &[books_entity()])
        .await
        .unwrap();

    assert_eq!(db::count_rows(&pool, "books_flat").await.unwrap(), 4);
    assert_eq!(
        db::count_distinct_keys(&pool, "books_flat", "book_id")
            .await
            .unwrap(),
        2
    );

    // Flattened cells hold the nested elements' labels, normalized.
    let authors: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT authors FROM books_flat ORDER BY authors")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(authors, vec!["x".to_string(), "y".to_string()]);
}

#[tokio::test]
async fn full_load_survives_a_failing_collection() {
    let pool = setup_pool().await;
    let source = StaticSource::default()
        .failing("ratings")
        .insert("books", vec![book_doc(1, "one", "2024-01-01T00:00:00Z")]);

    let ratings = Entity {
        name: "ratings".into(),
        table: None,
        natural_key: None,
        nested_fields: vec![],
    };
    // Extraction failure empties that entity's batch; books still load.
    run_full_load(&pool, &source, &[ratings, books_entity()])
        .await
        .unwrap();
    assert_eq!(db::count_rows(&pool, "books_flat").await.unwrap(), 2);
}
