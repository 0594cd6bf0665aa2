use serde::{Deserialize, Serialize};

/// Row view of the `books` sink table. Timestamps stay in their stored
/// text form; callers normalize through `model::parse_timestamp` when they
/// need structured values.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BookRow {
    pub book_id: i64,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub publication_year: Option<i64>,
    pub isbn: Option<String>,
    pub average_rating: Option<f64>,
    pub tags: Option<String>,
    pub image_url: Option<String>,
    pub modified_date: Option<String>,
    pub last_modified_date: Option<String>,
}
