//! Document-store client.
//!
//! The source is a JSON HTTP API exposing per-collection document listings
//! (batched via `limit`/`offset`), an optional `modified_since` filter, and
//! a count endpoint. [`DocumentSource`] is the seam the loader and the
//! reconciler depend on; tests substitute an in-memory implementation.
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Url};
use std::any::Any;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config;
use crate::error::SyncError;
use crate::model::Document;
use crate::source::model::{CountResponse, DocumentsPage};

pub mod model;

/// Read access to the document store.
///
/// `fetch_modified_since` must apply the strict comparison
/// `last_modified_date > watermark`; the watermark is transmitted in its
/// canonical RFC 3339 form.
#[async_trait]
pub trait DocumentSource: Send + Sync + Any {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, SyncError>;

    async fn fetch_modified_since(
        &self,
        collection: &str,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<Document>, SyncError>;

    async fn count_documents(&self, collection: &str) -> Result<u64, SyncError>;
}

#[derive(Clone)]
pub struct HttpDocumentSource {
    http: Client,
    base_url: Url,
    token: Option<String>,
    batch_size: u32,
}

impl fmt::Debug for HttpDocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDocumentSource")
            .field("base_url", &self.base_url)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl HttpDocumentSource {
    pub fn from_config(cfg: &config::Source) -> Result<Self, SyncError> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|err| SyncError::connection("source", format!("invalid base_url: {err}")))?;
        Ok(Self::with_base_url(
            base_url,
            cfg.token.clone(),
            cfg.timeout_seconds,
            cfg.batch_size,
        ))
    }

    pub fn with_base_url(
        base_url: Url,
        token: Option<String>,
        timeout_seconds: u64,
        batch_size: u32,
    ) -> Self {
        // Deliberate transport-layer timeout for every source call.
        let http = Client::builder()
            .user_agent("booksync/0.1")
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            batch_size,
        }
    }

    fn endpoint(&self, collection: &str, tail: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(&format!("collections/{collection}/{tail}"))
            .map_err(|err| SyncError::connection("source", format!("invalid endpoint: {err}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        url: Url,
    ) -> Result<T, SyncError> {
        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                SyncError::connection("source", err)
            } else {
                SyncError::extraction(collection, err)
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SyncError::extraction(
                collection,
                format!("source returned {status}: {body}"),
            ));
        }
        res.json::<T>()
            .await
            .map_err(|err| SyncError::extraction(collection, format!("invalid response JSON: {err}")))
    }

    /// Page through the documents endpoint until a short page is returned.
    async fn fetch_paged(
        &self,
        collection: &str,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Document>, SyncError> {
        let mut all = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let mut url = self.endpoint(collection, "documents")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("limit", &self.batch_size.to_string());
                query.append_pair("offset", &offset.to_string());
                if let Some(since) = modified_since {
                    query.append_pair(
                        "modified_since",
                        &since.to_rfc3339_opts(SecondsFormat::Secs, true),
                    );
                }
            }
            let page: DocumentsPage = self.get_json(collection, url).await?;
            let fetched = page.documents.len();
            debug!(collection, offset, fetched, "fetched source batch");
            all.extend(page.documents);
            if fetched < self.batch_size as usize {
                return Ok(all);
            }
            offset += fetched as u64;
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Document>, SyncError> {
        self.fetch_paged(collection, None).await
    }

    async fn fetch_modified_since(
        &self,
        collection: &str,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<Document>, SyncError> {
        self.fetch_paged(collection, Some(watermark)).await
    }

    async fn count_documents(&self, collection: &str) -> Result<u64, SyncError> {
        let url = self.endpoint(collection, "count")?;
        let res: CountResponse = self.get_json(collection, url).await?;
        Ok(res.count)
    }
}
