use serde::Deserialize;

use crate::model::Document;

/// One page of documents from `GET /collections/{name}/documents`.
#[derive(Deserialize, Debug)]
pub struct DocumentsPage {
    pub documents: Vec<Document>,
}

/// Response of `GET /collections/{name}/count`.
#[derive(Deserialize, Debug)]
pub struct CountResponse {
    pub count: u64,
}
