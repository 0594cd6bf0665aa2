//! Sink database module: entity models and SQL repositories.
//!
//! - `model`: typed row views returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `booksync::db` — the repository API
//! and the row models are re-exported here.

pub mod model;
pub mod repo;

pub use model::BookRow;
pub use repo::*;
