//! Catalog statistics

use serde::Serialize;
use utoipa::ToSchema;

use super::book::BookShort;

/// Front page numbers of the catalog
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CatalogStats {
    pub total_books: i64,
    pub total_authors: i64,
    pub total_categories: i64,
    /// Newest books first
    pub recent_books: Vec<BookShort>,
}
