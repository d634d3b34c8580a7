//! Book model and related types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::author::AuthorShort;
use super::category::Category;
use crate::error::{AppError, AppResult};

/// Full book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author_id: i32,
    pub isbn: String,
    pub description: String,
    pub publication_date: NaiveDate,
    pub pages: i32,
    pub available_copies: i32,
    pub total_copies: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    // Populated by the repository after the row is loaded
    #[sqlx(skip)]
    #[serde(default)]
    pub author: Option<AuthorShort>,
    #[sqlx(skip)]
    #[serde(default)]
    pub categories: Vec<Category>,
    /// The requesting user holds an open loan of this book
    #[sqlx(skip)]
    #[serde(default)]
    pub user_has_borrowed: bool,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.available_copies > 0
    }
}

/// Book row for list views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BookShort {
    pub id: i32,
    pub title: String,
    pub author_id: i32,
    pub author_name: String,
    pub isbn: String,
    pub publication_date: NaiveDate,
    pub available_copies: i32,
    pub total_copies: i32,
}

/// Check `0 <= available <= total` and `total >= 1`
pub fn check_copies(available_copies: i32, total_copies: i32) -> AppResult<()> {
    if total_copies < 1 {
        return Err(AppError::Validation(
            "total_copies must be at least 1".to_string(),
        ));
    }
    if available_copies < 0 || available_copies > total_copies {
        return Err(AppError::Validation(format!(
            "available_copies must be between 0 and {}",
            total_copies
        )));
    }
    Ok(())
}

/// Apply an administrative change of `total_copies`.
///
/// Copies out on loan stay out: `available_copies` moves by the same delta.
/// Returns the new `(available, total)` pair.
pub fn resize_stock(available_copies: i32, total_copies: i32, new_total: i32) -> AppResult<(i32, i32)> {
    check_copies(available_copies, total_copies)?;
    let on_loan = total_copies - available_copies;
    let new_available = match new_total.checked_sub(on_loan) {
        Some(n) if n >= 0 => n,
        _ => {
            return Err(AppError::Validation(format!(
                "Cannot reduce total_copies to {}: {} copies are on loan",
                new_total, on_loan
            )))
        }
    };
    check_copies(new_available, new_total)?;
    Ok((new_available, new_total))
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 300, message = "Title must be 1-300 characters"))]
    pub title: String,
    pub author_id: i32,
    #[serde(default)]
    pub category_ids: Vec<i32>,
    #[validate(length(min = 10, max = 13, message = "ISBN must be 10-13 characters"))]
    pub isbn: String,
    pub description: Option<String>,
    pub publication_date: NaiveDate,
    #[validate(range(min = 0, message = "Pages cannot be negative"))]
    pub pages: Option<i32>,
    #[validate(range(min = 1, message = "total_copies must be at least 1"))]
    pub total_copies: Option<i32>,
    /// Defaults to total_copies
    pub available_copies: Option<i32>,
}

/// Update book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 300, message = "Title must be 1-300 characters"))]
    pub title: Option<String>,
    pub author_id: Option<i32>,
    /// Replaces the whole category set when present
    pub category_ids: Option<Vec<i32>>,
    #[validate(length(min = 10, max = 13, message = "ISBN must be 10-13 characters"))]
    pub isbn: Option<String>,
    pub description: Option<String>,
    pub publication_date: Option<NaiveDate>,
    #[validate(range(min = 0, message = "Pages cannot be negative"))]
    pub pages: Option<i32>,
    /// Administrative copy count change; copies on loan are preserved
    #[validate(range(min = 1, message = "total_copies must be at least 1"))]
    pub total_copies: Option<i32>,
}

/// Book list query
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct BookQuery {
    /// Only books in this category
    pub category_id: Option<i32>,
    /// Only books with at least one copy on the shelf
    pub available_only: Option<bool>,
    /// Page number (1-based)
    pub page: Option<i64>,
    /// Items per page
    pub per_page: Option<i64>,
}

impl BookQuery {
    pub const MAX_PER_PAGE: i64 = 200;

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(20).clamp(1, Self::MAX_PER_PAGE)
    }

    /// Rows to skip; saturates for page numbers past any real catalog
    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }
}
