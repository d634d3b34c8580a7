//! Catalog management service

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        author::{Author, AuthorDetails, CreateAuthor, UpdateAuthor},
        book::{check_copies, Book, BookQuery, BookShort, CreateBook, UpdateBook},
        category::{Category, CreateCategory, UpdateCategory},
        stats::CatalogStats,
    },
    repository::Repository,
};

/// Books shown on the catalog front page
const RECENT_BOOKS: i64 = 6;

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Round-trip to the database
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.repository.pool).await?;
        Ok(())
    }

    // =========================================================================
    // BOOKS
    // =========================================================================

    /// List books with filters and pagination
    pub async fn list_books(&self, query: &BookQuery) -> AppResult<(Vec<BookShort>, i64)> {
        self.repository.books.list(query).await
    }

    /// Book details; `user_has_borrowed` is filled for `user_id`
    pub async fn get_book(&self, id: i32, user_id: Option<i32>) -> AppResult<Book> {
        let mut book = self.repository.books.get_by_id(id).await?;
        if let Some(user_id) = user_id {
            book.user_has_borrowed = self.repository.books.has_open_loan(user_id, id).await?;
        }
        Ok(book)
    }

    /// Catalog totals with the most recently added books
    pub async fn stats(&self) -> AppResult<CatalogStats> {
        self.repository.books.stats(RECENT_BOOKS).await
    }

    /// Create a book; `available_copies` defaults to `total_copies`
    pub async fn create_book(&self, data: CreateBook) -> AppResult<Book> {
        data.validate()?;

        let total_copies = data.total_copies.unwrap_or(1);
        let available_copies = data.available_copies.unwrap_or(total_copies);
        check_copies(available_copies, total_copies)?;

        if !self.repository.authors.exists(data.author_id).await? {
            return Err(AppError::NotFound(format!(
                "Author with id {} not found",
                data.author_id
            )));
        }

        let book = self
            .repository
            .books
            .create(&data, available_copies, total_copies)
            .await?;
        tracing::info!(book_id = book.id, isbn = %book.isbn, "Book created");
        Ok(book)
    }

    /// Update a book; copies on loan are kept out when `total_copies` changes
    pub async fn update_book(&self, id: i32, data: UpdateBook) -> AppResult<Book> {
        data.validate()?;

        if let Some(author_id) = data.author_id {
            if !self.repository.authors.exists(author_id).await? {
                return Err(AppError::NotFound(format!(
                    "Author with id {} not found",
                    author_id
                )));
            }
        }

        let book = self.repository.books.update(id, &data).await?;
        if data.total_copies.is_some() {
            tracing::info!(
                book_id = id,
                total_copies = book.total_copies,
                available_copies = book.available_copies,
                "Book copy count changed"
            );
        }
        Ok(book)
    }

    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        self.repository.books.delete(id).await?;
        tracing::info!(book_id = id, "Book deleted");
        Ok(())
    }

    // =========================================================================
    // AUTHORS
    // =========================================================================

    pub async fn list_authors(&self) -> AppResult<Vec<Author>> {
        self.repository.authors.list().await
    }

    /// Author with their books
    pub async fn get_author(&self, id: i32) -> AppResult<AuthorDetails> {
        let author = self.repository.authors.get_by_id(id).await?;
        let books = self.repository.books.list_by_author(id).await?;
        Ok(AuthorDetails { author, books })
    }

    pub async fn create_author(&self, data: CreateAuthor) -> AppResult<Author> {
        data.validate()?;
        self.repository.authors.create(&data).await
    }

    pub async fn update_author(&self, id: i32, data: UpdateAuthor) -> AppResult<Author> {
        data.validate()?;
        self.repository.authors.update(id, &data).await
    }

    /// Delete an author with their books; refused once any of those books was lent
    pub async fn delete_author(&self, id: i32) -> AppResult<()> {
        self.repository.authors.delete(id).await?;
        tracing::info!(author_id = id, "Author deleted");
        Ok(())
    }

    // =========================================================================
    // CATEGORIES
    // =========================================================================

    pub async fn list_categories(&self) -> AppResult<Vec<Category>> {
        self.repository.categories.list().await
    }

    pub async fn create_category(&self, data: CreateCategory) -> AppResult<Category> {
        data.validate()?;
        self.repository.categories.create(&data).await
    }

    pub async fn update_category(&self, id: i32, data: UpdateCategory) -> AppResult<Category> {
        data.validate()?;
        self.repository.categories.update(id, &data).await
    }

    pub async fn delete_category(&self, id: i32) -> AppResult<()> {
        self.repository.categories.delete(id).await
    }
}
