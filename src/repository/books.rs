//! Books repository for database operations

use sqlx::{Pool, Postgres, QueryBuilder};

use crate::{
    error::{is_unique_violation, AppError, AppResult},
    models::{
        author::AuthorShort,
        book::{resize_stock, Book, BookQuery, BookShort, CreateBook, UpdateBook},
        category::Category,
        loan::BookStock,
        stats::CatalogStats,
    },
};

const BOOK_COLUMNS: &str = "id, title, author_id, isbn, description, publication_date, pages, \
                            available_copies, total_copies, created_at, updated_at";

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID with author and categories
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        let mut book = sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books WHERE id = $1",
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        book.author = sqlx::query_as::<_, AuthorShort>("SELECT id, name FROM authors WHERE id = $1")
            .bind(book.author_id)
            .fetch_optional(&self.pool)
            .await?;

        book.categories = sqlx::query_as::<_, Category>(
            r#"
            SELECT c.id, c.name, c.description, c.created_at
            FROM book_categories bc
            JOIN categories c ON c.id = bc.category_id
            WHERE bc.book_id = $1
            ORDER BY c.name
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(book)
    }

    /// Whether the user holds an open loan of the book
    pub async fn has_open_loan(&self, user_id: i32, book_id: i32) -> AppResult<bool> {
        let open: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM loans
                WHERE user_id = $1 AND book_id = $2 AND status <> 'returned'
            )
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(open)
    }

    /// List books with filters and pagination, newest first
    pub async fn list(&self, query: &BookQuery) -> AppResult<(Vec<BookShort>, i64)> {
        let per_page = query.per_page();
        let offset = query.offset();

        fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &BookQuery) {
            builder.push(" WHERE 1=1");
            if let Some(category_id) = query.category_id {
                builder
                    .push(" AND EXISTS (SELECT 1 FROM book_categories bc WHERE bc.book_id = b.id AND bc.category_id = ")
                    .push_bind(category_id)
                    .push(")");
            }
            if query.available_only.unwrap_or(false) {
                builder.push(" AND b.available_copies > 0");
            }
        }

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books b");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(
            r#"
            SELECT b.id, b.title, b.author_id, a.name AS author_name, b.isbn,
                   b.publication_date, b.available_copies, b.total_copies
            FROM books b
            JOIN authors a ON a.id = b.author_id
            "#,
        );
        push_filters(&mut select, query);
        select
            .push(" ORDER BY b.created_at DESC, b.id DESC LIMIT ")
            .push_bind(per_page)
            .push(" OFFSET ")
            .push_bind(offset);

        let books = select.build_query_as::<BookShort>().fetch_all(&self.pool).await?;
        Ok((books, total))
    }

    /// Books written by an author
    pub async fn list_by_author(&self, author_id: i32) -> AppResult<Vec<BookShort>> {
        let books = sqlx::query_as::<_, BookShort>(
            r#"
            SELECT b.id, b.title, b.author_id, a.name AS author_name, b.isbn,
                   b.publication_date, b.available_copies, b.total_copies
            FROM books b
            JOIN authors a ON a.id = b.author_id
            WHERE b.author_id = $1
            ORDER BY b.created_at DESC
            "#,
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(books)
    }

    /// Catalog totals and the newest books
    pub async fn stats(&self, recent: i64) -> AppResult<CatalogStats> {
        let (total_books, total_authors, total_categories): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT (SELECT COUNT(*) FROM books),
                   (SELECT COUNT(*) FROM authors),
                   (SELECT COUNT(*) FROM categories)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let recent_books = sqlx::query_as::<_, BookShort>(
            r#"
            SELECT b.id, b.title, b.author_id, a.name AS author_name, b.isbn,
                   b.publication_date, b.available_copies, b.total_copies
            FROM books b
            JOIN authors a ON a.id = b.author_id
            ORDER BY b.created_at DESC, b.id DESC
            LIMIT $1
            "#,
        )
        .bind(recent)
        .fetch_all(&self.pool)
        .await?;

        Ok(CatalogStats {
            total_books,
            total_authors,
            total_categories,
            recent_books,
        })
    }

    /// Create a book with its category links
    pub async fn create(&self, data: &CreateBook, available_copies: i32, total_copies: i32) -> AppResult<Book> {
        let mut tx = self.pool.begin().await?;

        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO books (title, author_id, isbn, description, publication_date, pages,
                               available_copies, total_copies)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&data.title)
        .bind(data.author_id)
        .bind(&data.isbn)
        .bind(data.description.as_deref().unwrap_or(""))
        .bind(data.publication_date)
        .bind(data.pages.unwrap_or(0))
        .bind(available_copies)
        .bind(total_copies)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("A book with ISBN {} already exists", data.isbn))
            } else {
                AppError::Database(e)
            }
        })?;

        Self::link_categories(&mut tx, id, &data.category_ids).await?;
        tx.commit().await?;

        self.get_by_id(id).await
    }

    /// Update a book. A `total_copies` change is applied under the book row lock.
    pub async fn update(&self, id: i32, data: &UpdateBook) -> AppResult<Book> {
        let mut tx = self.pool.begin().await?;

        let stock = sqlx::query_as::<_, BookStock>(
            "SELECT id, available_copies, total_copies FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        let (available_copies, total_copies) = match data.total_copies {
            Some(new_total) => resize_stock(stock.available_copies, stock.total_copies, new_total)?,
            None => (stock.available_copies, stock.total_copies),
        };

        sqlx::query(
            r#"
            UPDATE books SET
                title = COALESCE($1, title),
                author_id = COALESCE($2, author_id),
                isbn = COALESCE($3, isbn),
                description = COALESCE($4, description),
                publication_date = COALESCE($5, publication_date),
                pages = COALESCE($6, pages),
                available_copies = $7,
                total_copies = $8,
                updated_at = NOW()
            WHERE id = $9
            "#,
        )
        .bind(&data.title)
        .bind(data.author_id)
        .bind(&data.isbn)
        .bind(&data.description)
        .bind(data.publication_date)
        .bind(data.pages)
        .bind(available_copies)
        .bind(total_copies)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("A book with this ISBN already exists".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

        if let Some(ref category_ids) = data.category_ids {
            sqlx::query("DELETE FROM book_categories WHERE book_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            Self::link_categories(&mut tx, id, category_ids).await?;
        }

        tx.commit().await?;
        self.get_by_id(id).await
    }

    /// Delete a book; refused while any loan, open or returned, references it
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i32>("SELECT id FROM books WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;

        let loans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        if loans > 0 {
            return Err(AppError::Conflict(format!(
                "Book {} has {} loans on record",
                id, loans
            )));
        }

        sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn link_categories(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        book_id: i32,
        category_ids: &[i32],
    ) -> AppResult<()> {
        for category_id in category_ids {
            let linked = sqlx::query(
                r#"
                INSERT INTO book_categories (book_id, category_id)
                SELECT $1, id FROM categories WHERE id = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(book_id)
            .bind(category_id)
            .execute(&mut **tx)
            .await?;

            if linked.rows_affected() == 0 {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM categories WHERE id = $1)")
                        .bind(category_id)
                        .fetch_one(&mut **tx)
                        .await?;
                if !exists {
                    return Err(AppError::NotFound(format!(
                        "Category with id {} not found",
                        category_id
                    )));
                }
            }
        }
        Ok(())
    }
}
