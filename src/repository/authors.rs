//! Authors repository

use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::author::{Author, CreateAuthor, UpdateAuthor},
};

const AUTHOR_SELECT: &str = r#"
    SELECT a.id, a.name, a.bio, a.birth_date, a.nationality, a.created_at, a.updated_at,
           (SELECT COUNT(*) FROM books b WHERE b.author_id = a.id) AS book_count
    FROM authors a
"#;

#[derive(Clone)]
pub struct AuthorsRepository {
    pool: Pool<Postgres>,
}

impl AuthorsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// List authors ordered by name
    pub async fn list(&self) -> AppResult<Vec<Author>> {
        let authors = sqlx::query_as::<_, Author>(&format!("{} ORDER BY a.name, a.id", AUTHOR_SELECT))
            .fetch_all(&self.pool)
            .await?;
        Ok(authors)
    }

    /// Get author by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Author> {
        sqlx::query_as::<_, Author>(&format!("{} WHERE a.id = $1", AUTHOR_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Author with id {} not found", id)))
    }

    pub async fn exists(&self, id: i32) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM authors WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    pub async fn create(&self, data: &CreateAuthor) -> AppResult<Author> {
        let id: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO authors (name, bio, birth_date, nationality)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&data.name)
        .bind(data.bio.as_deref().unwrap_or(""))
        .bind(data.birth_date)
        .bind(data.nationality.as_deref().unwrap_or(""))
        .fetch_one(&self.pool)
        .await?;

        self.get_by_id(id).await
    }

    pub async fn update(&self, id: i32, data: &UpdateAuthor) -> AppResult<Author> {
        let result = sqlx::query(
            r#"
            UPDATE authors SET
                name = COALESCE($1, name),
                bio = COALESCE($2, bio),
                birth_date = COALESCE($3, birth_date),
                nationality = COALESCE($4, nationality),
                updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(&data.name)
        .bind(&data.bio)
        .bind(data.birth_date)
        .bind(&data.nationality)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Author with id {} not found", id)));
        }
        self.get_by_id(id).await
    }

    /// Delete an author and, by cascade, their books.
    ///
    /// The author and book rows are locked first so no borrow can slip in
    /// between the loan check and the delete.
    pub async fn delete(&self, id: i32) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query_scalar::<_, i32>("SELECT id FROM authors WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Author with id {} not found", id)))?;

        sqlx::query("SELECT id FROM books WHERE author_id = $1 ORDER BY id FOR UPDATE")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let loans: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM loans l
            JOIN books b ON b.id = l.book_id
            WHERE b.author_id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        if loans > 0 {
            return Err(AppError::Conflict(format!(
                "Author {} has {} loans on record",
                id, loans
            )));
        }

        sqlx::query("DELETE FROM authors WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
