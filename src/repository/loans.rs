//! Loans repository: Postgres implementation of the lending store

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{classify_lock_error, is_unique_violation, AppError, AppResult},
    models::loan::{BookStock, CopyDiscrepancy, Loan, LoanRecord, LoanStatus, NewLoan},
};

use super::lending::{LendingStore, LendingTx};

const LOAN_COLUMNS: &str =
    "l.id, l.user_id, l.book_id, l.borrow_date, l.due_date, l.return_date, l.status, l.notes";

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LendingStore for LoansRepository {
    async fn begin(&self, lock_timeout: Duration) -> AppResult<Box<dyn LendingTx>> {
        // An exhausted pool is contention like any lock wait
        let mut tx = self.pool.begin().await.map_err(classify_lock_error)?;

        // SET does not take bind parameters
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(classify_lock_error)?;

        Ok(Box::new(PgLendingTx { tx }))
    }

    async fn find_loan(&self, loan_id: i32, user_id: i32) -> AppResult<Option<LoanRecord>> {
        let query = format!(
            r#"
            SELECT {}, b.title AS book_title
            FROM loans l
            JOIN books b ON b.id = l.book_id
            WHERE l.id = $1 AND l.user_id = $2
            "#,
            LOAN_COLUMNS
        );
        let record = sqlx::query_as::<_, LoanRecord>(&query)
            .bind(loan_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn user_loans(&self, user_id: i32) -> AppResult<Vec<LoanRecord>> {
        let query = format!(
            r#"
            SELECT {}, b.title AS book_title
            FROM loans l
            JOIN books b ON b.id = l.book_id
            WHERE l.user_id = $1
            ORDER BY l.borrow_date DESC, l.id DESC
            "#,
            LOAN_COLUMNS
        );
        let records = sqlx::query_as::<_, LoanRecord>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>> {
        let query = format!(
            r#"
            SELECT {}, b.title AS book_title
            FROM loans l
            JOIN books b ON b.id = l.book_id
            WHERE l.status <> 'returned' AND l.due_date < $1
            ORDER BY l.due_date, l.id
            "#,
            LOAN_COLUMNS
        );
        let records = sqlx::query_as::<_, LoanRecord>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn copy_audit(&self) -> AppResult<Vec<CopyDiscrepancy>> {
        let rows = sqlx::query_as::<_, CopyDiscrepancy>(
            r#"
            SELECT b.id AS book_id, b.total_copies, b.available_copies,
                   COUNT(l.id) AS open_loans,
                   b.total_copies::bigint - COUNT(l.id) AS expected_available
            FROM books b
            LEFT JOIN loans l ON l.book_id = b.id AND l.status <> 'returned'
            GROUP BY b.id
            HAVING b.available_copies::bigint <> b.total_copies::bigint - COUNT(l.id)
            ORDER BY b.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// One lending transaction on a pooled connection
pub struct PgLendingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LendingTx for PgLendingTx {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<BookStock>> {
        sqlx::query_as::<_, BookStock>(
            "SELECT id, available_copies, total_copies FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(book_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify_lock_error)
    }

    async fn lock_loan(&mut self, loan_id: i32, user_id: i32) -> AppResult<Option<Loan>> {
        sqlx::query_as::<_, Loan>(
            r#"
            SELECT id, user_id, book_id, borrow_date, due_date, return_date, status, notes
            FROM loans
            WHERE id = $1 AND user_id = $2
            FOR UPDATE
            "#,
        )
        .bind(loan_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify_lock_error)
    }

    async fn has_open_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM loans
                WHERE user_id = $1 AND book_id = $2 AND status <> 'returned'
            )
            "#,
        )
        .bind(user_id)
        .bind(book_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify_lock_error)
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (user_id, book_id, borrow_date, due_date, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, book_id, borrow_date, due_date, return_date, status, notes
            "#,
        )
        .bind(loan.user_id)
        .bind(loan.book_id)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .bind(LoanStatus::Borrowed)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::AlreadyBorrowed(format!(
                    "User {} already has book {} on loan",
                    loan.user_id, loan.book_id
                ))
            } else {
                classify_lock_error(e)
            }
        })
    }

    async fn set_available_copies(&mut self, book_id: i32, available_copies: i32) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE books SET available_copies = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(available_copies)
        .bind(book_id)
        .execute(&mut *self.tx)
        .await
        .map_err(classify_lock_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book {} not found", book_id)));
        }
        Ok(())
    }

    async fn close_loan(&mut self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            r#"
            UPDATE loans SET status = $1, return_date = $2
            WHERE id = $3
            RETURNING id, user_id, book_id, borrow_date, due_date, return_date, status, notes
            "#,
        )
        .bind(LoanStatus::Returned)
        .bind(returned_at)
        .bind(loan_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify_lock_error)?
        .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await.map_err(classify_lock_error)
    }
}
