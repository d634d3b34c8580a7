//! Loan transaction manager.
//!
//! The only writer of `Loan.status` and `Book.available_copies`. Every check
//! runs inside the same transaction as the mutation it guards:
//!
//! - `borrow` locks the book row, then verifies: book exists, no open loan for
//!   (user, book), a copy is available. It inserts the loan and decrements the
//!   counter.
//! - `return_loan` locks the loan row (matched on id *and* owner), then the
//!   book row. It closes the loan and increments the counter.
//!
//! Loan rows are always locked before book rows.

use std::future::Future;
use std::sync::Arc;

use crate::{
    clock::Clock,
    config::LoansConfig,
    error::{AppError, AppResult},
    models::loan::{CopyDiscrepancy, Loan, LoanDetails, NewLoan},
    repository::LendingStore,
};

#[derive(Clone)]
pub struct LoansService {
    store: Arc<dyn LendingStore>,
    clock: Arc<dyn Clock>,
    config: LoansConfig,
}

impl LoansService {
    pub fn new(store: Arc<dyn LendingStore>, clock: Arc<dyn Clock>, config: LoansConfig) -> Self {
        Self { store, clock, config }
    }

    /// Borrow a copy of a book for a user
    pub async fn borrow(&self, user_id: i32, book_id: i32) -> AppResult<Loan> {
        let result = self
            .with_retry("borrow", || self.try_borrow(user_id, book_id))
            .await;

        match &result {
            Ok(loan) => tracing::info!(
                loan_id = loan.id,
                user_id,
                book_id,
                due_date = %loan.due_date,
                "Book borrowed"
            ),
            Err(e) if e.is_warning() => tracing::warn!(user_id, book_id, "Borrow ignored: {}", e),
            Err(e) => tracing::debug!(user_id, book_id, "Borrow rejected: {}", e),
        }
        result
    }

    /// Return a loan owned by `user_id`
    pub async fn return_loan(&self, loan_id: i32, user_id: i32) -> AppResult<Loan> {
        let result = self
            .with_retry("return", || self.try_return(loan_id, user_id))
            .await;

        match &result {
            Ok(loan) => tracing::info!(loan_id, user_id, book_id = loan.book_id, "Book returned"),
            Err(e) if e.is_warning() => tracing::warn!(loan_id, user_id, "Return ignored: {}", e),
            Err(e) => tracing::debug!(loan_id, user_id, "Return rejected: {}", e),
        }
        result
    }

    async fn try_borrow(&self, user_id: i32, book_id: i32) -> AppResult<Loan> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.config.lock_timeout()).await?;

        let stock = tx
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;

        if tx.has_open_loan(user_id, book_id).await? {
            return Err(AppError::AlreadyBorrowed(
                "You have already borrowed this book".to_string(),
            ));
        }

        if stock.available_copies <= 0 {
            return Err(AppError::Unavailable(
                "This book is not available for borrowing".to_string(),
            ));
        }

        let loan = tx
            .insert_loan(&NewLoan::new(user_id, book_id, now, self.config.duration_days))
            .await?;
        tx.set_available_copies(book_id, stock.available_copies - 1)
            .await?;
        tx.commit().await?;

        Ok(loan)
    }

    async fn try_return(&self, loan_id: i32, user_id: i32) -> AppResult<Loan> {
        let now = self.clock.now();
        let mut tx = self.store.begin(self.config.lock_timeout()).await?;

        let loan = tx
            .lock_loan(loan_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;

        if !loan.status.is_open() {
            return Err(AppError::AlreadyReturned(
                "This book has already been returned".to_string(),
            ));
        }

        let stock = tx.lock_book(loan.book_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Book {} of loan {} is missing", loan.book_id, loan_id))
        })?;

        let mut restored = stock.available_copies + 1;
        if restored > stock.total_copies {
            tracing::warn!(
                book_id = stock.id,
                available_copies = stock.available_copies,
                total_copies = stock.total_copies,
                "Copy counter already at total on return, leaving it capped"
            );
            restored = stock.total_copies;
        }

        let closed = tx.close_loan(loan_id, now).await?;
        tx.set_available_copies(stock.id, restored).await?;
        tx.commit().await?;

        Ok(closed)
    }

    /// Run `op` again while it fails with a transient error, up to the configured budget
    async fn with_retry<T, F, Fut>(&self, name: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.config.busy_retries => {
                    attempt += 1;
                    tracing::warn!(
                        operation = name,
                        attempt,
                        max_retries = self.config.busy_retries,
                        "Retrying after contention: {}",
                        e
                    );
                    tokio::time::sleep(self.config.backoff(attempt)).await;
                }
                result => return result,
            }
        }
    }

    /// One loan of the user, with derived overdue state
    pub async fn get_loan(&self, loan_id: i32, user_id: i32) -> AppResult<LoanDetails> {
        let record = self
            .store
            .find_loan(loan_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;
        Ok(LoanDetails::new(record, self.clock.now()))
    }

    /// All loans of a user, newest first
    pub async fn user_loans(&self, user_id: i32) -> AppResult<Vec<LoanDetails>> {
        let now = self.clock.now();
        let records = self.store.user_loans(user_id).await?;
        Ok(records.into_iter().map(|r| LoanDetails::new(r, now)).collect())
    }

    /// Open loans past their due date
    pub async fn overdue_loans(&self) -> AppResult<Vec<LoanDetails>> {
        let now = self.clock.now();
        let records = self.store.overdue_loans(now).await?;
        Ok(records.into_iter().map(|r| LoanDetails::new(r, now)).collect())
    }

    /// Books whose copy counter disagrees with their open loans
    pub async fn audit_copies(&self) -> AppResult<Vec<CopyDiscrepancy>> {
        let discrepancies = self.store.copy_audit().await?;
        for d in &discrepancies {
            tracing::warn!(
                book_id = d.book_id,
                available_copies = d.available_copies,
                expected_available = d.expected_available,
                "Copy counter out of sync with open loans"
            );
        }
        Ok(discrepancies)
    }

    pub fn is_overdue(&self, loan: &Loan) -> bool {
        loan.is_overdue(self.clock.now())
    }
}
