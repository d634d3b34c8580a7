//! Lending store capability.
//!
//! The loan workflow only talks to storage through these two traits. A
//! [`LendingTx`] is one atomic unit of work: every row lock it takes is held
//! until the transaction is committed or dropped, and dropping it without
//! [`LendingTx::commit`] discards every staged write.
//!
//! Operations touching both tables must lock the loan row before the book row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::loan::{BookStock, CopyDiscrepancy, Loan, LoanRecord, NewLoan},
};

#[async_trait]
pub trait LendingStore: Send + Sync {
    /// Open a transaction whose lock waits give up after `lock_timeout`
    async fn begin(&self, lock_timeout: Duration) -> AppResult<Box<dyn LendingTx>>;

    /// Loan owned by `user_id`, without locking
    async fn find_loan(&self, loan_id: i32, user_id: i32) -> AppResult<Option<LoanRecord>>;

    /// All loans of a user, newest first
    async fn user_loans(&self, user_id: i32) -> AppResult<Vec<LoanRecord>>;

    /// Open loans whose due date is before `now`, oldest due first
    async fn overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>>;

    /// Books whose `available_copies` differs from `total_copies - open loans`
    async fn copy_audit(&self) -> AppResult<Vec<CopyDiscrepancy>>;
}

#[async_trait]
pub trait LendingTx: Send {
    /// Exclusively lock a book row and read its copy counters
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<BookStock>>;

    /// Exclusively lock a loan row, matched on id and owner
    async fn lock_loan(&mut self, loan_id: i32, user_id: i32) -> AppResult<Option<Loan>>;

    /// Whether the user holds an open loan for the book
    async fn has_open_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<bool>;

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan>;

    async fn set_available_copies(&mut self, book_id: i32, available_copies: i32) -> AppResult<()>;

    /// Mark a loan returned at `returned_at`
    async fn close_loan(&mut self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Loan>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
