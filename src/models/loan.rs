//! Loan (borrow record) model and related types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Persisted loan status.
///
/// `Overdue` may appear in stored rows (seed data, display caches). It is an
/// open loan exactly like `Borrowed`; overdue-ness itself is always derived
/// from the due date with [`Loan::is_overdue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Borrowed,
    Returned,
    Overdue,
}

impl LoanStatus {
    /// True while the loan holds a copy of the book
    pub fn is_open(self) -> bool {
        !matches!(self, LoanStatus::Returned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Borrowed => "borrowed",
            LoanStatus::Returned => "returned",
            LoanStatus::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loan model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub book_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub notes: String,
}

impl Loan {
    /// Open and past its due date at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        is_overdue(self.status, self.due_date, now)
    }

    /// Status shown to readers: open loans past due read as `Overdue`
    pub fn display_status(&self, now: DateTime<Utc>) -> LoanStatus {
        if self.is_overdue(now) {
            LoanStatus::Overdue
        } else if self.status.is_open() {
            LoanStatus::Borrowed
        } else {
            LoanStatus::Returned
        }
    }

    /// Whole days past the due date, zero when not overdue
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        if self.is_overdue(now) {
            (now - self.due_date).num_days()
        } else {
            0
        }
    }
}

/// Overdue predicate over the stored status and due date
pub fn is_overdue(status: LoanStatus, due_date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    status.is_open() && due_date < now
}

/// Row to insert when a borrow succeeds
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub user_id: i32,
    pub book_id: i32,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

impl NewLoan {
    pub fn new(user_id: i32, book_id: i32, now: DateTime<Utc>, duration_days: i64) -> Self {
        Self {
            user_id,
            book_id,
            borrow_date: now,
            due_date: now + Duration::days(duration_days),
        }
    }
}

/// Loan joined with the title of its book
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct LoanRecord {
    #[sqlx(flatten)]
    pub loan: Loan,
    pub book_title: String,
}

/// Loan with derived fields for display
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: Loan,
    pub book_title: String,
    pub is_overdue: bool,
    pub days_overdue: i64,
    pub display_status: LoanStatus,
}

impl LoanDetails {
    pub fn new(record: LoanRecord, now: DateTime<Utc>) -> Self {
        let LoanRecord { loan, book_title } = record;
        Self {
            is_overdue: loan.is_overdue(now),
            days_overdue: loan.days_overdue(now),
            display_status: loan.display_status(now),
            book_title,
            loan,
        }
    }
}

/// Copy counters of a book as seen under its row lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct BookStock {
    pub id: i32,
    pub available_copies: i32,
    pub total_copies: i32,
}

/// A book whose `available_copies` disagrees with its open loans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct CopyDiscrepancy {
    pub book_id: i32,
    pub total_copies: i32,
    pub available_copies: i32,
    pub open_loans: i64,
    /// `total_copies - open_loans`
    pub expected_available: i64,
}
