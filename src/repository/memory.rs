//! In-process lending store.
//!
//! Rows live in ordinary maps behind a short-lived mutex; row locks are
//! per-row `tokio` mutexes whose owned guards are kept inside the transaction,
//! so they are released on commit and on every early return that drops it.
//! Writes are staged and applied atomically at commit time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::check_copies,
        loan::{BookStock, CopyDiscrepancy, Loan, LoanRecord, LoanStatus, NewLoan},
    },
};

use super::lending::{LendingStore, LendingTx};

#[derive(Debug, Clone)]
struct BookRow {
    title: String,
    available_copies: i32,
    total_copies: i32,
}

#[derive(Debug, Default)]
struct Tables {
    books: BTreeMap<i32, BookRow>,
    loans: BTreeMap<i32, Loan>,
}

impl Tables {
    fn record(&self, loan: &Loan) -> LoanRecord {
        LoanRecord {
            loan: loan.clone(),
            book_title: self
                .books
                .get(&loan.book_id)
                .map(|b| b.title.clone())
                .unwrap_or_default(),
        }
    }

    fn has_open_loan(&self, user_id: i32, book_id: i32) -> bool {
        self.loans
            .values()
            .any(|l| l.user_id == user_id && l.book_id == book_id && l.status.is_open())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Book(i32),
    Loan(i32),
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    next_book_id: AtomicI32,
    next_loan_id: AtomicI32,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_lock(&self, key: RowKey) -> Arc<RowMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_default().clone()
    }

    /// Forget lock entries that no transaction holds or waits on
    fn release_rows(&self, keys: impl IntoIterator<Item = RowKey>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if locks.get(&key).is_some_and(|row| Arc::strong_count(row) == 1) {
                locks.remove(&key);
            }
        }
    }
}

/// Lending store kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryLendingStore {
    inner: Arc<Inner>,
}

impl MemoryLendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a book with every copy on the shelf; returns its id
    pub fn add_book(&self, title: &str, total_copies: i32) -> AppResult<i32> {
        self.add_book_with_stock(title, total_copies, total_copies)
    }

    pub fn add_book_with_stock(
        &self,
        title: &str,
        available_copies: i32,
        total_copies: i32,
    ) -> AppResult<i32> {
        check_copies(available_copies, total_copies)?;
        let id = self.inner.next_book_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.tables().books.insert(
            id,
            BookRow {
                title: title.to_string(),
                available_copies,
                total_copies,
            },
        );
        Ok(id)
    }

    pub fn book_stock(&self, book_id: i32) -> Option<BookStock> {
        self.inner.tables().books.get(&book_id).map(|b| BookStock {
            id: book_id,
            available_copies: b.available_copies,
            total_copies: b.total_copies,
        })
    }

    pub fn loan(&self, loan_id: i32) -> Option<Loan> {
        self.inner.tables().loans.get(&loan_id).cloned()
    }

    /// Open loans for a (user, book) pair
    pub fn open_loan_count(&self, user_id: i32, book_id: i32) -> usize {
        self.inner
            .tables()
            .loans
            .values()
            .filter(|l| l.user_id == user_id && l.book_id == book_id && l.status.is_open())
            .count()
    }

    /// Store a loan row as-is, bypassing the lending workflow (imports, fixtures)
    pub fn import_loan(&self, mut loan: Loan) -> i32 {
        let id = self.inner.next_loan_id.fetch_add(1, Ordering::SeqCst) + 1;
        loan.id = id;
        self.inner.tables().loans.insert(id, loan);
        id
    }

    /// Overwrite a copy counter without any check (repairs, fixtures)
    pub fn overwrite_available_copies(&self, book_id: i32, available_copies: i32) {
        if let Some(book) = self.inner.tables().books.get_mut(&book_id) {
            book.available_copies = available_copies;
        }
    }
}

#[async_trait]
impl LendingStore for MemoryLendingStore {
    async fn begin(&self, lock_timeout: Duration) -> AppResult<Box<dyn LendingTx>> {
        Ok(Box::new(MemoryLendingTx {
            inner: self.inner.clone(),
            lock_timeout,
            guards: Vec::new(),
            held: HashSet::new(),
            writes: Vec::new(),
        }))
    }

    async fn find_loan(&self, loan_id: i32, user_id: i32) -> AppResult<Option<LoanRecord>> {
        let tables = self.inner.tables();
        Ok(tables
            .loans
            .get(&loan_id)
            .filter(|l| l.user_id == user_id)
            .map(|l| tables.record(l)))
    }

    async fn user_loans(&self, user_id: i32) -> AppResult<Vec<LoanRecord>> {
        let tables = self.inner.tables();
        let mut records: Vec<LoanRecord> = tables
            .loans
            .values()
            .filter(|l| l.user_id == user_id)
            .map(|l| tables.record(l))
            .collect();
        records.sort_by(|a, b| {
            (b.loan.borrow_date, b.loan.id).cmp(&(a.loan.borrow_date, a.loan.id))
        });
        Ok(records)
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>> {
        let tables = self.inner.tables();
        let mut records: Vec<LoanRecord> = tables
            .loans
            .values()
            .filter(|l| l.is_overdue(now))
            .map(|l| tables.record(l))
            .collect();
        records.sort_by_key(|r| (r.loan.due_date, r.loan.id));
        Ok(records)
    }

    async fn copy_audit(&self) -> AppResult<Vec<CopyDiscrepancy>> {
        let tables = self.inner.tables();
        let mut open: HashMap<i32, i64> = HashMap::new();
        for loan in tables.loans.values().filter(|l| l.status.is_open()) {
            *open.entry(loan.book_id).or_default() += 1;
        }

        Ok(tables
            .books
            .iter()
            .filter_map(|(&book_id, book)| {
                let open_loans = open.get(&book_id).copied().unwrap_or(0);
                let expected_available = book.total_copies as i64 - open_loans;
                (book.available_copies as i64 != expected_available).then(|| CopyDiscrepancy {
                    book_id,
                    total_copies: book.total_copies,
                    available_copies: book.available_copies,
                    open_loans,
                    expected_available,
                })
            })
            .collect())
    }
}

#[derive(Debug)]
enum StagedWrite {
    InsertLoan(Loan),
    SetAvailable { book_id: i32, available_copies: i32 },
    CloseLoan { loan_id: i32, returned_at: DateTime<Utc> },
}

/// Transaction over [`MemoryLendingStore`]
pub struct MemoryLendingTx {
    inner: Arc<Inner>,
    lock_timeout: Duration,
    guards: Vec<OwnedMutexGuard<()>>,
    held: HashSet<RowKey>,
    writes: Vec<StagedWrite>,
}

impl MemoryLendingTx {
    async fn acquire(&mut self, key: RowKey) -> AppResult<()> {
        if self.held.contains(&key) {
            return Ok(());
        }
        let row = self.inner.row_lock(key);
        let acquired = tokio::time::timeout(self.lock_timeout, row.lock_owned()).await;
        match acquired {
            Ok(guard) => {
                self.guards.push(guard);
                self.held.insert(key);
                Ok(())
            }
            Err(_) => {
                self.inner.release_rows([key]);
                Err(AppError::Busy(format!("Timed out waiting for lock on {:?}", key)))
            }
        }
    }

    fn staged_open_loan(&self, user_id: i32, book_id: i32) -> bool {
        self.writes.iter().any(|w| {
            matches!(w, StagedWrite::InsertLoan(l) if l.user_id == user_id && l.book_id == book_id)
        })
    }
}

impl Drop for MemoryLendingTx {
    fn drop(&mut self) {
        // Guards first, so the entries are no longer referenced
        self.guards.clear();
        self.inner.release_rows(self.held.drain());
    }
}

#[async_trait]
impl LendingTx for MemoryLendingTx {
    async fn lock_book(&mut self, book_id: i32) -> AppResult<Option<BookStock>> {
        self.acquire(RowKey::Book(book_id)).await?;
        let tables = self.inner.tables();
        Ok(tables.books.get(&book_id).map(|b| BookStock {
            id: book_id,
            available_copies: b.available_copies,
            total_copies: b.total_copies,
        }))
    }

    async fn lock_loan(&mut self, loan_id: i32, user_id: i32) -> AppResult<Option<Loan>> {
        self.acquire(RowKey::Loan(loan_id)).await?;
        let tables = self.inner.tables();
        Ok(tables
            .loans
            .get(&loan_id)
            .filter(|l| l.user_id == user_id)
            .cloned())
    }

    async fn has_open_loan(&mut self, user_id: i32, book_id: i32) -> AppResult<bool> {
        Ok(self.staged_open_loan(user_id, book_id)
            || self.inner.tables().has_open_loan(user_id, book_id))
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        // Same guarantee as the partial unique index on the SQL side
        if self.has_open_loan(loan.user_id, loan.book_id).await? {
            return Err(AppError::AlreadyBorrowed(format!(
                "User {} already has book {} on loan",
                loan.user_id, loan.book_id
            )));
        }
        let id = self.inner.next_loan_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = Loan {
            id,
            user_id: loan.user_id,
            book_id: loan.book_id,
            borrow_date: loan.borrow_date,
            due_date: loan.due_date,
            return_date: None,
            status: LoanStatus::Borrowed,
            notes: String::new(),
        };
        self.writes.push(StagedWrite::InsertLoan(row.clone()));
        Ok(row)
    }

    async fn set_available_copies(&mut self, book_id: i32, available_copies: i32) -> AppResult<()> {
        let total_copies = self
            .inner
            .tables()
            .books
            .get(&book_id)
            .map(|b| b.total_copies)
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", book_id)))?;
        check_copies(available_copies, total_copies)
            .map_err(|e| AppError::Internal(format!("Copy counter check failed: {}", e)))?;
        self.writes.push(StagedWrite::SetAvailable {
            book_id,
            available_copies,
        });
        Ok(())
    }

    async fn close_loan(&mut self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Loan> {
        let mut loan = self
            .inner
            .tables()
            .loans
            .get(&loan_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan {} not found", loan_id)))?;
        loan.status = LoanStatus::Returned;
        loan.return_date = Some(returned_at);
        self.writes.push(StagedWrite::CloseLoan {
            loan_id,
            returned_at,
        });
        Ok(loan)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        {
            let mut tables = self.inner.tables();
            for write in &self.writes {
                match write {
                    StagedWrite::InsertLoan(loan) => {
                        tables.loans.insert(loan.id, loan.clone());
                    }
                    StagedWrite::SetAvailable {
                        book_id,
                        available_copies,
                    } => {
                        if let Some(book) = tables.books.get_mut(book_id) {
                            book.available_copies = *available_copies;
                        }
                    }
                    StagedWrite::CloseLoan {
                        loan_id,
                        returned_at,
                    } => {
                        if let Some(loan) = tables.loans.get_mut(loan_id) {
                            loan.status = LoanStatus::Returned;
                            loan.return_date = Some(*returned_at);
                        }
                    }
                }
            }
        }
        // Row locks are released only after the writes are visible
        drop(self);
        Ok(())
    }
}
