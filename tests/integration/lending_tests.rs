//! Borrow/return workflow against the in-memory store

use std::time::Duration as StdDuration;

use chrono::Duration;
use libris_server::{
    config::LoansConfig,
    error::AppError,
    models::{Loan, LoanStatus},
    repository::{LendingStore, LendingTx},
};
use tokio::task::JoinSet;
use tokio_test::{assert_err, assert_ok};

use crate::{start, Harness};

#[tokio::test]
async fn test_borrow_sets_due_date_and_decrements() {
    let h = Harness::new();
    let book = h.store.add_book("The Left Hand of Darkness", 5).unwrap();

    let loan = assert_ok!(h.loans.borrow(1, book).await);

    assert_eq!(loan.status, LoanStatus::Borrowed);
    assert_eq!(loan.borrow_date, start());
    assert_eq!(loan.due_date, start() + Duration::days(14));
    assert!(loan.return_date.is_none());
    assert_eq!(h.available(book), 4);
}

#[tokio::test]
async fn test_borrow_then_return_restores_counter() {
    let h = Harness::new();
    let book = h.store.add_book("Solaris", 5).unwrap();

    let loan = h.loans.borrow(1, book).await.unwrap();
    assert_eq!(h.available(book), 4);

    h.clock.advance(Duration::days(3));
    let returned = assert_ok!(h.loans.return_loan(loan.id, 1).await);

    assert_eq!(returned.status, LoanStatus::Returned);
    assert_eq!(returned.return_date, Some(start() + Duration::days(3)));
    assert_eq!(h.available(book), 5);
    assert_eq!(h.store.loan(loan.id).unwrap(), returned);
}

#[tokio::test]
async fn test_last_copy_goes_to_one_user_only() {
    let h = Harness::new();
    let book = h.store.add_book("Roadside Picnic", 1).unwrap();

    assert_ok!(h.loans.borrow(1, book).await);
    let err = assert_err!(h.loans.borrow(2, book).await);

    assert!(matches!(err, AppError::Unavailable(_)));
    assert_eq!(h.available(book), 0);
    assert_eq!(h.store.open_loan_count(2, book), 0);
}

#[tokio::test]
async fn test_same_user_cannot_hold_two_copies() {
    let h = Harness::new();
    let book = h.store.add_book("Kindred", 3).unwrap();

    h.loans.borrow(1, book).await.unwrap();
    let err = assert_err!(h.loans.borrow(1, book).await);

    assert!(matches!(err, AppError::AlreadyBorrowed(_)));
    assert_eq!(h.available(book), 2);
    assert_eq!(h.store.open_loan_count(1, book), 1);
}

#[tokio::test]
async fn test_borrow_again_after_return() {
    let h = Harness::new();
    let book = h.store.add_book("Kindred", 1).unwrap();

    let first = h.loans.borrow(1, book).await.unwrap();
    h.loans.return_loan(first.id, 1).await.unwrap();
    let second = assert_ok!(h.loans.borrow(1, book).await);

    assert_ne!(first.id, second.id);
    assert_eq!(h.available(book), 0);
}

#[tokio::test]
async fn test_borrow_unknown_book() {
    let h = Harness::new();
    let err = assert_err!(h.loans.borrow(1, 999).await);
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_double_return_is_rejected_without_double_increment() {
    let h = Harness::new();
    let book = h.store.add_book("Babel-17", 2).unwrap();

    let loan = h.loans.borrow(1, book).await.unwrap();
    h.loans.return_loan(loan.id, 1).await.unwrap();
    let err = assert_err!(h.loans.return_loan(loan.id, 1).await);

    assert!(matches!(err, AppError::AlreadyReturned(_)));
    assert_eq!(h.available(book), 2);
}

#[tokio::test]
async fn test_return_of_someone_elses_loan_is_not_found() {
    let h = Harness::new();
    let book = h.store.add_book("Nova", 2).unwrap();

    let loan = h.loans.borrow(1, book).await.unwrap();
    let err = assert_err!(h.loans.return_loan(loan.id, 2).await);

    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.available(book), 1);
    assert!(h.store.loan(loan.id).unwrap().status.is_open());
}

#[tokio::test]
async fn test_return_unknown_loan() {
    let h = Harness::new();
    let err = assert_err!(h.loans.return_loan(42, 1).await);
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_borrows_never_oversell() {
    let h = Harness::new();
    let book = h.store.add_book("Dhalgren", 3).unwrap();

    let mut tasks = JoinSet::new();
    for user_id in 1..=10 {
        let loans = h.loans.clone();
        tasks.spawn(async move { loans.borrow(user_id, book).await });
    }

    let mut borrowed = 0;
    let mut unavailable = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => borrowed += 1,
            Err(AppError::Unavailable(_)) => unavailable += 1,
            Err(other) => panic!("unexpected outcome: {}", other),
        }
    }

    assert_eq!(borrowed, 3);
    assert_eq!(unavailable, 7);
    assert_eq!(h.available(book), 0);
    assert!(h.loans.audit_copies().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_returns_of_one_loan_increment_once() {
    let h = Harness::new();
    let book = h.store.add_book("Dhalgren", 2).unwrap();
    let loan_id = h.loans.borrow(1, book).await.unwrap().id;

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let loans = h.loans.clone();
        tasks.spawn(async move { loans.return_loan(loan_id, 1).await });
    }

    let mut returned = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => returned += 1,
            Err(e) => assert!(matches!(e, AppError::AlreadyReturned(_))),
        }
    }

    assert_eq!(returned, 1);
    assert_eq!(h.available(book), 2);
}

#[tokio::test]
async fn test_overdue_is_derived_from_due_date() {
    let h = Harness::new();
    let book = h.store.add_book("Stand on Zanzibar", 1).unwrap();
    let loan = h.loans.borrow(1, book).await.unwrap();

    h.clock.advance(Duration::days(14));
    assert!(!h.loans.is_overdue(&loan));
    assert!(h.loans.overdue_loans().await.unwrap().is_empty());

    h.clock.advance(Duration::days(2));
    assert!(h.loans.is_overdue(&loan));

    let mine = h.loans.user_loans(1).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].is_overdue);
    assert_eq!(mine[0].days_overdue, 2);
    assert_eq!(mine[0].display_status, LoanStatus::Overdue);
    assert_eq!(mine[0].book_title, "Stand on Zanzibar");

    let overdue = h.loans.overdue_loans().await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].loan.id, loan.id);

    let returned = h.loans.return_loan(loan.id, 1).await.unwrap();
    assert!(!h.loans.is_overdue(&returned));
    assert!(h.loans.overdue_loans().await.unwrap().is_empty());
    let detail = h.loans.get_loan(loan.id, 1).await.unwrap();
    assert_eq!(detail.display_status, LoanStatus::Returned);
}

#[tokio::test]
async fn test_user_loans_newest_first() {
    let h = Harness::new();
    let first = h.store.add_book("A", 1).unwrap();
    let second = h.store.add_book("B", 1).unwrap();

    h.loans.borrow(1, first).await.unwrap();
    h.clock.advance(Duration::hours(1));
    h.loans.borrow(1, second).await.unwrap();

    let titles: Vec<_> = h
        .loans
        .user_loans(1)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.book_title)
        .collect();
    assert_eq!(titles, vec!["B", "A"]);
    assert!(h.loans.user_loans(2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_loan_is_scoped_to_owner() {
    let h = Harness::new();
    let book = h.store.add_book("A", 1).unwrap();
    let loan = h.loans.borrow(1, book).await.unwrap();

    assert_ok!(h.loans.get_loan(loan.id, 1).await);
    let err = assert_err!(h.loans.get_loan(loan.id, 2).await);
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_stored_overdue_status_counts_as_open() {
    let h = Harness::new();
    let book = h.store.add_book_with_stock("Ubik", 0, 1).unwrap();
    let loan_id = h.store.import_loan(Loan {
        id: 0,
        user_id: 1,
        book_id: book,
        borrow_date: start() - Duration::days(30),
        due_date: start() - Duration::days(16),
        return_date: None,
        status: LoanStatus::Overdue,
        notes: String::new(),
    });

    let err = assert_err!(h.loans.borrow(1, book).await);
    assert!(matches!(err, AppError::AlreadyBorrowed(_)));
    assert_eq!(h.loans.overdue_loans().await.unwrap().len(), 1);

    let returned = assert_ok!(h.loans.return_loan(loan_id, 1).await);
    assert_eq!(returned.status, LoanStatus::Returned);
    assert_eq!(h.available(book), 1);
    assert!(h.loans.audit_copies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_flags_drifted_counter() {
    let h = Harness::new();
    let book = h.store.add_book("Ubik", 4).unwrap();
    h.loans.borrow(1, book).await.unwrap();
    h.loans.borrow(2, book).await.unwrap();
    assert!(h.loans.audit_copies().await.unwrap().is_empty());

    h.store.overwrite_available_copies(book, 4);

    let report = h.loans.audit_copies().await.unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].book_id, book);
    assert_eq!(report[0].open_loans, 2);
    assert_eq!(report[0].available_copies, 4);
    assert_eq!(report[0].expected_available, 2);
}

#[tokio::test]
async fn test_return_onto_full_shelf_is_capped() {
    let h = Harness::new();
    let book = h.store.add_book("Ubik", 1).unwrap();
    // Open loan while the counter still shows every copy on the shelf
    let loan_id = h.store.import_loan(Loan {
        id: 0,
        user_id: 1,
        book_id: book,
        borrow_date: start(),
        due_date: start() + Duration::days(14),
        return_date: None,
        status: LoanStatus::Borrowed,
        notes: String::new(),
    });
    assert_eq!(h.loans.audit_copies().await.unwrap().len(), 1);

    assert_ok!(h.loans.return_loan(loan_id, 1).await);

    assert_eq!(h.available(book), 1);
    assert!(h.loans.audit_copies().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_held_lock_reports_busy_after_retries() {
    let h = Harness::with_config(LoansConfig {
        lock_timeout_ms: 20,
        busy_retries: 2,
        retry_backoff_ms: 1,
        ..LoansConfig::default()
    });
    let book = h.store.add_book("Nova", 2).unwrap();

    let mut holder = h.store.begin(StdDuration::from_secs(1)).await.unwrap();
    holder.lock_book(book).await.unwrap();

    let err = assert_err!(h.loans.borrow(1, book).await);
    assert!(matches!(err, AppError::Busy(_)));
    assert_eq!(h.available(book), 2);
    assert_eq!(h.store.open_loan_count(1, book), 0);

    drop(holder);
    assert_ok!(h.loans.borrow(1, book).await);
    assert_eq!(h.available(book), 1);
}

#[tokio::test]
async fn test_busy_lock_released_during_retry_succeeds() {
    let h = Harness::with_config(LoansConfig {
        lock_timeout_ms: 20,
        busy_retries: 5,
        retry_backoff_ms: 20,
        ..LoansConfig::default()
    });
    let book = h.store.add_book("Nova", 1).unwrap();

    let mut holder = h.store.begin(StdDuration::from_secs(1)).await.unwrap();
    holder.lock_book(book).await.unwrap();
    let release = tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        drop(holder);
    });

    assert_ok!(h.loans.borrow(1, book).await);
    release.await.unwrap();
    assert_eq!(h.available(book), 0);
}

#[tokio::test]
async fn test_end_to_end_counter() {
    let h = Harness::new();
    let book = h.store.add_book("Neuromancer", 5).unwrap();

    let loan = h.loans.borrow(7, book).await.unwrap();
    assert_eq!(h.available(book), 4);

    h.clock.advance(Duration::days(20));
    let mine = h.loans.user_loans(7).await.unwrap();
    assert!(mine[0].is_overdue);

    h.loans.return_loan(loan.id, 7).await.unwrap();
    assert_eq!(h.available(book), 5);
    assert!(!h.loans.user_loans(7).await.unwrap()[0].is_overdue);
}
