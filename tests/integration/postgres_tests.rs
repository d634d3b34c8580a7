//! Lending against a real Postgres database.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -- --ignored

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use libris_server::{
    clock::SystemClock,
    config::LoansConfig,
    error::AppError,
    models::{
        book::{BookQuery, CreateBook, UpdateBook},
        category::CreateCategory,
        user::UpdateProfile,
    },
    repository::{loans::LoansRepository, Repository},
    services::{loans::LoansService, Services},
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::task::JoinSet;

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(12)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Insert an author and a book with `copies` copies; returns the book id
async fn seed_book(pool: &PgPool, copies: i32) -> i32 {
    let tag = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let author_id: i32 = sqlx::query_scalar("INSERT INTO authors (name) VALUES ($1) RETURNING id")
        .bind(format!("Author {}", tag))
        .fetch_one(pool)
        .await
        .unwrap();
    sqlx::query_scalar(
        r#"
        INSERT INTO books (title, author_id, isbn, publication_date, available_copies, total_copies)
        VALUES ($1, $2, $3, CURRENT_DATE, $4, $4)
        RETURNING id
        "#,
    )
    .bind(format!("Book {}", tag))
    .bind(author_id)
    .bind(format!("{:013}", tag.rem_euclid(10_000_000_000_000)))
    .bind(copies)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_users(pool: &PgPool, count: usize) -> Vec<i32> {
    let tag = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let id: i32 = sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
            .bind(format!("reader-{}-{}", tag, n))
            .fetch_one(pool)
            .await
            .unwrap();
        ids.push(id);
    }
    ids
}

async fn available(pool: &PgPool, book_id: i32) -> i32 {
    sqlx::query_scalar("SELECT available_copies FROM books WHERE id = $1")
        .bind(book_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn author_of(pool: &PgPool, book_id: i32) -> i32 {
    sqlx::query_scalar("SELECT author_id FROM books WHERE id = $1")
        .bind(book_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn loan_rows(pool: &PgPool, book_id: i32) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE book_id = $1")
        .bind(book_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn services(pool: &PgPool) -> Services {
    Services::new(
        Repository::new(pool.clone()),
        Arc::new(LoansRepository::new(pool.clone())),
        Arc::new(SystemClock),
        LoansConfig::default(),
    )
}

fn new_book(author_id: i32, isbn: &str) -> CreateBook {
    CreateBook {
        title: "Kindred".to_string(),
        author_id,
        category_ids: Vec::new(),
        isbn: isbn.to_string(),
        description: None,
        publication_date: NaiveDate::from_ymd_opt(1979, 6, 1).unwrap(),
        pages: Some(264),
        total_copies: Some(2),
        available_copies: None,
    }
}

fn service(pool: &PgPool) -> LoansService {
    LoansService::new(
        Arc::new(LoansRepository::new(pool.clone())),
        Arc::new(SystemClock),
        LoansConfig::default(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pg_concurrent_borrows_never_oversell() {
    let pool = pool().await;
    let book = seed_book(&pool, 3).await;
    let users = seed_users(&pool, 10).await;
    let loans = service(&pool);

    let mut tasks = JoinSet::new();
    for user_id in users {
        let loans = loans.clone();
        tasks.spawn(async move { loans.borrow(user_id, book).await });
    }

    let mut borrowed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => borrowed += 1,
            Err(e) => assert!(matches!(e, AppError::Unavailable(_)), "{}", e),
        }
    }

    assert_eq!(borrowed, 3);
    assert_eq!(available(&pool, book).await, 0);
}

#[tokio::test]
#[ignore]
async fn test_pg_borrow_return_round() {
    let pool = pool().await;
    let book = seed_book(&pool, 2).await;
    let user = seed_users(&pool, 1).await[0];
    let loans = service(&pool);

    let loan = loans.borrow(user, book).await.unwrap();
    assert_eq!(available(&pool, book).await, 1);

    let again = loans.borrow(user, book).await.unwrap_err();
    assert!(matches!(again, AppError::AlreadyBorrowed(_)));

    let returned = loans.return_loan(loan.id, user).await.unwrap();
    assert!(returned.return_date.is_some());
    assert_eq!(available(&pool, book).await, 2);

    let twice = loans.return_loan(loan.id, user).await.unwrap_err();
    assert!(matches!(twice, AppError::AlreadyReturned(_)));
    assert_eq!(available(&pool, book).await, 2);
}

#[tokio::test]
#[ignore]
async fn test_pg_open_loan_index_rejects_duplicates() {
    let pool = pool().await;
    let book = seed_book(&pool, 2).await;
    let user = seed_users(&pool, 1).await[0];

    let insert = "INSERT INTO loans (user_id, book_id, borrow_date, due_date) VALUES ($1, $2, NOW(), NOW())";
    sqlx::query(insert).bind(user).bind(book).execute(&pool).await.unwrap();
    let duplicate = sqlx::query(insert).bind(user).bind(book).execute(&pool).await;

    let err = duplicate.unwrap_err();
    assert!(libris_server::error::is_unique_violation(&err));
}

#[tokio::test]
#[ignore]
async fn test_pg_author_delete_refused_while_books_are_lent() {
    let pool = pool().await;
    let book = seed_book(&pool, 1).await;
    let author = author_of(&pool, book).await;
    let user = seed_users(&pool, 1).await[0];
    let services = services(&pool);

    let loan = services.loans.borrow(user, book).await.unwrap();
    let err = services.catalog.delete_author(author).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{}", err);

    // Returned loans are history and still block the delete
    services.loans.return_loan(loan.id, user).await.unwrap();
    let err = services.catalog.delete_author(author).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{}", err);

    assert_eq!(loan_rows(&pool, book).await, 1);
    assert!(services.catalog.get_book(book, None).await.is_ok());
}

#[tokio::test]
#[ignore]
async fn test_pg_author_without_loans_is_deleted_with_books() {
    let pool = pool().await;
    let book = seed_book(&pool, 1).await;
    let author = author_of(&pool, book).await;
    let services = services(&pool);

    services.catalog.delete_author(author).await.unwrap();

    let err = services.catalog.get_book(book, None).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let err = services.catalog.delete_author(author).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
#[ignore]
async fn test_pg_book_delete_refused_with_loan_history() {
    let pool = pool().await;
    let book = seed_book(&pool, 2).await;
    let user = seed_users(&pool, 1).await[0];
    let services = services(&pool);

    let loan = services.loans.borrow(user, book).await.unwrap();
    let err = services.catalog.delete_book(book).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{}", err);

    services.loans.return_loan(loan.id, user).await.unwrap();
    let err = services.catalog.delete_book(book).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{}", err);
    assert_eq!(loan_rows(&pool, book).await, 1);

    let unlent = seed_book(&pool, 1).await;
    services.catalog.delete_book(unlent).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_pg_duplicate_isbn_is_conflict() {
    let pool = pool().await;
    let book = seed_book(&pool, 1).await;
    let author = author_of(&pool, book).await;
    let services = services(&pool);

    let existing = services.catalog.get_book(book, None).await.unwrap();
    let err = services
        .catalog
        .create_book(new_book(author, &existing.isbn))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{}", err);
}

#[tokio::test]
#[ignore]
async fn test_pg_duplicate_category_name_is_conflict() {
    let pool = pool().await;
    let services = services(&pool);
    let name = format!("Speculative {}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let category = || CreateCategory {
        name: name.clone(),
        description: None,
    };

    services.catalog.create_category(category()).await.unwrap();
    let err = services.catalog.create_category(category()).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{}", err);
}

#[tokio::test]
#[ignore]
async fn test_pg_profile_created_once_and_updated() {
    let pool = pool().await;
    let user = seed_users(&pool, 1).await[0];
    let services = services(&pool);

    let first = services.users.overview(user).await.unwrap();
    let second = services.users.overview(user).await.unwrap();
    assert_eq!(first.profile.id, second.profile.id);
    assert_eq!(first.profile.user_id, user);

    let profile = services
        .users
        .update_profile(
            user,
            UpdateProfile {
                phone_number: Some("555-0100".to_string()),
                address: None,
                date_of_birth: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(profile.id, first.profile.id);
    assert_eq!(profile.phone_number, "555-0100");
}

#[tokio::test]
#[ignore]
async fn test_pg_me_counts_loans() {
    let pool = pool().await;
    let first_book = seed_book(&pool, 1).await;
    let second_book = seed_book(&pool, 1).await;
    let user = seed_users(&pool, 1).await[0];
    let services = services(&pool);

    let loan = services.loans.borrow(user, first_book).await.unwrap();
    services.loans.borrow(user, second_book).await.unwrap();
    services.loans.return_loan(loan.id, user).await.unwrap();

    let me = services.users.overview(user).await.unwrap();
    assert_eq!(me.borrow_count, 2);
    assert_eq!(me.active_borrows, 1);
}

#[tokio::test]
#[ignore]
async fn test_pg_book_detail_tracks_own_open_loan() {
    let pool = pool().await;
    let book = seed_book(&pool, 2).await;
    let users = seed_users(&pool, 2).await;
    let services = services(&pool);

    let loan = services.loans.borrow(users[0], book).await.unwrap();
    assert!(services.catalog.get_book(book, Some(users[0])).await.unwrap().user_has_borrowed);
    assert!(!services.catalog.get_book(book, Some(users[1])).await.unwrap().user_has_borrowed);

    services.loans.return_loan(loan.id, users[0]).await.unwrap();
    assert!(!services.catalog.get_book(book, Some(users[0])).await.unwrap().user_has_borrowed);
}

#[tokio::test]
#[ignore]
async fn test_pg_stats_lists_newest_books() {
    let pool = pool().await;
    seed_book(&pool, 1).await;
    seed_book(&pool, 1).await;
    let services = services(&pool);

    let stats = services.catalog.stats().await.unwrap();
    assert!(stats.total_books >= 2);
    assert!(stats.total_authors >= 2);
    assert!(!stats.recent_books.is_empty());
    assert!(stats.recent_books.len() <= 6);
}

#[tokio::test]
#[ignore]
async fn test_pg_paging_far_past_the_end() {
    let pool = pool().await;
    seed_book(&pool, 1).await;
    let services = services(&pool);

    let query = BookQuery {
        page: Some(i64::MAX),
        per_page: Some(200),
        ..BookQuery::default()
    };
    let (items, total) = services.catalog.list_books(&query).await.unwrap();
    assert!(items.is_empty());
    assert!(total >= 1);
}

#[tokio::test]
#[ignore]
async fn test_pg_total_copies_update_rejects_negative_totals() {
    let pool = pool().await;
    let book = seed_book(&pool, 2).await;
    let services = services(&pool);

    let update = UpdateBook {
        title: None,
        author_id: None,
        category_ids: None,
        isbn: None,
        description: None,
        publication_date: None,
        pages: None,
        total_copies: Some(i32::MIN),
    };
    let err = services.catalog.update_book(book, update).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "{}", err);
    assert_eq!(available(&pool, book).await, 2);
}
