//! Router tests; lending runs on the in-memory store. Catalog routes may reach
//! a database that is not there and must then fail cleanly.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use libris_server::{
    api,
    clock::FixedClock,
    config::AppConfig,
    models::UserClaims,
    repository::{MemoryLendingStore, Repository},
    services::Services,
    AppState,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use crate::start;

struct TestApp {
    router: Router,
    store: MemoryLendingStore,
    secret: String,
}

impl TestApp {
    fn new() -> Self {
        let config = AppConfig::default();
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(1))
            .connect_lazy(&config.database.url)
            .unwrap();
        let store = MemoryLendingStore::new();
        let services = Services::new(
            Repository::new(pool),
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(start())),
            config.loans.clone(),
        );
        let secret = config.auth.jwt_secret.clone();
        let router = api::create_router(AppState {
            config: Arc::new(config),
            services: Arc::new(services),
        });
        Self {
            router,
            store,
            secret,
        }
    }

    fn token(&self, user_id: i32, is_staff: bool) -> String {
        UserClaims::new(user_id, &format!("user{}", user_id), is_staff, 1)
            .create_token(&self.secret)
            .unwrap()
    }

    async fn send(&self, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let response = self
            .router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/api/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/api/v1/me/loans", None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "NotAuthorized");
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_unauthorized() {
    let app = TestApp::new();
    let forged = UserClaims::new(1, "mallory", true, 1)
        .create_token("not-the-secret")
        .unwrap();
    let (status, _) = app.send("GET", "/api/v1/me/loans", Some(&forged)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_borrow_and_return_flow() {
    let app = TestApp::new();
    let book = app.store.add_book("The Dispossessed", 2).unwrap();
    let token = app.token(5, false);

    let (status, body) = app
        .send("POST", &format!("/api/v1/books/{}/borrow", book), Some(&token))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["due_date"], "2025-03-17T09:00:00Z");
    let loan_id = body["id"].as_i64().unwrap();

    let (status, body) = app
        .send("POST", &format!("/api/v1/books/{}/borrow", book), Some(&token))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "AlreadyBorrowed");
    assert_eq!(app.store.book_stock(book).unwrap().available_copies, 1);

    let (status, body) = app.send("GET", "/api/v1/me/loans", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["book_title"], "The Dispossessed");
    assert_eq!(body[0]["status"], "borrowed");
    assert_eq!(body[0]["is_overdue"], false);

    let (status, body) = app
        .send("POST", &format!("/api/v1/loans/{}/return", loan_id), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "returned");
    assert_eq!(body["loan"]["status"], "returned");
    assert_eq!(app.store.book_stock(book).unwrap().available_copies, 2);

    let (status, body) = app
        .send("POST", &format!("/api/v1/loans/{}/return", loan_id), Some(&token))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "AlreadyReturned");
}

#[tokio::test]
async fn test_borrow_with_no_copy_left() {
    let app = TestApp::new();
    let book = app.store.add_book_with_stock("Trouble on Triton", 0, 1).unwrap();

    let (status, body) = app
        .send("POST", &format!("/api/v1/books/{}/borrow", book), Some(&app.token(1, false)))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "NotAvailable");
}

#[tokio::test]
async fn test_unknown_book_and_foreign_loan_are_not_found() {
    let app = TestApp::new();
    let book = app.store.add_book("Triton", 1).unwrap();

    let (status, _) = app
        .send("POST", "/api/v1/books/999/borrow", Some(&app.token(1, false)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app
        .send("POST", &format!("/api/v1/books/{}/borrow", book), Some(&app.token(1, false)))
        .await;
    let loan_id = body["id"].as_i64().unwrap();

    let (status, body) = app
        .send("GET", &format!("/api/v1/loans/{}", loan_id), Some(&app.token(2, false)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NoSuchData");

    let (status, _) = app
        .send("POST", &format!("/api/v1/loans/{}/return", loan_id), Some(&app.token(2, false)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reports_require_staff() {
    let app = TestApp::new();
    app.store.add_book("Dune", 1).unwrap();

    let (status, _) = app
        .send("GET", "/api/v1/loans/audit", Some(&app.token(1, false)))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send("GET", "/api/v1/loans/audit", Some(&app.token(2, true)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Array(vec![]));

    let (status, body) = app
        .send("GET", "/api/v1/loans/overdue", Some(&app.token(2, true)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Array(vec![]));
}

#[tokio::test]
async fn test_huge_page_number_is_answered() {
    let app = TestApp::new();
    let (status, body) = app
        .send(
            "GET",
            "/api/v1/books?page=9223372036854775807&per_page=200",
            Some(&app.token(1, false)),
        )
        .await;

    // Without a database the handler still has to answer, never panic
    assert!(
        status == StatusCode::OK || status == StatusCode::INTERNAL_SERVER_ERROR,
        "unexpected status {}",
        status
    );
    if status == StatusCode::OK {
        assert_eq!(body["page"], i64::MAX);
        assert_eq!(body["per_page"], 200);
        assert_eq!(body["items"], Value::Array(vec![]));
    } else {
        assert_eq!(body["error"], "DbFailure");
    }
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = TestApp::new();
    let (status, body) = app.send("GET", "/api-docs/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/books/{id}/borrow"]["post"].is_object());
    assert!(body["paths"]["/stats"]["get"].is_object());
}
