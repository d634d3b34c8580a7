//! Borrow and return endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::loan::{CopyDiscrepancy, Loan, LoanDetails},
};

use super::AuthenticatedUser;

/// Loan response with calculated due date
#[derive(Serialize, ToSchema)]
pub struct LoanResponse {
    /// Loan ID
    pub id: i32,
    /// Due date (ISO 8601 format)
    pub due_date: DateTime<Utc>,
    /// Status message
    pub message: String,
}

/// Return response with the closed loan
#[derive(Serialize, ToSchema)]
pub struct ReturnResponse {
    /// Return status
    pub status: String,
    pub loan: Loan,
    pub message: String,
}

/// Borrow a book
#[utoipa::path(
    post,
    path = "/books/{id}/borrow",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Book ID")
    ),
    responses(
        (status = 201, description = "Loan created", body = LoanResponse),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Already borrowed by this user, or no copy available"),
        (status = 503, description = "Book is locked by concurrent requests, retry later")
    )
)]
pub async fn borrow_book(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<i32>,
) -> AppResult<(StatusCode, Json<LoanResponse>)> {
    let loan = state.services.loans.borrow(claims.user_id, book_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(LoanResponse {
            id: loan.id,
            due_date: loan.due_date,
            message: "Book borrowed successfully".to_string(),
        }),
    ))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Book returned", body = ReturnResponse),
        (status = 404, description = "No such loan for this user"),
        (status = 409, description = "Already returned"),
        (status = 503, description = "Loan is locked by concurrent requests, retry later")
    )
)]
pub async fn return_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<ReturnResponse>> {
    let loan = state
        .services
        .loans
        .return_loan(loan_id, claims.user_id)
        .await?;

    Ok(Json(ReturnResponse {
        status: "returned".to_string(),
        loan,
        message: "Book returned successfully".to_string(),
    }))
}

/// Loans of the current user
#[utoipa::path(
    get,
    path = "/me/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All loans of the current user, newest first", body = Vec<LoanDetails>)
    )
)]
pub async fn my_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let loans = state.services.loans.user_loans(claims.user_id).await?;
    Ok(Json(loans))
}

/// Get one loan of the current user
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan details", body = LoanDetails),
        (status = 404, description = "No such loan for this user")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<LoanDetails>> {
    let loan = state.services.loans.get_loan(loan_id, claims.user_id).await?;
    Ok(Json(loan))
}

/// List overdue loans (staff)
#[utoipa::path(
    get,
    path = "/loans/overdue",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Open loans past due date", body = Vec<LoanDetails>),
        (status = 403, description = "Staff rights required")
    )
)]
pub async fn overdue_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanDetails>>> {
    claims.require_staff()?;
    let loans = state.services.loans.overdue_loans().await?;
    Ok(Json(loans))
}

/// Reconcile copy counters with open loans (staff)
#[utoipa::path(
    get,
    path = "/loans/audit",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Books whose available copies disagree with open loans", body = Vec<CopyDiscrepancy>),
        (status = 403, description = "Staff rights required")
    )
)]
pub async fn audit_copies(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<CopyDiscrepancy>>> {
    claims.require_staff()?;
    let discrepancies = state.services.loans.audit_copies().await?;
    Ok(Json(discrepancies))
}
