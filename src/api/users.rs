//! Current user endpoints

use axum::{extract::State, Json};

use crate::{
    error::AppResult,
    models::user::{UpdateProfile, UserOverview, UserProfile},
};

use super::AuthenticatedUser;

/// Current user with profile and borrowing counters
#[utoipa::path(
    get,
    path = "/me",
    tag = "users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserOverview),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "User not found")
    )
)]
pub async fn me(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<UserOverview>> {
    let overview = state.services.users.overview(claims.user_id).await?;
    Ok(Json(overview))
}

/// Update own profile
#[utoipa::path(
    put,
    path = "/me/profile",
    tag = "users",
    security(("bearer_auth" = [])),
    request_body = UpdateProfile,
    responses(
        (status = 200, description = "Profile updated", body = UserProfile),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn update_my_profile(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(profile): Json<UpdateProfile>,
) -> AppResult<Json<UserProfile>> {
    let updated = state.services.users.update_profile(claims.user_id, profile).await?;
    Ok(Json(updated))
}
