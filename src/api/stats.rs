//! Catalog statistics endpoint

use axum::{extract::State, Json};

use crate::{error::AppResult, models::stats::CatalogStats};

/// Catalog totals and the newest books; public like the catalog front page
#[utoipa::path(
    get,
    path = "/stats",
    tag = "stats",
    responses(
        (status = 200, description = "Catalog statistics", body = CatalogStats)
    )
)]
pub async fn catalog_stats(State(state): State<crate::AppState>) -> AppResult<Json<CatalogStats>> {
    let stats = state.services.catalog.stats().await?;
    Ok(Json(stats))
}
