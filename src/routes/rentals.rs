use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::db::models::{Rating, RentalAgreement};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody, QueryParams};
use crate::response::ApiResponse;
use crate::services::ratings::{self, NewRating, RatingSummary};
use crate::services::rentals::{self, Confirmation};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CanRateQuery {
    pub apartment_id: i64,
    /// Defaults to the caller.
    pub tenant_id: Option<String>,
}

#[derive(Serialize)]
pub struct CanRate {
    pub apartment_id: i64,
    pub tenant_id: String,
    pub can_rate: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rental/confirm", post(confirm))
        .route("/rental/can-rate", get(can_rate))
        .route("/rating", post(rate))
        .route("/apartments/{id}/ratings", get(summary))
}

/// POST /rental/confirm: tenant confirms for themselves; the owning landlord passes `tenant_id`.
async fn confirm(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(input): JsonBody<Confirmation>,
) -> AppResult<ApiResponse<RentalAgreement>> {
    let agreement = rentals::confirm(&mut *state.db.get()?, &user.subject, &input)?;
    Ok(ApiResponse::ok("Rental confirmation recorded", agreement))
}

/// GET /rental/can-rate?apartment_id=&tenant_id=
async fn can_rate(
    State(state): State<AppState>,
    user: CurrentUser,
    QueryParams(query): QueryParams<CanRateQuery>,
) -> AppResult<ApiResponse<CanRate>> {
    let tenant_id = query
        .tenant_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(user.subject);
    let can_rate = rentals::can_rate(&*state.db.get()?, query.apartment_id, &tenant_id)?;
    Ok(ApiResponse::ok(
        "Eligibility checked",
        CanRate {
            apartment_id: query.apartment_id,
            tenant_id,
            can_rate,
        },
    ))
}

/// POST /rating
async fn rate(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(input): JsonBody<NewRating>,
) -> AppResult<ApiResponse<Rating>> {
    let rating = ratings::submit(&mut *state.db.get()?, &user.subject, &input)?;
    Ok(ApiResponse::ok("Rating saved", rating))
}

/// GET /apartments/{id}/ratings
async fn summary(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<RatingSummary>> {
    let summary = ratings::summary(&*state.db.get()?, id)?;
    Ok(ApiResponse::ok("Ratings retrieved", summary))
}
