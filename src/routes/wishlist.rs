use axum::extract::{Path, State};
use axum::routing::{delete, post};
use axum::Router;
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::{CurrentUser, JsonBody};
use crate::response::ApiResponse;
use crate::services::listing::ApartmentView;
use crate::services::wishlist;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WishlistRequest {
    pub apartment_id: i64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/wishlist", post(add).get(list))
        .route("/wishlist/{apartment_id}", delete(remove))
}

/// POST /wishlist
async fn add(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(req): JsonBody<WishlistRequest>,
) -> AppResult<ApiResponse<()>> {
    wishlist::add(&*state.db.get()?, &user.subject, req.apartment_id)?;
    Ok(ApiResponse::message("Added to wishlist"))
}

/// DELETE /wishlist/{apartment_id}
async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(apartment_id): Path<i64>,
) -> AppResult<ApiResponse<()>> {
    wishlist::remove(&*state.db.get()?, &user.subject, apartment_id)?;
    Ok(ApiResponse::message("Removed from wishlist"))
}

/// GET /wishlist
async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<ApiResponse<Vec<ApartmentView>>> {
    let saved = wishlist::list(&*state.db.get()?, &user.subject)?;
    Ok(ApiResponse::ok("Wishlist retrieved", saved))
}
