use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use crate::db::models::Inquiry;
use crate::domain::InquiryStatus;
use crate::error::AppResult;
use crate::extractors::{AdminUser, CurrentUser, JsonBody, QueryParams};
use crate::response::ApiResponse;
use crate::services::inquiries::{self, InquiryView, NewInquiry};
use crate::services::users;
use crate::state::AppState;
use crate::sweepers::{self, ReminderReport};

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub status: InquiryStatus,
}

#[derive(Deserialize, Default)]
pub struct StatusQuery {
    pub status: Option<InquiryStatus>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/inquiry", post(create))
        .route("/inquiries", get(list_mine))
        .route("/landlord/inquiries", get(list_received))
        .route("/inquiry/{id}/decide", put(decide))
        .route("/inquiries/sweep", post(sweep))
}

/// POST /inquiry
async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(input): JsonBody<NewInquiry>,
) -> AppResult<ApiResponse<Inquiry>> {
    let inquiry = inquiries::create(&mut *state.db.get()?, &user.subject, &input, Utc::now())?;
    Ok(ApiResponse::ok("Inquiry submitted", inquiry))
}

/// GET /inquiries: the caller's own inquiries.
async fn list_mine(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<ApiResponse<Vec<InquiryView>>> {
    let rows = inquiries::list_for_tenant(&*state.db.get()?, &user.subject)?;
    Ok(ApiResponse::ok("Inquiries retrieved", rows))
}

/// GET /landlord/inquiries?status=
async fn list_received(
    State(state): State<AppState>,
    user: CurrentUser,
    QueryParams(query): QueryParams<StatusQuery>,
) -> AppResult<ApiResponse<Vec<InquiryView>>> {
    let conn = state.db.get()?;
    users::require_verified_landlord(&conn, &user.subject)?;
    let rows = inquiries::list_for_landlord(&conn, &user.subject, query.status)?;
    Ok(ApiResponse::ok("Inquiries retrieved", rows))
}

/// PUT /inquiry/{id}/decide
async fn decide(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<DecisionRequest>,
) -> AppResult<ApiResponse<Inquiry>> {
    let mut conn = state.db.get()?;
    users::require_verified_landlord(&conn, &user.subject)?;
    let inquiry = inquiries::decide(&mut conn, id, &user.subject, req.status)?;
    Ok(ApiResponse::ok("Inquiry updated", inquiry))
}

/// POST /inquiries/sweep: run the reminder pass now.
async fn sweep(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<ReminderReport>> {
    let report = sweepers::run_reminders(&state.db, state.push.as_ref(), Utc::now()).await?;
    Ok(ApiResponse::ok("Reminder sweep complete", report))
}
