use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use crate::db::models::{LandlordProfile, User};
use crate::domain::{MediaKind, PageRequest, Paginated};
use crate::error::AppResult;
use crate::extractors::{AdminUser, CurrentUser, JsonBody, QueryParams};
use crate::response::ApiResponse;
use crate::routes::upload_remote;
use crate::services::landlords::{self, ApplicationView, LandlordApplication, UploadedDocuments};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/landlord/register", post(register))
        .route("/admin/landlord/applications", get(applications))
        .route("/admin/landlord/{subject}/verify", put(verify))
        .route("/admin/landlord/{subject}/reject", put(reject))
}

/// POST /landlord/register: upload the ID and permits, then file the application.
async fn register(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(application): JsonBody<LandlordApplication>,
) -> AppResult<ApiResponse<LandlordProfile>> {
    application.validate()?;
    landlords::check_can_apply(&*state.db.get()?, &user.subject)?;

    let mut inputs = vec![(MediaKind::Image, application.id_image_url.clone())];
    inputs.extend(
        application
            .permit_image_urls
            .iter()
            .filter(|u| !u.trim().is_empty())
            .map(|u| (MediaKind::Image, u.clone())),
    );
    let mut uploaded = upload_remote(&state, &inputs).await?.into_iter().map(|(_, url)| url);
    let documents = UploadedDocuments {
        id_url: uploaded.next().unwrap_or_default(),
        permit_urls: uploaded.collect(),
    };

    let profile = landlords::submit_application(
        &mut *state.db.get()?,
        &user.subject,
        &application,
        &documents,
    )?;
    Ok(ApiResponse::created("Landlord application submitted", profile))
}

/// GET /admin/landlord/applications?page=&limit=
async fn applications(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(page): QueryParams<PageRequest>,
) -> AppResult<ApiResponse<Paginated<ApplicationView>>> {
    let pending = landlords::pending_applications(&*state.db.get()?, page)?;
    Ok(ApiResponse::ok("Pending applications retrieved", pending))
}

/// PUT /admin/landlord/{subject}/verify
async fn verify(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(subject): Path<String>,
) -> AppResult<ApiResponse<User>> {
    let user = landlords::verify_landlord(&mut *state.db.get()?, &subject, Utc::now())?;
    Ok(ApiResponse::ok("Landlord verified", user))
}

/// PUT /admin/landlord/{subject}/reject
async fn reject(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(subject): Path<String>,
    JsonBody(req): JsonBody<RejectRequest>,
) -> AppResult<ApiResponse<User>> {
    let user = landlords::reject_landlord(&mut *state.db.get()?, &subject, &req.reason, Utc::now())?;
    Ok(ApiResponse::ok("Landlord application rejected", user))
}
