use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::models::User;
use crate::domain::{Paginated, UserType};
use crate::error::{AppError, AppResult};
use crate::extractors::{AdminUser, CurrentUser, JsonBody, QueryParams};
use crate::response::ApiResponse;
use crate::routes::upload_image;
use crate::services::users::{self, ProfileUpdate, SoftDeleteOutcome, UserFilter};
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct PushTokenRequest {
    pub token: String,
}

#[derive(Deserialize)]
pub struct VerificationRequest {
    pub valid_id_url: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct FullnameView {
    pub subject: String,
    pub fullname: Option<String>,
}

#[derive(Serialize)]
pub struct RoleView {
    pub subject: String,
    pub role: UserType,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/profile", get(get_profile).put(update_profile))
        .route("/user", delete(delete_self))
        .route("/user/push-token", put(set_push_token))
        .route("/user/verification", post(submit_verification))
        .route("/users/fullname/{subject}", get(fullname))
        .route("/user/{subject}/role", get(role))
        .route("/admin/users", get(list_users))
        .route("/admin/users/{subject}", delete(delete_user))
        .route("/admin/users/{subject}/verify", put(verify_user))
        .route("/admin/users/{subject}/reject", put(reject_user))
}

/// GET /user/profile
async fn get_profile(State(state): State<AppState>, user: CurrentUser) -> AppResult<ApiResponse<User>> {
    let profile = users::get_user(&*state.db.get()?, &user.subject)?;
    Ok(ApiResponse::ok("Profile retrieved", profile))
}

/// PUT /user/profile: partial update; a new photo is uploaded before it is stored.
async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(mut update): JsonBody<ProfileUpdate>,
) -> AppResult<ApiResponse<User>> {
    if update.is_empty() {
        return Err(AppError::bad_request("No profile fields to update"));
    }
    update.parsed_birthday()?;
    users::get_user(&*state.db.get()?, &user.subject)?;

    if let Some(photo) = update.photo_url.take().filter(|p| !p.trim().is_empty()) {
        update.photo_url = Some(upload_image(&state, &photo).await?);
    }
    let updated = users::update_profile(&*state.db.get()?, &user.subject, &update)?;
    Ok(ApiResponse::ok("Profile updated", updated))
}

/// DELETE /user: soft-delete the caller's account.
async fn delete_self(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<ApiResponse<SoftDeleteOutcome>> {
    let outcome = users::soft_delete(&mut *state.db.get()?, &user.subject, Utc::now())?;
    Ok(ApiResponse::ok("Account deleted", outcome))
}

/// PUT /user/push-token
async fn set_push_token(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(req): JsonBody<PushTokenRequest>,
) -> AppResult<ApiResponse<()>> {
    users::set_push_token(&*state.db.get()?, &user.subject, &req.token)?;
    Ok(ApiResponse::message("Push token saved"))
}

/// POST /user/verification: submit a government ID for review.
async fn submit_verification(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(req): JsonBody<VerificationRequest>,
) -> AppResult<ApiResponse<User>> {
    if req.valid_id_url.trim().is_empty() {
        return Err(AppError::bad_request("valid_id_url is required"));
    }
    users::check_can_submit_verification(&*state.db.get()?, &user.subject)?;
    let id_url = upload_image(&state, &req.valid_id_url).await?;
    let updated = users::submit_verification(&mut *state.db.get()?, &user.subject, &id_url)?;
    Ok(ApiResponse::ok("Verification submitted", updated))
}

/// GET /users/fullname/{subject}
async fn fullname(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(subject): Path<String>,
) -> AppResult<ApiResponse<FullnameView>> {
    let fullname = users::fullname(&*state.db.get()?, &subject)?;
    Ok(ApiResponse::ok("Fullname retrieved", FullnameView { subject, fullname }))
}

/// GET /user/{subject}/role
async fn role(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(subject): Path<String>,
) -> AppResult<ApiResponse<RoleView>> {
    let role = users::role(&*state.db.get()?, &subject)?;
    Ok(ApiResponse::ok("Role retrieved", RoleView { subject, role }))
}

// -- Admin --

/// GET /admin/users?status=&user_type=&page=&limit=
async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(filter): QueryParams<UserFilter>,
) -> AppResult<ApiResponse<Paginated<User>>> {
    let page = users::list_users(&*state.db.get()?, &filter)?;
    Ok(ApiResponse::ok("Users retrieved", page))
}

/// DELETE /admin/users/{subject}
async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(subject): Path<String>,
) -> AppResult<ApiResponse<SoftDeleteOutcome>> {
    let outcome = users::soft_delete(&mut *state.db.get()?, &subject, Utc::now())?;
    tracing::info!("User {} deleted by {}", subject, admin.subject);
    Ok(ApiResponse::ok("User deleted", outcome))
}

/// PUT /admin/users/{subject}/verify
async fn verify_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(subject): Path<String>,
) -> AppResult<ApiResponse<User>> {
    let user = users::decide_verification(&mut *state.db.get()?, &subject, true)?;
    Ok(ApiResponse::ok("User verified", user))
}

/// PUT /admin/users/{subject}/reject
async fn reject_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(subject): Path<String>,
) -> AppResult<ApiResponse<User>> {
    let user = users::decide_verification(&mut *state.db.get()?, &subject, false)?;
    Ok(ApiResponse::ok("User verification rejected", user))
}
