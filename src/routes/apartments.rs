use std::path::{Path as FsPath, PathBuf};

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::Deserialize;

use crate::db::models::Apartment;
use crate::domain::{ApartmentStatus, MediaKind, PageRequest, Paginated};
use crate::error::{AppError, AppResult};
use crate::external::MediaSource;
use crate::extractors::{AdminUser, CurrentUser, JsonBody, QueryParams};
use crate::response::ApiResponse;
use crate::routes::upload_remote;
use crate::services::apartments::{self, media_inputs, DeleteScope, NewApartment};
use crate::services::listing::{self, ApartmentView, ListingFilter, ListingQuery, ListingView};
use crate::services::users;
use crate::state::AppState;

/// Multipart uploads may carry video.
const UPLOAD_BODY_LIMIT: usize = 100 * 1024 * 1024;

// -- Request types --

#[derive(Deserialize)]
pub struct ConfirmRequest {
    #[serde(default, alias = "Confirm")]
    pub confirm: bool,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub status: Option<ApartmentStatus>,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
pub struct MediaRequest {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/property/add", post(create))
        .route("/property/get", get(owned))
        .route("/property/filter", get(filter))
        .route("/apartments/approved", get(approved))
        .route("/apartments/{id}", get(detail).delete(delete_rejected))
        .route("/apartments/{id}/any", delete(delete_any))
        .route("/apartments/{id}/media", put(add_media))
        .route(
            "/apartments/{id}/media/upload",
            post(upload_media).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/apartments/verify/{id}", put(verify))
        .route("/apartments/reject/{id}", put(reject))
        .route("/admin/apartments", get(admin_list))
}

// -- Landlord --

/// POST /property/add: upload media, then store the listing as Pending.
async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(input): JsonBody<NewApartment>,
) -> AppResult<ApiResponse<ApartmentView>> {
    apartments::check_can_create(&*state.db.get()?, &user.subject, &input)?;
    let media = upload_remote(&state, &input.media_inputs()).await?;
    let view = apartments::create(&mut *state.db.get()?, &user.subject, &input, &media)?;
    Ok(ApiResponse::created("Apartment submitted for review", view))
}

/// GET /property/get: the caller's own listings, any status but Deleted.
async fn owned(
    State(state): State<AppState>,
    user: CurrentUser,
    QueryParams(query): QueryParams<ListingQuery>,
) -> AppResult<ApiResponse<Paginated<ApartmentView>>> {
    let conn = state.db.get()?;
    users::require_verified_landlord(&conn, &user.subject)?;
    let filter = ListingFilter {
        owner: Some(user.subject.clone()),
        ..ListingFilter::from_query(&query)?
    };
    let page = listing::search(&conn, &filter, query.page(), ListingView::Detailed)?;
    Ok(ApiResponse::ok("Apartments retrieved", page))
}

/// DELETE /apartments/{id}: only rejected listings, with `{"confirm": true}`.
async fn delete_rejected(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<ConfirmRequest>,
) -> AppResult<ApiResponse<()>> {
    delete_with(&state, &user, id, req, DeleteScope::RejectedOnly)
}

/// DELETE /apartments/{id}/any: any status, with `{"confirm": true}`.
async fn delete_any(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<ConfirmRequest>,
) -> AppResult<ApiResponse<()>> {
    delete_with(&state, &user, id, req, DeleteScope::Any)
}

fn delete_with(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
    req: ConfirmRequest,
    scope: DeleteScope,
) -> AppResult<ApiResponse<()>> {
    if !req.confirm {
        return Err(AppError::bad_request("Deletion must be confirmed"));
    }
    let conn = state.db.get()?;
    users::require_verified_landlord(&conn, &user.subject)?;
    apartments::delete_owned(&conn, id, &user.subject, scope)?;
    Ok(ApiResponse::message("Apartment deleted"))
}

/// PUT /apartments/{id}/media: attach media given by URL.
async fn add_media(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<MediaRequest>,
) -> AppResult<ApiResponse<ApartmentView>> {
    let inputs = media_inputs(&req.images, &req.videos);
    if inputs.is_empty() {
        return Err(AppError::bad_request("At least one image or video is required"));
    }
    apartments::check_can_add_media(&*state.db.get()?, id, &user.subject)?;
    let media = upload_remote(&state, &inputs).await?;
    let view = apartments::add_media(&mut *state.db.get()?, id, &user.subject, &media)?;
    Ok(ApiResponse::ok("Media added", view))
}

/// POST /apartments/{id}/media/upload: multipart files are staged under the uploads
/// directory, pushed to the media store, and removed again.
async fn upload_media(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> AppResult<ApiResponse<ApartmentView>> {
    apartments::check_can_add_media(&*state.db.get()?, id, &user.subject)?;

    let staging = state.config.uploads_path();
    tokio::fs::create_dir_all(&staging)
        .await
        .map_err(|e| AppError::Internal(format!("cannot create upload staging dir: {e}")))?;

    let mut staged: Vec<(MediaKind, PathBuf)> = Vec::new();
    let result = stage_and_upload(&state, &user, id, &mut multipart, &staging, &mut staged).await;

    for (_, path) in &staged {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!("Failed to remove staged upload {}: {}", path.display(), e);
        }
    }
    Ok(ApiResponse::ok("Media uploaded", result?))
}

/// Writes every non-empty part into `staging`, recording each path in `staged` so the
/// caller can clean up whatever happens, then uploads and attaches them.
async fn stage_and_upload(
    state: &AppState,
    user: &CurrentUser,
    id: i64,
    multipart: &mut Multipart,
    staging: &FsPath,
    staged: &mut Vec<(MediaKind, PathBuf)>,
) -> AppResult<ApartmentView> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        let kind = field_kind(field.name(), field.content_type());
        let path = staging.join(staged_name(field.file_name()));
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.body_text()))?;
        if data.is_empty() {
            continue;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| AppError::Internal(format!("cannot stage upload: {e}")))?;
        staged.push((kind, path));
    }
    if staged.is_empty() {
        return Err(AppError::bad_request("No files were uploaded"));
    }

    let mut media = Vec::with_capacity(staged.len());
    for (kind, path) in staged.iter() {
        let url = state
            .media
            .upload(MediaSource::LocalPath(path.clone()), *kind)
            .await?;
        media.push((*kind, url));
    }
    apartments::add_media(&mut *state.db.get()?, id, &user.subject, &media)
}

/// Field name decides first (`images`/`videos`), then the part's content type.
fn field_kind(name: Option<&str>, content_type: Option<&str>) -> MediaKind {
    match name.map(str::to_ascii_lowercase).as_deref() {
        Some("video" | "videos") => MediaKind::Video,
        Some("image" | "images") => MediaKind::Image,
        _ if content_type.is_some_and(|c| c.starts_with("video/")) => MediaKind::Video,
        _ => MediaKind::Image,
    }
}

/// Random staging name keeping only a sane extension from the client's file name.
fn staged_name(file_name: Option<&str>) -> String {
    let extension = file_name
        .and_then(|f| FsPath::new(f).extension())
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());
    let id = uuid::Uuid::now_v7();
    match extension {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_string(),
    }
}

// -- Any signed-in user --

/// GET /property/filter: defaults to Approved; other statuses are admin-only.
async fn filter(
    State(state): State<AppState>,
    user: CurrentUser,
    QueryParams(mut query): QueryParams<ListingQuery>,
) -> AppResult<ApiResponse<Paginated<ApartmentView>>> {
    let status = *query.status.get_or_insert(ApartmentStatus::Approved);
    if status != ApartmentStatus::Approved && !user.is_admin() {
        return Err(AppError::forbidden("Only admins can filter by that status"));
    }
    let view = if user.is_admin() {
        ListingView::Detailed
    } else {
        ListingView::Public
    };
    let filter = ListingFilter::from_query(&query)?;
    let page = listing::search(&*state.db.get()?, &filter, query.page(), view)?;
    Ok(ApiResponse::ok("Apartments retrieved", page))
}

/// GET /apartments/approved
async fn approved(
    State(state): State<AppState>,
    _user: CurrentUser,
    QueryParams(page): QueryParams<PageRequest>,
) -> AppResult<ApiResponse<Paginated<ApartmentView>>> {
    let page = listing::search(
        &*state.db.get()?,
        &ListingFilter::approved(),
        page,
        ListingView::Public,
    )?;
    Ok(ApiResponse::ok("Apartments retrieved", page))
}

/// GET /apartments/{id}
async fn detail(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<ApiResponse<ApartmentView>> {
    let view = apartments::detail(&*state.db.get()?, id, &user.subject, user.is_admin())?;
    Ok(ApiResponse::ok("Apartment retrieved", view))
}

// -- Admin --

/// PUT /apartments/verify/{id}: body is optional; when present its status must be Approved.
async fn verify(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    body: Bytes,
) -> AppResult<ApiResponse<Apartment>> {
    if !body.iter().all(u8::is_ascii_whitespace) {
        let req: VerifyRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(format!("Invalid request body: {e}")))?;
        if let Some(status) = req.status.filter(|s| *s != ApartmentStatus::Approved) {
            return Err(AppError::bad_request(format!(
                "Use the reject endpoint to set status {status}"
            )));
        }
    }
    let apartment = apartments::approve(&*state.db.get()?, id)?;
    Ok(ApiResponse::ok("Apartment approved", apartment))
}

/// PUT /apartments/reject/{id}
async fn reject(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    JsonBody(req): JsonBody<RejectRequest>,
) -> AppResult<ApiResponse<Apartment>> {
    let apartment = apartments::reject(&*state.db.get()?, id, &req.reason)?;
    Ok(ApiResponse::ok("Apartment rejected", apartment))
}

/// GET /admin/apartments?status=: every status, soft-deleted included.
async fn admin_list(
    State(state): State<AppState>,
    _admin: AdminUser,
    QueryParams(query): QueryParams<ListingQuery>,
) -> AppResult<ApiResponse<Paginated<ApartmentView>>> {
    let filter = ListingFilter {
        exclude_deleted: false,
        ..ListingFilter::from_query(&query)?
    };
    let page = listing::search(&*state.db.get()?, &filter, query.page(), ListingView::Detailed)?;
    Ok(ApiResponse::ok("Apartments retrieved", page))
}
