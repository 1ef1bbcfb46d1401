pub mod apartments;
pub mod auth;
pub mod inquiries;
pub mod landlords;
pub mod payments;
pub mod rentals;
pub mod stats;
pub mod users;
pub mod wishlist;

use askama::Template;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domain::MediaKind;
use crate::error::{AppError, AppResult};
use crate::external::MediaSource;
use crate::state::AppState;

/// Full application router with middleware and state applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth::router())
        .merge(users::router())
        .merge(landlords::router())
        .merge(apartments::router())
        .merge(inquiries::router())
        .merge(wishlist::router())
        .merge(rentals::router())
        .merge(payments::router())
        .merge(stats::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

// -- Media helpers --

/// Media named in a JSON body must be a URL. Local paths are only produced by
/// multipart uploads staged on this host.
fn remote_source(input: &str) -> AppResult<MediaSource> {
    match MediaSource::parse(input) {
        source @ MediaSource::RemoteUrl(_) => Ok(source),
        MediaSource::LocalPath(_) => Err(AppError::bad_request(format!(
            "Media must be an http(s) or data URL: {input}"
        ))),
    }
}

/// Validates every input first, then uploads them in order. Returns durable URLs.
pub(crate) async fn upload_remote(
    state: &AppState,
    inputs: &[(MediaKind, String)],
) -> AppResult<Vec<(MediaKind, String)>> {
    let sources = inputs
        .iter()
        .map(|(kind, input)| Ok((*kind, remote_source(input)?)))
        .collect::<AppResult<Vec<_>>>()?;

    let mut uploaded = Vec::with_capacity(sources.len());
    for (kind, source) in sources {
        let url = state.media.upload(source, kind).await?;
        uploaded.push((kind, url));
    }
    Ok(uploaded)
}

/// Uploads a single image given by URL.
pub(crate) async fn upload_image(state: &AppState, input: &str) -> AppResult<String> {
    let source = remote_source(input)?;
    Ok(state.media.upload(source, MediaKind::Image).await?)
}
