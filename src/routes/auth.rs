use axum::routing::post;
use axum::Router;

use crate::auth::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/verify-identity-token", post(handlers::verify_identity_token))
        .route("/admin/register", post(handlers::admin_register))
        .route("/admin/login", post(handlers::admin_login))
}
