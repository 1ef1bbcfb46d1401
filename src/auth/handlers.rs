use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::auth::{admin, session};
use crate::db::models::{Admin, User};
use crate::domain::UserType;
use crate::error::{AppError, AppResult};
use crate::extractors::{JsonBody, MaybeUser};
use crate::response::ApiResponse;
use crate::services::users;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct IdentityTokenRequest {
    #[serde(alias = "idToken", alias = "token")]
    pub id_token: String,
}

#[derive(Deserialize)]
pub struct AdminCredentials {
    pub email: String,
    pub password: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct SessionGrant<T: Serialize> {
    pub session: String,
    pub role: UserType,
    pub expires_in_hours: i64,
    pub account: T,
}

fn grant<T: Serialize>(state: &AppState, subject: &str, email: &str, role: UserType, account: T) -> AppResult<SessionGrant<T>> {
    let hours = state.config.auth.session_hours;
    let session = session::issue_token(&state.config.auth.jwt_secret, subject, email, role, hours)?;
    Ok(SessionGrant {
        session,
        role,
        expires_in_hours: hours,
        account,
    })
}

// -- Handlers --

/// POST /auth/verify-identity-token: exchange an identity-provider token for a session.
/// First-time subjects are provisioned as unverified tenants.
pub async fn verify_identity_token(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<IdentityTokenRequest>,
) -> AppResult<ApiResponse<SessionGrant<User>>> {
    let token = req.id_token.trim();
    if token.is_empty() {
        return Err(AppError::bad_request("id_token is required"));
    }
    let identity = state.identity.verify_id_token(token).await?;

    let existing = users::find_by_subject(&*state.db.get()?, &identity.subject)?;
    let user = match existing {
        Some(user) => user,
        None => {
            // No user row is written unless the provider answered
            let profile = state.identity.fetch_profile(&identity.subject).await?;
            users::provision(&*state.db.get()?, &identity, &profile)?
        }
    };

    if user.account_status.blocks_login() {
        return Err(AppError::forbidden(format!(
            "Account is {}",
            user.account_status.as_str().to_lowercase()
        )));
    }

    tracing::info!("Session issued for {}", user.subject);
    let subject = user.subject.clone();
    let email = user.email.clone();
    let role = user.user_type;
    Ok(ApiResponse::ok(
        "Login successful",
        grant(&state, &subject, &email, role, user)?,
    ))
}

/// POST /admin/register: open while no administrator exists, admin-only afterwards.
pub async fn admin_register(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    JsonBody(req): JsonBody<AdminCredentials>,
) -> AppResult<ApiResponse<Admin>> {
    let conn = state.db.get()?;
    if admin::admin_exists(&conn)? {
        match caller {
            Some(user) if user.is_admin() => {}
            Some(_) => return Err(AppError::forbidden("Admin access required")),
            None => {
                return Err(AppError::Unauthorized(
                    "An admin session is required to add administrators".into(),
                ))
            }
        }
    }

    let created = admin::create_admin(&conn, &req.email, &req.password, state.config.auth.bcrypt_cost)?;
    tracing::info!("Admin {} registered", created.email);
    Ok(ApiResponse::created("Admin registered", created))
}

/// POST /admin/login
pub async fn admin_login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AdminCredentials>,
) -> AppResult<ApiResponse<SessionGrant<Admin>>> {
    let found = admin::authenticate(&*state.db.get()?, &req.email, &req.password)?;
    let subject = admin::session_subject(&found);
    let email = found.email.clone();
    Ok(ApiResponse::ok(
        "Login successful",
        grant(&state, &subject, &email, UserType::Admin, found)?,
    ))
}
