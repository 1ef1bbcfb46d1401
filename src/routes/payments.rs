use askama::Template;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use url::Url;

use crate::db::models::Transaction;
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, JsonBody, QueryParams};
use crate::external::paymongo::verify_signature;
use crate::external::Redirects;
use crate::response::ApiResponse;
use crate::routes::Html;
use crate::services::payments::{self, NewSource, SourceCreated, WebhookEvent, WebhookOutcome};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "paymongo-signature";
const DEEP_LINK_SCHEME: &str = "rentxpert";

#[derive(Template)]
#[template(path = "payment_redirect.html")]
pub struct PaymentRedirectTemplate {
    pub title: &'static str,
    pub message: &'static str,
    pub deep_link: String,
    pub fallback_url: String,
}

#[derive(Deserialize, Default)]
pub struct RedirectQuery {
    pub id: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct PaymentsQuery {
    pub user_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments/source", post(create_source))
        .route("/payments/webhook", post(webhook))
        .route("/payments/redirect/success", get(redirect_success))
        .route("/payments/redirect/failed", get(redirect_failed))
        .route("/payments/{source_id}", get(get_payment))
        .route("/payments", get(list_payments))
}

/// POST /payments/source
async fn create_source(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(input): JsonBody<NewSource>,
) -> AppResult<ApiResponse<SourceCreated>> {
    let prepared = payments::prepare_source(&*state.db.get()?, &user, &input)?;

    let redirects = Redirects {
        success: state.config.payments.success_url.clone(),
        failed: state.config.payments.failed_url.clone(),
    };
    let source = state
        .payments
        .create_source(prepared.amount_minor, &redirects)
        .await?;

    let created = payments::record_source(&*state.db.get()?, &prepared, &source)?;
    Ok(ApiResponse::created("Payment source created", created))
}

/// POST /payments/webhook: signed gateway callback. The raw body is needed for the HMAC.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<ApiResponse<()>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing webhook signature".into()))?;
    verify_signature(
        signature,
        &body,
        &state.config.payments.webhook_secrets,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::warn!("Rejected webhook: {}", e);
        AppError::Unauthorized("Invalid webhook signature".into())
    })?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("Invalid webhook payload: {e}")))?;

    let message = match payments::handle_event(&state.db, state.payments.as_ref(), &event).await? {
        WebhookOutcome::Ignored => "Event ignored",
        WebhookOutcome::AlreadyPaid => "Payment already recorded",
        WebhookOutcome::InProgress => "Payment is being processed",
        WebhookOutcome::Paid { .. } => "Payment recorded",
    };
    Ok(ApiResponse::message(message))
}

/// `rentxpert://<host>?id=<source>`
fn deep_link(host: &str, id: Option<&str>) -> AppResult<String> {
    let mut link = Url::parse(&format!("{DEEP_LINK_SCHEME}://{host}"))
        .map_err(|e| AppError::Internal(format!("deep link: {e}")))?;
    if let Some(id) = id.filter(|id| !id.is_empty()) {
        link.query_pairs_mut().append_pair("id", id);
    }
    Ok(link.into())
}

fn redirect_page(
    state: &AppState,
    query: &RedirectQuery,
    succeeded: bool,
) -> AppResult<Html<PaymentRedirectTemplate>> {
    let (host, title, message) = if succeeded {
        ("paymentsuccess", "Payment successful", "Returning you to RentXpert.")
    } else {
        ("paymentfailed", "Payment failed", "Your payment was not completed.")
    };
    Ok(Html(PaymentRedirectTemplate {
        title,
        message,
        deep_link: deep_link(host, query.id.as_deref())?,
        fallback_url: state.config.payments.fallback_url.clone(),
    }))
}

/// GET /payments/redirect/success
async fn redirect_success(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<RedirectQuery>,
) -> AppResult<Html<PaymentRedirectTemplate>> {
    redirect_page(&state, &query, true)
}

/// GET /payments/redirect/failed
async fn redirect_failed(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<RedirectQuery>,
) -> AppResult<Html<PaymentRedirectTemplate>> {
    redirect_page(&state, &query, false)
}

/// GET /payments/{source_id}
async fn get_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(source_id): Path<String>,
) -> AppResult<ApiResponse<Transaction>> {
    let transaction = payments::get_by_source(&*state.db.get()?, &source_id)?;
    payments::authorize_reader(&user, transaction.user_subject.as_deref())?;
    Ok(ApiResponse::ok("Payment retrieved", transaction))
}

/// GET /payments?user_id=: defaults to the caller.
async fn list_payments(
    State(state): State<AppState>,
    user: CurrentUser,
    QueryParams(query): QueryParams<PaymentsQuery>,
) -> AppResult<ApiResponse<Vec<Transaction>>> {
    let owner = query
        .user_id
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| user.subject.clone());
    payments::authorize_reader(&user, Some(&owner))?;
    let rows = payments::list_for_user(&*state.db.get()?, &owner)?;
    Ok(ApiResponse::ok("Payments retrieved", rows))
}
