// Outbound collaborators. Each one is a trait so tests can swap in fakes.
pub mod identity;
pub mod media;
pub mod paymongo;
pub mod push;
pub mod service_account;

pub use identity::{HttpIdentityProvider, IdentityProfile, IdentityProvider, VerifiedIdentity};
pub use media::{HttpMediaStore, MediaSource, MediaStore};
pub use paymongo::{Payment, PaymentGateway, PaymongoGateway, Redirects, Source, SourceStatus};
pub use push::{FcmPushNotifier, PushNotifier};
pub use service_account::{ServiceAccountKey, ServiceAccountTokens};

#[derive(Debug, thiserror::Error)]
pub enum ExternalError {
    #[error("{0} is unavailable")]
    Unavailable(String),

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("{service} responded with {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {0}")]
    UnexpectedResponse(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns a non-2xx response into `ExternalError::Status`, keeping the body for logs.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ExternalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ExternalError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}
