use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use super::{check_status, ExternalError};

/// Webhook timestamps older (or newer) than this are refused.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Chargeable,
    Paid,
    Cancelled,
    Expired,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub status: SourceStatus,
    pub amount_minor: i64,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Payment {
    pub id: String,
    pub status: String,
}

/// Redirect targets handed to the gateway when a source is created.
#[derive(Debug, Clone)]
pub struct Redirects {
    pub success: String,
    pub failed: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_source(
        &self,
        amount_minor: i64,
        redirects: &Redirects,
    ) -> Result<Source, ExternalError>;

    async fn retrieve_source(&self, source_id: &str) -> Result<Source, ExternalError>;

    async fn create_payment(
        &self,
        source_id: &str,
        amount_minor: i64,
        description: &str,
    ) -> Result<Payment, ExternalError>;

    async fn find_payment_by_source(&self, source_id: &str)
        -> Result<Option<Payment>, ExternalError>;
}

/// PayMongo REST client: GCash sources in PHP, basic auth with the secret key.
pub struct PaymongoGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base_url: String,
}

// -- Wire shapes --

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Resource<A> {
    id: String,
    attributes: A,
}

#[derive(Deserialize)]
struct SourceAttributes {
    amount: i64,
    status: SourceStatus,
    #[serde(default)]
    redirect: Option<SourceRedirect>,
}

#[derive(Deserialize)]
struct SourceRedirect {
    checkout_url: Option<String>,
}

#[derive(Deserialize)]
struct PaymentAttributes {
    status: String,
    #[serde(default)]
    source: Option<PaymentSourceRef>,
}

#[derive(Deserialize)]
struct PaymentSourceRef {
    id: String,
}

impl From<Resource<SourceAttributes>> for Source {
    fn from(r: Resource<SourceAttributes>) -> Self {
        Source {
            id: r.id,
            status: r.attributes.status,
            amount_minor: r.attributes.amount,
            checkout_url: r.attributes.redirect.and_then(|r| r.checkout_url),
        }
    }
}

impl PaymongoGateway {
    pub fn new(
        client: reqwest::Client,
        secret_key: impl Into<String>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            secret_key: secret_key.into(),
            api_base_url: api_base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PaymentGateway for PaymongoGateway {
    async fn create_source(
        &self,
        amount_minor: i64,
        redirects: &Redirects,
    ) -> Result<Source, ExternalError> {
        let body = json!({
            "data": {
                "attributes": {
                    "amount": amount_minor,
                    "currency": "PHP",
                    "type": "gcash",
                    "redirect": {
                        "success": redirects.success,
                        "failed": redirects.failed,
                    }
                }
            }
        });
        let response = self
            .client
            .post(self.url("sources"))
            .basic_auth(&self.secret_key, Some(""))
            .json(&body)
            .send()
            .await?;
        let response = check_status("payment gateway", response).await?;
        let envelope: Envelope<Resource<SourceAttributes>> = response.json().await?;
        Ok(envelope.data.into())
    }

    async fn retrieve_source(&self, source_id: &str) -> Result<Source, ExternalError> {
        let response = self
            .client
            .get(self.url(&format!("sources/{source_id}")))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await?;
        let response = check_status("payment gateway", response).await?;
        let envelope: Envelope<Resource<SourceAttributes>> = response.json().await?;
        Ok(envelope.data.into())
    }

    async fn create_payment(
        &self,
        source_id: &str,
        amount_minor: i64,
        description: &str,
    ) -> Result<Payment, ExternalError> {
        let body = json!({
            "data": {
                "attributes": {
                    "amount": amount_minor,
                    "currency": "PHP",
                    "description": description,
                    "source": { "id": source_id, "type": "source" }
                }
            }
        });
        let response = self
            .client
            .post(self.url("payments"))
            .basic_auth(&self.secret_key, Some(""))
            .json(&body)
            .send()
            .await?;
        let response = check_status("payment gateway", response).await?;
        let envelope: Envelope<Resource<PaymentAttributes>> = response.json().await?;
        Ok(Payment {
            id: envelope.data.id,
            status: envelope.data.attributes.status,
        })
    }

    async fn find_payment_by_source(
        &self,
        source_id: &str,
    ) -> Result<Option<Payment>, ExternalError> {
        let response = self
            .client
            .get(self.url("payments"))
            .query(&[("source_id", source_id)])
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await?;
        let response = check_status("payment gateway", response).await?;
        let envelope: Envelope<Vec<Resource<PaymentAttributes>>> = response.json().await?;
        Ok(envelope
            .data
            .into_iter()
            .find(|p| p.attributes.source.as_ref().is_some_and(|s| s.id == source_id))
            .map(|p| Payment {
                id: p.id,
                status: p.attributes.status,
            }))
    }
}

// -- Webhook signatures --

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("no webhook secret configured")]
    NotConfigured,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

/// Parses `t=<unix>,te=<hex>,li=<hex>`; either the test or live signature may be empty.
fn parse_signature_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=').ok_or(SignatureError::Malformed)?;
        match key {
            "t" => timestamp = Some(value.parse().map_err(|_| SignatureError::Malformed)?),
            "te" | "li" if !value.is_empty() => {
                signatures.push(hex::decode(value).map_err(|_| SignatureError::Malformed)?)
            }
            _ => {}
        }
    }
    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(SignatureError::Malformed),
    }
}

/// HMAC-SHA256 of `"<t>.<body>"` keyed by the webhook secret.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::NotConfigured)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Accepts the request if any configured secret produced any of the header's signatures.
pub fn verify_signature(
    header: &str,
    body: &[u8],
    secrets: &[String],
    now: i64,
) -> Result<(), SignatureError> {
    if secrets.is_empty() {
        return Err(SignatureError::NotConfigured);
    }
    let parsed = parse_signature_header(header)?;
    if now.abs_diff(parsed.timestamp) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Stale);
    }

    for secret in secrets {
        for expected in &parsed.signatures {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .map_err(|_| SignatureError::NotConfigured)?;
            mac.update(parsed.timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(body);
            // verify_slice compares in constant time
            if mac.verify_slice(expected).is_ok() {
                return Ok(());
            }
        }
    }
    Err(SignatureError::Mismatch)
}
