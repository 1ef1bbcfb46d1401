use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

use super::service_account::ServiceAccountTokens;
use super::{check_status, ExternalError};

const IDENTITY_SCOPE: &str = "https://www.googleapis.com/auth/identitytoolkit";
const JWKS_CACHE_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub photo_url: Option<String>,
    pub provider: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verifies a client-presented identity token.
    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdentity, ExternalError>;

    /// Extended account details used when provisioning a new user.
    async fn fetch_profile(&self, subject: &str) -> Result<IdentityProfile, ExternalError>;
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: DateTime<Utc>,
}

/// Identity provider backed by the hosted identity platform: RS256 ID tokens checked
/// against the published JWKS, profiles read through the account lookup API.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    jwks_url: String,
    api_base_url: String,
    tokens: ServiceAccountTokens,
    keys: RwLock<Option<CachedKeys>>,
}

impl HttpIdentityProvider {
    pub fn new(
        client: reqwest::Client,
        key: super::ServiceAccountKey,
        jwks_url: impl Into<String>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            tokens: ServiceAccountTokens::new(key, IDENTITY_SCOPE, client.clone()),
            client,
            jwks_url: jwks_url.into(),
            api_base_url: api_base_url.into(),
            keys: RwLock::new(None),
        }
    }

    fn project_id(&self) -> &str {
        self.tokens.project_id()
    }

    async fn fetch_keys(&self) -> Result<JwkSet, ExternalError> {
        let response = self.client.get(&self.jwks_url).send().await?;
        let response = check_status("identity key endpoint", response).await?;
        Ok(response.json().await?)
    }

    /// Decoding key for `kid`, refetching the key set when it is stale or the kid is unknown.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ExternalError> {
        {
            let cached = self.keys.read().await;
            if let Some(cached) = cached.as_ref() {
                let fresh = Utc::now() - cached.fetched_at < Duration::seconds(JWKS_CACHE_SECS);
                if let Some(jwk) = cached.keys.find(kid).filter(|_| fresh) {
                    return DecodingKey::from_jwk(jwk)
                        .map_err(|e| ExternalError::UnexpectedResponse(format!("bad JWK: {e}")));
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let key = match keys.find(kid) {
            Some(jwk) => DecodingKey::from_jwk(jwk)
                .map_err(|e| ExternalError::UnexpectedResponse(format!("bad JWK: {e}")))?,
            None => return Err(ExternalError::InvalidToken("unknown signing key".into())),
        };
        *self.keys.write().await = Some(CachedKeys {
            keys,
            fetched_at: Utc::now(),
        });
        Ok(key)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    display_name: Option<String>,
    phone_number: Option<String>,
    photo_url: Option<String>,
    #[serde(default)]
    provider_user_info: Vec<ProviderInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderInfo {
    provider_id: String,
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdentity, ExternalError> {
        let header =
            decode_header(id_token).map_err(|e| ExternalError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(ExternalError::InvalidToken("unexpected algorithm".into()));
        }
        let kid = header
            .kid
            .ok_or_else(|| ExternalError::InvalidToken("missing key id".into()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id()]);
        validation.set_issuer(&[format!(
            "https://securetoken.google.com/{}",
            self.project_id()
        )]);

        let data = decode::<IdTokenClaims>(id_token, &key, &validation)
            .map_err(|e| ExternalError::InvalidToken(e.to_string()))?;
        let email = data
            .claims
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ExternalError::InvalidToken("token carries no email".into()))?;

        Ok(VerifiedIdentity {
            subject: data.claims.sub,
            email,
        })
    }

    async fn fetch_profile(&self, subject: &str) -> Result<IdentityProfile, ExternalError> {
        let access_token = self.tokens.access_token().await?;
        let url = format!(
            "{}/v1/projects/{}/accounts:lookup",
            self.api_base_url.trim_end_matches('/'),
            self.project_id()
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&json!({ "localId": [subject] }))
            .send()
            .await?;
        let response = check_status("identity provider", response).await?;
        let lookup: LookupResponse = response.json().await?;

        let user = lookup.users.into_iter().next().ok_or_else(|| {
            ExternalError::UnexpectedResponse(format!("identity provider has no user {subject}"))
        })?;
        Ok(IdentityProfile {
            display_name: user.display_name,
            phone: user.phone_number,
            photo_url: user.photo_url,
            provider: user.provider_user_info.into_iter().next().map(|p| p.provider_id),
        })
    }
}
