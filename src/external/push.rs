use async_trait::async_trait;
use serde_json::json;

use super::service_account::{ServiceAccountKey, ServiceAccountTokens};
use super::{check_status, ExternalError};

const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), ExternalError>;
}

/// HTTP v1 messaging API, authorised with a service-account token.
pub struct FcmPushNotifier {
    client: reqwest::Client,
    api_base_url: String,
    tokens: ServiceAccountTokens,
}

impl FcmPushNotifier {
    pub fn new(client: reqwest::Client, key: ServiceAccountKey, api_base_url: impl Into<String>) -> Self {
        Self {
            tokens: ServiceAccountTokens::new(key, MESSAGING_SCOPE, client.clone()),
            client,
            api_base_url: api_base_url.into(),
        }
    }
}

#[async_trait]
impl PushNotifier for FcmPushNotifier {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), ExternalError> {
        let access_token = self.tokens.access_token().await?;
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.api_base_url.trim_end_matches('/'),
            self.tokens.project_id()
        );
        let message = json!({
            "message": {
                "token": device_token,
                "notification": { "title": title, "body": body },
            }
        });
        let response = self
            .client
            .post(url)
            .bearer_auth(access_token)
            .json(&message)
            .send()
            .await?;
        check_status("push transport", response).await?;
        Ok(())
    }
}
