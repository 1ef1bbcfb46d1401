#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use rentxpert::auth::session;
use rentxpert::config::Config;
use rentxpert::db;
use rentxpert::domain::{MediaKind, UserType};
use rentxpert::external::{
    ExternalError, IdentityProfile, IdentityProvider, MediaSource, MediaStore, Payment,
    PaymentGateway, PushNotifier, Redirects, Source, SourceStatus, VerifiedIdentity,
};
use rentxpert::routes;
use rentxpert::state::AppState;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

// -- Fakes --

/// Accepts `token:<subject>` and nothing else. Profile lookups fail while `profile_down` is set.
#[derive(Default)]
pub struct FakeIdentity {
    pub profile_down: AtomicBool,
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedIdentity, ExternalError> {
        let subject = id_token
            .strip_prefix("token:")
            .ok_or_else(|| ExternalError::InvalidToken("unknown token".into()))?;
        Ok(VerifiedIdentity {
            subject: subject.to_string(),
            email: format!("{subject}@example.com"),
        })
    }

    async fn fetch_profile(&self, subject: &str) -> Result<IdentityProfile, ExternalError> {
        if self.profile_down.load(Ordering::SeqCst) {
            return Err(ExternalError::Unavailable("identity provider".into()));
        }
        Ok(IdentityProfile {
            display_name: Some(format!("User {subject}")),
            provider: Some("password".into()),
            ..Default::default()
        })
    }
}

/// Hands back a stable URL per upload and remembers what it was given.
#[derive(Default)]
pub struct FakeMedia {
    pub uploads: Mutex<Vec<(MediaKind, MediaSource)>>,
}

#[async_trait]
impl MediaStore for FakeMedia {
    async fn upload(&self, source: MediaSource, kind: MediaKind) -> Result<String, ExternalError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((kind, source));
        Ok(format!("https://media.test/{}/{}", kind, uploads.len()))
    }
}

#[derive(Default)]
pub struct FakePush {
    pub sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl PushNotifier for FakePush {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), ExternalError> {
        self.sent
            .lock()
            .unwrap()
            .push((device_token.into(), title.into(), body.into()));
        Ok(())
    }
}

/// In-memory gateway. Sources start pending; tests move them with `set_status`.
#[derive(Default)]
pub struct FakeGateway {
    sources: Mutex<HashMap<String, (SourceStatus, i64)>>,
    counter: AtomicU32,
    pub payments_created: AtomicU32,
}

impl FakeGateway {
    pub fn set_status(&self, source_id: &str, status: SourceStatus) {
        if let Some(entry) = self.sources.lock().unwrap().get_mut(source_id) {
            entry.0 = status;
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_source(&self, amount_minor: i64, _: &Redirects) -> Result<Source, ExternalError> {
        let id = format!("src_{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        self.sources
            .lock()
            .unwrap()
            .insert(id.clone(), (SourceStatus::Pending, amount_minor));
        Ok(Source {
            checkout_url: Some(format!("https://pay.test/checkout/{id}")),
            id,
            status: SourceStatus::Pending,
            amount_minor,
        })
    }

    async fn retrieve_source(&self, source_id: &str) -> Result<Source, ExternalError> {
        let sources = self.sources.lock().unwrap();
        let (status, amount_minor) = sources
            .get(source_id)
            .copied()
            .ok_or_else(|| ExternalError::UnexpectedResponse(format!("no source {source_id}")))?;
        Ok(Source {
            id: source_id.to_string(),
            status,
            amount_minor,
            checkout_url: None,
        })
    }

    async fn create_payment(&self, source_id: &str, _: i64, _: &str) -> Result<Payment, ExternalError> {
        let n = self.payments_created.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_status(source_id, SourceStatus::Paid);
        Ok(Payment {
            id: format!("pay_{n}"),
            status: "paid".into(),
        })
    }

    async fn find_payment_by_source(&self, source_id: &str) -> Result<Option<Payment>, ExternalError> {
        Ok(Some(Payment {
            id: format!("pay_for_{source_id}"),
            status: "paid".into(),
        }))
    }
}

// -- Harness --

pub struct TestApp {
    _dir: TempDir,
    pub state: AppState,
    pub router: Router,
    pub identity: Arc<FakeIdentity>,
    pub media: Arc<FakeMedia>,
    pub push: Arc<FakePush>,
    pub gateway: Arc<FakeGateway>,
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = JWT_SECRET.into();
    config.auth.bcrypt_cost = 4;
    config.payments.webhook_secrets = vec![WEBHOOK_SECRET.into()];
    config.sweepers.enabled = false;
    config.database.path = Some(dir.path().join("test.db"));
    config.storage.path = Some(dir.path().join("uploads"));
    config
}

impl TestApp {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        std::fs::create_dir_all(config.uploads_path()).unwrap();

        let pool = db::create_pool(&config.db_path()).expect("Failed to create test database");
        db::run_migrations(&pool).expect("Failed to run migrations");

        let identity = Arc::new(FakeIdentity::default());
        let media = Arc::new(FakeMedia::default());
        let push = Arc::new(FakePush::default());
        let gateway = Arc::new(FakeGateway::default());
        let state = AppState {
            db: pool,
            config,
            identity: identity.clone(),
            media: media.clone(),
            push: push.clone(),
            payments: gateway.clone(),
        };
        Self {
            _dir: dir,
            router: routes::app(state.clone()),
            state,
            identity,
            media,
            push,
            gateway,
        }
    }

    /// Session token without going through login; the subject need not exist.
    pub fn session(&self, subject: &str, role: UserType) -> String {
        session::issue_token(
            JWT_SECRET,
            subject,
            &format!("{subject}@example.com"),
            role,
            1,
        )
        .unwrap()
    }

    pub fn admin_session(&self) -> String {
        self.session("admin:1", UserType::Admin)
    }

    /// Logs in through the identity exchange, provisioning the user on first use.
    pub async fn login(&self, subject: &str) -> String {
        let (status, body) = self
            .post(
                "/auth/verify-identity-token",
                None,
                serde_json::json!({ "id_token": format!("token:{subject}") }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["data"]["session"].as_str().unwrap().to_string()
    }

    /// Logs in, applies for landlord status and has an admin approve it.
    pub async fn verified_landlord(&self, subject: &str) -> String {
        let token = self.login(subject).await;
        let (status, body) = self
            .post(
                "/landlord/register",
                Some(&token),
                serde_json::json!({
                    "business_name": format!("{subject} Rentals"),
                    "business_address": "Cebu City",
                    "business_contact": "09170000000",
                    "id_image_url": "https://uploads.test/id.jpg",
                    "permit_image_urls": ["https://uploads.test/permit.jpg"],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "application failed: {body}");

        let admin = self.admin_session();
        let (status, body) = self
            .put(
                &format!("/admin/landlord/{subject}/verify"),
                Some(&admin),
                Value::Null,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "verification failed: {body}");
        token
    }

    /// Creates a listing and approves it. Returns the apartment id.
    pub async fn approved_apartment(&self, landlord_token: &str, name: &str) -> i64 {
        let (status, body) = self
            .post(
                "/property/add",
                Some(landlord_token),
                serde_json::json!({
                    "property_name": name,
                    "address": "Lahug, Cebu City",
                    "property_type": "Condo",
                    "rent_price": 15000.0,
                    "location_link": format!("https://maps.test/{name}"),
                    "amenities": ["WiFi", "Parking"],
                    "house_rules": ["No pets"],
                    "images": ["https://uploads.test/front.jpg"],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        let id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = self
            .put(&format!("/apartments/verify/{id}"), Some(&self.admin_session()), Value::Null)
            .await;
        assert_eq!(status, StatusCode::OK, "approve failed: {body}");
        id
    }

    // -- Requests --

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Body>,
        content_type: Option<&str>,
        extra: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        for (name, value) in extra {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body.unwrap_or_else(Body::empty)).unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        if body.is_null() {
            return self.send(method, uri, token, None, None, &[]).await;
        }
        let body = Body::from(serde_json::to_vec(&body).unwrap());
        self.send(method, uri, token, Some(body), Some("application/json"), &[])
            .await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.json(Method::GET, uri, token, Value::Null).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json(Method::POST, uri, token, body).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json(Method::PUT, uri, token, body).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.json(Method::DELETE, uri, token, body).await
    }
}
