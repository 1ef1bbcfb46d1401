use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rentxpert", about = "RentXpert rental marketplace back end")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub project_name: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub identity: IdentityConfig,
    pub push: PushConfig,
    pub media: MediaConfig,
    pub payments: PaymentConfig,
    pub sweepers: SweeperConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    pub timezone: Option<String>,
}

/// Staging area for multipart uploads before they are pushed to the media store.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_hours: i64,
    pub bcrypt_cost: u32,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    pub credentials_file: Option<PathBuf>,
    pub jwks_url: String,
    pub api_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PushConfig {
    /// Falls back to the identity credentials when unset.
    pub credentials_file: Option<PathBuf>,
    pub api_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MediaConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PaymentConfig {
    pub public_key: String,
    pub secret_key: String,
    /// Every listed secret is accepted, so a new one can be rolled in before the old is dropped.
    pub webhook_secrets: Vec<String>,
    pub success_url: String,
    pub failed_url: String,
    pub fallback_url: String,
    pub api_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub reminder_interval_secs: u64,
    pub expiration_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            session_hours: crate::domain::SESSION_TTL_HOURS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            credentials_file: None,
            jwks_url: "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com".to_string(),
            api_base_url: "https://identitytoolkit.googleapis.com".to_string(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            credentials_file: None,
            api_base_url: "https://fcm.googleapis.com".to_string(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            api_base_url: "https://api.cloudinary.com".to_string(),
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            secret_key: String::new(),
            webhook_secrets: Vec::new(),
            success_url: "http://localhost:3000/payments/redirect/success".to_string(),
            failed_url: "http://localhost:3000/payments/redirect/failed".to_string(),
            fallback_url: "https://rentxpert.app".to_string(),
            api_base_url: "https://api.paymongo.com".to_string(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reminder_interval_secs: 3600,
            expiration_interval_secs: 6 * 3600,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        Self::load_with_env(cli, |key| std::env::var(key).ok())
    }

    /// Same as [`Config::load`] with an injectable environment lookup.
    pub fn load_with_env<F>(cli: &Cli, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env(&env)?;

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        config.database.path = Some(match config.database.path.take() {
            Some(path) if path.is_relative() => data_dir.join(path),
            Some(path) => path,
            None => data_dir.join("rentxpert.db"),
        });
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("uploads"));
        }
        if config.project_name.is_empty() {
            config.project_name = "RentXpert".to_string();
        }

        Ok(config)
    }

    fn apply_env<F>(&mut self, env: &F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = env(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };

        set(&mut self.project_name, "PROJ_NAME");
        set(&mut self.auth.jwt_secret, "JWT_SECRET");
        set(&mut self.media.cloud_name, "MEDIA_STORE_ID");
        set(&mut self.media.api_key, "MEDIA_STORE_KEY");
        set(&mut self.media.api_secret, "MEDIA_STORE_SECRET");
        set(&mut self.payments.public_key, "PAYMENT_PUBLIC_KEY");
        set(&mut self.payments.secret_key, "PAYMENT_SECRET_KEY");
        set(&mut self.payments.success_url, "PAYMENT_SUCCESS_URL");
        set(&mut self.payments.failed_url, "PAYMENT_FAILED_URL");
        set(&mut self.payments.fallback_url, "PAYMENT_FALLBACK_URL");

        if let Some(secrets) = env("PAYMENT_WEBHOOK_SECRET") {
            self.payments.webhook_secrets = secrets
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(name) = env("DB_NAME").filter(|v| !v.is_empty()) {
            self.database.path = Some(PathBuf::from(name));
        }
        if let Some(tz) = env("DB_TIMEZONE").filter(|v| !v.is_empty()) {
            self.database.timezone = Some(tz);
        }
        if let Some(path) = env("IDENTITY_CREDENTIALS_FILE").filter(|v| !v.is_empty()) {
            self.identity.credentials_file = Some(PathBuf::from(path));
        }
        if let Some(path) = env("PUSH_CREDENTIALS_FILE").filter(|v| !v.is_empty()) {
            self.push.credentials_file = Some(PathBuf::from(path));
        }
        if let Some(port) = env("PORT").filter(|v| !v.is_empty()) {
            self.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a port number, got {port:?}"))?;
        }
        Ok(())
    }

    /// Start-up checks; any failure aborts the process.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            anyhow::bail!("JWT_SECRET is not set");
        }
        let identity = self
            .identity
            .credentials_file
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("IDENTITY_CREDENTIALS_FILE is not set"))?;
        if !identity.is_file() {
            anyhow::bail!(
                "identity credentials file {} does not exist",
                identity.display()
            );
        }
        if self.payments.webhook_secrets.is_empty() {
            tracing::warn!("PAYMENT_WEBHOOK_SECRET is not set; payment webhooks will be rejected");
        }
        Ok(())
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".rentxpert")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("rentxpert.db"))
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("uploads"))
    }

    /// Credentials used for push; the identity file is authoritative when push has none.
    pub fn push_credentials_file(&self) -> Option<&PathBuf> {
        self.push
            .credentials_file
            .as_ref()
            .or(self.identity.credentials_file.as_ref())
    }
}
