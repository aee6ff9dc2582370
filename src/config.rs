/// Configuration management for Clipforge
use crate::{
    error::{AppError, AppResult},
    generation::MediaKind,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Default OAuth scopes requested from TikTok
pub const DEFAULT_TIKTOK_SCOPES: &[&str] = &[
    "user.info.basic",
    "user.info.profile",
    "video.dataset.read",
    "video.list",
    "video.upload",
    "video.publish",
];

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub tiktok: TikTokConfig,
    pub generation: GenerationConfig,
    pub cleanup: CleanupConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    pub production: bool,
    pub upload_limit: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub asset_directory: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to verify bearer JWTs issued by the account service
    pub jwt_secret: String,
    /// Secret used to sign the short-lived PKCE cookie
    pub cookie_secret: String,
}

/// Which TikTok API shape is used for publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFlavor {
    /// `/v2/video/upload/` followed by `/v2/video/publish/`
    Legacy,
    /// Content Posting API (`/v2/post/publish/...`)
    ContentPosting,
}

impl ApiFlavor {
    fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "legacy" => Ok(ApiFlavor::Legacy),
            "content_posting" | "content-posting" | "v2" => Ok(ApiFlavor::ContentPosting),
            other => Err(AppError::Validation(format!("Unknown TikTok API flavor: {}", other))),
        }
    }
}

/// TikTok OAuth and publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikTokConfig {
    pub client_key: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub api_base_url: String,
    pub auth_base_url: String,
    pub scopes: Vec<String>,
    pub token_grace_period_secs: i64,
    pub daily_post_limit: i64,
    pub token_encryption_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_flavor: ApiFlavor,
    pub max_accounts_per_owner: Option<i64>,
}

/// Automation webhook configuration for generation jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub webhook_url: Option<String>,
    pub callback_url: Option<String>,
    pub asset_host: Option<String>,
    pub image_webhook_url: Option<String>,
    pub image_callback_url: Option<String>,
    /// Falls back to `asset_host`
    pub image_asset_host: Option<String>,
    pub resolution_9_16: String,
    pub resolution_16_9: String,
    pub resolution_1_1: String,
}

impl GenerationConfig {
    pub fn webhook_url_for(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Video => self.webhook_url.as_deref(),
            MediaKind::Image => self.image_webhook_url.as_deref(),
        }
    }

    pub fn callback_url_for(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Video => self.callback_url.as_deref(),
            MediaKind::Image => self.image_callback_url.as_deref(),
        }
    }

    pub fn asset_host_for(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Video => self.asset_host.as_deref(),
            MediaKind::Image => self.image_asset_host.as_deref().or(self.asset_host.as_deref()),
        }
    }
}

/// Retention cleanup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub asset_retention_secs: i64,
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    pub batch_size: i64,
    pub remote_webhook_url: Option<String>,
    pub run_retention_secs: i64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let hostname = var_or("CLIPFORGE_HOSTNAME", "localhost");
        let port = var_or("CLIPFORGE_PORT", "3000")
            .parse()
            .map_err(|_| AppError::Validation("Invalid port number".to_string()))?;
        let version = var_or("CLIPFORGE_VERSION", env!("CARGO_PKG_VERSION"));
        let production = var_or("CLIPFORGE_ENV", "development") == "production";
        let upload_limit = var_or("CLIPFORGE_UPLOAD_LIMIT", "268435456")
            .parse()
            .unwrap_or(268_435_456);

        let data_directory: PathBuf = var_or("CLIPFORGE_DATA_DIRECTORY", "./data").into();
        let database = env::var("CLIPFORGE_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("clipforge.sqlite"));
        let asset_directory = env::var("CLIPFORGE_ASSET_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("assets"));

        let jwt_secret = env::var("CLIPFORGE_JWT_SECRET")
            .map_err(|_| AppError::Configuration("JWT secret required".to_string()))?;
        // The cookie secret falls back to the JWT secret so a single secret is enough locally
        let cookie_secret = env::var("CLIPFORGE_COOKIE_SECRET").unwrap_or_else(|_| jwt_secret.clone());

        let scopes = optional_var("TIKTOK_OAUTH_SCOPES")
            .map(|s| {
                s.split(',')
                    .map(|scope| scope.trim().to_string())
                    .filter(|scope| !scope.is_empty())
                    .collect::<Vec<String>>()
            })
            .unwrap_or_else(|| DEFAULT_TIKTOK_SCOPES.iter().map(|s| s.to_string()).collect());

        let api_flavor = ApiFlavor::parse(&var_or("TIKTOK_API_FLAVOR", "content_posting"))?;

        let tiktok = TikTokConfig {
            client_key: optional_var("TIKTOK_CLIENT_KEY"),
            client_secret: optional_var("TIKTOK_CLIENT_SECRET"),
            redirect_uri: optional_var("TIKTOK_REDIRECT_URI"),
            api_base_url: var_or("TIKTOK_API_BASE_URL", "https://open.tiktokapis.com")
                .trim_end_matches('/')
                .to_string(),
            auth_base_url: var_or("TIKTOK_AUTH_BASE_URL", "https://www.tiktok.com")
                .trim_end_matches('/')
                .to_string(),
            scopes,
            token_grace_period_secs: var_or("TIKTOK_TOKEN_GRACE_PERIOD_SECONDS", "300")
                .parse()
                .unwrap_or(300),
            daily_post_limit: var_or("TIKTOK_DAILY_POST_LIMIT", "15").parse().unwrap_or(15),
            token_encryption_key: optional_var("TIKTOK_TOKEN_ENCRYPTION_KEY"),
            webhook_secret: optional_var("TIKTOK_WEBHOOK_SECRET"),
            api_flavor,
            max_accounts_per_owner: optional_var("TIKTOK_MAX_ACCOUNTS_PER_OWNER")
                .and_then(|v| v.parse().ok()),
        };

        let generation = GenerationConfig {
            webhook_url: optional_var("GENERATION_WEBHOOK_URL"),
            callback_url: optional_var("GENERATION_CALLBACK_URL"),
            asset_host: optional_var("GENERATION_ASSET_HOST"),
            image_webhook_url: optional_var("IMAGE_GENERATION_WEBHOOK_URL"),
            image_callback_url: optional_var("IMAGE_GENERATION_CALLBACK_URL"),
            image_asset_host: optional_var("IMAGE_GENERATION_ASSET_HOST"),
            resolution_9_16: var_or("VIDEO_RESOLUTION_9_16", "1080x1920"),
            resolution_16_9: var_or("VIDEO_RESOLUTION_16_9", "1920x1080"),
            resolution_1_1: var_or("VIDEO_RESOLUTION_1_1", "1024x1024"),
        };

        let cleanup = CleanupConfig {
            asset_retention_secs: var_or("ASSET_RETENTION_SECONDS", "604800")
                .parse()
                .unwrap_or(604_800),
            interval_secs: var_or("ASSET_CLEANUP_INTERVAL_SECONDS", "21600")
                .parse()
                .unwrap_or(21_600),
            initial_delay_secs: 10,
            batch_size: 50,
            remote_webhook_url: optional_var("ASSET_CLEANUP_WEBHOOK_URL"),
            run_retention_secs: var_or("RUN_RETENTION_SECONDS", "604800")
                .parse()
                .unwrap_or(604_800),
        };

        let rate_limit = RateLimitConfig {
            enabled: var_or("CLIPFORGE_RATE_LIMITS_ENABLED", "true")
                .parse()
                .unwrap_or(true),
            authenticated_rps: var_or("CLIPFORGE_RATE_LIMIT_AUTHENTICATED_RPS", "50")
                .parse()
                .unwrap_or(50),
            unauthenticated_rps: var_or("CLIPFORGE_RATE_LIMIT_UNAUTHENTICATED_RPS", "10")
                .parse()
                .unwrap_or(10),
            burst_size: var_or("CLIPFORGE_RATE_LIMIT_BURST", "50").parse().unwrap_or(50),
        };

        let logging = LoggingConfig {
            level: var_or("RUST_LOG", "info"),
            json: var_or("CLIPFORGE_LOG_FORMAT", "text") == "json",
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                production,
                upload_limit,
            },
            storage: StorageConfig {
                data_directory,
                database,
                asset_directory,
            },
            authentication: AuthConfig {
                jwt_secret,
                cookie_secret,
            },
            tiktok,
            generation,
            cleanup,
            rate_limit,
            logging,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AppError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(AppError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.tiktok.daily_post_limit < 1 {
            return Err(AppError::Validation(
                "Daily post limit must be at least 1".to_string(),
            ));
        }

        if self.tiktok.token_grace_period_secs < 0 {
            return Err(AppError::Validation(
                "Token grace period cannot be negative".to_string(),
            ));
        }

        if self.tiktok.client_key.is_none() || self.tiktok.client_secret.is_none() {
            tracing::warn!("TikTok client credentials are not configured; OAuth endpoints will fail");
        }

        Ok(())
    }

    /// Configuration suitable for unit tests
    pub fn for_tests(data_directory: PathBuf) -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 3000,
                version: "test".to_string(),
                production: false,
                upload_limit: 1024 * 1024,
            },
            storage: StorageConfig {
                database: data_directory.join("clipforge.sqlite"),
                asset_directory: data_directory.join("assets"),
                data_directory,
            },
            authentication: AuthConfig {
                jwt_secret: "test-jwt-secret-that-is-long-enough-0000".to_string(),
                cookie_secret: "test-cookie-secret".to_string(),
            },
            tiktok: TikTokConfig {
                client_key: Some("client-key".to_string()),
                client_secret: Some("client-secret".to_string()),
                redirect_uri: Some("https://app.example.com/api/tiktok/oauth/callback".to_string()),
                api_base_url: "https://open.tiktokapis.test".to_string(),
                auth_base_url: "https://www.tiktok.test".to_string(),
                scopes: DEFAULT_TIKTOK_SCOPES.iter().map(|s| s.to_string()).collect(),
                token_grace_period_secs: 300,
                daily_post_limit: 15,
                token_encryption_key: Some("unit-test-encryption-key".to_string()),
                webhook_secret: None,
                api_flavor: ApiFlavor::ContentPosting,
                max_accounts_per_owner: None,
            },
            generation: GenerationConfig {
                webhook_url: Some("https://hooks.example.com/generate".to_string()),
                callback_url: Some("https://app.example.com/api/generation/callback".to_string()),
                asset_host: None,
                image_webhook_url: Some("https://hooks.example.com/generate-image".to_string()),
                image_callback_url: Some("https://app.example.com/api/image-generation/callback".to_string()),
                image_asset_host: None,
                resolution_9_16: "1080x1920".to_string(),
                resolution_16_9: "1920x1080".to_string(),
                resolution_1_1: "1024x1024".to_string(),
            },
            cleanup: CleanupConfig {
                asset_retention_secs: 604_800,
                interval_secs: 21_600,
                initial_delay_secs: 10,
                batch_size: 50,
                remote_webhook_url: None,
                run_retention_secs: 604_800,
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                authenticated_rps: 50,
                unauthenticated_rps: 10,
                burst_size: 50,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
