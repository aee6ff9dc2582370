/// Application context and dependency injection
use crate::{
    accounts::AccountManager,
    config::ServerConfig,
    crypto::SecretCodec,
    db,
    error::{AppError, AppResult},
    generation::{
        AssetStorage, GenerationPipeline, GenerationTrigger, HttpGenerationTrigger, HttpMediaFetcher,
        MediaFetcher, RunStore, ScenarioStore,
    },
    rate_limit::RateLimiter,
    tiktok::{records::PublishLog, HttpTikTokClient, OAuthService, PublishService, TikTokApi},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub accounts: Arc<AccountManager>,
    pub oauth: Arc<OAuthService>,
    pub publisher: Arc<PublishService>,
    // Generation
    pub scenarios: Arc<ScenarioStore>,
    pub runs: Arc<RunStore>,
    pub storage: Arc<AssetStorage>,
    pub pipeline: Arc<GenerationPipeline>,
    // Rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Client for the remote cleanup webhook
    pub http: reqwest::Client,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AppResult<Self> {
        config.validate()?;
        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let api = Arc::new(HttpTikTokClient::new(&config.tiktok)?);
        let fetcher = Arc::new(HttpMediaFetcher::new()?);
        let trigger = Arc::new(HttpGenerationTrigger::new(&config.generation)?);

        Self::from_parts(config, db, api, fetcher, trigger)
    }

    /// Assemble the services over an existing pool and provider clients
    pub fn from_parts(
        config: ServerConfig,
        db: SqlitePool,
        api: Arc<dyn TikTokApi>,
        fetcher: Arc<dyn MediaFetcher>,
        trigger: Arc<dyn GenerationTrigger>,
    ) -> AppResult<Self> {
        let codec = SecretCodec::new(config.tiktok.token_encryption_key.as_deref());
        if !codec.is_enabled() {
            tracing::warn!("Token encryption key not set; OAuth tokens are stored in plaintext");
        }

        let accounts = Arc::new(AccountManager::new(
            db.clone(),
            config.tiktok.daily_post_limit,
            config.tiktok.max_accounts_per_owner,
        ));

        let oauth = Arc::new(OAuthService::new(
            config.tiktok.clone(),
            api.clone(),
            accounts.clone(),
            codec,
        ));

        let publisher = Arc::new(PublishService::new(
            config.tiktok.api_flavor,
            api,
            oauth.clone(),
            accounts.clone(),
            PublishLog::new(db.clone()),
            fetcher.clone(),
        ));

        let scenarios = Arc::new(ScenarioStore::new(db.clone(), accounts.clone()));
        let runs = Arc::new(RunStore::new(db.clone()));
        let storage = Arc::new(AssetStorage::new(config.storage.asset_directory.clone(), fetcher));

        let pipeline = Arc::new(GenerationPipeline::new(
            config.generation.clone(),
            runs.clone(),
            scenarios.clone(),
            storage.clone(),
            publisher.clone(),
            trigger,
        ));

        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(config),
            db,
            accounts,
            oauth,
            publisher,
            scenarios,
            runs,
            storage,
            pipeline,
            rate_limiter,
            http,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> AppResult<()> {
        for dir in [&config.storage.data_directory, &config.storage.asset_directory] {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await?;
                tracing::info!("Created directory: {}", dir.display());
            }
        }
        Ok(())
    }

    /// Public base URL of the service
    pub fn service_url(&self) -> String {
        if self.config.service.production {
            format!("https://{}", self.config.service.hostname)
        } else {
            format!("http://{}:{}", self.config.service.hostname, self.config.service.port)
        }
    }
}
