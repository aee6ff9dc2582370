/// Local storage for generated assets
use crate::{
    error::{AppError, AppResult},
    generation::{GeneratedAsset, MediaKind},
};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Downloaded media bytes
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// Fetches remote media
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> AppResult<FetchedMedia>;
}

/// reqwest-backed media fetcher
pub struct HttpMediaFetcher {
    http: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new() -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> AppResult<FetchedMedia> {
        let response = self.http.get(url).send().await.map_err(AppError::transport)?;
        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(300)
                .collect();
            return Err(AppError::provider(
                status.as_u16().to_string(),
                format!("Failed to download asset ({}): {}", status, body),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = response.bytes().await.map_err(AppError::transport)?.to_vec();

        Ok(FetchedMedia { data, content_type })
    }
}

/// Extension of the URL path, `fallback` when absent
pub fn resolve_extension(url: &str, fallback: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let path = parsed.path().to_string();
            Path::new(&path)
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| !e.is_empty())
                .map(|e| format!(".{}", e))
        })
        .unwrap_or_else(|| fallback.to_string())
}

/// Saves generated assets under `{root}/{run_id}/`
pub struct AssetStorage {
    root: PathBuf,
    fetcher: Arc<dyn MediaFetcher>,
}

impl AssetStorage {
    pub fn new(root: PathBuf, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { root, fetcher }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download every asset and record its local path
    pub async fn save_assets(
        &self,
        run_id: &str,
        kind: MediaKind,
        assets: Vec<GeneratedAsset>,
    ) -> AppResult<Vec<GeneratedAsset>> {
        if assets.is_empty() {
            return Ok(assets);
        }

        let run_dir = self.root.join(run_id);
        tokio::fs::create_dir_all(&run_dir).await?;

        let mut stored = Vec::with_capacity(assets.len());
        for (index, mut asset) in assets.into_iter().enumerate() {
            let media = self.fetcher.fetch(&asset.url).await?;
            let file_name = format!(
                "{}-{}{}",
                chrono::Utc::now().timestamp_millis(),
                index,
                resolve_extension(&asset.url, kind.default_extension())
            );
            let path = run_dir.join(file_name);
            tokio::fs::write(&path, &media.data).await?;

            asset.local_path = Some(path.to_string_lossy().into_owned());
            stored.push(asset);
        }

        tracing::debug!(run_id = %run_id, count = stored.len(), "Stored generated assets");
        Ok(stored)
    }

    /// Remove local files; missing files are ignored
    pub async fn remove_assets(&self, assets: &[GeneratedAsset]) {
        for path in assets.iter().filter_map(|a| a.local_path.as_deref()) {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path, "Failed to remove asset: {}", e),
            }
        }
    }
}
