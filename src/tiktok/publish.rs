/// Idempotent, quota-limited video publishing
///
/// A publish resolves a fresh token, checks the daily quota, picks direct or
/// inbox mode from the granted scopes and then runs the upload for the
/// configured API flavor. With an idempotency key every attempt is recorded in
/// the publish log so a retried request returns the original post.
use crate::{
    accounts::{next_utc_midnight, AccountManager, AccountStatus, AccountView, LinkedAccount},
    config::ApiFlavor,
    error::{AppError, AppResult},
    generation::storage::MediaFetcher,
    metrics,
    tiktok::{
        client::{ChunkPlan, PostInfo, SourceInfo, TikTokApi},
        oauth::OAuthService,
        records::{Claim, PublishLog, PublishRecord},
        truncate_caption, Privacy, PublishMode, VideoSource, SCOPE_VIDEO_PUBLISH, SCOPE_VIDEO_UPLOAD,
    },
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_CONTENT_TYPE: &str = "video/mp4";

/// A single publish request
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub owner_id: String,
    pub account_id: String,
    pub source: VideoSource,
    pub caption: String,
    pub privacy: Privacy,
    pub idempotency_key: Option<String>,
}

/// Result returned to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub post_id: String,
    pub video_id: Option<String>,
    pub mode: PublishMode,
    pub replayed: bool,
    pub account: AccountView,
}

/// What the provider handed back for a successful upload
struct Delivery {
    post_id: String,
    video_id: Option<String>,
    response: Value,
}

/// Direct when the account may publish, inbox when it may only upload
pub fn select_mode(account: &LinkedAccount) -> AppResult<PublishMode> {
    if account.has_scope(SCOPE_VIDEO_PUBLISH) {
        Ok(PublishMode::Direct)
    } else if account.has_scope(SCOPE_VIDEO_UPLOAD) {
        Ok(PublishMode::Inbox)
    } else {
        Err(AppError::InsufficientScope(format!(
            "TikTok account @{} has not granted video.publish or video.upload",
            account.username
        )))
    }
}

/// Pick the Content Posting privacy level for `privacy` among the offered levels
///
/// The first preference wins when the creator offers no list at all.
pub fn select_privacy_level(privacy: Privacy, offered: &[String]) -> AppResult<String> {
    let preferred = privacy.preferred_levels();
    if offered.is_empty() {
        return Ok(preferred[0].to_string());
    }

    preferred
        .iter()
        .find(|level| offered.iter().any(|o| o == *level))
        .map(|level| level.to_string())
        .ok_or_else(|| {
            AppError::Validation(format!(
                "TikTok does not offer a privacy level compatible with '{}' (offered: {})",
                privacy.as_str(),
                offered.join(", ")
            ))
        })
}

/// Publish service
pub struct PublishService {
    flavor: ApiFlavor,
    api: Arc<dyn TikTokApi>,
    oauth: Arc<OAuthService>,
    accounts: Arc<AccountManager>,
    log: PublishLog,
    fetcher: Arc<dyn MediaFetcher>,
}

impl PublishService {
    pub fn new(
        flavor: ApiFlavor,
        api: Arc<dyn TikTokApi>,
        oauth: Arc<OAuthService>,
        accounts: Arc<AccountManager>,
        log: PublishLog,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        Self {
            flavor,
            api,
            oauth,
            accounts,
            log,
            fetcher,
        }
    }

    /// Publish a video to a linked account
    pub async fn publish(&self, request: PublishRequest) -> AppResult<PublishOutcome> {
        if let VideoSource::Bytes { data, .. } = &request.source {
            if data.is_empty() {
                return Err(AppError::Validation("Video file is empty".to_string()));
            }
        }
        if let VideoSource::Url(url) = &request.source {
            if url.trim().is_empty() {
                return Err(AppError::Validation("mediaUrl is required".to_string()));
            }
        }

        let owner_id = request.owner_id.as_str();
        let account_id = request.account_id.as_str();
        let key = request
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let account = self.accounts.get(owner_id, account_id).await?;
        if account.status != AccountStatus::Active {
            return Err(AppError::AccountNotUsable(format!(
                "TikTok account @{} is {}. Reconnect it before publishing.",
                account.username,
                account.status.as_str()
            )));
        }

        if let Some(key) = key {
            if let Some(record) = self.log.find(owner_id, account_id, key).await? {
                if record.provider_post_id.is_some() {
                    return self.replayed(owner_id, account_id, record).await;
                }
            }
        }

        let (mut account, access_token) = self.oauth.fresh_access_token(owner_id, account_id).await?;

        let now = Utc::now();
        self.accounts.reset_daily_quota_if_needed(&mut account, now).await?;
        if account.daily_post_count >= account.daily_post_limit {
            metrics::record_publish("none", "quota_exceeded");
            return Err(AppError::QuotaExceeded {
                username: account.username.clone(),
                resets_at: account
                    .daily_post_reset_at
                    .unwrap_or_else(|| next_utc_midnight(now)),
            });
        }

        let mode = select_mode(&account)?;
        let caption = truncate_caption(&request.caption);

        if let Some(key) = key {
            let snapshot = self.request_snapshot(&request, mode, &caption);
            match self.log.claim(owner_id, account_id, key, &snapshot).await? {
                Claim::Claimed => {}
                Claim::Replay(record) => return self.replayed(owner_id, account_id, record).await,
                Claim::InFlight => {
                    return Err(AppError::Conflict(
                        "A publish with this idempotency key is already in progress".to_string(),
                    ))
                }
            }
        }

        let delivery = match self.deliver(&access_token, mode, &request, &caption).await {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!(
                    account_id = %account_id,
                    mode = mode.as_str(),
                    "TikTok publish failed: {}",
                    e
                );
                if let Some(key) = key {
                    self.log.mark_failed(owner_id, account_id, key, &e.to_string()).await?;
                }
                metrics::record_publish(mode.as_str(), "failed");
                return Err(e);
            }
        };

        if let Some(key) = key {
            self.log
                .mark_published(
                    owner_id,
                    account_id,
                    key,
                    delivery.video_id.as_deref(),
                    &delivery.post_id,
                    &delivery.response,
                )
                .await?;
        }

        let account = self.accounts.record_post_usage(owner_id, account_id).await?;
        metrics::record_publish(mode.as_str(), "published");
        tracing::info!(
            account_id = %account_id,
            post_id = %delivery.post_id,
            mode = mode.as_str(),
            daily_post_count = account.daily_post_count,
            "Published video to TikTok"
        );

        Ok(PublishOutcome {
            post_id: delivery.post_id,
            video_id: delivery.video_id,
            mode,
            replayed: false,
            account: account.view(),
        })
    }

    async fn replayed(
        &self,
        owner_id: &str,
        account_id: &str,
        record: PublishRecord,
    ) -> AppResult<PublishOutcome> {
        let account = self.accounts.get_fresh(owner_id, account_id).await?;
        let mode = record
            .request_snapshot
            .as_ref()
            .and_then(|s| s.get("mode"))
            .and_then(|m| m.as_str())
            .map(|m| if m == "inbox" { PublishMode::Inbox } else { PublishMode::Direct })
            .unwrap_or(PublishMode::Direct);

        metrics::record_publish(mode.as_str(), "replayed");
        tracing::debug!(account_id = %account_id, key = %record.idempotency_key, "Replaying earlier publish");

        Ok(PublishOutcome {
            post_id: record.provider_post_id.unwrap_or_default(),
            video_id: record.video_id,
            mode,
            replayed: true,
            account: account.view(),
        })
    }

    fn request_snapshot(&self, request: &PublishRequest, mode: PublishMode, caption: &str) -> Value {
        let source = match &request.source {
            VideoSource::Url(url) => json!({ "type": "url", "mediaUrl": url }),
            VideoSource::Bytes { data, content_type } => json!({
                "type": "bytes",
                "size": data.len(),
                "contentType": content_type,
            }),
        };
        json!({
            "mode": mode.as_str(),
            "privacy": request.privacy.as_str(),
            "caption": caption,
            "source": source,
        })
    }

    async fn deliver(
        &self,
        access_token: &str,
        mode: PublishMode,
        request: &PublishRequest,
        caption: &str,
    ) -> AppResult<Delivery> {
        match self.flavor {
            ApiFlavor::ContentPosting => {
                self.deliver_content_posting(access_token, mode, request, caption)
                    .await
            }
            ApiFlavor::Legacy => self.deliver_legacy(access_token, mode, request, caption).await,
        }
    }

    async fn deliver_content_posting(
        &self,
        access_token: &str,
        mode: PublishMode,
        request: &PublishRequest,
        caption: &str,
    ) -> AppResult<Delivery> {
        let source = match &request.source {
            VideoSource::Url(url) => SourceInfo::PullFromUrl {
                video_url: url.clone(),
            },
            VideoSource::Bytes { data, .. } => SourceInfo::FileUpload(ChunkPlan::for_size(data.len() as u64)),
        };

        let init = match mode {
            PublishMode::Direct => {
                let creator = self.api.query_creator_info(access_token).await?;
                let privacy_level = select_privacy_level(request.privacy, &creator.privacy_level_options)?;
                let post = PostInfo {
                    title: caption.to_string(),
                    privacy_level,
                };
                self.api.init_direct_post(access_token, &post, &source).await?
            }
            PublishMode::Inbox => self.api.init_inbox_upload(access_token, &source).await?,
        };

        if let (SourceInfo::FileUpload(plan), VideoSource::Bytes { data, content_type }) =
            (&source, &request.source)
        {
            let upload_url = init.upload_url.as_deref().ok_or_else(|| {
                AppError::provider("invalid_response", "TikTok did not return an upload_url")
            })?;

            for (start, end) in plan.ranges() {
                let chunk = data[start as usize..=end as usize].to_vec();
                self.api
                    .upload_chunk(upload_url, chunk, (start, end), plan.video_size, content_type)
                    .await?;
            }
            tracing::debug!(chunks = plan.total_chunk_count, size = plan.video_size, "Uploaded video chunks");
        }

        Ok(Delivery {
            post_id: init.publish_id,
            video_id: None,
            response: init.raw,
        })
    }

    async fn deliver_legacy(
        &self,
        access_token: &str,
        mode: PublishMode,
        request: &PublishRequest,
        caption: &str,
    ) -> AppResult<Delivery> {
        let (data, content_type) = match &request.source {
            VideoSource::Url(url) => {
                let media = self.fetcher.fetch(url).await?;
                let content_type = media
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
                (media.data, content_type)
            }
            VideoSource::Bytes { data, content_type } => (data.clone(), content_type.clone()),
        };

        let video_id = self.api.legacy_upload(access_token, data, &content_type).await?;

        match mode {
            PublishMode::Inbox => Ok(Delivery {
                post_id: video_id.clone(),
                response: json!({ "video_id": video_id }),
                video_id: Some(video_id),
            }),
            PublishMode::Direct => {
                let published = self
                    .api
                    .legacy_publish(access_token, &video_id, caption, request.privacy.legacy_level())
                    .await?;
                Ok(Delivery {
                    post_id: published.post_id,
                    video_id: Some(video_id),
                    response: published.raw,
                })
            }
        }
    }
}
