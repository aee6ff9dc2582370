//! In-memory `TikTokApi` that records calls
use crate::{
    error::{AppError, AppResult},
    tiktok::client::{
        CreatorInfo, InitResponse, LegacyPublishResponse, PostInfo, SourceInfo, TikTokApi,
        TokenResponse, UserInfo,
    },
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum RefreshBehavior {
    #[default]
    Succeed,
    Reject,
    Transient,
}

pub(crate) struct FakeTikTok {
    calls: Mutex<Vec<&'static str>>,
    refresh_behavior: Mutex<RefreshBehavior>,
    user_info_fails: AtomicBool,
    privacy_options: Mutex<Vec<String>>,
    privacy_levels: Mutex<Vec<String>>,
    chunk_ranges: Mutex<Vec<(u64, u64, u64)>>,
    counter: AtomicUsize,
}

impl Default for FakeTikTok {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            refresh_behavior: Mutex::new(RefreshBehavior::Succeed),
            user_info_fails: AtomicBool::new(false),
            privacy_options: Mutex::new(vec![
                "PUBLIC_TO_EVERYONE".to_string(),
                "MUTUAL_FOLLOW_FRIENDS".to_string(),
                "SELF_ONLY".to_string(),
            ]),
            privacy_levels: Mutex::new(Vec::new()),
            chunk_ranges: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }
}

impl FakeTikTok {
    fn record(&self, call: &'static str) -> usize {
        self.calls.lock().unwrap().push(call);
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub(crate) fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.refresh_behavior.lock().unwrap() = behavior;
    }

    pub(crate) fn fail_user_info(&self) {
        self.user_info_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_privacy_options(&self, options: &[&str]) {
        *self.privacy_options.lock().unwrap() = options.iter().map(|s| s.to_string()).collect();
    }

    pub(crate) fn privacy_levels(&self) -> Vec<String> {
        self.privacy_levels.lock().unwrap().clone()
    }

    pub(crate) fn chunk_ranges(&self) -> Vec<(u64, u64, u64)> {
        self.chunk_ranges.lock().unwrap().clone()
    }

    fn tokens(access: &str) -> TokenResponse {
        TokenResponse {
            access_token: access.to_string(),
            refresh_token: format!("{}-refresh", access),
            expires_in: 86_400,
            refresh_expires_in: Some(31_536_000),
            scopes: vec![
                "user.info.basic".to_string(),
                "video.upload".to_string(),
                "video.publish".to_string(),
            ],
            open_id: Some("open-1".to_string()),
        }
    }

    fn check_source(source: &SourceInfo) -> AppResult<()> {
        if let SourceInfo::PullFromUrl { video_url } = source {
            if video_url.contains("fail") {
                return Err(AppError::provider("url_ownership_unverified", "Rejected media URL"));
            }
        }
        Ok(())
    }

    fn init(n: usize, source: &SourceInfo) -> InitResponse {
        let upload_url = match source {
            SourceInfo::FileUpload(_) => Some(format!("https://upload.test/{}", n)),
            SourceInfo::PullFromUrl { .. } => None,
        };
        InitResponse {
            publish_id: format!("publish-{}", n),
            upload_url,
            raw: json!({ "publish_id": format!("publish-{}", n) }),
        }
    }
}

#[async_trait]
impl TikTokApi for FakeTikTok {
    async fn exchange_code(&self, _code: &str, _verifier: &str, _redirect: &str) -> AppResult<TokenResponse> {
        self.record("exchange_code");
        Ok(Self::tokens("access-1"))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> AppResult<TokenResponse> {
        self.record("refresh_token");
        let behavior = *self.refresh_behavior.lock().unwrap();
        match behavior {
            RefreshBehavior::Succeed => Ok(Self::tokens("access-refreshed")),
            RefreshBehavior::Reject => Err(AppError::provider("invalid_grant", "Refresh token revoked")),
            RefreshBehavior::Transient => Err(AppError::provider("503", "Service unavailable")),
        }
    }

    async fn fetch_user_info(&self, _access_token: &str) -> AppResult<Option<UserInfo>> {
        self.record("fetch_user_info");
        if self.user_info_fails.load(Ordering::SeqCst) {
            return Err(AppError::provider("500", "User info unavailable"));
        }
        Ok(Some(UserInfo {
            open_id: Some("open-1".to_string()),
            union_id: None,
            username: Some("creator".to_string()),
            display_name: Some("Creator".to_string()),
            avatar_url: None,
        }))
    }

    async fn query_creator_info(&self, _access_token: &str) -> AppResult<CreatorInfo> {
        self.record("query_creator_info");
        Ok(CreatorInfo {
            creator_username: Some("creator".to_string()),
            privacy_level_options: self.privacy_options.lock().unwrap().clone(),
        })
    }

    async fn init_direct_post(
        &self,
        _access_token: &str,
        post: &PostInfo,
        source: &SourceInfo,
    ) -> AppResult<InitResponse> {
        let n = self.record("init_direct_post");
        self.privacy_levels.lock().unwrap().push(post.privacy_level.clone());
        Self::check_source(source)?;
        Ok(Self::init(n, source))
    }

    async fn init_inbox_upload(&self, _access_token: &str, source: &SourceInfo) -> AppResult<InitResponse> {
        let n = self.record("init_inbox_upload");
        Self::check_source(source)?;
        Ok(Self::init(n, source))
    }

    async fn upload_chunk(
        &self,
        _upload_url: &str,
        chunk: Vec<u8>,
        range: (u64, u64),
        total: u64,
        _content_type: &str,
    ) -> AppResult<()> {
        self.record("upload_chunk");
        assert_eq!(chunk.len() as u64, range.1 - range.0 + 1);
        self.chunk_ranges.lock().unwrap().push((range.0, range.1, total));
        Ok(())
    }

    async fn legacy_upload(&self, _access_token: &str, _data: Vec<u8>, _content_type: &str) -> AppResult<String> {
        let n = self.record("legacy_upload");
        Ok(format!("video-{}", n))
    }

    async fn legacy_publish(
        &self,
        _access_token: &str,
        video_id: &str,
        _caption: &str,
        privacy_level: i32,
    ) -> AppResult<LegacyPublishResponse> {
        let n = self.record("legacy_publish");
        self.privacy_levels.lock().unwrap().push(privacy_level.to_string());
        Ok(LegacyPublishResponse {
            post_id: format!("legacy-publish-{}", n),
            raw: json!({ "video_id": video_id }),
        })
    }
}
