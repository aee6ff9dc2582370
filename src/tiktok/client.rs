/// Outbound TikTok API client
///
/// `TikTokApi` is the single seam for every provider call. `HttpTikTokClient`
/// implements it over reqwest; the response normalization helpers are plain
/// functions so provider quirks can be tested without a network.
use crate::{
    config::TikTokConfig,
    error::{AppError, AppResult},
    tiktok::{
        CREATOR_INFO_PATH, DIRECT_POST_INIT_PATH, INBOX_INIT_PATH, LEGACY_PUBLISH_PATH,
        LEGACY_UPLOAD_PATH, TOKEN_PATH, USER_INFO_PATH,
    },
};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use serde_json::{json, Value};
use std::time::Duration;

/// Largest video sent as a single chunk
pub const SINGLE_CHUNK_MAX_BYTES: u64 = 64 * 1024 * 1024;
/// Chunk size used above the single-chunk limit
pub const CHUNK_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Normalized token endpoint response
#[derive(Debug, Clone, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refresh_expires_in: Option<i64>,
    pub scopes: Vec<String>,
    pub open_id: Option<String>,
}

/// Normalized user info
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfo {
    pub open_id: Option<String>,
    pub union_id: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Creator capabilities returned before a direct post
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreatorInfo {
    pub creator_username: Option<String>,
    pub privacy_level_options: Vec<String>,
}

/// How a video is split for FILE_UPLOAD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub video_size: u64,
    pub chunk_size: u64,
    pub total_chunk_count: u64,
}

impl ChunkPlan {
    /// One chunk up to 64 MiB, otherwise 10 MiB chunks with the remainder in the last one
    pub fn for_size(video_size: u64) -> Self {
        if video_size <= SINGLE_CHUNK_MAX_BYTES {
            return Self {
                video_size,
                chunk_size: video_size,
                total_chunk_count: 1,
            };
        }

        Self {
            video_size,
            chunk_size: CHUNK_SIZE_BYTES,
            total_chunk_count: video_size / CHUNK_SIZE_BYTES,
        }
    }

    /// Inclusive byte ranges for each chunk
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        (0..self.total_chunk_count)
            .map(|i| {
                let start = i * self.chunk_size;
                let end = if i + 1 == self.total_chunk_count {
                    self.video_size.saturating_sub(1)
                } else {
                    start + self.chunk_size - 1
                };
                (start, end)
            })
            .collect()
    }
}

/// Content Posting `source_info`
#[derive(Debug, Clone, PartialEq)]
pub enum SourceInfo {
    PullFromUrl { video_url: String },
    FileUpload(ChunkPlan),
}

impl SourceInfo {
    pub fn to_json(&self) -> Value {
        match self {
            SourceInfo::PullFromUrl { video_url } => json!({
                "source": "PULL_FROM_URL",
                "video_url": video_url,
            }),
            SourceInfo::FileUpload(plan) => json!({
                "source": "FILE_UPLOAD",
                "video_size": plan.video_size,
                "chunk_size": plan.chunk_size,
                "total_chunk_count": plan.total_chunk_count,
            }),
        }
    }
}

/// Content Posting `post_info`
#[derive(Debug, Clone, PartialEq)]
pub struct PostInfo {
    pub title: String,
    pub privacy_level: String,
}

/// Response of a Content Posting init call
#[derive(Debug, Clone, PartialEq)]
pub struct InitResponse {
    pub publish_id: String,
    pub upload_url: Option<String>,
    pub raw: Value,
}

/// Response of the legacy publish call
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPublishResponse {
    pub post_id: String,
    pub raw: Value,
}

/// Every outbound TikTok operation
#[async_trait]
pub trait TikTokApi: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AppResult<TokenResponse>;

    async fn refresh_token(&self, refresh_token: &str) -> AppResult<TokenResponse>;

    async fn fetch_user_info(&self, access_token: &str) -> AppResult<Option<UserInfo>>;

    async fn query_creator_info(&self, access_token: &str) -> AppResult<CreatorInfo>;

    async fn init_direct_post(
        &self,
        access_token: &str,
        post: &PostInfo,
        source: &SourceInfo,
    ) -> AppResult<InitResponse>;

    async fn init_inbox_upload(&self, access_token: &str, source: &SourceInfo) -> AppResult<InitResponse>;

    async fn upload_chunk(
        &self,
        upload_url: &str,
        chunk: Vec<u8>,
        range: (u64, u64),
        total: u64,
        content_type: &str,
    ) -> AppResult<()>;

    /// Multipart upload; returns the provider video id
    async fn legacy_upload(&self, access_token: &str, data: Vec<u8>, content_type: &str) -> AppResult<String>;

    async fn legacy_publish(
        &self,
        access_token: &str,
        video_id: &str,
        caption: &str,
        privacy_level: i32,
    ) -> AppResult<LegacyPublishResponse>;
}

/// reqwest-backed TikTok client
pub struct HttpTikTokClient {
    http: reqwest::Client,
    api_base_url: String,
    client_key: Option<String>,
    client_secret: Option<String>,
    default_scopes: Vec<String>,
}

impl HttpTikTokClient {
    /// Create a new client
    pub fn new(config: &TikTokConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("clipforge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.clone(),
            client_key: config.client_key.clone(),
            client_secret: config.client_secret.clone(),
            default_scopes: config.scopes.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn credentials(&self) -> AppResult<(&str, &str)> {
        match (self.client_key.as_deref(), self.client_secret.as_deref()) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => Err(AppError::Configuration(
                "TikTok client credentials are not configured".to_string(),
            )),
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> AppResult<TokenResponse> {
        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .form(form)
            .send()
            .await
            .map_err(AppError::transport)?;

        let body = read_json(response).await?;
        parse_token_body(&body, &self.default_scopes)
    }

    async fn post_json(&self, path: &str, access_token: &str, payload: &Value) -> AppResult<Value> {
        let response = self
            .http
            .post(self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(payload)
            .send()
            .await
            .map_err(AppError::transport)?;

        read_json(response).await
    }
}

#[async_trait]
impl TikTokApi for HttpTikTokClient {
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AppResult<TokenResponse> {
        let (client_key, client_secret) = self.credentials()?;
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("client_key", client_key),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        let (client_key, client_secret) = self.credentials()?;
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_key", client_key),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn fetch_user_info(&self, access_token: &str) -> AppResult<Option<UserInfo>> {
        let response = self
            .http
            .get(self.url(USER_INFO_PATH))
            .query(&[("fields", "open_id,union_id,display_name,avatar_url,username")])
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(AppError::transport)?;

        let body = read_json(response).await?;
        parse_user_info(&body)
    }

    async fn query_creator_info(&self, access_token: &str) -> AppResult<CreatorInfo> {
        let body = self.post_json(CREATOR_INFO_PATH, access_token, &json!({})).await?;
        let data = post_envelope_data(&body)?;
        Ok(parse_creator_info(data))
    }

    async fn init_direct_post(
        &self,
        access_token: &str,
        post: &PostInfo,
        source: &SourceInfo,
    ) -> AppResult<InitResponse> {
        let payload = json!({
            "post_info": {
                "title": post.title,
                "privacy_level": post.privacy_level,
                "disable_duet": false,
                "disable_comment": false,
                "disable_stitch": false,
            },
            "source_info": source.to_json(),
        });
        let body = self.post_json(DIRECT_POST_INIT_PATH, access_token, &payload).await?;
        parse_init_response(&body)
    }

    async fn init_inbox_upload(&self, access_token: &str, source: &SourceInfo) -> AppResult<InitResponse> {
        let payload = json!({ "source_info": source.to_json() });
        let body = self.post_json(INBOX_INIT_PATH, access_token, &payload).await?;
        parse_init_response(&body)
    }

    async fn upload_chunk(
        &self,
        upload_url: &str,
        chunk: Vec<u8>,
        range: (u64, u64),
        total: u64,
        content_type: &str,
    ) -> AppResult<()> {
        let response = self
            .http
            .put(upload_url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_RANGE, format!("bytes {}-{}/{}", range.0, range.1, total))
            .body(chunk)
            .send()
            .await
            .map_err(AppError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::provider(
                status.as_u16().to_string(),
                format!("TikTok chunk upload failed ({}): {}", status, snippet(&text)),
            ));
        }

        Ok(())
    }

    async fn legacy_upload(&self, access_token: &str, data: Vec<u8>, content_type: &str) -> AppResult<String> {
        let file_name = format!("upload_{}.mp4", chrono::Utc::now().timestamp_millis());
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str(content_type)
            .map_err(|e| AppError::Validation(format!("Invalid content type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("video", part);

        let response = self
            .http
            .post(self.url(LEGACY_UPLOAD_PATH))
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .multipart(form)
            .send()
            .await
            .map_err(AppError::transport)?;

        let body = read_json(response).await?;
        let data = legacy_envelope_data(&body)?;
        first_string(&[
            data.get("video_id"),
            data.pointer("/video/video_id"),
            data.get("id"),
        ])
        .ok_or_else(|| AppError::provider("invalid_response", "TikTok did not return a video_id"))
    }

    async fn legacy_publish(
        &self,
        access_token: &str,
        video_id: &str,
        caption: &str,
        privacy_level: i32,
    ) -> AppResult<LegacyPublishResponse> {
        let payload = json!({
            "video_id": video_id,
            "text": caption,
            "privacy_level": privacy_level,
        });
        let body = self.post_json(LEGACY_PUBLISH_PATH, access_token, &payload).await?;
        let data = legacy_envelope_data(&body)?;
        let post_id = first_string(&[data.get("publish_id"), data.get("video_id"), data.get("id")])
            .unwrap_or_else(|| video_id.to_string());

        Ok(LegacyPublishResponse {
            post_id,
            raw: data.clone(),
        })
    }
}

/// Read a JSON body, turning HTTP failures into provider errors
async fn read_json(response: reqwest::Response) -> AppResult<Value> {
    let status = response.status();
    let text = response.text().await.map_err(AppError::transport)?;

    if !status.is_success() {
        return Err(AppError::provider(
            status.as_u16().to_string(),
            format!("TikTok request failed ({}): {}", status, snippet(&text)),
        ));
    }

    serde_json::from_str(&text).map_err(|e| {
        AppError::provider("invalid_response", format!("Failed to parse TikTok response: {}", e))
    })
}

fn snippet(text: &str) -> String {
    text.chars().take(500).collect()
}

fn as_i64(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(candidates: &[Option<&Value>]) -> Option<String> {
    candidates.iter().find_map(|c| as_string(*c))
}

/// The `data` object when present, otherwise the body itself
fn unwrap_data(body: &Value) -> &Value {
    match body.get("data") {
        Some(data) if data.is_object() => data,
        _ => body,
    }
}

/// Error carried in a response body, in any of the shapes TikTok uses
fn body_error(body: &Value) -> Option<AppError> {
    let data = unwrap_data(body);

    let error_code = as_i64(data.get("error_code")).or_else(|| as_i64(body.get("error_code")));
    if let Some(code) = error_code.filter(|c| *c != 0) {
        let message = first_string(&[
            data.get("display_message"),
            data.get("description"),
            data.get("message"),
            body.get("description"),
        ])
        .unwrap_or_else(|| "Unknown TikTok error".to_string());
        return Some(AppError::provider(code.to_string(), message));
    }

    for error in [data.get("error"), body.get("error")].into_iter().flatten() {
        match error {
            Value::String(code) if !code.is_empty() => {
                let message = first_string(&[
                    data.get("error_description"),
                    body.get("error_description"),
                    data.get("description"),
                ])
                .unwrap_or_else(|| code.clone());
                return Some(AppError::provider(code.clone(), message));
            }
            Value::Object(obj) => {
                let code = obj.get("code").and_then(|c| c.as_str()).unwrap_or("ok");
                if code != "ok" {
                    let message = obj
                        .get("message")
                        .and_then(|m| m.as_str())
                        .filter(|m| !m.is_empty())
                        .unwrap_or("Unknown TikTok error");
                    return Some(AppError::provider(code, message));
                }
            }
            _ => {}
        }
    }

    None
}

/// Split a scope string on commas and whitespace; absent means the configured list
pub fn parse_scopes(scope: Option<&str>, default_scopes: &[String]) -> Vec<String> {
    match scope.map(str::trim).filter(|s| !s.is_empty()) {
        Some(scope) => scope
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => default_scopes.to_vec(),
    }
}

fn redacted(data: &Value) -> String {
    let mut clone = data.clone();
    if let Some(obj) = clone.as_object_mut() {
        for key in ["access_token", "refresh_token"] {
            if obj.contains_key(key) {
                obj.insert(key.to_string(), Value::String("[redacted]".to_string()));
            }
        }
    }
    clone.to_string()
}

/// Normalize a token endpoint body
pub fn parse_token_body(body: &Value, default_scopes: &[String]) -> AppResult<TokenResponse> {
    if let Some(err) = body_error(body) {
        return Err(err);
    }

    let data = unwrap_data(body);
    let access_token = as_string(data.get("access_token"));
    let refresh_token = as_string(data.get("refresh_token"));
    let expires_in = as_i64(data.get("expires_in"));

    let (Some(access_token), Some(refresh_token), Some(expires_in)) =
        (access_token, refresh_token, expires_in)
    else {
        return Err(AppError::provider(
            "invalid_response",
            format!(
                "TikTok OAuth response did not include expected token fields: {}",
                redacted(data)
            ),
        ));
    };

    Ok(TokenResponse {
        access_token,
        refresh_token,
        expires_in,
        refresh_expires_in: as_i64(data.get("refresh_expires_in")),
        scopes: parse_scopes(data.get("scope").and_then(|s| s.as_str()), default_scopes),
        open_id: first_string(&[data.get("open_id"), data.get("user_id")]),
    })
}

/// Normalize a user info body; `None` when no user is present
pub fn parse_user_info(body: &Value) -> AppResult<Option<UserInfo>> {
    if let Some(err) = body_error(body) {
        return Err(err);
    }

    let user = body
        .pointer("/data/user")
        .or_else(|| body.pointer("/data/users/0"))
        .filter(|u| u.is_object());

    Ok(user.map(|user| UserInfo {
        open_id: first_string(&[user.get("open_id"), user.get("user_id")]),
        union_id: as_string(user.get("union_id")),
        username: as_string(user.get("username")),
        display_name: as_string(user.get("display_name")),
        avatar_url: as_string(user.get("avatar_url")),
    }))
}

/// `data` of a Content Posting response after checking `error.code`
pub fn post_envelope_data(body: &Value) -> AppResult<&Value> {
    if let Some(err) = body_error(body) {
        return Err(err);
    }
    Ok(unwrap_data(body))
}

/// `data` of a legacy response after checking `error_code`
pub fn legacy_envelope_data(body: &Value) -> AppResult<&Value> {
    post_envelope_data(body)
}

fn parse_creator_info(data: &Value) -> CreatorInfo {
    CreatorInfo {
        creator_username: as_string(data.get("creator_username")),
        privacy_level_options: data
            .get("privacy_level_options")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Normalize a Content Posting init response
pub fn parse_init_response(body: &Value) -> AppResult<InitResponse> {
    let data = post_envelope_data(body)?;
    let publish_id = as_string(data.get("publish_id")).ok_or_else(|| {
        AppError::provider("invalid_response", "TikTok did not return a publish_id")
    })?;

    Ok(InitResponse {
        publish_id,
        upload_url: as_string(data.get("upload_url")),
        raw: data.clone(),
    })
}
