/// TikTok account linking, publishing and provider webhook endpoints
use crate::{
    api::{respond, ApiResponse},
    auth::OwnerContext,
    context::AppContext,
    crypto::constant_time_equal,
    error::{AppError, AppResult},
    tiktok::{
        oauth::AuthorizationRequest,
        pkce::{PkceCookie, PKCE_COOKIE_MAX_AGE_SECS, PKCE_COOKIE_NAME},
        publish::{PublishOutcome, PublishRequest},
        truncate_caption, Privacy, VideoSource, MAX_CAPTION_CHARS,
    },
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

/// Path the PKCE cookie is scoped to
pub const OAUTH_CALLBACK_PATH: &str = "/api/tiktok/oauth/callback";

const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";
const SIGNATURE_HEADERS: [&str; 2] = ["x-tiktok-signature", "x-webhook-signature"];

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/tiktok/oauth/start", post(start_connection))
        .route(OAUTH_CALLBACK_PATH, get(oauth_callback_get).post(oauth_callback_post))
        .route("/api/tiktok/oauth/refresh", post(refresh_token))
        .route("/api/tiktok/accounts", get(list_accounts))
        .route("/api/tiktok/accounts/:account_id", get(get_account).delete(disconnect_account))
        .route("/api/tiktok/posts", post(create_post))
        .route("/api/tiktok/posts/upload", post(upload_post))
        .route("/api/tiktok/webhook", post(provider_webhook))
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct StartConnectionRequest {
    #[validate(url)]
    redirect_uri: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CallbackRequest {
    #[validate(length(min = 1, message = "Authorization code is required"))]
    code: String,
    #[validate(length(min = 1, message = "Code verifier is required"))]
    code_verifier: String,
    #[validate(url)]
    redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    #[validate(length(min = 1, message = "TikTok account ID is required"))]
    account_id: String,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest {
    #[validate(length(min = 1, message = "TikTok account ID is required"))]
    account_id: String,
    #[validate(url(message = "mediaUrl must be a valid URL"))]
    media_url: Option<String>,
    #[validate(length(max = 2200))]
    caption: Option<String>,
    /// `public`/`friends`/`private` or 0/1/2
    privacy: Option<Value>,
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadQuery {
    account_id: String,
    caption: Option<String>,
    privacy: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkResponse {
    account: crate::accounts::AccountView,
    expires_in: i64,
    refresh_expires_in: Option<i64>,
    scopes: Vec<String>,
}

fn validate<T: Validate>(input: &T) -> AppResult<()> {
    input
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}

fn cookie_header(value: &str, max_age: i64, secure: bool) -> AppResult<HeaderValue> {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
        PKCE_COOKIE_NAME, value, OAUTH_CALLBACK_PATH, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(format!("Invalid cookie value: {}", e)))
}

fn parse_privacy(value: Option<&Value>) -> Privacy {
    match value {
        Some(Value::String(s)) => Privacy::parse(s),
        Some(Value::Number(n)) => Privacy::parse(&n.to_string()),
        _ => Privacy::Public,
    }
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn publish_status(outcome: &PublishOutcome) -> StatusCode {
    if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    }
}

/// Begin a connection; the verifier travels in a signed cookie
async fn start_connection(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    body: Option<Json<StartConnectionRequest>>,
) -> AppResult<([(header::HeaderName, HeaderValue); 1], Json<ApiResponse<AuthorizationRequest>>)> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    validate(&req)?;

    let authorization = ctx
        .oauth
        .start_authorization(req.redirect_uri.as_deref(), req.state.as_deref())?;

    let sealed = PkceCookie {
        verifier: authorization.code_verifier.clone(),
        state: authorization.state.clone(),
        redirect_uri: req.redirect_uri,
    }
    .seal(&ctx.config.authentication.cookie_secret);

    let cookie = cookie_header(&sealed, PKCE_COOKIE_MAX_AGE_SECS, ctx.config.service.production)?;
    tracing::info!(owner_id = %owner.owner_id, "TikTok OAuth started");

    Ok((
        [(header::SET_COOKIE, cookie)],
        respond("TikTok OAuth URL generated", authorization),
    ))
}

/// Redirect-based callback from TikTok
async fn oauth_callback_get(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> AppResult<([(header::HeaderName, HeaderValue); 1], Json<ApiResponse<LinkResponse>>)> {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        return Err(AppError::Validation(format!("TikTok authorization failed: {} {}", error, description)));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("Authorization code is required".to_string()))?;

    let pkce = jar
        .get(PKCE_COOKIE_NAME)
        .and_then(|c| PkceCookie::open(c.value(), &ctx.config.authentication.cookie_secret))
        .ok_or_else(|| AppError::Validation("Missing PKCE context. Restart connection.".to_string()))?;

    if pkce.verifier.is_empty() {
        return Err(AppError::Validation("Missing code verifier. Restart connection.".to_string()));
    }
    if query.state.as_deref() != Some(pkce.state.as_str()) {
        return Err(AppError::Validation("State mismatch in OAuth callback".to_string()));
    }

    let outcome = ctx
        .oauth
        .handle_callback(&owner.owner_id, &code, &pkce.verifier, pkce.redirect_uri.as_deref())
        .await?;

    let cleared = cookie_header("", 0, ctx.config.service.production)?;
    Ok((
        [(header::SET_COOKIE, cleared)],
        respond(
            "TikTok account connected",
            LinkResponse {
                account: outcome.account.view(),
                expires_in: outcome.expires_in,
                refresh_expires_in: outcome.refresh_expires_in,
                scopes: outcome.scopes,
            },
        ),
    ))
}

/// Callback for clients that keep the verifier themselves
async fn oauth_callback_post(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Json(req): Json<CallbackRequest>,
) -> AppResult<Json<ApiResponse<LinkResponse>>> {
    validate(&req)?;

    let outcome = ctx
        .oauth
        .handle_callback(&owner.owner_id, &req.code, &req.code_verifier, req.redirect_uri.as_deref())
        .await?;

    Ok(respond(
        "TikTok account connected",
        LinkResponse {
            account: outcome.account.view(),
            expires_in: outcome.expires_in,
            refresh_expires_in: outcome.refresh_expires_in,
            scopes: outcome.scopes,
        },
    ))
}

async fn refresh_token(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Json<ApiResponse<Value>>> {
    validate(&req)?;

    let outcome = ctx
        .oauth
        .refresh_access_token(&owner.owner_id, &req.account_id, req.force)
        .await?;

    let message = if outcome.refreshed {
        "TikTok access token refreshed"
    } else {
        "TikTok access token still valid"
    };

    Ok(respond(
        message,
        json!({ "refreshed": outcome.refreshed, "account": outcome.account.view() }),
    ))
}

async fn list_accounts(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
) -> AppResult<Json<ApiResponse<Vec<crate::accounts::AccountView>>>> {
    let accounts = ctx.accounts.list(&owner.owner_id).await?;
    Ok(respond(
        "TikTok accounts",
        accounts.iter().map(|a| a.view()).collect(),
    ))
}

async fn get_account(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Path(account_id): Path<String>,
) -> AppResult<Json<ApiResponse<crate::accounts::AccountView>>> {
    let account = ctx.accounts.get_fresh(&owner.owner_id, &account_id).await?;
    Ok(respond("TikTok account", account.view()))
}

async fn disconnect_account(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    Path(account_id): Path<String>,
) -> AppResult<Json<ApiResponse<crate::accounts::AccountView>>> {
    let account = ctx.accounts.disconnect(&owner.owner_id, &account_id).await?;
    tracing::info!(owner_id = %owner.owner_id, account_id = %account_id, "TikTok account disconnected");
    Ok(respond("TikTok account disconnected", account.view()))
}

/// Publish a video from a URL
async fn create_post(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    headers: HeaderMap,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<PublishOutcome>>)> {
    validate(&req)?;

    if req.media_type.as_deref().unwrap_or("video") != "video" {
        return Err(AppError::Validation(
            "Only video posts are supported at this time".to_string(),
        ));
    }
    let media_url = req
        .media_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Provide mediaUrl or upload a video file".to_string()))?;

    let outcome = ctx
        .publisher
        .publish(PublishRequest {
            owner_id: owner.owner_id,
            account_id: req.account_id,
            source: VideoSource::Url(media_url),
            caption: truncate_caption(req.caption.as_deref().unwrap_or_default()),
            privacy: parse_privacy(req.privacy.as_ref()),
            idempotency_key: idempotency_key(&headers),
        })
        .await?;

    Ok((publish_status(&outcome), respond("TikTok video published", outcome)))
}

/// Publish a video sent as the raw request body
async fn upload_post(
    State(ctx): State<AppContext>,
    owner: OwnerContext,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<ApiResponse<PublishOutcome>>)> {
    if query.account_id.trim().is_empty() {
        return Err(AppError::Validation("TikTok account ID is required".to_string()));
    }
    let caption = query.caption.unwrap_or_default();
    if caption.chars().count() > MAX_CAPTION_CHARS {
        return Err(AppError::Validation(format!(
            "caption must be at most {} characters",
            MAX_CAPTION_CHARS
        )));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .filter(|ct| ct.starts_with("video/"))
        .unwrap_or("video/mp4")
        .to_string();

    let outcome = ctx
        .publisher
        .publish(PublishRequest {
            owner_id: owner.owner_id,
            account_id: query.account_id,
            source: VideoSource::Bytes {
                data: body.to_vec(),
                content_type,
            },
            caption: truncate_caption(&caption),
            privacy: Privacy::parse(query.privacy.as_deref().unwrap_or("public")),
            idempotency_key: idempotency_key(&headers),
        })
        .await?;

    Ok((publish_status(&outcome), respond("TikTok video published", outcome)))
}

/// Provider notifications; `permissions.revoked` marks matching accounts revoked
async fn provider_webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    if let Some(secret) = ctx.config.tiktok.webhook_secret.as_deref() {
        let signature = SIGNATURE_HEADERS
            .iter()
            .find_map(|name| headers.get(*name))
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Authentication("Missing webhook signature".to_string()))?;

        if !constant_time_equal(signature.as_bytes(), secret.as_bytes()) {
            return Err(AppError::Authentication("Invalid signature".to_string()));
        }
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;

    let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or_default();
    let provider_user = event.get("account_id").and_then(|a| a.as_str()).filter(|a| !a.is_empty());

    match (event_type, provider_user) {
        ("permissions.revoked", Some(provider_user)) => {
            let revoked = ctx.accounts.revoke_by_provider_user(provider_user).await?;
            tracing::info!(revoked, "TikTok permissions revoked via webhook");
        }
        _ => tracing::debug!(event_type, "Ignoring TikTok webhook event"),
    }

    Ok(Json(json!({ "success": true })))
}
