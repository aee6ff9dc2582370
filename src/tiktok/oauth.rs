/// TikTok OAuth exchange with PKCE and token refresh
use crate::{
    accounts::{AccountManager, AccountStatus, LinkedAccount, OAuthProfile, StoredTokens},
    config::TikTokConfig,
    crypto::SecretCodec,
    error::{AppError, AppResult},
    metrics,
    tiktok::{
        client::{TikTokApi, TokenResponse, UserInfo},
        pkce, AUTHORIZE_PATH,
    },
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Everything the caller needs to send the user to TikTok
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub encryption_enabled: bool,
}

/// Result of a completed callback
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub account: LinkedAccount,
    pub expires_in: i64,
    pub refresh_expires_in: Option<i64>,
    pub scopes: Vec<String>,
}

/// Result of a refresh request
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub refreshed: bool,
    pub account: LinkedAccount,
}

/// Whether a token must be refreshed now
///
/// Refresh happens from `expires_at - grace` onwards, inclusive. A missing
/// expiry always refreshes.
pub fn should_refresh(
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    grace: Duration,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    match expires_at {
        Some(at) => now >= at - grace,
        None => true,
    }
}

/// Build the profile used to link an account
///
/// The username falls back to the display name, the token's open id and
/// finally `tiktok_{id}`.
pub fn build_profile(user: Option<&UserInfo>, tokens: &TokenResponse) -> AppResult<OAuthProfile> {
    let provider_user_id = user
        .and_then(|u| u.open_id.clone())
        .or_else(|| tokens.open_id.clone())
        .ok_or_else(|| {
            AppError::provider(
                "invalid_response",
                "Unable to determine TikTok user id from OAuth response",
            )
        })?;

    let username = user
        .and_then(|u| u.username.clone().or_else(|| u.display_name.clone()))
        .or_else(|| tokens.open_id.clone())
        .unwrap_or_else(|| format!("tiktok_{}", provider_user_id));

    let display_name = user
        .and_then(|u| u.display_name.clone().or_else(|| u.username.clone()))
        .or_else(|| Some(username.clone()));

    Ok(OAuthProfile {
        provider_user_id,
        username,
        display_name,
        avatar_url: user.and_then(|u| u.avatar_url.clone()),
    })
}

/// OAuth service
pub struct OAuthService {
    config: TikTokConfig,
    api: Arc<dyn TikTokApi>,
    accounts: Arc<AccountManager>,
    codec: SecretCodec,
}

impl OAuthService {
    pub fn new(
        config: TikTokConfig,
        api: Arc<dyn TikTokApi>,
        accounts: Arc<AccountManager>,
        codec: SecretCodec,
    ) -> Self {
        Self {
            config,
            api,
            accounts,
            codec,
        }
    }

    fn assert_config(&self) -> AppResult<()> {
        if self.config.client_key.is_none() || self.config.client_secret.is_none() {
            return Err(AppError::Configuration(
                "TikTok client credentials are not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_redirect_uri(&self, redirect_uri: Option<&str>) -> AppResult<String> {
        redirect_uri
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| self.config.redirect_uri.clone())
            .ok_or_else(|| AppError::Configuration("TikTok redirect URI is not configured".to_string()))
    }

    fn grace_period(&self) -> Duration {
        Duration::seconds(self.config.token_grace_period_secs)
    }

    /// Begin a connection attempt
    pub fn start_authorization(
        &self,
        redirect_uri: Option<&str>,
        state: Option<&str>,
    ) -> AppResult<AuthorizationRequest> {
        self.assert_config()?;
        let client_key = self.config.client_key.as_deref().unwrap_or_default();
        let redirect_uri = self.resolve_redirect_uri(redirect_uri)?;

        let code_verifier = pkce::generate_code_verifier();
        let code_challenge = pkce::code_challenge(&code_verifier);
        let state = state
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(pkce::generate_state);

        let mut url = reqwest::Url::parse(&format!("{}{}", self.config.auth_base_url, AUTHORIZE_PATH))
            .map_err(|e| AppError::Configuration(format!("Invalid TikTok auth base URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_key", client_key)
            .append_pair("scope", &self.config.scopes.join(","))
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("code_challenge", &code_challenge)
            .append_pair("code_challenge_method", pkce::CODE_CHALLENGE_METHOD)
            .append_pair("state", &state);

        Ok(AuthorizationRequest {
            authorization_url: url.to_string(),
            state,
            code_verifier,
            code_challenge,
            code_challenge_method: pkce::CODE_CHALLENGE_METHOD.to_string(),
            redirect_uri,
            scopes: self.config.scopes.clone(),
            encryption_enabled: self.codec.is_enabled(),
        })
    }

    /// Exchange an authorization code and link the account to `owner_id`
    pub async fn handle_callback(
        &self,
        owner_id: &str,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> AppResult<LinkOutcome> {
        self.assert_config()?;
        if code.trim().is_empty() {
            return Err(AppError::Validation("Authorization code is required".to_string()));
        }
        if code_verifier.trim().is_empty() {
            return Err(AppError::Validation(
                "codeVerifier is required to complete TikTok OAuth".to_string(),
            ));
        }
        let redirect_uri = self.resolve_redirect_uri(redirect_uri)?;

        let result = self.link(owner_id, code, code_verifier, &redirect_uri).await;
        metrics::record_account_link(result.is_ok());
        result
    }

    async fn link(
        &self,
        owner_id: &str,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> AppResult<LinkOutcome> {
        let tokens = self.api.exchange_code(code, code_verifier, redirect_uri).await?;

        let user = match self.api.fetch_user_info(&tokens.access_token).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(owner_id = %owner_id, "Failed to fetch TikTok user profile: {}", e);
                None
            }
        };

        let profile = build_profile(user.as_ref(), &tokens)?;
        let stored = self.secure_tokens(&tokens, Utc::now())?;
        let account = self.accounts.upsert_from_oauth(owner_id, &profile, &stored).await?;

        Ok(LinkOutcome {
            account,
            expires_in: tokens.expires_in,
            refresh_expires_in: tokens.refresh_expires_in,
            scopes: tokens.scopes,
        })
    }

    fn secure_tokens(&self, tokens: &TokenResponse, now: DateTime<Utc>) -> AppResult<StoredTokens> {
        Ok(StoredTokens {
            access_token: self.codec.encrypt(&tokens.access_token)?,
            refresh_token: self.codec.encrypt_opt(Some(&tokens.refresh_token))?,
            scopes: tokens.scopes.clone(),
            expires_at: now + Duration::seconds(tokens.expires_in),
        })
    }

    /// Refresh the account's tokens when inside the grace window or when forced
    pub async fn refresh_access_token(
        &self,
        owner_id: &str,
        account_id: &str,
        force: bool,
    ) -> AppResult<RefreshOutcome> {
        self.assert_config()?;
        let account = self.accounts.get(owner_id, account_id).await?;
        let now = Utc::now();

        if !should_refresh(account.expires_at, now, self.grace_period(), force) {
            return Ok(RefreshOutcome {
                refreshed: false,
                account,
            });
        }

        let refresh_token = match account.refresh_token.as_deref() {
            Some(stored) => self.codec.decrypt(stored)?,
            None => String::new(),
        };
        if refresh_token.is_empty() {
            let message = "TikTok account is missing a refresh token";
            self.accounts
                .mark_status(&account.id, AccountStatus::Error, Some(message))
                .await?;
            metrics::record_token_refresh("missing_refresh_token");
            return Err(AppError::AuthExpired(message.to_string()));
        }

        let tokens = match self.api.refresh_token(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) if e.is_transient() => {
                tracing::warn!(account_id = %account.id, "Transient TikTok refresh failure: {}", e);
                self.accounts.record_error(&account.id, &e.to_string()).await?;
                metrics::record_token_refresh("transient_failure");
                return Err(e);
            }
            Err(e @ AppError::Provider { .. }) => {
                let message = e.to_string();
                tracing::warn!(account_id = %account.id, "TikTok rejected token refresh: {}", message);
                self.accounts
                    .mark_status(&account.id, AccountStatus::Expired, Some(&message))
                    .await?;
                metrics::record_token_refresh("rejected");
                return Err(AppError::AuthExpired(message));
            }
            Err(e) => return Err(e),
        };

        let stored = self.secure_tokens(&tokens, Utc::now())?;
        self.accounts.update_tokens(&account.id, &stored).await?;
        let account = self.accounts.get_fresh(owner_id, account_id).await?;

        metrics::record_token_refresh("refreshed");
        tracing::info!(account_id = %account.id, forced = force, "Refreshed TikTok access token");

        Ok(RefreshOutcome {
            refreshed: true,
            account,
        })
    }

    /// Account plus a usable plaintext access token
    ///
    /// Refresh failures that need the user to reconnect surface as `AccountNotUsable`.
    pub async fn fresh_access_token(
        &self,
        owner_id: &str,
        account_id: &str,
    ) -> AppResult<(LinkedAccount, String)> {
        let outcome = self
            .refresh_access_token(owner_id, account_id, false)
            .await
            .map_err(|e| match e {
                AppError::AuthExpired(message) => AppError::AccountNotUsable(message),
                other => other,
            })?;

        let access_token = self.codec.decrypt(&outcome.account.access_token)?;
        if access_token.is_empty() {
            return Err(AppError::AccountNotUsable(
                "Missing TikTok access token".to_string(),
            ));
        }

        Ok((outcome.account, access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ServerConfig,
        db,
        tiktok::fake::{FakeTikTok, RefreshBehavior},
    };
    use std::path::PathBuf;

    struct Harness {
        service: OAuthService,
        accounts: Arc<AccountManager>,
        api: Arc<FakeTikTok>,
        codec: SecretCodec,
        db: sqlx::SqlitePool,
    }

    async fn harness() -> Harness {
        let config = ServerConfig::for_tests(PathBuf::from("./data")).tiktok;
        let db = db::create_memory_pool().await.unwrap();
        let accounts = Arc::new(AccountManager::new(db.clone(), 15, None));
        let api = Arc::new(FakeTikTok::default());
        let codec = SecretCodec::new(Some("unit-test-key"));
        let service = OAuthService::new(config, api.clone(), accounts.clone(), codec.clone());
        Harness {
            service,
            accounts,
            api,
            codec,
            db,
        }
    }

    async fn set_expiry(db: &sqlx::SqlitePool, account_id: &str, at: DateTime<Utc>) {
        sqlx::query("UPDATE linked_account SET expires_at = ?1 WHERE id = ?2")
            .bind(at)
            .bind(account_id)
            .execute(db)
            .await
            .unwrap();
    }

    #[test]
    fn test_refresh_window_boundary() {
        let grace = Duration::seconds(300);
        let expires = Utc::now() + Duration::hours(1);
        let window_start = expires - grace;

        assert!(!should_refresh(Some(expires), window_start - Duration::seconds(1), grace, false));
        assert!(should_refresh(Some(expires), window_start, grace, false));
        assert!(should_refresh(Some(expires), window_start + Duration::seconds(1), grace, false));
        assert!(should_refresh(Some(expires), expires + Duration::hours(1), grace, false));
        assert!(should_refresh(Some(expires), window_start - Duration::hours(1), grace, true));
        assert!(should_refresh(None, window_start, grace, false));
    }

    #[tokio::test]
    async fn test_start_authorization_url() {
        let h = harness().await;
        let request = h.service.start_authorization(None, Some("fixed-state")).unwrap();

        let url = reqwest::Url::parse(&request.authorization_url).unwrap();
        assert_eq!(url.path(), "/v2/auth/authorize/");
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_key"], "client-key");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "fixed-state");
        assert_eq!(pairs["code_challenge"], pkce::code_challenge(&request.code_verifier));
        assert!(pairs["scope"].contains("video.publish"));
        assert!(request.encryption_enabled);
        assert_eq!(request.redirect_uri, "https://app.example.com/api/tiktok/oauth/callback");
    }

    #[test]
    fn test_build_profile_fallbacks() {
        let tokens = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: 60,
            refresh_expires_in: None,
            scopes: vec![],
            open_id: Some("open-1".to_string()),
        };

        let profile = build_profile(None, &tokens).unwrap();
        assert_eq!(profile.provider_user_id, "open-1");
        assert_eq!(profile.username, "open-1");

        let user = UserInfo {
            open_id: Some("open-2".to_string()),
            display_name: Some("Display".to_string()),
            ..Default::default()
        };
        let profile = build_profile(Some(&user), &tokens).unwrap();
        assert_eq!(profile.provider_user_id, "open-2");
        assert_eq!(profile.username, "Display");

        let anonymous = TokenResponse { open_id: None, ..tokens };
        let user = UserInfo {
            open_id: Some("open-3".to_string()),
            ..Default::default()
        };
        assert_eq!(build_profile(Some(&user), &anonymous).unwrap().username, "tiktok_open-3");
        assert!(build_profile(None, &anonymous).is_err());
    }

    #[tokio::test]
    async fn test_callback_links_account_with_encrypted_tokens() {
        let h = harness().await;
        let outcome = h
            .service
            .handle_callback("owner-1", "code-1", "verifier", None)
            .await
            .unwrap();

        assert_eq!(h.api.count("exchange_code"), 1);
        assert_eq!(outcome.account.provider_user_id, "open-1");
        assert!(outcome.account.access_token.starts_with("enc:"));
        assert_eq!(h.codec.decrypt(&outcome.account.access_token).unwrap(), "access-1");
        assert_eq!(outcome.account.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn test_callback_requires_verifier() {
        let h = harness().await;
        let err = h.service.handle_callback("owner-1", "code", "", None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.api.count("exchange_code"), 0);
    }

    #[tokio::test]
    async fn test_profile_failure_is_tolerated() {
        let h = harness().await;
        h.api.fail_user_info();
        let outcome = h
            .service
            .handle_callback("owner-1", "code", "verifier", None)
            .await
            .unwrap();
        assert_eq!(outcome.account.username, "open-1");
    }

    #[tokio::test]
    async fn test_refresh_skipped_outside_window() {
        let h = harness().await;
        let linked = h.service.handle_callback("o", "c", "v", None).await.unwrap();
        set_expiry(&h.db, &linked.account.id, Utc::now() + Duration::seconds(301 + 5)).await;

        let outcome = h.service.refresh_access_token("o", &linked.account.id, false).await.unwrap();
        assert!(!outcome.refreshed);
        assert_eq!(h.api.count("refresh_token"), 0);
    }

    #[tokio::test]
    async fn test_refresh_inside_window() {
        let h = harness().await;
        let linked = h.service.handle_callback("o", "c", "v", None).await.unwrap();
        set_expiry(&h.db, &linked.account.id, Utc::now() + Duration::seconds(300)).await;

        let outcome = h.service.refresh_access_token("o", &linked.account.id, false).await.unwrap();
        assert!(outcome.refreshed);
        assert_eq!(h.api.count("refresh_token"), 1);
        assert_eq!(h.codec.decrypt(&outcome.account.access_token).unwrap(), "access-refreshed");
        assert!(outcome.account.expires_at.unwrap() > Utc::now() + Duration::hours(1));
        assert!(outcome.account.last_error.is_none());
    }

    #[tokio::test]
    async fn test_forced_refresh() {
        let h = harness().await;
        let linked = h.service.handle_callback("o", "c", "v", None).await.unwrap();
        let outcome = h.service.refresh_access_token("o", &linked.account.id, true).await.unwrap();
        assert!(outcome.refreshed);
    }

    #[tokio::test]
    async fn test_rejected_refresh_marks_expired() {
        let h = harness().await;
        let linked = h.service.handle_callback("o", "c", "v", None).await.unwrap();
        h.api.set_refresh_behavior(RefreshBehavior::Reject);

        let err = h.service.refresh_access_token("o", &linked.account.id, true).await.unwrap_err();
        assert!(matches!(err, AppError::AuthExpired(_)));

        let account = h.accounts.get("o", &linked.account.id).await.unwrap();
        assert_eq!(account.status, AccountStatus::Expired);
        assert!(account.last_error.is_some());
    }

    #[tokio::test]
    async fn test_transient_refresh_keeps_status() {
        let h = harness().await;
        let linked = h.service.handle_callback("o", "c", "v", None).await.unwrap();
        h.api.set_refresh_behavior(RefreshBehavior::Transient);

        let err = h.service.refresh_access_token("o", &linked.account.id, true).await.unwrap_err();
        assert!(err.is_transient());

        let account = h.accounts.get("o", &linked.account.id).await.unwrap();
        assert_eq!(account.status, AccountStatus::Active);
        assert!(account.last_error.is_some());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_marks_error() {
        let h = harness().await;
        let linked = h.service.handle_callback("o", "c", "v", None).await.unwrap();
        sqlx::query("UPDATE linked_account SET refresh_token = NULL WHERE id = ?1")
            .bind(&linked.account.id)
            .execute(&h.db)
            .await
            .unwrap();

        let err = h.service.refresh_access_token("o", &linked.account.id, true).await.unwrap_err();
        assert!(matches!(err, AppError::AuthExpired(_)));
        let account = h.accounts.get("o", &linked.account.id).await.unwrap();
        assert_eq!(account.status, AccountStatus::Error);

        let err = h.service.fresh_access_token("o", &linked.account.id).await.unwrap_err();
        assert!(matches!(err, AppError::AccountNotUsable(_)));
    }
}
