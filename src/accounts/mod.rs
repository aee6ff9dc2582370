/// Linked social account management
///
/// Handles per-owner TikTok accounts: OAuth upserts, status changes,
/// daily posting quotas and the serialized views returned by the API.
pub(crate) mod manager;

pub use manager::{next_utc_midnight, AccountManager};

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

/// Lifecycle state of a linked account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Revoked,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Expired => "expired",
            AccountStatus::Revoked => "revoked",
            AccountStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "active" => Ok(AccountStatus::Active),
            "expired" => Ok(AccountStatus::Expired),
            "revoked" => Ok(AccountStatus::Revoked),
            "error" => Ok(AccountStatus::Error),
            other => Err(AppError::Internal(format!("Unknown account status: {}", other))),
        }
    }
}

/// A TikTok account linked to an owner
///
/// Token fields hold the stored (possibly encrypted) form.
#[derive(Debug, Clone)]
pub struct LinkedAccount {
    pub id: String,
    pub owner_id: String,
    pub provider_user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub daily_post_count: i64,
    pub daily_post_limit: i64,
    pub daily_post_reset_at: Option<DateTime<Utc>>,
    pub last_posted_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkedAccount {
    /// Build an account from a `linked_account` row
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let scopes_json: String = row.try_get("scopes")?;
        let scopes = serde_json::from_str(&scopes_json).unwrap_or_default();
        let status: String = row.try_get("status")?;

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            provider_user_id: row.try_get("provider_user_id")?,
            username: row.try_get("username")?,
            display_name: row.try_get("display_name")?,
            avatar_url: row.try_get("avatar_url")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            scopes,
            expires_at: row.try_get("expires_at")?,
            status: AccountStatus::parse(&status)?,
            daily_post_count: row.try_get("daily_post_count")?,
            daily_post_limit: row.try_get("daily_post_limit")?,
            daily_post_reset_at: row.try_get("daily_post_reset_at")?,
            last_posted_at: row.try_get("last_posted_at")?,
            last_sync_at: row.try_get("last_sync_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Serialized form that never exposes token material
    pub fn view(&self) -> AccountView {
        AccountView {
            id: self.id.clone(),
            provider_user_id: self.provider_user_id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
            scopes: self.scopes.clone(),
            expires_at: self.expires_at,
            status: self.status,
            daily_post_count: self.daily_post_count,
            daily_post_limit: self.daily_post_limit,
            daily_post_reset_at: self.daily_post_reset_at,
            last_posted_at: self.last_posted_at,
            last_sync_at: self.last_sync_at,
            last_error: self.last_error.clone(),
            has_refresh_token: self
                .refresh_token
                .as_deref()
                .map(|t| !t.is_empty())
                .unwrap_or(false),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Account as returned to API callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub provider_user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: AccountStatus,
    pub daily_post_count: i64,
    pub daily_post_limit: i64,
    pub daily_post_reset_at: Option<DateTime<Utc>>,
    pub last_posted_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub has_refresh_token: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized TikTok profile used to link an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub provider_user_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Token material ready for storage (already passed through the codec)
#[derive(Debug, Clone)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Destination of a scenario's auto-post fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishTarget {
    pub account_id: String,
    #[serde(default)]
    pub privacy: crate::tiktok::Privacy,
    #[serde(default = "default_auto_post")]
    pub auto_post: bool,
}

fn default_auto_post() -> bool {
    true
}
