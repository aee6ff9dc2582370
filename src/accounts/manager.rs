/// Linked account manager using runtime queries
use crate::{
    accounts::{AccountStatus, LinkedAccount, OAuthProfile, PublishTarget, StoredTokens},
    error::{AppError, AppResult},
};
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Next UTC midnight strictly after `now`
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::default()))
}

/// Linked account service
pub struct AccountManager {
    db: SqlitePool,
    default_daily_limit: i64,
    max_accounts_per_owner: Option<i64>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, default_daily_limit: i64, max_accounts_per_owner: Option<i64>) -> Self {
        Self {
            db,
            default_daily_limit,
            max_accounts_per_owner,
        }
    }

    /// Insert or update the account identified by (owner, provider user)
    pub async fn upsert_from_oauth(
        &self,
        owner_id: &str,
        profile: &OAuthProfile,
        tokens: &StoredTokens,
    ) -> AppResult<LinkedAccount> {
        let existing = sqlx::query(
            "SELECT id FROM linked_account WHERE owner_id = ?1 AND provider_user_id = ?2",
        )
        .bind(owner_id)
        .bind(&profile.provider_user_id)
        .fetch_optional(&self.db)
        .await?;

        if existing.is_none() {
            self.assert_can_link_new_account(owner_id).await?;
        }

        let now = Utc::now();
        let scopes = serde_json::to_string(&tokens.scopes)
            .map_err(|e| AppError::Internal(format!("Failed to encode scopes: {}", e)))?;

        sqlx::query(
            "INSERT INTO linked_account (
                id, owner_id, provider_user_id, username, display_name, avatar_url,
                access_token, refresh_token, scopes, expires_at, status,
                daily_post_count, daily_post_limit, daily_post_reset_at,
                last_sync_at, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', 0, ?11, ?12, ?13, ?13, ?13)
             ON CONFLICT (owner_id, provider_user_id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                scopes = excluded.scopes,
                expires_at = excluded.expires_at,
                status = 'active',
                last_error = NULL,
                last_sync_at = excluded.last_sync_at,
                updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner_id)
        .bind(&profile.provider_user_id)
        .bind(&profile.username)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(scopes)
        .bind(tokens.expires_at)
        .bind(self.default_daily_limit)
        .bind(next_utc_midnight(now))
        .bind(now)
        .execute(&self.db)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM linked_account WHERE owner_id = ?1 AND provider_user_id = ?2",
        )
        .bind(owner_id)
        .bind(&profile.provider_user_id)
        .fetch_one(&self.db)
        .await?;

        let mut account = LinkedAccount::from_row(&row)?;
        self.reset_daily_quota_if_needed(&mut account, now).await?;

        tracing::info!(
            owner_id = %owner_id,
            account_id = %account.id,
            username = %account.username,
            new_link = existing.is_none(),
            "Linked TikTok account"
        );

        Ok(account)
    }

    async fn assert_can_link_new_account(&self, owner_id: &str) -> AppResult<()> {
        let Some(max) = self.max_accounts_per_owner else {
            return Ok(());
        };

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM linked_account WHERE owner_id = ?1")
            .bind(owner_id)
            .fetch_one(&self.db)
            .await?;

        if count >= max {
            let suffix = if max == 1 { "" } else { "s" };
            return Err(AppError::Conflict(format!(
                "Your plan allows {} TikTok account{}",
                max, suffix
            )));
        }

        Ok(())
    }

    /// Load an account owned by `owner_id`
    pub async fn find(&self, owner_id: &str, account_id: &str) -> AppResult<Option<LinkedAccount>> {
        let row = sqlx::query("SELECT * FROM linked_account WHERE id = ?1 AND owner_id = ?2")
            .bind(account_id)
            .bind(owner_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(LinkedAccount::from_row).transpose()
    }

    /// Load an account owned by `owner_id` or fail with `NotFound`
    pub async fn get(&self, owner_id: &str, account_id: &str) -> AppResult<LinkedAccount> {
        self.find(owner_id, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound("TikTok account not found".to_string()))
    }

    /// Load an account and lazily reset its quota window
    pub async fn get_fresh(&self, owner_id: &str, account_id: &str) -> AppResult<LinkedAccount> {
        let mut account = self.get(owner_id, account_id).await?;
        self.reset_daily_quota_if_needed(&mut account, Utc::now()).await?;
        Ok(account)
    }

    /// List an owner's accounts ordered by username
    pub async fn list(&self, owner_id: &str) -> AppResult<Vec<LinkedAccount>> {
        let rows = sqlx::query("SELECT * FROM linked_account WHERE owner_id = ?1 ORDER BY username ASC")
            .bind(owner_id)
            .fetch_all(&self.db)
            .await?;

        let now = Utc::now();
        let mut accounts = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut account = LinkedAccount::from_row(row)?;
            self.reset_daily_quota_if_needed(&mut account, now).await?;
            accounts.push(account);
        }

        Ok(accounts)
    }

    /// Delete an account and return its last state
    pub async fn disconnect(&self, owner_id: &str, account_id: &str) -> AppResult<LinkedAccount> {
        let account = self.get(owner_id, account_id).await?;

        sqlx::query("DELETE FROM linked_account WHERE id = ?1 AND owner_id = ?2")
            .bind(account_id)
            .bind(owner_id)
            .execute(&self.db)
            .await?;

        tracing::info!(owner_id = %owner_id, account_id = %account_id, "Disconnected TikTok account");

        Ok(account)
    }

    /// Set the account status and last error
    pub async fn mark_status(
        &self,
        account_id: &str,
        status: AccountStatus,
        error: Option<&str>,
    ) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE linked_account SET status = ?1, last_error = ?2, last_sync_at = ?3, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        tracing::debug!(account_id = %account_id, status = status.as_str(), "Account status updated");
        Ok(())
    }

    /// Record a transient failure without changing the status
    pub async fn record_error(&self, account_id: &str, error: &str) -> AppResult<()> {
        sqlx::query("UPDATE linked_account SET last_error = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(error)
            .bind(Utc::now())
            .bind(account_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Flip every account of a provider user to `revoked`
    pub async fn revoke_by_provider_user(&self, provider_user_id: &str) -> AppResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE linked_account SET status = 'revoked', last_error = ?1, updated_at = ?2
             WHERE provider_user_id = ?3",
        )
        .bind("Permissions revoked via webhook")
        .bind(now)
        .bind(provider_user_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Store refreshed token material and mark the account active
    pub async fn update_tokens(&self, account_id: &str, tokens: &StoredTokens) -> AppResult<()> {
        let now = Utc::now();
        let scopes = serde_json::to_string(&tokens.scopes)
            .map_err(|e| AppError::Internal(format!("Failed to encode scopes: {}", e)))?;

        sqlx::query(
            "UPDATE linked_account SET
                access_token = ?1,
                refresh_token = COALESCE(?2, refresh_token),
                scopes = ?3,
                expires_at = ?4,
                status = 'active',
                last_error = NULL,
                last_sync_at = ?5,
                updated_at = ?5
             WHERE id = ?6",
        )
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(scopes)
        .bind(tokens.expires_at)
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Reset the daily counter when the reset boundary has passed
    pub async fn reset_daily_quota_if_needed(
        &self,
        account: &mut LinkedAccount,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let due = account.daily_post_reset_at.map(|at| at <= now).unwrap_or(true);
        if !due {
            return Ok(false);
        }

        let reset_at = next_utc_midnight(now);
        if account.daily_post_limit < 1 {
            account.daily_post_limit = self.default_daily_limit;
        }

        sqlx::query(
            "UPDATE linked_account SET daily_post_count = 0, daily_post_limit = ?1, daily_post_reset_at = ?2, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(account.daily_post_limit)
        .bind(reset_at)
        .bind(now)
        .bind(&account.id)
        .execute(&self.db)
        .await?;

        account.daily_post_count = 0;
        account.daily_post_reset_at = Some(reset_at);
        account.updated_at = now;

        tracing::debug!(account_id = %account.id, reset_at = %reset_at, "Daily post quota reset");
        Ok(true)
    }

    /// Count one accepted publish against the daily quota
    pub async fn record_post_usage(&self, owner_id: &str, account_id: &str) -> AppResult<LinkedAccount> {
        let mut account = self.get(owner_id, account_id).await?;
        let now = Utc::now();
        self.reset_daily_quota_if_needed(&mut account, now).await?;

        sqlx::query(
            "UPDATE linked_account SET daily_post_count = daily_post_count + 1, last_posted_at = ?1, updated_at = ?1
             WHERE id = ?2",
        )
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await?;

        account.daily_post_count += 1;
        account.last_posted_at = Some(now);
        account.updated_at = now;
        Ok(account)
    }

    /// Check that scenario targets can be used by `owner_id`
    ///
    /// Every target must be owned and active. When auto-posting is enabled the
    /// projected daily count of each auto-post target must stay within its limit.
    pub async fn validate_targets(
        &self,
        owner_id: &str,
        targets: &[PublishTarget],
        posts_per_run: i64,
        auto_post_enabled: bool,
    ) -> AppResult<()> {
        let unique_ids: Vec<&str> = {
            let mut seen = HashSet::new();
            targets
                .iter()
                .map(|t| t.account_id.as_str())
                .filter(|id| !id.is_empty() && seen.insert(*id))
                .collect()
        };

        if unique_ids.is_empty() {
            return Ok(());
        }

        let mut accounts: HashMap<&str, LinkedAccount> = HashMap::new();
        for id in &unique_ids {
            let account = self.find(owner_id, id).await?.ok_or_else(|| {
                AppError::Validation(format!("TikTok account not found for this user: {}", id))
            })?;
            if account.status != AccountStatus::Active {
                return Err(AppError::Validation(format!(
                    "TikTok account @{} is not active. Reconnect it before using it in a scenario.",
                    account.username
                )));
            }
            accounts.insert(*id, account);
        }

        if !auto_post_enabled {
            return Ok(());
        }

        let requested = posts_per_run.max(1);
        let now = Utc::now();
        let mut checked = HashSet::new();
        for target in targets.iter().filter(|t| t.auto_post) {
            if !checked.insert(target.account_id.as_str()) {
                continue;
            }
            let Some(account) = accounts.get_mut(target.account_id.as_str()) else {
                continue;
            };
            self.reset_daily_quota_if_needed(account, now).await?;

            let projected = account.daily_post_count + requested;
            if projected > account.daily_post_limit {
                return Err(AppError::Validation(format!(
                    "Posting limit would be exceeded for @{} ({}/{} today).",
                    account.username, account.daily_post_count, account.daily_post_limit
                )));
            }
        }

        Ok(())
    }
}
