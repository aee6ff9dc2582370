/// Publish log backing idempotent publishes
///
/// One row per (owner, account, idempotency key). The unique index is what
/// serializes concurrent attempts with the same key.
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Created,
    Published,
    Failed,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Created => "created",
            PublishStatus::Published => "published",
            PublishStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> AppResult<Self> {
        match value {
            "created" => Ok(PublishStatus::Created),
            "published" => Ok(PublishStatus::Published),
            "failed" => Ok(PublishStatus::Failed),
            other => Err(AppError::Internal(format!("Unknown publish status: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub id: String,
    pub owner_id: String,
    pub account_id: String,
    pub idempotency_key: String,
    pub video_id: Option<String>,
    pub provider_post_id: Option<String>,
    pub status: PublishStatus,
    pub error: Option<String>,
    pub request_snapshot: Option<Value>,
    pub response_snapshot: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishRecord {
    fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let status: String = row.try_get("status")?;
        let request: Option<String> = row.try_get("request_snapshot")?;
        let response: Option<String> = row.try_get("response_snapshot")?;

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            account_id: row.try_get("account_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            video_id: row.try_get("video_id")?,
            provider_post_id: row.try_get("provider_post_id")?,
            status: PublishStatus::parse(&status)?,
            error: row.try_get("error")?,
            request_snapshot: request.and_then(|s| serde_json::from_str(&s).ok()),
            response_snapshot: response.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Result of trying to claim an idempotency key
#[derive(Debug)]
pub enum Claim {
    /// This attempt owns the key
    Claimed,
    /// A previous attempt already published
    Replay(PublishRecord),
    /// Another attempt holds the key and has not finished
    InFlight,
}

/// Age after which an unfinished `created` claim may be taken over
pub const STALE_CLAIM_MINUTES: i64 = 15;

/// Publish log store
pub struct PublishLog {
    db: SqlitePool,
    stale_after: Duration,
}

impl PublishLog {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            stale_after: Duration::minutes(STALE_CLAIM_MINUTES),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub async fn find(
        &self,
        owner_id: &str,
        account_id: &str,
        key: &str,
    ) -> AppResult<Option<PublishRecord>> {
        let row = sqlx::query(
            "SELECT * FROM publish_record WHERE owner_id = ?1 AND account_id = ?2 AND idempotency_key = ?3",
        )
        .bind(owner_id)
        .bind(account_id)
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(PublishRecord::from_row).transpose()
    }

    /// Claim `key` for a new attempt
    ///
    /// A fresh key inserts a `created` row. A `failed` row, or a `created` row
    /// untouched for longer than the stale window, is taken over with a
    /// conditional update so only one retry wins.
    pub async fn claim(
        &self,
        owner_id: &str,
        account_id: &str,
        key: &str,
        request: &Value,
    ) -> AppResult<Claim> {
        let now = Utc::now();
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO publish_record
                (id, owner_id, account_id, idempotency_key, status, request_snapshot, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'created', ?5, ?6, ?6)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(owner_id)
        .bind(account_id)
        .bind(key)
        .bind(request.to_string())
        .bind(now)
        .execute(&self.db)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(Claim::Claimed);
        }

        let Some(existing) = self.find(owner_id, account_id, key).await? else {
            return Err(AppError::Internal("Publish record vanished during claim".to_string()));
        };

        if existing.provider_post_id.is_some() {
            return Ok(Claim::Replay(existing));
        }

        let stale_before = now - self.stale_after;
        let stale = existing.status == PublishStatus::Created && existing.updated_at <= stale_before;
        if existing.status != PublishStatus::Failed && !stale {
            return Ok(Claim::InFlight);
        }

        let reclaimed = sqlx::query(
            "UPDATE publish_record SET status = 'created', error = NULL, request_snapshot = ?1, updated_at = ?2
             WHERE id = ?3 AND provider_post_id IS NULL
               AND (status = 'failed' OR (status = 'created' AND updated_at <= ?4))",
        )
        .bind(request.to_string())
        .bind(now)
        .bind(&existing.id)
        .bind(stale_before)
        .execute(&self.db)
        .await?;

        if reclaimed.rows_affected() == 1 {
            if stale {
                tracing::warn!(
                    account_id = %account_id,
                    key = %key,
                    "Took over stale publish claim"
                );
            }
            Ok(Claim::Claimed)
        } else {
            Ok(Claim::InFlight)
        }
    }

    pub async fn mark_published(
        &self,
        owner_id: &str,
        account_id: &str,
        key: &str,
        video_id: Option<&str>,
        post_id: &str,
        response: &Value,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE publish_record SET status = 'published', video_id = ?1, provider_post_id = ?2,
                response_snapshot = ?3, error = NULL, updated_at = ?4
             WHERE owner_id = ?5 AND account_id = ?6 AND idempotency_key = ?7",
        )
        .bind(video_id)
        .bind(post_id)
        .bind(response.to_string())
        .bind(Utc::now())
        .bind(owner_id)
        .bind(account_id)
        .bind(key)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, owner_id: &str, account_id: &str, key: &str, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE publish_record SET status = 'failed', error = ?1, updated_at = ?2
             WHERE owner_id = ?3 AND account_id = ?4 AND idempotency_key = ?5",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(owner_id)
        .bind(account_id)
        .bind(key)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
