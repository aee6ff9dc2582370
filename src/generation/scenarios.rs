/// Generation scenarios
use crate::{
    accounts::{AccountManager, PublishTarget},
    error::{AppError, AppResult},
    generation::{MediaKind, ASPECT_RATIOS, MAX_ITEMS_PER_RUN},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidateUrl};

fn default_aspect_ratio() -> String {
    "9:16".to_string()
}

fn default_true() -> bool {
    true
}

const DEFAULT_MEDIA_COUNT: i64 = 4;

/// `{"id": "..."}` form of a model reference
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRef {
    pub id: String,
}

/// Scenario creation input
///
/// Video scenarios read `videoCount`, image scenarios `imageCount`. The model
/// may be given as `aiModel: {id}`, `aiModelId` or `modelId`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewScenario {
    #[serde(default)]
    pub kind: MediaKind,
    #[validate(length(min = 3, max = 120))]
    pub title: String,
    #[validate(length(min = 3))]
    pub prompt: String,
    pub video_count: Option<i64>,
    pub image_count: Option<i64>,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    pub ai_model: Option<ModelRef>,
    #[serde(alias = "modelId")]
    pub ai_model_id: Option<String>,
    #[validate(url(message = "thumbnailUrl must be a valid URL"))]
    pub thumbnail_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_auto_post_enabled: bool,
    #[serde(default)]
    pub targets: Vec<PublishTarget>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Partial scenario update
///
/// `thumbnailUrl: null` clears the thumbnail; an absent field keeps it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioUpdate {
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub video_count: Option<i64>,
    pub image_count: Option<i64>,
    pub aspect_ratio: Option<String>,
    pub ai_model: Option<ModelRef>,
    #[serde(alias = "modelId")]
    pub ai_model_id: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub thumbnail_url: Option<Option<String>>,
    pub is_auto_post_enabled: Option<bool>,
    pub targets: Option<Vec<PublishTarget>>,
}

impl ScenarioUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.prompt.is_none()
            && self.video_count.is_none()
            && self.image_count.is_none()
            && self.aspect_ratio.is_none()
            && self.ai_model.is_none()
            && self.ai_model_id.is_none()
            && self.thumbnail_url.is_none()
            && self.is_auto_post_enabled.is_none()
            && self.targets.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub owner_id: String,
    pub kind: MediaKind,
    pub title: String,
    pub prompt: String,
    pub media_count: i64,
    pub aspect_ratio: String,
    pub ai_model: String,
    pub thumbnail_url: Option<String>,
    pub is_auto_post_enabled: bool,
    pub targets: Vec<PublishTarget>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_run_summary: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn check_text(field: &str, value: &str, min: usize, max: Option<usize>) -> AppResult<String> {
    let value = value.trim();
    let len = value.chars().count();
    if len < min || max.is_some_and(|max| len > max) {
        return Err(AppError::Validation(format!("Invalid scenario: {} has an invalid length", field)));
    }
    Ok(value.to_string())
}

fn check_count(kind: MediaKind, count: Option<i64>) -> AppResult<i64> {
    let count = count.unwrap_or(DEFAULT_MEDIA_COUNT);
    if !(1..=MAX_ITEMS_PER_RUN).contains(&count) {
        return Err(AppError::Validation(format!(
            "{}Count must be between 1 and {}",
            kind.as_str(),
            MAX_ITEMS_PER_RUN
        )));
    }
    Ok(count)
}

fn check_aspect_ratio(value: &str) -> AppResult<()> {
    if !ASPECT_RATIOS.contains(&value) {
        return Err(AppError::Validation(format!(
            "aspectRatio must be one of {}",
            ASPECT_RATIOS.join(", ")
        )));
    }
    Ok(())
}

fn check_thumbnail(value: Option<String>) -> AppResult<Option<String>> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(url) if !url.validate_url() => {
            Err(AppError::Validation("thumbnailUrl must be a valid URL".to_string()))
        }
        other => Ok(other),
    }
}

fn requested_model(model: Option<ModelRef>, model_id: Option<String>) -> Option<String> {
    model.map(|m| m.id).or(model_id)
}

/// Drop targets without an account id; a repeated account keeps its last entry
fn normalize_targets(targets: Vec<PublishTarget>) -> Vec<PublishTarget> {
    let mut order = Vec::new();
    let mut by_account: HashMap<String, PublishTarget> = HashMap::new();
    for target in targets {
        let account_id = target.account_id.trim().to_string();
        if account_id.is_empty() {
            continue;
        }
        if !by_account.contains_key(&account_id) {
            order.push(account_id.clone());
        }
        by_account.insert(account_id.clone(), PublishTarget { account_id, ..target });
    }
    order
        .into_iter()
        .filter_map(|id| by_account.remove(&id))
        .collect()
}

impl Scenario {
    /// Validate input and build a new scenario
    ///
    /// Image scenarios never auto-post.
    pub fn new(owner_id: &str, mut input: NewScenario) -> AppResult<Self> {
        input.title = input.title.trim().to_string();
        input.prompt = input.prompt.trim().to_string();
        input
            .validate()
            .map_err(|e| AppError::Validation(format!("Invalid scenario: {}", e)))?;
        check_aspect_ratio(&input.aspect_ratio)?;

        let kind = input.kind;
        let count = match kind {
            MediaKind::Video => input.video_count,
            MediaKind::Image => input.image_count,
        };
        let media_count = check_count(kind, count)?;
        let ai_model = kind.resolve_model(requested_model(input.ai_model, input.ai_model_id).as_deref())?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            kind,
            title: input.title,
            prompt: input.prompt,
            media_count,
            aspect_ratio: input.aspect_ratio,
            ai_model,
            thumbnail_url: check_thumbnail(input.thumbnail_url)?,
            is_auto_post_enabled: kind == MediaKind::Video && input.is_auto_post_enabled,
            targets: normalize_targets(input.targets),
            last_run_at: None,
            last_error: None,
            last_run_summary: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a partial update; the media kind never changes
    pub fn apply(&mut self, update: ScenarioUpdate) -> AppResult<()> {
        if update.is_empty() {
            return Err(AppError::Validation("At least one field must be provided".to_string()));
        }

        if let Some(title) = update.title {
            self.title = check_text("title", &title, 3, Some(120))?;
        }
        if let Some(prompt) = update.prompt {
            self.prompt = check_text("prompt", &prompt, 3, None)?;
        }
        let count = match self.kind {
            MediaKind::Video => update.video_count,
            MediaKind::Image => update.image_count,
        };
        if count.is_some() {
            self.media_count = check_count(self.kind, count)?;
        }
        if let Some(aspect_ratio) = update.aspect_ratio {
            check_aspect_ratio(&aspect_ratio)?;
            self.aspect_ratio = aspect_ratio;
        }
        if let Some(model) = requested_model(update.ai_model, update.ai_model_id) {
            self.ai_model = self.kind.resolve_model(Some(&model))?;
        }
        if let Some(thumbnail) = update.thumbnail_url {
            self.thumbnail_url = check_thumbnail(thumbnail)?;
        }
        if let Some(enabled) = update.is_auto_post_enabled {
            self.is_auto_post_enabled = self.kind == MediaKind::Video && enabled;
        }
        if let Some(targets) = update.targets {
            self.targets = normalize_targets(targets);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let targets: String = row.try_get("targets")?;
        let summary: Option<String> = row.try_get("last_run_summary")?;
        let auto_post: i64 = row.try_get("is_auto_post_enabled")?;
        let kind: String = row.try_get("kind")?;

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            kind: MediaKind::parse(&kind)?,
            title: row.try_get("title")?,
            prompt: row.try_get("prompt")?,
            media_count: row.try_get("media_count")?,
            aspect_ratio: row.try_get("aspect_ratio")?,
            ai_model: row.try_get("ai_model")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            is_auto_post_enabled: auto_post != 0,
            targets: serde_json::from_str(&targets).unwrap_or_default(),
            last_run_at: row.try_get("last_run_at")?,
            last_error: row.try_get("last_error")?,
            last_run_summary: summary.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Targets that take part in auto-posting
    pub fn auto_post_targets(&self) -> impl Iterator<Item = &PublishTarget> {
        self.targets.iter().filter(|t| t.auto_post)
    }
}

fn encode_targets(targets: &[PublishTarget]) -> AppResult<String> {
    serde_json::to_string(targets).map_err(|e| AppError::Internal(format!("Failed to encode targets: {}", e)))
}

/// Scenario persistence
pub struct ScenarioStore {
    db: SqlitePool,
    accounts: Arc<AccountManager>,
}

impl ScenarioStore {
    pub fn new(db: SqlitePool, accounts: Arc<AccountManager>) -> Self {
        Self { db, accounts }
    }

    /// Create a scenario after checking its targets
    pub async fn create(&self, owner_id: &str, input: NewScenario) -> AppResult<Scenario> {
        let scenario = Scenario::new(owner_id, input)?;
        self.accounts
            .validate_targets(
                owner_id,
                &scenario.targets,
                scenario.media_count,
                scenario.is_auto_post_enabled,
            )
            .await?;

        sqlx::query(
            "INSERT INTO scenario (id, owner_id, kind, title, prompt, media_count, aspect_ratio, ai_model,
                thumbnail_url, is_auto_post_enabled, targets, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        )
        .bind(&scenario.id)
        .bind(&scenario.owner_id)
        .bind(scenario.kind.as_str())
        .bind(&scenario.title)
        .bind(&scenario.prompt)
        .bind(scenario.media_count)
        .bind(&scenario.aspect_ratio)
        .bind(&scenario.ai_model)
        .bind(&scenario.thumbnail_url)
        .bind(scenario.is_auto_post_enabled as i64)
        .bind(encode_targets(&scenario.targets)?)
        .bind(scenario.created_at)
        .execute(&self.db)
        .await?;

        tracing::info!(
            owner_id = %owner_id,
            scenario_id = %scenario.id,
            kind = scenario.kind.as_str(),
            targets = scenario.targets.len(),
            "Created scenario"
        );
        Ok(scenario)
    }

    /// Update a scenario, re-checking targets against the resulting values
    pub async fn update(&self, owner_id: &str, scenario_id: &str, update: ScenarioUpdate) -> AppResult<Scenario> {
        let mut scenario = self.get(owner_id, scenario_id).await?;
        scenario.apply(update)?;
        self.accounts
            .validate_targets(
                owner_id,
                &scenario.targets,
                scenario.media_count,
                scenario.is_auto_post_enabled,
            )
            .await?;

        let result = sqlx::query(
            "UPDATE scenario SET title = ?1, prompt = ?2, media_count = ?3, aspect_ratio = ?4, ai_model = ?5,
                thumbnail_url = ?6, is_auto_post_enabled = ?7, targets = ?8, updated_at = ?9
             WHERE id = ?10 AND owner_id = ?11",
        )
        .bind(&scenario.title)
        .bind(&scenario.prompt)
        .bind(scenario.media_count)
        .bind(&scenario.aspect_ratio)
        .bind(&scenario.ai_model)
        .bind(&scenario.thumbnail_url)
        .bind(scenario.is_auto_post_enabled as i64)
        .bind(encode_targets(&scenario.targets)?)
        .bind(scenario.updated_at)
        .bind(scenario_id)
        .bind(owner_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Scenario not found".to_string()));
        }

        tracing::info!(owner_id = %owner_id, scenario_id = %scenario_id, "Updated scenario");
        Ok(scenario)
    }

    pub async fn delete(&self, owner_id: &str, scenario_id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM scenario WHERE id = ?1 AND owner_id = ?2")
            .bind(scenario_id)
            .bind(owner_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Scenario not found".to_string()));
        }

        tracing::info!(owner_id = %owner_id, scenario_id = %scenario_id, "Deleted scenario");
        Ok(())
    }

    /// Newest first, optionally limited to one media kind
    pub async fn list(&self, owner_id: &str, kind: Option<MediaKind>) -> AppResult<Vec<Scenario>> {
        let rows = sqlx::query(
            "SELECT * FROM scenario WHERE owner_id = ?1 AND (?2 IS NULL OR kind = ?2) ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(Scenario::from_row).collect()
    }

    pub async fn find(&self, owner_id: &str, scenario_id: &str) -> AppResult<Option<Scenario>> {
        let row = sqlx::query("SELECT * FROM scenario WHERE id = ?1 AND owner_id = ?2")
            .bind(scenario_id)
            .bind(owner_id)
            .fetch_optional(&self.db)
            .await?;

        row.as_ref().map(Scenario::from_row).transpose()
    }

    pub async fn get(&self, owner_id: &str, scenario_id: &str) -> AppResult<Scenario> {
        self.find(owner_id, scenario_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Scenario not found".to_string()))
    }

    /// A run was accepted by the automation webhook
    pub async fn mark_run_started(&self, scenario_id: &str) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query("UPDATE scenario SET last_run_at = ?1, last_error = NULL, updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(scenario_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn record_error(&self, scenario_id: &str, error: &str) -> AppResult<()> {
        sqlx::query("UPDATE scenario SET last_error = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(error)
            .bind(Utc::now())
            .bind(scenario_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Store the outcome of an auto-post fan-out
    pub async fn record_summary(&self, scenario_id: &str, summary: &Value) -> AppResult<()> {
        sqlx::query("UPDATE scenario SET last_run_summary = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(summary.to_string())
            .bind(Utc::now())
            .bind(scenario_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::manager::tests::{sample_profile, sample_tokens},
        db,
        tiktok::Privacy,
    };
    use serde_json::json;

    fn input(targets: Vec<PublishTarget>) -> NewScenario {
        NewScenario {
            title: "  Daily cats ".to_string(),
            prompt: "A cat playing piano".to_string(),
            video_count: Some(2),
            aspect_ratio: "9:16".to_string(),
            is_auto_post_enabled: true,
            targets,
            ..Default::default()
        }
    }

    fn target(account_id: &str, privacy: Privacy) -> PublishTarget {
        PublishTarget {
            account_id: account_id.to_string(),
            privacy,
            auto_post: true,
        }
    }

    async fn store() -> (ScenarioStore, Arc<AccountManager>) {
        let pool = db::create_memory_pool().await.unwrap();
        let accounts = Arc::new(AccountManager::new(pool.clone(), 15, None));
        (ScenarioStore::new(pool, accounts.clone()), accounts)
    }

    #[test]
    fn test_new_validates_fields() {
        let scenario = Scenario::new("o", input(vec![])).unwrap();
        assert_eq!(scenario.title, "Daily cats");

        let mut bad = input(vec![]);
        bad.video_count = Some(21);
        assert!(matches!(Scenario::new("o", bad), Err(AppError::Validation(_))));

        let mut bad = input(vec![]);
        bad.aspect_ratio = "4:3".to_string();
        assert!(matches!(Scenario::new("o", bad), Err(AppError::Validation(_))));

        let mut bad = input(vec![]);
        bad.title = "  a ".to_string();
        assert!(Scenario::new("o", bad).is_err());

        let mut bad = input(vec![]);
        bad.ai_model_id = Some("sora".to_string());
        assert!(matches!(Scenario::new("o", bad), Err(AppError::Validation(_))));

        let mut bad = input(vec![]);
        bad.thumbnail_url = Some("not a url".to_string());
        assert!(matches!(Scenario::new("o", bad), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_model_and_thumbnail_inputs() {
        let parsed: NewScenario = serde_json::from_value(json!({
            "title": "Title",
            "prompt": "Prompt",
            "aiModel": {"id": "midjourney-v7"},
            "thumbnailUrl": "https://cdn.example/thumb.jpg"
        }))
        .unwrap();
        let scenario = Scenario::new("o", parsed).unwrap();
        assert_eq!(scenario.ai_model, "midjourney-v7");
        assert_eq!(scenario.thumbnail_url.as_deref(), Some("https://cdn.example/thumb.jpg"));

        let parsed: NewScenario =
            serde_json::from_value(json!({"title": "Title", "prompt": "Prompt", "modelId": "flux-1-kontext-pro"}))
                .unwrap();
        assert_eq!(Scenario::new("o", parsed).unwrap().ai_model, "flux-1-kontext-pro");
    }

    #[test]
    fn test_image_scenarios() {
        let parsed: NewScenario = serde_json::from_value(json!({
            "kind": "image",
            "title": "Posters",
            "prompt": "Retro poster",
            "imageCount": 6,
            "videoCount": 2,
            "isAutoPostEnabled": true
        }))
        .unwrap();
        let scenario = Scenario::new("o", parsed).unwrap();
        assert_eq!(scenario.kind, MediaKind::Image);
        assert_eq!(scenario.media_count, 6);
        assert_eq!(scenario.ai_model, "gpt4o-image");
        assert!(!scenario.is_auto_post_enabled);
    }

    #[test]
    fn test_apply_update() {
        let mut scenario = Scenario::new("o", input(vec![])).unwrap();
        scenario.thumbnail_url = Some("https://cdn.example/a.jpg".to_string());

        assert!(matches!(scenario.apply(ScenarioUpdate::default()), Err(AppError::Validation(_))));

        let update: ScenarioUpdate = serde_json::from_value(json!({"title": " Renamed ", "videoCount": 5})).unwrap();
        scenario.apply(update).unwrap();
        assert_eq!(scenario.title, "Renamed");
        assert_eq!(scenario.media_count, 5);
        assert!(scenario.thumbnail_url.is_some());

        let update: ScenarioUpdate = serde_json::from_value(json!({"thumbnailUrl": null})).unwrap();
        assert!(!update.is_empty());
        scenario.apply(update).unwrap();
        assert!(scenario.thumbnail_url.is_none());

        let update: ScenarioUpdate = serde_json::from_value(json!({"videoCount": 0})).unwrap();
        assert!(scenario.apply(update).is_err());
    }

    #[test]
    fn test_targets_are_deduplicated() {
        let scenario = Scenario::new(
            "o",
            input(vec![
                target("a1", Privacy::Public),
                target(" ", Privacy::Public),
                target("a2", Privacy::Public),
                target("a1", Privacy::Private),
            ]),
        )
        .unwrap();

        assert_eq!(scenario.targets.len(), 2);
        assert_eq!(scenario.targets[0].account_id, "a1");
        assert_eq!(scenario.targets[0].privacy, Privacy::Private);
    }

    #[test]
    fn test_input_defaults() {
        let parsed: NewScenario = serde_json::from_value(json!({"title": "Title", "prompt": "Prompt"})).unwrap();
        assert_eq!(parsed.kind, MediaKind::Video);
        assert_eq!(parsed.aspect_ratio, "9:16");
        assert!(parsed.is_auto_post_enabled);

        let scenario = Scenario::new("o", parsed).unwrap();
        assert_eq!(scenario.media_count, 4);
        assert_eq!(scenario.ai_model, "gpt4o-video");
        assert!(scenario.thumbnail_url.is_none());
    }

    #[tokio::test]
    async fn test_create_checks_target_ownership() {
        let (store, accounts) = store().await;
        let err = store.create("o", input(vec![target("missing", Privacy::Public)])).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let account = accounts
            .upsert_from_oauth("o", &sample_profile("p1"), &sample_tokens(&["video.publish"]))
            .await
            .unwrap();
        let created = store.create("o", input(vec![target(&account.id, Privacy::Friends)])).await.unwrap();

        let listed = store.list("o", None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].targets, created.targets);
        assert!(store.list("o", Some(MediaKind::Image)).await.unwrap().is_empty());
        assert!(store.list("other", None).await.unwrap().is_empty());
        assert!(matches!(store.get("other", &created.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (store, accounts) = store().await;
        let account = accounts
            .upsert_from_oauth("o", &sample_profile("p1"), &sample_tokens(&["video.publish"]))
            .await
            .unwrap();
        let mut new = input(vec![]);
        new.ai_model_id = Some("midjourney-v7".to_string());
        let created = store.create("o", new).await.unwrap();

        let update = ScenarioUpdate {
            prompt: Some("A dog on drums".to_string()),
            ai_model: Some(ModelRef { id: "flux-1-kontext-pro".to_string() }),
            targets: Some(vec![target(&account.id, Privacy::Public)]),
            ..Default::default()
        };
        let updated = store.update("o", &created.id, update).await.unwrap();
        assert_eq!(updated.ai_model, "flux-1-kontext-pro");

        let loaded = store.get("o", &created.id).await.unwrap();
        assert_eq!(loaded.prompt, "A dog on drums");
        assert_eq!(loaded.ai_model, "flux-1-kontext-pro");
        assert_eq!(loaded.targets.len(), 1);

        // 4 videos per run on an account that already posted 13 of 15 today.
        sqlx::query("UPDATE linked_account SET daily_post_count = 13 WHERE id = ?1")
            .bind(&account.id)
            .execute(&store.db)
            .await
            .unwrap();
        let update = ScenarioUpdate { video_count: Some(4), ..Default::default() };
        assert!(matches!(store.update("o", &created.id, update).await, Err(AppError::Validation(_))));
        assert_eq!(store.get("o", &created.id).await.unwrap().media_count, 2);

        let update = ScenarioUpdate { title: Some("Other owner".to_string()), ..Default::default() };
        assert!(matches!(store.update("other", &created.id, update).await, Err(AppError::NotFound(_))));

        assert!(matches!(store.delete("other", &created.id).await, Err(AppError::NotFound(_))));
        store.delete("o", &created.id).await.unwrap();
        assert!(store.find("o", &created.id).await.unwrap().is_none());
        assert!(matches!(store.delete("o", &created.id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_run_bookkeeping() {
        let (store, _) = store().await;
        let scenario = store.create("o", input(vec![])).await.unwrap();

        store.record_error(&scenario.id, "webhook down").await.unwrap();
        assert_eq!(store.get("o", &scenario.id).await.unwrap().last_error.as_deref(), Some("webhook down"));

        store.mark_run_started(&scenario.id).await.unwrap();
        store.record_summary(&scenario.id, &json!({"attempted": 2})).await.unwrap();
        let loaded = store.get("o", &scenario.id).await.unwrap();
        assert!(loaded.last_error.is_none());
        assert!(loaded.last_run_at.is_some());
        assert_eq!(loaded.last_run_summary, Some(json!({"attempted": 2})));
    }
}
