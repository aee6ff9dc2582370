/// Video and image generation runs
///
/// Scenarios describe what to generate; runs track one request to the
/// automation webhook until its completion callback arrives. Completed video
/// runs can fan out to the scenario's TikTok targets.
pub mod pipeline;
pub mod reconcile;
pub mod runs;
pub mod scenarios;
pub mod storage;

pub use pipeline::{GenerationPipeline, GenerationTrigger, HttpGenerationTrigger};
pub use runs::RunStore;
pub use scenarios::{Scenario, ScenarioStore};
pub use storage::{AssetStorage, HttpMediaFetcher, MediaFetcher};

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

/// Accepted aspect ratios
pub const ASPECT_RATIOS: [&str; 3] = ["16:9", "9:16", "1:1"];

/// Most items a single run may request
pub const MAX_ITEMS_PER_RUN: i64 = 20;

pub const VIDEO_MODELS: [&str; 4] = ["gpt4o-video", "flux-1-kontext-pro", "midjourney-v7", "midjourney-niji-6"];
pub const IMAGE_MODELS: [&str; 4] = ["gpt4o-image", "flux-1-kontext-pro", "midjourney-v7", "midjourney-niji-6"];

/// What a scenario generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Video,
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "video" => Ok(MediaKind::Video),
            "image" => Ok(MediaKind::Image),
            other => Err(AppError::Internal(format!("Unknown media kind: {}", other))),
        }
    }

    /// File extension used when the asset URL has none
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Video => ".mp4",
            MediaKind::Image => ".jpg",
        }
    }

    pub fn models(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Video => &VIDEO_MODELS,
            MediaKind::Image => &IMAGE_MODELS,
        }
    }

    /// Catalog model id; the first entry when none is requested
    pub fn resolve_model(&self, requested: Option<&str>) -> AppResult<String> {
        let models = self.models();
        match requested.map(str::trim).filter(|m| !m.is_empty()) {
            None => Ok(models[0].to_string()),
            Some(id) if models.contains(&id) => Ok(id.to_string()),
            Some(id) => Err(AppError::Validation(format!(
                "Unknown {} model '{}'. Expected one of {}",
                self.as_str(),
                id,
                models.join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Generating => "generating",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(RunStatus::Pending),
            "generating" => Ok(RunStatus::Generating),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(AppError::Internal(format!("Unknown run status: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    #[default]
    Manual,
    Schedule,
    Retry,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Manual => "manual",
            RunTrigger::Schedule => "schedule",
            RunTrigger::Retry => "retry",
        }
    }

    /// Unknown values fall back to manual
    pub fn parse(value: &str) -> Self {
        match value {
            "schedule" => RunTrigger::Schedule,
            "retry" => RunTrigger::Retry,
            _ => RunTrigger::Manual,
        }
    }
}

/// A generated video or image kept on a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAsset {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

/// One generation request and its outcome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRun {
    pub id: String,
    pub owner_id: String,
    pub scenario_id: Option<String>,
    pub kind: MediaKind,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub requested_count: i64,
    pub generated_count: i64,
    pub prompt: String,
    pub expanded_prompt: Option<String>,
    pub ai_model: Option<String>,
    pub execution_id: Option<String>,
    pub assets: Vec<GeneratedAsset>,
    pub error: Option<RunError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assets_deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl GenerationRun {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let kind: String = row.try_get("kind")?;
        let trigger: String = row.try_get("trigger_kind")?;
        let status: String = row.try_get("status")?;
        let assets: String = row.try_get("assets")?;
        let error_code: Option<String> = row.try_get("error_code")?;
        let error_message: Option<String> = row.try_get("error_message")?;

        let error = match (error_code, error_message) {
            (None, None) => None,
            (code, message) => Some(RunError {
                code: code.unwrap_or_else(|| "error".to_string()),
                message: message.unwrap_or_else(|| "Generation failed".to_string()),
            }),
        };

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            scenario_id: row.try_get("scenario_id")?,
            kind: MediaKind::parse(&kind)?,
            trigger: RunTrigger::parse(&trigger),
            status: RunStatus::parse(&status)?,
            requested_count: row.try_get("requested_count")?,
            generated_count: row.try_get("generated_count")?,
            prompt: row.try_get("prompt")?,
            expanded_prompt: row.try_get("expanded_prompt")?,
            ai_model: row.try_get("ai_model")?,
            execution_id: row.try_get("execution_id")?,
            assets: serde_json::from_str(&assets).unwrap_or_default(),
            error,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            assets_deleted_at: row.try_get("assets_deleted_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Generating.is_terminal());
        assert_eq!(RunStatus::parse("pending").unwrap(), RunStatus::Pending);
        assert_eq!(RunTrigger::parse("cron"), RunTrigger::Manual);
    }

    #[test]
    fn test_model_resolution_per_kind() {
        assert_eq!(MediaKind::Video.resolve_model(None).unwrap(), "gpt4o-video");
        assert_eq!(MediaKind::Image.resolve_model(Some(" ")).unwrap(), "gpt4o-image");
        assert_eq!(MediaKind::Image.resolve_model(Some("midjourney-v7")).unwrap(), "midjourney-v7");
        assert!(matches!(
            MediaKind::Image.resolve_model(Some("gpt4o-video")),
            Err(AppError::Validation(_))
        ));
        assert_eq!(MediaKind::Image.default_extension(), ".jpg");
        assert_eq!(MediaKind::parse("image").unwrap(), MediaKind::Image);
    }

    #[test]
    fn test_asset_serialization_skips_empty_fields() {
        let asset = GeneratedAsset {
            url: "https://cdn/a.mp4".to_string(),
            prompt_index: Some(0),
            ..Default::default()
        };
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json, serde_json::json!({"url": "https://cdn/a.mp4", "promptIndex": 0}));
    }
}
