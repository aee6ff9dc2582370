/// Generation run lifecycle
///
/// Runs are enqueued by posting the scenario to the automation webhook and
/// finished by its completion callback. Progress callbacks keep the run open.
/// A completed video run with assets is published to every auto-post target
/// of its scenario.
use crate::{
    config::GenerationConfig,
    error::{AppError, AppResult},
    generation::{
        reconcile, AssetStorage, GeneratedAsset, GenerationRun, MediaKind, RunError, RunStatus,
        RunStore, RunTrigger, Scenario, ScenarioStore,
    },
    metrics,
    tiktok::{
        publish::{PublishRequest, PublishService},
        truncate_caption, VideoSource,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Runs returned by a listing
pub const RUN_LIST_LIMIT: i64 = 50;

/// Starts generation jobs on the automation side
#[async_trait]
pub trait GenerationTrigger: Send + Sync {
    /// Send the job payload to the webhook for `kind`; returns the response body
    async fn trigger(&self, kind: MediaKind, payload: &Value) -> AppResult<Value>;
}

/// Posts jobs to the configured automation webhooks
pub struct HttpGenerationTrigger {
    http: reqwest::Client,
    video_webhook_url: Option<String>,
    image_webhook_url: Option<String>,
}

impl HttpGenerationTrigger {
    pub fn new(config: &GenerationConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            video_webhook_url: config.webhook_url.clone(),
            image_webhook_url: config.image_webhook_url.clone(),
        })
    }
}

#[async_trait]
impl GenerationTrigger for HttpGenerationTrigger {
    async fn trigger(&self, kind: MediaKind, payload: &Value) -> AppResult<Value> {
        let url = match kind {
            MediaKind::Video => self.video_webhook_url.as_deref(),
            MediaKind::Image => self.image_webhook_url.as_deref(),
        }
        .ok_or_else(|| {
            AppError::Configuration(format!("{} generation webhook URL is not configured", kind.as_str()))
        })?;

        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(AppError::transport)?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let snippet: String = text.chars().take(500).collect();
            return Err(AppError::provider(
                status.as_u16().to_string(),
                format!("Generation webhook failed ({}): {}", status, snippet),
            ));
        }

        // Automation webhooks often answer with plain text
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({})))
    }
}

/// One failed destination in a fan-out
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutError {
    pub account_id: String,
    pub asset_index: usize,
    pub error: String,
}

/// Outcome of publishing a run to its targets
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutSummary {
    pub run_id: String,
    pub attempted: usize,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<FanOutError>,
    pub published_at: DateTime<Utc>,
}

/// What a callback did
#[derive(Debug)]
pub enum CallbackOutcome {
    /// No run with that id
    Ignored { run_id: String },
    /// The run had already finished
    AlreadyTerminal { run_id: String },
    Applied {
        run: GenerationRun,
        fan_out: Option<FanOutSummary>,
    },
}

/// Idempotency key for one asset published to one account
pub fn fan_out_key(run_id: &str, account_id: &str, asset_index: usize) -> String {
    format!("run:{}:account:{}:asset:{}", run_id, account_id, asset_index)
}

/// Body sent to the automation webhook
pub fn build_webhook_payload(config: &GenerationConfig, scenario: &Scenario, run: &GenerationRun) -> Value {
    let targets: Vec<Value> = scenario
        .targets
        .iter()
        .map(|t| {
            json!({
                "accountId": t.account_id,
                "privacy": t.privacy.as_str(),
                "autoPost": t.auto_post,
            })
        })
        .collect();

    let resolution = match scenario.aspect_ratio.as_str() {
        "16:9" => &config.resolution_16_9,
        "1:1" => &config.resolution_1_1,
        _ => &config.resolution_9_16,
    };

    let count_key = match scenario.kind {
        MediaKind::Video => "video_count",
        MediaKind::Image => "image_count",
    };

    let mut payload = json!({
        "user_id": scenario.owner_id,
        "content_id": scenario.id,
        "prompt": scenario.prompt,
        count_key: scenario.media_count,
        "model": scenario.ai_model,
        "thumbnail_url": scenario.thumbnail_url,
        "publish_option": if scenario.is_auto_post_enabled { "auto" } else { "draft" },
        "targets_json": Value::Array(targets).to_string(),
        "metadata": {
            "scenario_id": scenario.id,
            "run_id": run.id,
            "aspect_ratio": scenario.aspect_ratio,
        },
        "resolution": resolution,
    });

    if let Some(obj) = payload.as_object_mut() {
        if let Some(host) = config.asset_host_for(scenario.kind) {
            obj.insert("asset_host".to_string(), json!(host));
        }
        if let Some(callback) = config.callback_url_for(scenario.kind) {
            obj.insert("callback_url".to_string(), json!(callback));
        }
    }

    payload
}

/// Generation pipeline
pub struct GenerationPipeline {
    config: GenerationConfig,
    runs: Arc<RunStore>,
    scenarios: Arc<ScenarioStore>,
    storage: Arc<AssetStorage>,
    publisher: Arc<PublishService>,
    trigger: Arc<dyn GenerationTrigger>,
}

impl GenerationPipeline {
    pub fn new(
        config: GenerationConfig,
        runs: Arc<RunStore>,
        scenarios: Arc<ScenarioStore>,
        storage: Arc<AssetStorage>,
        publisher: Arc<PublishService>,
        trigger: Arc<dyn GenerationTrigger>,
    ) -> Self {
        if config.asset_host.is_none() {
            tracing::warn!("Generation asset host is not configured");
        }
        if config.callback_url.is_none() {
            tracing::warn!("Generation callback URL is not configured");
        }

        Self {
            config,
            runs,
            scenarios,
            storage,
            publisher,
            trigger,
        }
    }

    /// Create a run for the scenario and hand it to the automation webhook
    pub async fn enqueue_run(
        &self,
        owner_id: &str,
        scenario_id: &str,
        trigger: RunTrigger,
    ) -> AppResult<GenerationRun> {
        let scenario = self.scenarios.get(owner_id, scenario_id).await?;
        let run = self.runs.create(&scenario, trigger).await?;
        let payload = build_webhook_payload(&self.config, &scenario, &run);

        match self.trigger.trigger(scenario.kind, &payload).await {
            Ok(body) => {
                let execution_id = ["execution_id", "id"].iter().find_map(|k| match body.get(*k) {
                    Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                });
                self.runs.mark_generating(&run.id, execution_id.as_deref()).await?;
                self.scenarios.mark_run_started(&scenario.id).await?;
                metrics::record_generation_enqueue(true);

                tracing::info!(
                    run_id = %run.id,
                    scenario_id = %scenario.id,
                    kind = scenario.kind.as_str(),
                    trigger = trigger.as_str(),
                    "Generation run enqueued"
                );
                self.runs.get(&run.id).await
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(run_id = %run.id, scenario_id = %scenario.id, "Failed to enqueue generation: {}", message);

                let error = RunError {
                    code: "enqueue_failed".to_string(),
                    message: message.clone(),
                };
                self.runs.mark_failed(&run.id, &error).await?;
                self.scenarios.record_error(&scenario.id, &message).await?;
                metrics::record_generation_enqueue(false);
                Err(e)
            }
        }
    }

    /// Apply a progress or completion callback
    pub async fn handle_callback(&self, payload: &Value, query_run_id: Option<&str>) -> AppResult<CallbackOutcome> {
        let run_id = reconcile::resolve_run_id(payload, query_run_id)?;

        let Some(run) = self.runs.find(&run_id).await? else {
            metrics::record_generation_callback("ignored");
            tracing::warn!(run_id = %run_id, "Callback for unknown generation run ignored");
            return Ok(CallbackOutcome::Ignored { run_id });
        };

        if run.status.is_terminal() {
            metrics::record_generation_callback("ignored");
            tracing::info!(run_id = %run.id, status = run.status.as_str(), "Run already finished; callback ignored");
            return Ok(CallbackOutcome::AlreadyTerminal { run_id: run.id });
        }

        let reconciled = reconcile::reconcile(run.kind, run.id.clone(), payload);
        metrics::record_generation_callback(reconciled.status.as_str());

        match reconciled.status {
            RunStatus::Failed => {
                let error = reconciled.error.unwrap_or_else(|| RunError {
                    code: "error".to_string(),
                    message: "Generation failed".to_string(),
                });
                if !self.runs.mark_failed(&run.id, &error).await? {
                    return Ok(CallbackOutcome::AlreadyTerminal { run_id: run.id });
                }
                tracing::warn!(run_id = %run.id, code = %error.code, "Generation run failed: {}", error.message);
                return Ok(CallbackOutcome::Applied {
                    run: self.runs.get(&run.id).await?,
                    fan_out: None,
                });
            }
            RunStatus::Pending | RunStatus::Generating => {
                if !self
                    .runs
                    .mark_progress(&run.id, reconciled.expanded_prompt.as_deref())
                    .await?
                {
                    return Ok(CallbackOutcome::AlreadyTerminal { run_id: run.id });
                }
                tracing::debug!(run_id = %run.id, "Generation run still in progress");
                return Ok(CallbackOutcome::Applied {
                    run: self.runs.get(&run.id).await?,
                    fan_out: None,
                });
            }
            RunStatus::Completed => {}
        }

        let stored = self.storage.save_assets(&run.id, run.kind, reconciled.assets).await?;
        if stored.is_empty() {
            tracing::warn!(run_id = %run.id, "Generation callback completed with no mapped assets");
        }

        if !self
            .runs
            .complete(&run.id, &stored, reconciled.expanded_prompt.as_deref())
            .await?
        {
            return Ok(CallbackOutcome::AlreadyTerminal { run_id: run.id });
        }

        let run = self.runs.get(&run.id).await?;
        tracing::info!(run_id = %run.id, kind = run.kind.as_str(), assets = stored.len(), "Generation run completed");

        // Fan-out errors leave the run completed
        let fan_out = if run.kind == MediaKind::Video && !stored.is_empty() {
            match self.fan_out(&run, &stored).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(run_id = %run.id, "Auto-post fan-out failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(CallbackOutcome::Applied { run, fan_out })
    }

    /// Publish every asset to every auto-post target of the run's scenario
    async fn fan_out(&self, run: &GenerationRun, assets: &[GeneratedAsset]) -> AppResult<Option<FanOutSummary>> {
        let Some(scenario_id) = run.scenario_id.as_deref() else {
            return Ok(None);
        };
        let Some(scenario) = self.scenarios.find(&run.owner_id, scenario_id).await? else {
            return Ok(None);
        };
        if !scenario.is_auto_post_enabled {
            return Ok(None);
        }

        let targets: Vec<_> = scenario.auto_post_targets().collect();
        if targets.is_empty() {
            return Ok(None);
        }

        let caption = truncate_caption(run.expanded_prompt.as_deref().unwrap_or(&scenario.prompt));

        let caption = &caption;
        let jobs = targets.iter().flat_map(move |target| {
            assets.iter().enumerate().map(move |(index, asset)| {
                let request = PublishRequest {
                    owner_id: run.owner_id.clone(),
                    account_id: target.account_id.clone(),
                    source: VideoSource::Url(asset.url.clone()),
                    caption: caption.clone(),
                    privacy: target.privacy,
                    idempotency_key: Some(fan_out_key(&run.id, &target.account_id, index)),
                };
                async move {
                    let result = self.publisher.publish(request).await;
                    (target.account_id.clone(), index, result)
                }
            })
        });

        let results = join_all(jobs).await;

        let attempted = results.len();
        let errors: Vec<FanOutError> = results
            .into_iter()
            .filter_map(|(account_id, asset_index, result)| {
                result.err().map(|e| FanOutError {
                    account_id,
                    asset_index,
                    error: e.to_string(),
                })
            })
            .collect();

        let summary = FanOutSummary {
            run_id: run.id.clone(),
            attempted,
            success: attempted - errors.len(),
            failed: errors.len(),
            errors,
            published_at: Utc::now(),
        };

        let encoded = serde_json::to_value(&summary)
            .map_err(|e| AppError::Internal(format!("Failed to encode fan-out summary: {}", e)))?;
        self.scenarios.record_summary(&scenario.id, &encoded).await?;

        if summary.failed > 0 {
            tracing::warn!(
                run_id = %run.id,
                success = summary.success,
                failed = summary.failed,
                "Auto-post completed with partial failures"
            );
        } else {
            tracing::info!(run_id = %run.id, success = summary.success, "Auto-post completed");
        }

        Ok(Some(summary))
    }

    /// Newest runs first
    pub async fn list_runs(&self, owner_id: &str, scenario_id: Option<&str>) -> AppResult<Vec<GenerationRun>> {
        self.runs.list(owner_id, scenario_id, RUN_LIST_LIMIT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::{AccountManager, PublishTarget},
        config::ServerConfig,
        crypto::SecretCodec,
        db,
        generation::{scenarios::NewScenario, storage::tests::StaticFetcher},
        tiktok::{fake::FakeTikTok, records::PublishLog, OAuthService, Privacy},
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTrigger {
        payloads: Mutex<Vec<(MediaKind, Value)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl GenerationTrigger for RecordingTrigger {
        async fn trigger(&self, kind: MediaKind, payload: &Value) -> AppResult<Value> {
            self.payloads.lock().unwrap().push((kind, payload.clone()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::provider("500", "Generation webhook failed (500)"));
            }
            Ok(json!({ "execution_id": "exec-42" }))
        }
    }

    struct Harness {
        pipeline: GenerationPipeline,
        trigger: Arc<RecordingTrigger>,
        scenarios: Arc<ScenarioStore>,
        runs: Arc<RunStore>,
        api: Arc<FakeTikTok>,
        db: sqlx::SqlitePool,
        account_id: String,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::for_tests(dir.path().to_path_buf());
        let db = db::create_memory_pool().await.unwrap();

        let accounts = Arc::new(AccountManager::new(db.clone(), 15, None));
        let api = Arc::new(FakeTikTok::default());
        let fetcher = Arc::new(StaticFetcher::default());
        let oauth = Arc::new(OAuthService::new(
            config.tiktok.clone(),
            api.clone(),
            accounts.clone(),
            SecretCodec::new(Some("unit-test-key")),
        ));
        let linked = oauth.handle_callback("owner", "code", "verifier", None).await.unwrap();

        let publisher = Arc::new(PublishService::new(
            config.tiktok.api_flavor,
            api.clone(),
            oauth,
            accounts.clone(),
            PublishLog::new(db.clone()),
            fetcher.clone(),
        ));
        let runs = Arc::new(RunStore::new(db.clone()));
        let scenarios = Arc::new(ScenarioStore::new(db.clone(), accounts));
        let storage = Arc::new(AssetStorage::new(config.storage.asset_directory.clone(), fetcher));
        let trigger = Arc::new(RecordingTrigger::default());

        let pipeline = GenerationPipeline::new(
            config.generation.clone(),
            runs.clone(),
            scenarios.clone(),
            storage,
            publisher,
            trigger.clone(),
        );

        Harness {
            pipeline,
            trigger,
            scenarios,
            runs,
            api,
            db,
            account_id: linked.account.id,
            _dir: dir,
        }
    }

    impl Harness {
        async fn scenario(&self, auto_post: bool) -> Scenario {
            self.scenarios
                .create(
                    "owner",
                    NewScenario {
                        title: "Cats".to_string(),
                        prompt: "A cat on a skateboard".to_string(),
                        video_count: Some(2),
                        aspect_ratio: "16:9".to_string(),
                        is_auto_post_enabled: auto_post,
                        targets: self.targets(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
        }

        async fn image_scenario(&self) -> Scenario {
            self.scenarios
                .create(
                    "owner",
                    NewScenario {
                        kind: MediaKind::Image,
                        title: "Posters".to_string(),
                        prompt: "A retro travel poster".to_string(),
                        image_count: Some(2),
                        aspect_ratio: "1:1".to_string(),
                        ai_model_id: Some("midjourney-v7".to_string()),
                        is_auto_post_enabled: true,
                        targets: self.targets(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap()
        }

        fn targets(&self) -> Vec<PublishTarget> {
            vec![PublishTarget {
                account_id: self.account_id.clone(),
                privacy: Privacy::Friends,
                auto_post: true,
            }]
        }
    }

    #[tokio::test]
    async fn test_enqueue_posts_webhook_payload() {
        let h = harness().await;
        let scenario = h.scenario(true).await;

        let run = h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.unwrap();
        assert_eq!(run.status, RunStatus::Generating);
        assert_eq!(run.execution_id.as_deref(), Some("exec-42"));

        let (kind, payload) = h.trigger.payloads.lock().unwrap()[0].clone();
        assert_eq!(kind, MediaKind::Video);
        assert_eq!(payload["video_count"], 2);
        assert_eq!(payload["model"], "gpt4o-video");
        assert!(payload["thumbnail_url"].is_null());
        assert_eq!(payload["publish_option"], "auto");
        assert_eq!(payload["resolution"], "1920x1080");
        assert_eq!(payload["metadata"]["run_id"], run.id.as_str());
        assert_eq!(payload["callback_url"], "https://app.example.com/api/generation/callback");
        assert!(payload.get("asset_host").is_none());
        let targets: Value = serde_json::from_str(payload["targets_json"].as_str().unwrap()).unwrap();
        assert_eq!(targets[0]["privacy"], "friends");

        assert!(h.scenarios.get("owner", &scenario.id).await.unwrap().last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_enqueue_failure_marks_run_failed() {
        let h = harness().await;
        let scenario = h.scenario(false).await;
        h.trigger.fail.store(true, Ordering::SeqCst);

        assert!(h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.is_err());

        let runs = h.pipeline.list_runs("owner", Some(&scenario.id)).await.unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].error.as_ref().unwrap().message.contains("500"));
        assert!(h.scenarios.get("owner", &scenario.id).await.unwrap().last_error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_run_is_ignored() {
        let h = harness().await;
        let outcome = h.pipeline.handle_callback(&json!({"runId": "nope", "status": "completed"}), None).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_failed_callback_then_late_success_is_ignored() {
        let h = harness().await;
        let scenario = h.scenario(true).await;
        let run = h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.unwrap();

        let failed = json!({"data": {"run_id": run.id, "successFlag": 2, "errorMessage": "content policy"}});
        match h.pipeline.handle_callback(&failed, None).await.unwrap() {
            CallbackOutcome::Applied { run, fan_out } => {
                assert_eq!(run.status, RunStatus::Failed);
                assert_eq!(run.error.unwrap().message, "content policy");
                assert!(fan_out.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let late = json!({"runId": run.id, "data": {"resultUrls": ["https://cdn/late.mp4"]}});
        let outcome = h.pipeline.handle_callback(&late, None).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::AlreadyTerminal { .. }));
        assert_eq!(h.runs.get(&run.id).await.unwrap().status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_completed_callback_fans_out_with_partial_failure() {
        let h = harness().await;
        let scenario = h.scenario(true).await;
        let run = h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.unwrap();

        let payload = json!({
            "metadata": {"run_id": run.id},
            "data": {"successFlag": 1, "resultUrls": ["https://cdn/good.mp4", "https://cdn/fail.mp4"]},
            "expandedPrompt": "An expanded cat prompt",
        });

        let (run, summary) = match h.pipeline.handle_callback(&payload, None).await.unwrap() {
            CallbackOutcome::Applied { run, fan_out } => (run, fan_out.unwrap()),
            other => panic!("unexpected outcome: {other:?}"),
        };

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.generated_count, 2);
        assert!(run.assets.iter().all(|a| a.local_path.is_some()));
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors[0].asset_index, 1);
        assert_eq!(h.api.privacy_levels(), vec!["MUTUAL_FOLLOW_FRIENDS", "MUTUAL_FOLLOW_FRIENDS"]);

        let stored = h.scenarios.get("owner", &scenario.id).await.unwrap();
        let recorded = stored.last_run_summary.unwrap();
        assert_eq!(recorded["runId"], run.id.as_str());
        assert_eq!(recorded["failed"], 1);

        let log = PublishLog::new(h.db.clone());
        let key = fan_out_key(&run.id, &h.account_id, 0);
        assert!(log.find("owner", &h.account_id, &key).await.unwrap().unwrap().provider_post_id.is_some());
    }

    #[tokio::test]
    async fn test_completed_callback_without_auto_post() {
        let h = harness().await;
        let scenario = h.scenario(false).await;
        let run = h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.unwrap();

        let payload = json!({"runId": run.id, "assets": [{"url": "https://cdn/a.mp4", "promptIndex": 0}]});
        match h.pipeline.handle_callback(&payload, None).await.unwrap() {
            CallbackOutcome::Applied { fan_out, .. } => assert!(fan_out.is_none()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.api.count("init_direct_post"), 0);
    }

    #[tokio::test]
    async fn test_progress_callback_keeps_run_open_until_completion() {
        let h = harness().await;
        let scenario = h.scenario(true).await;
        let run = h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.unwrap();

        let progress = json!({
            "runId": run.id,
            "data": {"state": "RUNNING", "paramJson": "{\"prompt\":\"An expanded cat prompt\"}"}
        });
        match h.pipeline.handle_callback(&progress, None).await.unwrap() {
            CallbackOutcome::Applied { run, fan_out } => {
                assert_eq!(run.status, RunStatus::Generating);
                assert_eq!(run.generated_count, 0);
                assert!(run.completed_at.is_none());
                assert!(fan_out.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.api.count("init_direct_post"), 0);

        let completed = json!({"runId": run.id, "data": {"successFlag": 1, "resultUrls": ["https://cdn/good.mp4"]}});
        let (run, summary) = match h.pipeline.handle_callback(&completed, None).await.unwrap() {
            CallbackOutcome::Applied { run, fan_out } => (run, fan_out.unwrap()),
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.generated_count, 1);
        assert_eq!(run.expanded_prompt.as_deref(), Some("An expanded cat prompt"));
        assert!(run.assets[0].local_path.is_some());
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.success, 1);
        assert_eq!(h.api.count("init_direct_post"), 1);

        let outcome = h.pipeline.handle_callback(&completed, None).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::AlreadyTerminal { .. }));
        assert_eq!(h.api.count("init_direct_post"), 1);
    }

    #[tokio::test]
    async fn test_fan_out_error_keeps_run_completed() {
        let h = harness().await;
        let scenario = h.scenario(true).await;
        let run = h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.unwrap();

        // Scenario lookup inside the fan-out now fails
        sqlx::query("DROP TABLE scenario").execute(&h.db).await.unwrap();

        let completed = json!({"runId": run.id, "status": "completed", "resultUrls": ["https://cdn/good.mp4"]});
        match h.pipeline.handle_callback(&completed, None).await.unwrap() {
            CallbackOutcome::Applied { run, fan_out } => {
                assert_eq!(run.status, RunStatus::Completed);
                assert_eq!(run.generated_count, 1);
                assert!(fan_out.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.api.count("init_direct_post"), 0);
    }

    #[tokio::test]
    async fn test_image_run_lifecycle() {
        let h = harness().await;
        let scenario = h.image_scenario().await;
        assert!(!scenario.is_auto_post_enabled);

        let run = h.pipeline.enqueue_run("owner", &scenario.id, RunTrigger::Manual).await.unwrap();
        assert_eq!(run.kind, MediaKind::Image);
        assert_eq!(run.requested_count, 2);

        let (kind, payload) = h.trigger.payloads.lock().unwrap()[0].clone();
        assert_eq!(kind, MediaKind::Image);
        assert_eq!(payload["image_count"], 2);
        assert!(payload.get("video_count").is_none());
        assert_eq!(payload["model"], "midjourney-v7");
        assert_eq!(payload["resolution"], "1024x1024");
        assert_eq!(payload["callback_url"], "https://app.example.com/api/image-generation/callback");

        // Image callbacks have no progress state
        let callback = json!({
            "runId": run.id,
            "status": "processing",
            "data": {"resultUrls": ["https://cdn/render-0", "https://cdn/render-1.png"]}
        });
        match h.pipeline.handle_callback(&callback, None).await.unwrap() {
            CallbackOutcome::Applied { run, fan_out } => {
                assert_eq!(run.status, RunStatus::Completed);
                assert_eq!(run.generated_count, 2);
                assert!(run.assets[0].local_path.as_deref().unwrap().ends_with("-0.jpg"));
                assert!(run.assets[1].local_path.as_deref().unwrap().ends_with("-1.png"));
                assert!(fan_out.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.api.count("init_direct_post"), 0);
    }

    #[tokio::test]
    async fn test_webhook_payload_carries_thumbnail() {
        let config = ServerConfig::for_tests(std::path::PathBuf::from("./data")).generation;
        let scenario = Scenario::new(
            "owner",
            NewScenario {
                title: "Cats".to_string(),
                prompt: "A cat".to_string(),
                aspect_ratio: "9:16".to_string(),
                thumbnail_url: Some("https://cdn.example/thumb.jpg".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        let run = RunStore::new(db::create_memory_pool().await.unwrap())
            .create(&scenario, RunTrigger::Manual)
            .await
            .unwrap();

        let payload = build_webhook_payload(&config, &scenario, &run);
        assert_eq!(payload["thumbnail_url"], "https://cdn.example/thumb.jpg");
        assert_eq!(payload["video_count"], 4);
        assert_eq!(payload["publish_option"], "draft");
    }
}
