/// Normalization of generation-completion callbacks
///
/// The automation layer forwards payloads from several generation providers.
/// Each detector recognizes one payload shape; the first that yields assets
/// wins. Status and error are derived from whatever signals are present.
/// Image callbacks use a narrower set of shapes and never report progress.
use crate::{
    error::{AppError, AppResult},
    generation::{GeneratedAsset, MediaKind, RunError, RunStatus},
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Asset as found in a payload, before deduplication
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateAsset {
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub prompt_index: Option<i64>,
    pub batch: Option<i64>,
    pub prompt_label: Option<String>,
}

impl CandidateAsset {
    fn at(url: &str, prompt_index: i64) -> Self {
        Self {
            url: url.to_string(),
            prompt_index: Some(prompt_index),
            ..Default::default()
        }
    }

    fn from_object(value: &Value) -> Option<Self> {
        let url = text(value.get("url"))?;
        Some(Self {
            url: url.to_string(),
            thumbnail_url: text(value.get("thumbnailUrl")).map(str::to_string),
            width: number(value.get("width")),
            height: number(value.get("height")),
            prompt_index: number(value.get("promptIndex")),
            batch: number(value.get("batch")),
            prompt_label: text(value.get("promptLabel")).map(str::to_string),
        })
    }
}

/// A callback reduced to what the run needs
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub run_id: String,
    pub status: RunStatus,
    pub assets: Vec<GeneratedAsset>,
    pub expanded_prompt: Option<String>,
    pub error: Option<RunError>,
}

/// Non-empty trimmed string
fn text(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn number(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn first_text<'a>(candidates: &[Option<&'a Value>]) -> Option<&'a str> {
    candidates.iter().find_map(|c| text(*c))
}

/// Run id from the payload, falling back to the query string
pub fn resolve_run_id(payload: &Value, query_run_id: Option<&str>) -> AppResult<String> {
    let id = [
        payload.get("runId"),
        payload.get("run_id"),
        payload.pointer("/metadata/run_id"),
        payload.pointer("/data/runId"),
        payload.pointer("/data/run_id"),
    ]
    .into_iter()
    .find_map(|candidate| match candidate? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
    .or_else(|| {
        query_run_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });

    id.ok_or_else(|| AppError::Validation("runId is required".to_string()))
}

type Detector = fn(&Value) -> Option<Vec<CandidateAsset>>;

const DETECTORS: [Detector; 4] = [works_output, result_url_list, encoded_result, explicit_assets];

const IMAGE_DETECTORS: [Detector; 2] = [result_url_list, explicit_assets];

fn detectors(kind: MediaKind) -> &'static [Detector] {
    match kind {
        MediaKind::Video => &DETECTORS,
        MediaKind::Image => &IMAGE_DETECTORS,
    }
}

/// Assets from the first detector that recognizes the payload
pub fn detect_assets(payload: &Value) -> Vec<CandidateAsset> {
    detect_assets_for(MediaKind::Video, payload)
}

pub fn detect_assets_for(kind: MediaKind, payload: &Value) -> Vec<CandidateAsset> {
    detectors(kind)
        .iter()
        .find_map(|detect| detect(payload))
        .unwrap_or_default()
}

/// `output` objects carrying `works`, URL lists or single video fields
fn works_output(payload: &Value) -> Option<Vec<CandidateAsset>> {
    let output = payload
        .pointer("/data/output")
        .filter(|o| o.is_object())
        .or_else(|| payload.get("output").filter(|o| o.is_object()))?;

    let mut seen = HashSet::new();
    let mut assets = Vec::new();
    let mut add = |url: Option<&str>, index: i64, extra: CandidateAsset| {
        let Some(url) = url else { return };
        if seen.insert(url.to_string()) {
            assets.push(CandidateAsset {
                url: url.to_string(),
                prompt_index: Some(index),
                ..extra
            });
        }
    };

    if let Some(works) = output.get("works").and_then(|w| w.as_array()) {
        for (index, work) in works.iter().enumerate() {
            let video = work.get("video");
            let cover = work.get("cover");
            let url = video.and_then(|v| {
                first_text(&[
                    v.get("resource_without_watermark"),
                    v.get("resource"),
                    v.get("url"),
                ])
            });
            let thumbnail = cover.and_then(|c| {
                first_text(&[
                    c.get("resource_without_watermark"),
                    c.get("resource"),
                    c.get("url"),
                ])
            });
            add(
                url,
                index as i64,
                CandidateAsset {
                    thumbnail_url: thumbnail.map(str::to_string),
                    width: video.and_then(|v| number(v.get("width"))),
                    height: video.and_then(|v| number(v.get("height"))),
                    ..Default::default()
                },
            );
        }
    }

    let list = [output.get("result_urls"), output.get("resultUrls")]
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_array())
        .find(|items| !items.is_empty());
    if let Some(items) = list {
        for (index, item) in items.iter().enumerate() {
            let url = match item {
                Value::String(_) => text(Some(item)),
                Value::Object(_) => first_text(&[item.get("url"), item.get("result_url"), item.get("resultUrl")]),
                _ => None,
            };
            add(url, index as i64, CandidateAsset::default());
        }
    }

    add(
        first_text(&[output.get("video_url"), output.get("videoUrl")]),
        0,
        CandidateAsset::default(),
    );
    add(
        first_text(&[
            output.pointer("/video/resource_without_watermark"),
            output.pointer("/video/resource"),
            output.pointer("/video/url"),
        ]),
        0,
        CandidateAsset::default(),
    );
    add(
        first_text(&[
            output.pointer("/generation/video/url_no_watermark"),
            output.pointer("/generation/video/url"),
        ]),
        0,
        CandidateAsset::default(),
    );

    (!assets.is_empty()).then_some(assets)
}

/// First non-empty `resultUrls`-style array
fn result_url_list(payload: &Value) -> Option<Vec<CandidateAsset>> {
    let items = [
        payload.pointer("/data/resultUrls"),
        payload.pointer("/data/result_urls"),
        payload.pointer("/data/info/result_urls"),
        payload.pointer("/data/response/result_urls"),
        payload.get("resultUrls"),
        payload.get("result_urls"),
    ]
    .into_iter()
    .flatten()
    .filter_map(|v| v.as_array())
    .find(|items| !items.is_empty())?;

    let assets: Vec<CandidateAsset> = items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match item {
            Value::String(url) => Some(CandidateAsset::at(url, index as i64)),
            Value::Object(_) => {
                let url = first_text(&[item.get("resultUrl"), item.get("result_url"), item.get("url")])?;
                let prompt_index = number(item.get("index"))
                    .or_else(|| number(item.get("promptIndex")))
                    .unwrap_or(index as i64);
                Some(CandidateAsset::at(url, prompt_index))
            }
            _ => None,
        })
        .collect();

    (!assets.is_empty()).then_some(assets)
}

/// `resultJson` string holding a result URL list
fn encoded_result(payload: &Value) -> Option<Vec<CandidateAsset>> {
    let encoded = first_text(&[payload.pointer("/data/resultJson"), payload.pointer("/data/result_json")])?;
    let parsed: Value = serde_json::from_str(encoded).ok()?;
    result_url_list(&parsed)
}

/// Top-level `assets` array
fn explicit_assets(payload: &Value) -> Option<Vec<CandidateAsset>> {
    let items = payload.get("assets")?.as_array()?;
    Some(items.iter().filter_map(CandidateAsset::from_object).collect())
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Index(i64),
    Label(String),
}

/// Keep the first asset of each prompt
///
/// Assets group by prompt index, then batch, then prompt label, defaulting to
/// slot 0. Numeric groups come first in ascending order, then labels.
pub fn select_first_asset_per_prompt(candidates: Vec<CandidateAsset>) -> Vec<GeneratedAsset> {
    let mut groups: BTreeMap<GroupKey, CandidateAsset> = BTreeMap::new();

    for candidate in candidates {
        let index = candidate.prompt_index.or(candidate.batch);
        let key = match (index, candidate.prompt_label.as_ref()) {
            (Some(index), _) => GroupKey::Index(index),
            (None, Some(label)) => GroupKey::Label(label.clone()),
            (None, None) => GroupKey::Index(0),
        };
        groups.entry(key).or_insert(candidate);
    }

    groups
        .into_values()
        .map(|c| GeneratedAsset {
            prompt_index: c.prompt_index.or(c.batch),
            url: c.url,
            thumbnail_url: c.thumbnail_url,
            width: c.width,
            height: c.height,
            prompt_label: c.prompt_label,
            local_path: None,
        })
        .collect()
}

/// Map a provider status string by substring
pub fn provider_status(raw: &str) -> Option<RunStatus> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    let has = |needles: &[&str]| needles.iter().any(|n| normalized.contains(n));
    if has(&["fail", "error", "cancel"]) {
        Some(RunStatus::Failed)
    } else if has(&["complete", "success", "finish", "done"]) {
        Some(RunStatus::Completed)
    } else if has(&["pending", "queue", "processing", "running", "generating"]) {
        Some(RunStatus::Generating)
    } else {
        None
    }
}

fn success_flag(payload: &Value) -> Option<i64> {
    number(payload.pointer("/data/successFlag"))
}

fn by_assets(asset_count: usize) -> RunStatus {
    if asset_count > 0 {
        RunStatus::Completed
    } else {
        RunStatus::Generating
    }
}

/// Run status implied by the payload
pub fn derive_status(payload: &Value, asset_count: usize) -> RunStatus {
    if let Some(explicit) = text(payload.get("status")) {
        if let Some(status) = RunStatus::parse(&explicit.to_lowercase())
            .ok()
            .or_else(|| provider_status(explicit))
        {
            return status;
        }
    }

    let raw = first_text(&[
        payload.pointer("/data/status"),
        payload.pointer("/data/state"),
        payload.pointer("/data/output/state"),
        payload.pointer("/data/output/generation/state"),
        payload.get("state"),
    ]);
    if let Some(status) = raw.and_then(provider_status) {
        return status;
    }

    match success_flag(payload) {
        Some(2) | Some(3) => return RunStatus::Failed,
        Some(1) => return RunStatus::Completed,
        _ => {}
    }

    if let Some(code) = number(payload.get("code")) {
        if code >= 400 {
            return RunStatus::Failed;
        }
    }

    by_assets(asset_count)
}

/// Image run status: a callback that is not a failure completes the run
pub fn derive_image_status(payload: &Value) -> RunStatus {
    if let Some(explicit) = text(payload.get("status")) {
        let status = RunStatus::parse(&explicit.to_lowercase())
            .ok()
            .or_else(|| provider_status(explicit));
        return match status {
            Some(RunStatus::Failed) => RunStatus::Failed,
            _ => RunStatus::Completed,
        };
    }

    match success_flag(payload) {
        Some(2) | Some(3) => return RunStatus::Failed,
        Some(1) => return RunStatus::Completed,
        _ => {}
    }

    match number(payload.get("code")) {
        Some(code) if code != 200 => RunStatus::Failed,
        _ => RunStatus::Completed,
    }
}

fn error_from_object(value: Option<&Value>) -> Option<RunError> {
    let obj = value?.as_object()?;
    let message = first_text(&[obj.get("message"), obj.get("raw_message")]);
    let code = obj.get("code").and_then(|c| match c {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    if message.is_none() && code.is_none() {
        return None;
    }
    Some(RunError {
        code: code.unwrap_or_else(|| "error".to_string()),
        message: message.unwrap_or("Generation failed").to_string(),
    })
}

fn value_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Error carried by the payload, if any
pub fn derive_error(payload: &Value, status: RunStatus) -> Option<RunError> {
    if let Some(message) = text(payload.get("error")) {
        return Some(RunError {
            code: "error".to_string(),
            message: message.to_string(),
        });
    }
    if let Some(error) =
        error_from_object(payload.pointer("/data/error")).or_else(|| error_from_object(payload.get("error")))
    {
        return Some(error);
    }

    if matches!(success_flag(payload), Some(2) | Some(3)) {
        return Some(RunError {
            code: value_string(payload.pointer("/data/errorCode"))
                .or_else(|| value_string(payload.get("code")))
                .unwrap_or_else(|| "error".to_string()),
            message: first_text(&[payload.pointer("/data/errorMessage"), payload.get("msg")])
                .unwrap_or("Generation failed")
                .to_string(),
        });
    }

    if let Some(code) = number(payload.get("code")).filter(|c| *c != 200) {
        return Some(RunError {
            code: code.to_string(),
            message: text(payload.get("msg")).unwrap_or("Generation failed").to_string(),
        });
    }

    (status == RunStatus::Failed).then(|| RunError {
        code: "error".to_string(),
        message: "Generation failed".to_string(),
    })
}

/// Expanded prompt, explicit or inside an encoded parameter blob
pub fn extract_expanded_prompt(payload: &Value) -> Option<String> {
    if let Some(explicit) = text(payload.get("expandedPrompt")) {
        return Some(explicit.to_string());
    }

    let encoded = first_text(&[
        payload.pointer("/data/promptJson"),
        payload.pointer("/data/paramJson"),
        payload.get("paramJson"),
    ])?;
    let parsed: Value = serde_json::from_str(encoded).ok()?;
    text(parsed.get("prompt")).map(str::to_string)
}

/// Reduce a callback payload for a run of `kind`
pub fn reconcile(kind: MediaKind, run_id: String, payload: &Value) -> Reconciled {
    let assets = select_first_asset_per_prompt(detect_assets_for(kind, payload));
    let status = match kind {
        MediaKind::Video => derive_status(payload, assets.len()),
        MediaKind::Image => derive_image_status(payload),
    };

    Reconciled {
        run_id,
        status,
        error: derive_error(payload, status),
        expanded_prompt: extract_expanded_prompt(payload),
        assets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn urls(assets: &[GeneratedAsset]) -> Vec<&str> {
        assets.iter().map(|a| a.url.as_str()).collect()
    }

    #[test]
    fn test_run_id_resolution_order() {
        assert_eq!(resolve_run_id(&json!({"runId": "a", "run_id": "b"}), None).unwrap(), "a");
        assert_eq!(resolve_run_id(&json!({"metadata": {"run_id": "m"}}), None).unwrap(), "m");
        assert_eq!(resolve_run_id(&json!({"data": {"run_id": "d"}}), None).unwrap(), "d");
        assert_eq!(resolve_run_id(&json!({}), Some("q")).unwrap(), "q");
        assert!(matches!(resolve_run_id(&json!({}), None), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_first_asset_per_prompt() {
        let candidates = vec![
            CandidateAsset::at("A", 0),
            CandidateAsset::at("B", 0),
            CandidateAsset::at("C", 1),
        ];
        assert_eq!(urls(&select_first_asset_per_prompt(candidates)), vec!["A", "C"]);
    }

    #[test]
    fn test_grouping_falls_back_to_batch_then_label() {
        let candidates = vec![
            CandidateAsset {
                url: "label-b".to_string(),
                prompt_label: Some("b".to_string()),
                ..Default::default()
            },
            CandidateAsset {
                url: "batch-2".to_string(),
                batch: Some(2),
                ..Default::default()
            },
            CandidateAsset {
                url: "label-a".to_string(),
                prompt_label: Some("a".to_string()),
                ..Default::default()
            },
            CandidateAsset {
                url: "unkeyed".to_string(),
                ..Default::default()
            },
        ];
        let selected = select_first_asset_per_prompt(candidates);
        assert_eq!(urls(&selected), vec!["unkeyed", "batch-2", "label-a", "label-b"]);
        assert_eq!(selected[1].prompt_index, Some(2));
    }

    #[test]
    fn test_works_output_shape() {
        let payload = json!({
            "data": {"output": {
                "works": [
                    {"video": {"resource_without_watermark": " https://cdn/w0.mp4 ", "width": 1080, "height": 1920},
                     "cover": {"resource": "https://cdn/c0.jpg"}},
                    {"video": {"url": "https://cdn/w1.mp4"}}
                ],
                "video_url": "https://cdn/w0.mp4"
            }}
        });
        let assets = detect_assets(&payload);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].url, "https://cdn/w0.mp4");
        assert_eq!(assets[0].thumbnail_url.as_deref(), Some("https://cdn/c0.jpg"));
        assert_eq!(assets[0].width, Some(1080));
        assert_eq!(assets[1].prompt_index, Some(1));
    }

    #[test]
    fn test_result_url_list_shapes() {
        let strings = json!({"data": {"resultUrls": ["https://a", "https://b"]}});
        let assets = detect_assets(&strings);
        assert_eq!(assets[1].prompt_index, Some(1));

        let objects = json!({"data": {"info": {"result_urls": [{"resultUrl": "https://x", "index": 3}, {"nothing": true}]}}});
        let assets = detect_assets(&objects);
        assert_eq!(assets, vec![CandidateAsset::at("https://x", 3)]);

        let encoded = json!({"data": {"resultJson": "{\"resultUrls\":[\"https://enc\"]}"}});
        assert_eq!(detect_assets(&encoded)[0].url, "https://enc");

        assert!(detect_assets(&json!({"data": {"resultJson": "not json"}})).is_empty());
    }

    #[test]
    fn test_explicit_assets_are_last_resort() {
        let payload = json!({"assets": [{"url": "https://e", "promptIndex": 1}, {"thumbnailUrl": "no url"}]});
        let assets = detect_assets(&payload);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].prompt_index, Some(1));
    }

    #[test]
    fn test_status_derivation() {
        assert_eq!(derive_status(&json!({"data": {"successFlag": 2}}), 0), RunStatus::Failed);
        assert_eq!(derive_status(&json!({"data": {"successFlag": 1}}), 0), RunStatus::Completed);
        assert_eq!(derive_status(&json!({"data": {"state": "RUNNING"}}), 3), RunStatus::Generating);
        assert_eq!(derive_status(&json!({"status": "failed", "data": {"successFlag": 1}}), 1), RunStatus::Failed);
        assert_eq!(derive_status(&json!({"data": {"status": "Task Cancelled"}}), 1), RunStatus::Failed);
        assert_eq!(derive_status(&json!({"code": 500}), 1), RunStatus::Failed);
        assert_eq!(derive_status(&json!({"code": 200}), 0), RunStatus::Generating);
        assert_eq!(derive_status(&json!({}), 2), RunStatus::Completed);
    }

    #[test]
    fn test_error_derivation() {
        let flagged = json!({"data": {"successFlag": 3, "errorCode": 422, "errorMessage": "bad prompt"}});
        let error = derive_error(&flagged, RunStatus::Failed).unwrap();
        assert_eq!(error, RunError { code: "422".to_string(), message: "bad prompt".to_string() });

        let provider = json!({"data": {"error": {"code": 10, "raw_message": "nsfw"}}});
        assert_eq!(derive_error(&provider, RunStatus::Failed).unwrap().message, "nsfw");

        let coded = json!({"code": 501, "msg": "upstream"});
        assert_eq!(derive_error(&coded, RunStatus::Failed).unwrap().code, "501");

        assert_eq!(derive_error(&json!({}), RunStatus::Failed).unwrap().message, "Generation failed");
        assert!(derive_error(&json!({"code": 200}), RunStatus::Completed).is_none());
    }

    #[test]
    fn test_expanded_prompt() {
        assert_eq!(extract_expanded_prompt(&json!({"expandedPrompt": "x"})).as_deref(), Some("x"));
        let encoded = json!({"data": {"paramJson": "{\"prompt\":\"a cat\"}"}});
        assert_eq!(extract_expanded_prompt(&encoded).as_deref(), Some("a cat"));
        assert!(extract_expanded_prompt(&json!({"data": {"promptJson": "{"}})).is_none());
    }

    #[test]
    fn test_reconcile_combines_everything() {
        let payload = json!({
            "data": {"run_id": "run-9", "successFlag": 1, "resultUrls": ["https://a", "https://b"]},
            "expandedPrompt": "long prompt"
        });
        let run_id = resolve_run_id(&payload, None).unwrap();
        let reconciled = reconcile(MediaKind::Video, run_id, &payload);
        assert_eq!(reconciled.run_id, "run-9");
        assert_eq!(reconciled.status, RunStatus::Completed);
        assert_eq!(reconciled.assets.len(), 2);
        assert!(reconciled.error.is_none());
        assert_eq!(reconciled.expanded_prompt.as_deref(), Some("long prompt"));
    }

    #[test]
    fn test_image_status_derivation() {
        assert_eq!(derive_image_status(&json!({})), RunStatus::Completed);
        assert_eq!(derive_image_status(&json!({"status": "processing"})), RunStatus::Completed);
        assert_eq!(derive_image_status(&json!({"status": "FAILED"})), RunStatus::Failed);
        assert_eq!(derive_image_status(&json!({"data": {"successFlag": 3}})), RunStatus::Failed);
        assert_eq!(derive_image_status(&json!({"code": 200})), RunStatus::Completed);
        assert_eq!(derive_image_status(&json!({"code": 422, "msg": "bad"})), RunStatus::Failed);
    }

    #[test]
    fn test_image_callbacks_ignore_video_shapes() {
        let payload = json!({
            "data": {"output": {"video_url": "https://cdn/v.mp4"}},
            "assets": [{"url": "https://cdn/i0.png", "promptIndex": 0}, {"url": "https://cdn/i1.png", "promptIndex": 1}]
        });
        let reconciled = reconcile(MediaKind::Image, "run-1".to_string(), &payload);
        assert_eq!(urls(&reconciled.assets), vec!["https://cdn/i0.png", "https://cdn/i1.png"]);
        assert_eq!(reconciled.status, RunStatus::Completed);

        let video = reconcile(MediaKind::Video, "run-1".to_string(), &payload);
        assert_eq!(urls(&video.assets), vec!["https://cdn/v.mp4"]);

        let failed = json!({"code": 500, "msg": "quota"});
        let reconciled = reconcile(MediaKind::Image, "run-2".to_string(), &failed);
        assert_eq!(reconciled.status, RunStatus::Failed);
        assert_eq!(reconciled.error.unwrap().message, "quota");
    }
}
