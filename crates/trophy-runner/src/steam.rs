//! Steam Web API export: schema metadata merged with global unlock percentages.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use trophy_core::{
    sort_rows, write_csv_atomic, AchievementRecord, CsvLayout, ExportError, SourceRef,
};
use trophy_http::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::{steam_output_name, ExportSummary};

const GLOBAL_PERCENTAGES_URL: &str =
    "https://api.steampowered.com/ISteamUserStats/GetGlobalAchievementPercentagesForApp/v2/";
const SCHEMA_URL: &str = "https://api.steampowered.com/ISteamUserStats/GetSchemaForGame/v2/";

pub const DEFAULT_LANG: &str = "english";

#[derive(Debug, Clone)]
pub struct SteamRequest {
    pub app_id: u32,
    pub lang: String,
    pub out: Option<PathBuf>,
}

impl SteamRequest {
    pub fn new(app_id: u32) -> Self {
        Self {
            app_id,
            lang: DEFAULT_LANG.to_string(),
            out: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaEntry {
    pub title: String,
    pub description: String,
    pub hidden: bool,
    pub icon: String,
    pub icon_gray: String,
}

#[async_trait]
pub trait SteamApi: Send + Sync {
    async fn global_percentages(&self, app_id: u32) -> Result<JsonValue, FetchError>;

    async fn schema(&self, app_id: u32, lang: &str) -> Result<JsonValue, FetchError>;
}

pub struct SteamClient {
    http: HttpFetcher,
    api_key: String,
}

impl SteamClient {
    /// One retry on 5xx or network failure, nothing more.
    pub fn new(config: HttpClientConfig, api_key: impl Into<String>) -> Result<Self, ExportError> {
        let http = HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy::with_retries(1),
            ..config
        })
        .map_err(|err| ExportError::RemoteCall(format!("building HTTP client: {err:#}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SteamApi for SteamClient {
    async fn global_percentages(&self, app_id: u32) -> Result<JsonValue, FetchError> {
        let app_id = app_id.to_string();
        self.http
            .send("steam_global_percentages", |client| {
                client
                    .get(GLOBAL_PERCENTAGES_URL)
                    .query(&[("gameid", app_id.as_str())])
            })
            .await?
            .json()
    }

    async fn schema(&self, app_id: u32, lang: &str) -> Result<JsonValue, FetchError> {
        let app_id = app_id.to_string();
        self.http
            .send("steam_schema", |client| {
                client.get(SCHEMA_URL).query(&[
                    ("key", self.api_key.as_str()),
                    ("appid", app_id.as_str()),
                    ("l", lang),
                ])
            })
            .await?
            .json()
    }
}

fn percent_value(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|p| p.is_finite() && *p >= 0.0)
}

fn text_field(item: &JsonValue, key: &str) -> String {
    item.get(key).and_then(JsonValue::as_str).unwrap_or_default().to_string()
}

fn flag_field(item: &JsonValue, key: &str) -> bool {
    match item.get(key) {
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(JsonValue::String(s)) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

fn achievements_at<'a>(payload: &'a JsonValue, path: &[&str]) -> &'a [JsonValue] {
    path.iter()
        .try_fold(payload, |node, key| node.get(*key))
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// `api name → percent`; entries without a name or a numeric percent are skipped.
pub fn parse_global_percentages(payload: &JsonValue) -> BTreeMap<String, f64> {
    achievements_at(payload, &["achievementpercentages", "achievements"])
        .iter()
        .filter_map(|item| {
            let name = item.get("name").and_then(JsonValue::as_str).filter(|n| !n.is_empty())?;
            let percent = item.get("percent").and_then(percent_value)?;
            Some((name.to_string(), percent))
        })
        .collect()
}

pub fn parse_schema(payload: &JsonValue) -> BTreeMap<String, SchemaEntry> {
    achievements_at(payload, &["game", "availableGameStats", "achievements"])
        .iter()
        .filter_map(|item| {
            let name = item.get("name").and_then(JsonValue::as_str).filter(|n| !n.is_empty())?;
            Some((
                name.to_string(),
                SchemaEntry {
                    title: text_field(item, "displayName"),
                    description: text_field(item, "description"),
                    hidden: flag_field(item, "hidden"),
                    icon: text_field(item, "icon"),
                    icon_gray: text_field(item, "icongray"),
                },
            ))
        })
        .collect()
}

/// One record per api name seen in either payload, sorted. A name without schema
/// metadata is titled by its api name.
pub fn merge_rows(
    app_id: u32,
    schema: &BTreeMap<String, SchemaEntry>,
    percentages: &BTreeMap<String, f64>,
) -> Vec<AchievementRecord> {
    let names: BTreeSet<&String> = schema.keys().chain(percentages.keys()).collect();
    let mut rows: Vec<AchievementRecord> = names
        .into_iter()
        .map(|name| {
            let meta = schema.get(name).cloned().unwrap_or_default();
            let title = if meta.title.trim().is_empty() {
                name.clone()
            } else {
                meta.title
            };
            let mut record = AchievementRecord::new(title, SourceRef::SteamApp { app_id });
            record.id = name.clone();
            record.description = meta.description;
            record.hidden = meta.hidden;
            record.icon = meta.icon;
            record.icon_locked = meta.icon_gray;
            record.rarity_percent = percentages.get(name).copied();
            record
        })
        .collect();
    sort_rows(&mut rows);
    rows
}

pub async fn run_steam_export(
    config: &ExportConfig,
    request: &SteamRequest,
) -> Result<ExportSummary, ExportError> {
    let api_key = config.require_steam_api_key()?;
    let client = SteamClient::new(config.http_client_config(), api_key)?;
    export_steam_with(&client, request).await
}

pub async fn export_steam_with(
    api: &dyn SteamApi,
    request: &SteamRequest,
) -> Result<ExportSummary, ExportError> {
    let started_at = Utc::now();
    let remote = |err: FetchError| {
        warn!(
            app_id = request.app_id,
            status = ?err.status(),
            timed_out = err.is_timeout(),
            "Steam API request failed"
        );
        ExportError::RemoteCall(format!("Steam API request failed: {err}"))
    };

    let percentages =
        parse_global_percentages(&api.global_percentages(request.app_id).await.map_err(remote)?);
    let schema = parse_schema(&api.schema(request.app_id, &request.lang).await.map_err(remote)?);

    let rows = if schema.is_empty() && percentages.is_empty() {
        info!(app_id = request.app_id, "no achievements for this title; writing header-only csv");
        Vec::new()
    } else {
        merge_rows(request.app_id, &schema, &percentages)
    };

    let out = request.out.clone().unwrap_or_else(|| steam_output_name(request.app_id));
    let output = write_csv_atomic(&out, CsvLayout::Steam, &rows)?;

    Ok(ExportSummary {
        run_id: Uuid::new_v4(),
        tool: "steam",
        target: request.app_id.to_string(),
        output,
        rows: rows.len(),
        started_at,
        finished_at: Utc::now(),
    })
}
