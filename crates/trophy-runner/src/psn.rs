//! PSN export: resolve (or accept) an NP communication id, fetch trophies, write CSV.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use trophy_core::{canonicalize, slugify, write_csv_atomic, CsvLayout, ExportError};
use trophy_psn::{
    fetch_trophy_records, normalize_np_id, resolve, GroupSelection, PsnClient, PsnError,
    TitleSearch, TrophyApi,
};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::{psn_output_name, ExportSummary};

#[derive(Debug, Clone, Default)]
pub struct PsnRequest {
    pub query: Option<String>,
    /// Skips title resolution when set.
    pub np_id: Option<String>,
    pub group: GroupSelection,
    pub out: Option<PathBuf>,
    /// Raw search and trophy responses are written here as JSON.
    pub dump_dir: Option<PathBuf>,
}

enum Target {
    Query(String),
    NpId(String),
}

impl PsnRequest {
    fn target(&self) -> Result<Target, ExportError> {
        if let Some(raw) = self.np_id.as_deref() {
            return normalize_np_id(raw).map(Target::NpId).ok_or_else(|| {
                ExportError::Configuration(format!(
                    "{raw:?} is not an NP communication id (NPWR12345_00)"
                ))
            });
        }
        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => Ok(Target::Query(query.to_string())),
            _ => Err(ExportError::Configuration(
                "either --query or --np-id is required".to_string(),
            )),
        }
    }
}

/// Writes every raw response it relays into a dump directory.
pub struct DumpingClient<'a> {
    search: &'a dyn TitleSearch,
    trophies: &'a dyn TrophyApi,
    dir: PathBuf,
}

impl<'a> DumpingClient<'a> {
    pub fn new(search: &'a dyn TitleSearch, trophies: &'a dyn TrophyApi, dir: PathBuf) -> Self {
        Self { search, trophies, dir }
    }

    async fn dump(&self, name: &str, value: &JsonValue) {
        let path = self.dir.join(format!("{}.json", slugify(name)));
        let body = match serde_json::to_vec_pretty(value) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "cannot encode dump");
                return;
            }
        };
        if let Err(err) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(path = %self.dir.display(), error = %err, "cannot create dump directory");
            return;
        }
        if let Err(err) = tokio::fs::write(&path, body).await {
            warn!(path = %path.display(), error = %err, "failed to write dump");
        }
    }
}

#[async_trait]
impl<'a> TitleSearch for DumpingClient<'a> {
    async fn search(&self, domain: &str, query: &str) -> Result<JsonValue, PsnError> {
        let value = self.search.search(domain, query).await?;
        self.dump(&format!("search-{domain}"), &value).await;
        Ok(value)
    }
}

#[async_trait]
impl<'a> TrophyApi for DumpingClient<'a> {
    async fn trophy_groups(
        &self,
        np_communication_id: &str,
        service: &str,
    ) -> Result<JsonValue, PsnError> {
        let value = self.trophies.trophy_groups(np_communication_id, service).await?;
        self.dump(&format!("groups-{np_communication_id}-{service}"), &value).await;
        Ok(value)
    }

    async fn trophies(
        &self,
        np_communication_id: &str,
        group_id: &str,
        service: &str,
    ) -> Result<JsonValue, PsnError> {
        let value = self.trophies.trophies(np_communication_id, group_id, service).await?;
        self.dump(&format!("trophies-{np_communication_id}-{group_id}"), &value).await;
        Ok(value)
    }
}

pub async fn run_psn_export(
    config: &ExportConfig,
    request: &PsnRequest,
) -> Result<ExportSummary, ExportError> {
    let npsso = config.require_psn_npsso()?;
    request.target()?;
    let client = PsnClient::connect(config.http_client_config(), npsso).await?;
    export_psn_with(&client, &client, request).await
}

/// Resolve, fetch and write with injected search/trophy clients.
pub async fn export_psn_with(
    search: &dyn TitleSearch,
    trophies: &dyn TrophyApi,
    request: &PsnRequest,
) -> Result<ExportSummary, ExportError> {
    let started_at = Utc::now();
    let target = request.target()?;

    let dumping = request
        .dump_dir
        .clone()
        .map(|dir| DumpingClient::new(search, trophies, dir));
    let (search, trophies): (&dyn TitleSearch, &dyn TrophyApi) = match &dumping {
        Some(client) => (client as &dyn TitleSearch, client as &dyn TrophyApi),
        None => (search, trophies),
    };

    let (np_id, label) = match target {
        Target::NpId(id) => (id.clone(), id),
        Target::Query(query) => {
            let id = resolve(search, &query).await?;
            info!(query = %query, np_communication_id = %id, "title resolved");
            (id, query)
        }
    };

    let records = canonicalize(fetch_trophy_records(trophies, &np_id, request.group).await?);
    let out = request.out.clone().unwrap_or_else(|| psn_output_name(&label));
    let output = write_csv_atomic(&out, CsvLayout::Psn, &records)?;

    Ok(ExportSummary {
        run_id: Uuid::new_v4(),
        tool: "psn",
        target: np_id,
        output,
        rows: records.len(),
        started_at,
        finished_at: Utc::now(),
    })
}
