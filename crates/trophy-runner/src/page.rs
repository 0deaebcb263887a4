//! Web page export: render, run the strategy chain, fall back to a second URL.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use trophy_core::{canonicalize, write_csv_atomic, AchievementRecord, CsvLayout, ExportError};
use trophy_extract::{
    extract_from_html, BrowserlessRenderer, HttpPageRenderer, PageRenderer, RenderedPage,
};
use trophy_http::HttpFetcher;
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::{page_output_name, ExportSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Http,
    Browserless,
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub fallback_url: Option<String>,
    pub out: Option<PathBuf>,
    pub render: RenderMode,
    /// Write each rendered document here before extraction.
    pub dump_html: Option<PathBuf>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fallback_url: None,
            out: None,
            render: RenderMode::default(),
            dump_html: None,
        }
    }

    fn targets(&self) -> Vec<&str> {
        std::iter::once(self.url.as_str())
            .chain(self.fallback_url.as_deref())
            .collect()
    }
}

pub fn build_renderer(
    config: &ExportConfig,
    mode: RenderMode,
) -> Result<Box<dyn PageRenderer>, ExportError> {
    let http = HttpFetcher::new(config.http_client_config())
        .map_err(|err| ExportError::RemoteCall(format!("building HTTP client: {err:#}")))?;
    let renderer: Box<dyn PageRenderer> = match mode {
        RenderMode::Http => Box::new(HttpPageRenderer::new(http)),
        RenderMode::Browserless => {
            let base = config.require_browserless_url()?;
            let renderer = BrowserlessRenderer::new(http, base, config.browserless_token.as_deref())
                .map_err(|err| ExportError::Configuration(format!("BROWSERLESS_URL: {err}")))?;
            Box::new(renderer)
        }
    };
    Ok(renderer)
}

pub async fn run_page_export(
    config: &ExportConfig,
    request: &PageRequest,
) -> Result<ExportSummary, ExportError> {
    let renderer = build_renderer(config, request.render)?;
    export_page_with(renderer.as_ref(), request).await
}

async fn dump_page(path: &Path, page: &RenderedPage) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(err) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %parent.display(), error = %err, "cannot create dump directory");
            return;
        }
    }
    match tokio::fs::write(path, page.html.as_bytes()).await {
        Ok(()) => info!(path = %path.display(), url = %page.url, "dumped rendered html"),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to dump rendered html"),
    }
}

/// Try each target in order and keep the first non-empty extraction.
pub async fn extract_first_available(
    renderer: &dyn PageRenderer,
    request: &PageRequest,
) -> Result<Vec<AchievementRecord>, ExportError> {
    let mut rendered_any = false;
    let mut last_error = None;

    for target in request.targets() {
        let page = match renderer.render(target).await {
            Ok(page) => page,
            Err(err) => {
                warn!(url = target, renderer = renderer.name(), error = %err, "render failed");
                last_error = Some(err.to_string());
                continue;
            }
        };
        rendered_any = true;
        if let Some(path) = &request.dump_html {
            dump_page(path, &page).await;
        }

        let records = extract_from_html(&page.html, &page.url);
        if !records.is_empty() {
            return Ok(records);
        }
        warn!(url = target, "no achievements extracted");
    }

    if rendered_any {
        Err(ExportError::ExtractionEmpty {
            target: request.url.clone(),
        })
    } else {
        Err(ExportError::RemoteCall(
            last_error.unwrap_or_else(|| format!("nothing rendered for {}", request.url)),
        ))
    }
}

pub async fn export_page_with(
    renderer: &dyn PageRenderer,
    request: &PageRequest,
) -> Result<ExportSummary, ExportError> {
    let started_at = Utc::now();
    let records = canonicalize(extract_first_available(renderer, request).await?);
    let out = request.out.clone().unwrap_or_else(|| page_output_name(&request.url));
    let output = write_csv_atomic(&out, CsvLayout::Page, &records)?;

    Ok(ExportSummary {
        run_id: Uuid::new_v4(),
        tool: "page",
        target: request.url.clone(),
        output,
        rows: records.len(),
        started_at,
        finished_at: Utc::now(),
    })
}
