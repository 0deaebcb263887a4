//! Acquire a rendered document: plain HTTP, or a Browserless `/content` service
//! for client-rendered pages.

use async_trait::async_trait;
use thiserror::Error;
use trophy_http::{FetchError, HttpFetcher};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// URL after redirects; relative links resolve against it.
    pub url: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("renderer returned an empty document for {0}")]
    Empty(String),
    #[error("invalid renderer endpoint {0}")]
    Endpoint(String),
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError>;
}

/// Server-rendered pages: one GET, body as-is.
pub struct HttpPageRenderer {
    http: HttpFetcher,
}

impl HttpPageRenderer {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let response = self.http.get(url).await?;
        let html = response.text();
        if html.trim().is_empty() {
            return Err(RenderError::Empty(url.to_string()));
        }
        Ok(RenderedPage {
            url: response.final_url,
            html,
        })
    }
}

/// Client-rendered pages through a Browserless instance.
pub struct BrowserlessRenderer {
    http: HttpFetcher,
    endpoint: Url,
}

impl BrowserlessRenderer {
    pub fn new(
        http: HttpFetcher,
        base_url: &str,
        token: Option<&str>,
    ) -> Result<Self, RenderError> {
        let mut endpoint = Url::parse(&format!("{}/content", base_url.trim_end_matches('/')))
            .map_err(|err| RenderError::Endpoint(format!("{base_url:?}: {err}")))?;
        if let Some(token) = token {
            endpoint.query_pairs_mut().append_pair("token", token);
        }
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait]
impl PageRenderer for BrowserlessRenderer {
    fn name(&self) -> &'static str {
        "browserless"
    }

    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2" },
        });
        let response = self
            .http
            .send("browserless_content", |client| client.post(self.endpoint.clone()).json(&body))
            .await?;
        let html = response.text();
        if html.trim().is_empty() {
            return Err(RenderError::Empty(url.to_string()));
        }
        Ok(RenderedPage {
            url: url.to_string(),
            html,
        })
    }
}
