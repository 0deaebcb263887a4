use std::time::Duration;

use trophy_core::ExportError;
use trophy_http::HttpClientConfig;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Credentials and client knobs read from the environment (and `.env`).
#[derive(Clone)]
pub struct ExportConfig {
    pub psn_npsso: Option<String>,
    pub steam_api_key: Option<String>,
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl std::fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<set>");
        f.debug_struct("ExportConfig")
            .field("psn_npsso", &redact(&self.psn_npsso))
            .field("steam_api_key", &redact(&self.steam_api_key))
            .field("browserless_url", &self.browserless_url)
            .field("browserless_token", &redact(&self.browserless_token))
            .field("user_agent", &self.user_agent)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl ExportConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            psn_npsso: var("PSN_NPSSO"),
            steam_api_key: var("STEAM_API_KEY"),
            browserless_url: var("BROWSERLESS_URL"),
            browserless_token: var("BROWSERLESS_TOKEN"),
            user_agent: var("TROPHY_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: var("TROPHY_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    pub fn require_psn_npsso(&self) -> Result<&str, ExportError> {
        require(&self.psn_npsso, "PSN_NPSSO")
    }

    pub fn require_steam_api_key(&self) -> Result<&str, ExportError> {
        require(&self.steam_api_key, "STEAM_API_KEY")
    }

    pub fn require_browserless_url(&self) -> Result<&str, ExportError> {
        require(&self.browserless_url, "BROWSERLESS_URL")
    }
}

fn require<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, ExportError> {
    value.as_deref().ok_or_else(|| {
        ExportError::Configuration(format!(
            "missing {key}; set it in the environment or a .env file"
        ))
    })
}

/// Load `.env` from the working directory if present. Existing variables win.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env");
    }
}
