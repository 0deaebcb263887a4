//! NPSSO → bearer token exchange and the live search/trophy client.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};
use trophy_core::ExportError;
use trophy_http::{HttpClientConfig, HttpFetcher};
use url::Url;

use crate::resolver::TitleSearch;
use crate::trophies::{merge_earned_rates, TrophyApi};
use crate::PsnError;

const AUTHORIZE_URL: &str = "https://ca.account.sony.com/api/authz/v3/oauth/authorize";
const TOKEN_URL: &str = "https://ca.account.sony.com/api/authz/v3/oauth/token";
const API_BASE: &str = "https://m.np.playstation.com/api";

const CLIENT_ID: &str = "09515159-7237-4370-9b40-3806e67c0891";
const REDIRECT_URI: &str = "com.scee.psxandroid.scecompcall://redirect";
const SCOPE: &str = "psn:mobile.v2.core psn:clientapp";
/// `CLIENT_ID:secret` of the PlayStation App, base64-encoded.
const CLIENT_BASIC_AUTH: &str = "Basic MDk1MTUxNTktNzIzNy00MzcwLTliNDAtMzgwNmU2N2MwODkxOnVjUGprYTV0bnRCMktxc1A=";

const SEARCH_PAGE_SIZE: &str = "20";

pub struct PsnSession {
    access_token: String,
}

impl fmt::Debug for PsnSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PsnSession").field("access_token", &"<redacted>").finish()
    }
}

impl PsnSession {
    pub fn from_access_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Exchange an NPSSO cookie for an access token. `auth_http` must not follow
    /// redirects: the authorization code arrives in a `Location` header.
    pub async fn authenticate(auth_http: &HttpFetcher, npsso: &str) -> Result<Self, ExportError> {
        let authorize = auth_http
            .send("psn_authorize", |client| {
                client
                    .get(AUTHORIZE_URL)
                    .query(&[
                        ("access_type", "offline"),
                        ("client_id", CLIENT_ID),
                        ("redirect_uri", REDIRECT_URI),
                        ("response_type", "code"),
                        ("scope", SCOPE),
                    ])
                    .header(COOKIE, format!("npsso={npsso}"))
            })
            .await
            .map_err(|err| {
                ExportError::Authentication(format!("authorize request failed: {err}"))
            })?;

        let code = authorize
            .location
            .as_deref()
            .and_then(authorization_code)
            .ok_or_else(|| {
                ExportError::Authentication(
                    "NPSSO rejected: no authorization code issued".to_string(),
                )
            })?;

        let token = auth_http
            .send("psn_token", |client| {
                client
                    .post(TOKEN_URL)
                    .header(AUTHORIZATION, CLIENT_BASIC_AUTH)
                    .form(&[
                        ("code", code.as_str()),
                        ("redirect_uri", REDIRECT_URI),
                        ("grant_type", "authorization_code"),
                        ("token_format", "jwt"),
                    ])
            })
            .await
            .map_err(|err| ExportError::Authentication(format!("token exchange failed: {err}")))?;

        let body: JsonValue = token
            .json()
            .map_err(|err| ExportError::Authentication(err.to_string()))?;
        let access_token = body
            .get("access_token")
            .and_then(JsonValue::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ExportError::Authentication("token response carried no access_token".to_string())
            })?;

        info!("PSN session established");
        Ok(Self::from_access_token(access_token))
    }
}

/// `code` query parameter of the redirect target.
pub fn authorization_code(location: &str) -> Option<String> {
    let url = Url::parse(location).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
}

pub fn search_request_body(domain: &str, query: &str) -> JsonValue {
    json!({
        "searchTerm": query,
        "domainRequests": [{
            "domain": domain,
            "pagination": { "cursor": "", "pageSize": SEARCH_PAGE_SIZE }
        }],
        "countryCode": "us",
        "languageCode": "en",
        "age": "69"
    })
}

pub fn trophy_groups_url(np_communication_id: &str, service: &str) -> String {
    format!("{API_BASE}/trophy/v1/npCommunicationIds/{np_communication_id}/trophyGroups?npServiceName={service}")
}

pub fn trophies_url(np_communication_id: &str, group_id: &str, service: &str) -> String {
    format!(
        "{API_BASE}/trophy/v1/npCommunicationIds/{np_communication_id}/trophyGroups/{group_id}/trophies?npServiceName={service}"
    )
}

/// Account-scoped trophy list; the only route that carries earned rates.
pub fn earned_trophies_url(np_communication_id: &str, group_id: &str, service: &str) -> String {
    format!(
        "{API_BASE}/trophy/v1/users/me/npCommunicationIds/{np_communication_id}/trophyGroups/{group_id}/trophies?npServiceName={service}"
    )
}

/// Authenticated client for search and trophy endpoints.
#[derive(Debug)]
pub struct PsnClient {
    http: HttpFetcher,
    session: PsnSession,
}

impl PsnClient {
    pub fn new(http: HttpFetcher, session: PsnSession) -> Self {
        Self { http, session }
    }

    /// Build the two HTTP clients (one without redirects for the OAuth hop) and
    /// authenticate.
    pub async fn connect(config: HttpClientConfig, npsso: &str) -> Result<Self, ExportError> {
        let auth_config = HttpClientConfig {
            follow_redirects: false,
            ..config.clone()
        };
        let auth_http = HttpFetcher::new(auth_config)
            .map_err(|err| ExportError::RemoteCall(format!("building HTTP client: {err:#}")))?;
        let http = HttpFetcher::new(config)
            .map_err(|err| ExportError::RemoteCall(format!("building HTTP client: {err:#}")))?;
        let session = PsnSession::authenticate(&auth_http, npsso).await?;
        Ok(Self::new(http, session))
    }

    async fn get_json(&self, label: &str, url: &str) -> Result<JsonValue, PsnError> {
        let bearer = self.session.bearer();
        let response = self
            .http
            .send(label, |client| client.get(url).header(AUTHORIZATION, bearer.as_str()))
            .await?;
        Ok(response.json()?)
    }
}

#[async_trait]
impl TitleSearch for PsnClient {
    async fn search(&self, domain: &str, query: &str) -> Result<JsonValue, PsnError> {
        let url = format!("{API_BASE}/search/v1/universalSearch");
        let body = search_request_body(domain, query);
        let bearer = self.session.bearer();
        let response = self
            .http
            .send("psn_search", |client| {
                client
                    .post(url.as_str())
                    .header(AUTHORIZATION, bearer.as_str())
                    .json(&body)
            })
            .await?;
        let value: JsonValue = response.json()?;
        if value.get("domainResponses").is_none() {
            warn!(domain, "search response has no domainResponses");
        }
        Ok(value)
    }
}

#[async_trait]
impl TrophyApi for PsnClient {
    async fn trophy_groups(
        &self,
        np_communication_id: &str,
        service: &str,
    ) -> Result<JsonValue, PsnError> {
        let url = trophy_groups_url(np_communication_id, service);
        self.get_json("psn_trophy_groups", &url).await
    }

    /// Title definitions merged with the account's earned rates. Titles the account
    /// has never played have no earned listing; their rarity stays empty.
    async fn trophies(
        &self,
        np_communication_id: &str,
        group_id: &str,
        service: &str,
    ) -> Result<JsonValue, PsnError> {
        let definitions = self
            .get_json("psn_trophies", &trophies_url(np_communication_id, group_id, service))
            .await?;
        let earned_url = earned_trophies_url(np_communication_id, group_id, service);
        match self.get_json("psn_earned_trophies", &earned_url).await {
            Ok(earned) => Ok(merge_earned_rates(definitions, &earned)),
            Err(err) => {
                warn!(
                    group = group_id,
                    status = ?err.status(),
                    error = %err,
                    "earned rates unavailable; rarity left empty"
                );
                Ok(definitions)
            }
        }
    }
}
