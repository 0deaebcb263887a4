//! Free-text title → NP communication id.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use trophy_core::ExportError;

use crate::PsnError;

/// Search classification domains, broad to narrow.
pub const SEARCH_DOMAINS: &[&str] = &["ConceptGameAll", "ConceptGameMobileApp", "MobileGames"];

/// Fields that carry the identifier directly on a search result.
const ID_FIELDS: &[&str] = &[
    "npCommunicationId",
    "communicationId",
    "npCommId",
    "np_communication_id",
    "communication_id",
];

const CLASSIFICATION_FIELDS: &[&str] = &[
    "type",
    "classification",
    "storeDisplayClassification",
    "localizedStoreDisplayClassification",
];

/// Lower-cased key fragments that suggest a communication id buried elsewhere.
const DEEP_KEY_HINTS: &[&str] = &["communication", "npcommid", "commid"];

static NP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[A-Z]{4}\d{5}_\d{2}$").expect("np id pattern is valid"));

/// Search seam; the live implementation is [`crate::PsnClient`].
#[async_trait]
pub trait TitleSearch: Send + Sync {
    /// Raw search response for one classification domain.
    async fn search(&self, domain: &str, query: &str) -> Result<JsonValue, PsnError>;
}

/// `NPWR12345_00`-shaped ids, upper-cased. Anything else is `None`.
pub fn normalize_np_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    NP_ID_RE.is_match(trimmed).then(|| trimmed.to_ascii_uppercase())
}

/// Result objects of every result group in one domain response.
pub fn search_candidates(response: &JsonValue) -> Vec<&JsonValue> {
    response
        .get("domainResponses")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(|domain| domain.get("results").and_then(JsonValue::as_array))
        .flatten()
        .collect()
}

/// The candidate itself and its nested `result` object, where the search API
/// keeps most product fields.
fn candidate_layers(candidate: &JsonValue) -> impl Iterator<Item = &JsonValue> {
    std::iter::once(candidate).chain(candidate.get("result"))
}

pub fn structural_identifier(candidate: &JsonValue) -> Option<String> {
    candidate_layers(candidate).find_map(|layer| {
        ID_FIELDS
            .iter()
            .filter_map(|field| layer.get(*field).and_then(JsonValue::as_str))
            .find_map(normalize_np_id)
    })
}

pub fn is_game_typed(candidate: &JsonValue) -> bool {
    candidate_layers(candidate).any(|layer| {
        CLASSIFICATION_FIELDS
            .iter()
            .filter_map(|field| layer.get(*field).and_then(JsonValue::as_str))
            .any(|class| class.to_lowercase().contains("game"))
    })
}

/// Depth-first search for a pattern-matching value under a key that names a
/// communication id.
pub fn deep_walk_identifier(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Object(map) => {
            let direct = map.iter().find_map(|(key, child)| {
                let key = key.to_lowercase();
                if !DEEP_KEY_HINTS.iter().any(|hint| key.contains(hint)) {
                    return None;
                }
                child.as_str().and_then(normalize_np_id)
            });
            direct.or_else(|| map.values().find_map(deep_walk_identifier))
        }
        JsonValue::Array(items) => items.iter().find_map(deep_walk_identifier),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPick {
    /// Game-typed candidate with an identifier; stops the scan.
    Confirmed(String),
    /// Some identifier, no game classification.
    Provisional(String),
    Nothing,
}

/// Best identifier in one domain response.
pub fn pick_candidate(response: &JsonValue) -> SearchPick {
    let mut first_any = None;
    for candidate in search_candidates(response) {
        let Some(id) = structural_identifier(candidate) else {
            continue;
        };
        if is_game_typed(candidate) {
            return SearchPick::Confirmed(id);
        }
        first_any.get_or_insert(id);
    }
    if let Some(id) = first_any {
        return SearchPick::Provisional(id);
    }
    match deep_walk_identifier(response) {
        Some(id) => {
            debug!(np_communication_id = %id, "identifier found by deep walk");
            SearchPick::Provisional(id)
        }
        None => SearchPick::Nothing,
    }
}

/// Search every domain in order and return the first type-confirmed id, or the
/// first provisional id when no domain confirms one.
///
/// Failed domain calls are not retried; their reasons are folded into the
/// resolution error together with the domains that matched nothing.
pub async fn resolve(search: &dyn TitleSearch, query: &str) -> Result<String, ExportError> {
    let mut provisional: Option<(String, &str)> = None;
    let mut reasons = Vec::new();

    for domain in SEARCH_DOMAINS.iter().copied() {
        let response = match search.search(domain, query).await {
            Ok(response) => response,
            Err(err) => {
                warn!(domain, error = %err, "title search failed");
                reasons.push(format!("{domain}: search failed: {err}"));
                continue;
            }
        };

        match pick_candidate(&response) {
            SearchPick::Confirmed(id) => {
                info!(domain, np_communication_id = %id, "resolved title");
                return Ok(id);
            }
            SearchPick::Provisional(id) => {
                debug!(domain, np_communication_id = %id, "provisional match");
                if provisional.is_none() {
                    provisional = Some((id, domain));
                }
            }
            SearchPick::Nothing => reasons.push(format!("{domain}: no match")),
        }
    }

    match provisional {
        Some((id, domain)) => {
            info!(
                domain,
                np_communication_id = %id,
                "resolved title without a game classification"
            );
            Ok(id)
        }
        None => Err(ExportError::Resolution {
            query: query.to_string(),
            reasons,
        }),
    }
}
