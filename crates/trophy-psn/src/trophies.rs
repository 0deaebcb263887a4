//! Trophy groups and trophy lists for one NP communication id.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};
use trophy_core::{dedup_records, AchievementRecord, ExportError, SourceRef};
use trophy_extract::normalize;

use crate::PsnError;

/// Modern titles live under `trophy2`; PS3/PS4/Vita titles under `trophy`.
pub const SERVICE_NAMES: &[&str] = &["trophy2", "trophy"];

pub const BASE_GROUP_ID: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupSelection {
    #[default]
    All,
    /// Base game only, no DLC groups.
    Base,
}

#[async_trait]
pub trait TrophyApi: Send + Sync {
    async fn trophy_groups(
        &self,
        np_communication_id: &str,
        service: &str,
    ) -> Result<JsonValue, PsnError>;

    async fn trophies(
        &self,
        np_communication_id: &str,
        group_id: &str,
        service: &str,
    ) -> Result<JsonValue, PsnError>;
}

pub fn group_ids(groups: &JsonValue) -> Vec<String> {
    groups
        .get("trophyGroups")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(|g| g.get("trophyGroupId").and_then(JsonValue::as_str))
        .map(str::to_string)
        .collect()
}

/// First service name whose group listing is non-empty, with its group ids.
async fn discover_groups(
    api: &dyn TrophyApi,
    np_communication_id: &str,
) -> Result<(&'static str, Vec<String>), ExportError> {
    let mut reasons = Vec::new();
    for service in SERVICE_NAMES.iter().copied() {
        match api.trophy_groups(np_communication_id, service).await {
            Ok(listing) => {
                let groups = group_ids(&listing);
                if !groups.is_empty() {
                    debug!(service, groups = groups.len(), "trophy groups listed");
                    return Ok((service, groups));
                }
                reasons.push(format!("{service}: no groups"));
            }
            Err(err) => {
                warn!(service, error = %err, "trophy group listing failed");
                reasons.push(format!("{service}: {err}"));
            }
        }
    }
    Err(ExportError::RemoteCall(format!(
        "trophy groups for {np_communication_id} unavailable ({})",
        reasons.join("; ")
    )))
}

/// Fields only the account-scoped trophy listing carries.
pub const EARNED_RATE_FIELDS: &[&str] = &["trophyEarnedRate", "trophyRare"];

fn trophy_id_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn trophy_list(payload: &JsonValue) -> &[JsonValue] {
    payload
        .get("trophies")
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Copy earned-rate fields from the account-scoped listing onto the title's trophy
/// definitions, matched by `trophyId`. Trophies missing from `earned` keep what
/// they had.
pub fn merge_earned_rates(mut definitions: JsonValue, earned: &JsonValue) -> JsonValue {
    let rates: HashMap<String, &Map<String, JsonValue>> = trophy_list(earned)
        .iter()
        .filter_map(|t| Some((trophy_id_key(t.get("trophyId")?), t.as_object()?)))
        .collect();
    let Some(trophies) = definitions.get_mut("trophies").and_then(JsonValue::as_array_mut) else {
        return definitions;
    };
    for trophy in trophies.iter_mut() {
        let source = trophy
            .get("trophyId")
            .and_then(|id| rates.get(&trophy_id_key(id)));
        let Some(source) = source else {
            continue;
        };
        let fields: Vec<(&str, JsonValue)> = EARNED_RATE_FIELDS
            .iter()
            .filter_map(|field| source.get(*field).map(|v| (*field, v.clone())))
            .collect();
        if let Some(target) = trophy.as_object_mut() {
            for (field, value) in fields {
                target.insert(field.to_string(), value);
            }
        }
    }
    definitions
}

fn group_records(
    np_communication_id: &str,
    group_id: &str,
    payload: &JsonValue,
) -> Vec<AchievementRecord> {
    let source_ref = SourceRef::trophy_group(np_communication_id, group_id);
    trophy_list(payload)
        .iter()
        .filter_map(|raw| normalize(raw, None, &source_ref))
        .collect()
}

/// Fetch the selected groups one after another. A failing group is skipped; only
/// an overall empty result is an error.
pub async fn fetch_trophy_records(
    api: &dyn TrophyApi,
    np_communication_id: &str,
    selection: GroupSelection,
) -> Result<Vec<AchievementRecord>, ExportError> {
    let (service, listed) = discover_groups(api, np_communication_id).await?;
    let groups = match selection {
        GroupSelection::All => listed,
        GroupSelection::Base => vec![BASE_GROUP_ID.to_string()],
    };

    let mut records = Vec::new();
    for group_id in &groups {
        match api.trophies(np_communication_id, group_id, service).await {
            Ok(payload) => {
                let found = group_records(np_communication_id, group_id, &payload);
                debug!(group = %group_id, count = found.len(), "trophies fetched");
                records.extend(found);
            }
            Err(err) => warn!(group = %group_id, error = %err, "skipping trophy group"),
        }
    }

    let records = dedup_records(records);
    if records.is_empty() {
        return Err(ExportError::ExtractionEmpty {
            target: np_communication_id.to_string(),
        });
    }
    info!(
        np_communication_id,
        service,
        groups = groups.len(),
        count = records.len(),
        "trophy list ready"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_ids_keep_listing_order() {
        let listing = json!({"trophyGroups": [
            {"trophyGroupId": "default"},
            {"trophyGroupId": "001"},
            {"trophyGroupName": "broken"}
        ]});
        assert_eq!(group_ids(&listing), vec!["default", "001"]);
        assert!(group_ids(&json!({})).is_empty());
    }

    #[test]
    fn trophies_carry_group_source_ref() {
        let payload = json!({"trophies": [
            {
                "trophyId": 0,
                "trophyName": "Plat",
                "trophyType": "platinum",
                "trophyEarnedRate": "3.2",
                "trophyRare": 0
            },
            {"trophyId": 1, "trophyDetail": "no name"}
        ]});
        let records = group_records("NPWR12345_00", "default", &payload);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_ref, SourceRef::trophy_group("NPWR12345_00", "default"));
        assert_eq!(records[0].grade, "platinum");
        assert_eq!(records[0].rarity_bucket, "ultra-rare");
    }

    #[test]
    fn earned_rates_are_joined_by_trophy_id() {
        let definitions = json!({"trophies": [
            {"trophyId": 0, "trophyName": "Plat", "trophyType": "platinum"},
            {"trophyId": 1, "trophyName": "Ace", "trophyType": "bronze"},
            {"trophyId": 2, "trophyName": "Unplayed", "trophyType": "gold"}
        ]});
        let earned = json!({"trophies": [
            {"trophyId": 1, "earned": false, "trophyEarnedRate": "42.5", "trophyRare": 3},
            {"trophyId": "0", "earned": true, "trophyEarnedRate": "4.1", "trophyRare": 0}
        ]});
        let merged = merge_earned_rates(definitions, &earned);
        assert_eq!(merged["trophies"][0]["trophyEarnedRate"], "4.1");
        assert_eq!(merged["trophies"][1]["trophyRare"], 3);
        assert!(merged["trophies"][1].get("earned").is_none());
        assert!(merged["trophies"][2].get("trophyEarnedRate").is_none());

        let records = group_records("NPWR12345_00", "default", &merged);
        let rarity: Vec<_> = records.iter().map(|r| (r.title.as_str(), r.rarity_percent)).collect();
        assert_eq!(rarity, vec![("Plat", Some(4.1)), ("Ace", Some(42.5)), ("Unplayed", None)]);
    }

    #[test]
    fn merge_leaves_payload_without_trophies_alone() {
        let definitions = json!({"error": {"code": 2240526}});
        assert_eq!(merge_earned_rates(definitions.clone(), &json!({})), definitions);
    }
}
