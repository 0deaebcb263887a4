//! The three-tier extraction chain: structural → embedded-data → generic heuristic.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};
use trophy_core::{dedup_records, AchievementRecord, SourceRef};
use url::Url;

use crate::document::{NodeHandle, StructuredDocument};
use crate::families::{families_for, SourceFamily};
use crate::normalize::normalize;

/// Immutable per-call input to [`extract`].
pub struct ExtractionContext<'a> {
    pub document: &'a dyn StructuredDocument,
    pub page_url: String,
    pub base_url: Option<Url>,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(document: &'a dyn StructuredDocument, page_url: &str) -> Self {
        Self {
            document,
            page_url: page_url.to_string(),
            base_url: Url::parse(page_url).ok(),
        }
    }

    fn source_ref(&self) -> SourceRef {
        SourceRef::page(self.page_url.clone())
    }
}

pub type Strategy = fn(&ExtractionContext<'_>, &[&SourceFamily]) -> Vec<AchievementRecord>;

pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("structural", structural_strategy),
    ("embedded-data", embedded_strategy),
    ("generic-heuristic", generic_strategy),
];

static CHALLENGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)just a moment|checking your browser|attention required|verify (?:that )?you are (?:a )?human|are you a robot|access denied|enable javascript|ddos protection|please wait while we|captcha",
    )
    .expect("challenge pattern is valid")
});

pub fn is_challenge_text(text: &str) -> bool {
    CHALLENGE_RE.is_match(text)
}

fn finalize(records: Vec<AchievementRecord>) -> Vec<AchievementRecord> {
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| !r.title.trim().is_empty())
        .filter(|r| !is_challenge_text(&r.title))
        .collect();
    if kept.len() < before {
        warn!(dropped = before - kept.len(), "discarded untitled or interstitial rows");
    }
    dedup_records(kept)
}

/// Run the chain and return the first non-empty result. Never fails; an empty
/// vector means every strategy came up dry.
pub fn extract(ctx: &ExtractionContext<'_>) -> Vec<AchievementRecord> {
    let families = families_for(ctx.base_url.as_ref());
    for (name, strategy) in STRATEGIES {
        let records = finalize(strategy(ctx, &families));
        if !records.is_empty() {
            info!(
                strategy = *name,
                count = records.len(),
                url = %ctx.page_url,
                "extracted achievements"
            );
            return records;
        }
        debug!(strategy = *name, "strategy produced no rows");
    }
    Vec::new()
}

fn first_text(
    doc: &dyn StructuredDocument,
    row: NodeHandle,
    selectors: &[&str],
) -> Option<String> {
    selectors
        .iter()
        .flat_map(|sel| doc.query_within(row, sel))
        .map(|node| doc.text(node))
        .find(|text| !text.is_empty())
}

fn first_node(
    doc: &dyn StructuredDocument,
    row: NodeHandle,
    selectors: &[&str],
) -> Option<NodeHandle> {
    selectors
        .iter()
        .find_map(|sel| doc.query_within(row, sel).into_iter().next())
}

const ICON_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original", "data-lazy", "src"];

fn put(raw: &mut Map<String, JsonValue>, key: &str, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        raw.insert(key.to_string(), JsonValue::String(value));
    }
}

fn put_icon_attrs(
    doc: &dyn StructuredDocument,
    raw: &mut Map<String, JsonValue>,
    img: Option<NodeHandle>,
) {
    if let Some(img) = img {
        for attr in ICON_ATTRS {
            put(raw, attr, doc.attr(img, attr));
        }
    }
}

fn structural_row(
    doc: &dyn StructuredDocument,
    row: NodeHandle,
    family: &SourceFamily,
) -> JsonValue {
    let fields = &family.fields;
    let mut raw = Map::new();
    put(&mut raw, "title", first_text(doc, row, fields.title));
    put(&mut raw, "description", first_text(doc, row, fields.description));
    put(&mut raw, "rarity", first_text(doc, row, fields.rarity));
    put(&mut raw, "rarityLabel", first_text(doc, row, fields.rarity_bucket));
    put(
        &mut raw,
        "id",
        fields.id_attrs.iter().find_map(|attr| doc.attr(row, attr)),
    );
    put(&mut raw, "class", doc.attr(row, "class"));
    put_icon_attrs(doc, &mut raw, first_node(doc, row, fields.icon));
    let nested_hidden = first_node(doc, row, fields.hidden_markers).is_some();
    raw.insert(
        "indicators".to_string(),
        serde_json::json!({ "hidden": nested_hidden }),
    );
    JsonValue::Object(raw)
}

/// Rows from every selector of every applicable family, merged by node identity
/// (a row matched twice is extracted once, with the first family's fields).
pub fn structural_strategy(
    ctx: &ExtractionContext<'_>,
    families: &[&SourceFamily],
) -> Vec<AchievementRecord> {
    let doc = ctx.document;
    let mut seen: HashSet<NodeHandle> = HashSet::new();
    let mut rows: Vec<(NodeHandle, &SourceFamily)> = Vec::new();
    for family in families.iter().copied() {
        for selector in family.rows {
            for node in doc.query(selector) {
                if seen.insert(node) {
                    rows.push((node, family));
                }
            }
        }
    }
    rows.sort_by_key(|(node, _)| *node);
    debug!(rows = rows.len(), "structural rows matched");

    let source_ref = ctx.source_ref();
    let records = rows
        .into_iter()
        .filter_map(|(node, family)| {
            let raw = structural_row(doc, node, family);
            normalize(&raw, ctx.base_url.as_ref(), &source_ref)
        })
        .collect();
    dedup_records(records)
}

/// Keys whose presence marks an embedded object as an achievement candidate.
pub const CANDIDATE_ID_KEYS: &[&str] = &[
    "trophyId",
    "trophy_id",
    "achievementId",
    "achievement_id",
    "apiname",
    "apiName",
    "awardId",
    "award_id",
];

/// Substrings that make a payload worth scanning for inline JSON.
pub const PAYLOAD_HINTS: &[&str] =
    &["trophy", "achievement", "award", "earnedRate", "rarity", "apiname"];

const MAX_PARSE_ATTEMPTS: usize = 20_000;
const MAX_DECODED_BLOBS: usize = 512;

fn has_hint(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    PAYLOAD_HINTS.iter().any(|h| lower.contains(&h.to_ascii_lowercase()))
}

fn is_nonempty_container(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => !map.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        _ => false,
    }
}

/// JSON values carried by a payload: the whole payload when it parses, otherwise
/// every object/array literal that parses starting at a `{` or `[` (for
/// `window.__STATE__ = {...};` style assignments), hint-bearing payloads only.
pub fn json_values_in(payload: &str) -> Vec<JsonValue> {
    if let Ok(value) = serde_json::from_str::<JsonValue>(payload.trim()) {
        return if is_nonempty_container(&value) { vec![value] } else { Vec::new() };
    }
    if !has_hint(payload) {
        return Vec::new();
    }

    let mut values = Vec::new();
    let mut pos = 0usize;
    let mut attempts = 0usize;
    while let Some(offset) = payload[pos..].find(['{', '[']) {
        attempts += 1;
        if attempts > MAX_PARSE_ATTEMPTS {
            warn!(attempts, "giving up on oversized embedded payload");
            break;
        }
        let start = pos + offset;
        let mut stream =
            serde_json::Deserializer::from_str(&payload[start..]).into_iter::<JsonValue>();
        match stream.next() {
            Some(Ok(value)) if is_nonempty_container(&value) => {
                pos = start + stream.byte_offset().max(1);
                values.push(value);
            }
            _ => pos = start + 1,
        }
    }
    values
}

fn identity(value: &JsonValue) -> usize {
    value as *const JsonValue as usize
}

fn looks_serialized(text: &str) -> bool {
    let trimmed = text.trim_start();
    (trimmed.starts_with('{') || trimmed.starts_with('[')) && has_hint(trimmed)
}

/// Depth-first walk collecting candidate objects.
///
/// `seen` holds the addresses of containers already visited; callers own it and
/// must keep every walked value alive while it is in use. String scalars that
/// decode as JSON are pushed onto `decoded` for the caller to walk next.
pub fn walk_embedded(
    value: &JsonValue,
    seen: &mut HashSet<usize>,
    candidates: &mut Vec<JsonValue>,
    decoded: &mut Vec<JsonValue>,
) {
    match value {
        JsonValue::Object(map) => {
            if !seen.insert(identity(value)) {
                return;
            }
            if CANDIDATE_ID_KEYS.iter().any(|k| map.contains_key(*k)) {
                candidates.push(value.clone());
            }
            for child in map.values() {
                walk_embedded(child, seen, candidates, decoded);
            }
        }
        JsonValue::Array(items) => {
            if !seen.insert(identity(value)) {
                return;
            }
            for item in items {
                walk_embedded(item, seen, candidates, decoded);
            }
        }
        JsonValue::String(text) if looks_serialized(text) => {
            if let Ok(inner) = serde_json::from_str::<JsonValue>(text.trim()) {
                if is_nonempty_container(&inner) {
                    decoded.push(inner);
                }
            }
        }
        _ => {}
    }
}

/// Walk `roots` plus anything decoded out of string scalars. Decoded values are
/// boxed and retained until the walk ends so visited addresses stay unique.
pub fn collect_embedded_candidates(
    roots: Vec<JsonValue>,
    seen: &mut HashSet<usize>,
) -> Vec<JsonValue> {
    let mut arena: Vec<Box<JsonValue>> = roots.into_iter().map(Box::new).collect();
    let mut candidates = Vec::new();
    let mut next = 0usize;
    let mut decoded_total = 0usize;
    while next < arena.len() {
        let mut decoded = Vec::new();
        walk_embedded(&arena[next], seen, &mut candidates, &mut decoded);
        for value in decoded {
            if decoded_total >= MAX_DECODED_BLOBS {
                break;
            }
            decoded_total += 1;
            arena.push(Box::new(value));
        }
        next += 1;
    }
    candidates
}

pub fn embedded_strategy(
    ctx: &ExtractionContext<'_>,
    _families: &[&SourceFamily],
) -> Vec<AchievementRecord> {
    let roots: Vec<JsonValue> = ctx
        .document
        .embedded_payloads()
        .iter()
        .flat_map(|payload| json_values_in(payload))
        .collect();
    debug!(blobs = roots.len(), "embedded JSON blobs found");

    let mut seen = HashSet::new();
    let candidates = collect_embedded_candidates(roots, &mut seen);
    let source_ref = ctx.source_ref();
    let records = candidates
        .iter()
        .filter_map(|raw| normalize(raw, ctx.base_url.as_ref(), &source_ref))
        .collect();
    dedup_records(records)
}

pub const GENERIC_ROW_SELECTORS: &[&str] = &[
    "tr",
    "li",
    "article",
    "[class*=achievement]",
    "[class*=trophy]",
    "[class*=award]",
    "[class*=card]",
    "[class*=row]",
    "[class*=item]",
];

const GENERIC_TITLE_SELECTORS: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "[class*=title]",
    "[class*=name]",
    "strong",
    "b",
    "a",
];

const GENERIC_DESCRIPTION_SELECTORS: &[&str] = &["[class*=desc]", "p", "small"];

const GENERIC_TEXT_CELLS: &str = "td, div, span, p";

fn generic_title(doc: &dyn StructuredDocument, row: NodeHandle) -> Option<String> {
    first_text(doc, row, GENERIC_TITLE_SELECTORS)
        .filter(|t| !t.contains('%'))
        .or_else(|| {
            doc.query_within(row, GENERIC_TEXT_CELLS)
                .into_iter()
                .map(|node| doc.text(node))
                .find(|text| text.chars().count() >= 2 && !text.contains('%'))
        })
}

/// Drop any titled row that contains another titled row, leaving the innermost
/// ones. `rows` must be sorted by handle.
fn innermost(
    doc: &dyn StructuredDocument,
    rows: Vec<(NodeHandle, String)>,
) -> Vec<(NodeHandle, String)> {
    let keep: Vec<bool> = rows
        .iter()
        .enumerate()
        .map(|(i, (node, _))| match rows.get(i + 1) {
            Some((next, _)) => next.index() > node.index() + doc.subtree_len(*node),
            None => true,
        })
        .collect();
    rows.into_iter()
        .zip(keep)
        .filter_map(|(row, kept)| kept.then_some(row))
        .collect()
}

/// Last resort: any row- or card-like container whose text carries a `%`.
///
/// Percent-bearing matches that yield no title (a rarity badge inside a card)
/// are not rows; the card around them is.
pub fn generic_strategy(
    ctx: &ExtractionContext<'_>,
    _families: &[&SourceFamily],
) -> Vec<AchievementRecord> {
    let doc = ctx.document;
    let mut candidates: Vec<NodeHandle> = GENERIC_ROW_SELECTORS
        .iter()
        .flat_map(|sel| doc.query(sel))
        .collect();
    candidates.sort();
    candidates.dedup();
    let titled: Vec<(NodeHandle, String)> = candidates
        .into_iter()
        .filter(|node| doc.text(*node).contains('%'))
        .filter_map(|node| generic_title(doc, node).map(|title| (node, title)))
        .collect();
    let rows = innermost(doc, titled);
    debug!(rows = rows.len(), "generic percent-bearing rows");

    let source_ref = ctx.source_ref();
    let records = rows
        .into_iter()
        .filter_map(|(row, title)| {
            let description =
                first_text(doc, row, GENERIC_DESCRIPTION_SELECTORS).filter(|d| *d != title);
            let mut raw = Map::new();
            put(&mut raw, "title", Some(title));
            put(&mut raw, "description", description);
            put(&mut raw, "rarity", Some(doc.text(row)));
            put(&mut raw, "class", doc.attr(row, "class"));
            put_icon_attrs(doc, &mut raw, first_node(doc, row, &["img"]));
            normalize(&JsonValue::Object(raw), ctx.base_url.as_ref(), &source_ref)
        })
        .collect();
    dedup_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HtmlDocument;
    use serde_json::json;

    #[test]
    fn inline_assignment_json_is_found() {
        let payload = r#"window.__APP__ = {"trophies": [{"trophyId": 1, "name": "A"}]}; init();"#;
        let values = json_values_in(payload);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["trophies"][0]["name"], "A");
    }

    #[test]
    fn payloads_without_hints_are_ignored() {
        assert!(json_values_in("var cfg = {\"theme\": \"dark\"};").is_empty());
        assert_eq!(json_values_in("{\"theme\": \"dark\"}").len(), 1);
    }

    #[test]
    fn walk_respects_caller_seen_set() {
        let value = json!({"list": [{"trophyId": 1, "name": "A"}]});
        let mut seen = HashSet::new();
        seen.insert(identity(&value));
        let mut candidates = Vec::new();
        let mut decoded = Vec::new();
        walk_embedded(&value, &mut seen, &mut candidates, &mut decoded);
        assert!(candidates.is_empty());

        let mut fresh = HashSet::new();
        walk_embedded(&value, &mut fresh, &mut candidates, &mut decoded);
        assert_eq!(candidates.len(), 1);
        walk_embedded(&value, &mut fresh, &mut candidates, &mut decoded);
        assert_eq!(candidates.len(), 1, "second walk over visited nodes adds nothing");
    }

    #[test]
    fn serialized_strings_are_decoded_and_walked() {
        let inner =
            json!({"achievements": [{"apiname": "ACH_1", "displayName": "First"}]}).to_string();
        let root = json!({"props": {"pageProps": {"state": inner}}});
        let mut seen = HashSet::new();
        let candidates = collect_embedded_candidates(vec![root], &mut seen);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0]["displayName"], "First");
    }

    #[test]
    fn challenge_titles_are_recognized() {
        assert!(is_challenge_text("Just a moment..."));
        assert!(is_challenge_text("Please verify you are a human"));
        assert!(!is_challenge_text("Moment of Truth"));
    }

    #[test]
    fn structural_merges_overlapping_row_selectors() {
        let html = r#"<html><body><ul class="achievement">
            <li class="award" data-award-id="a1">
              <div class="award-title"><a>Ace</a></div>
              <div class="award-description"><p>Win 10 matches</p></div>
              <span class="award-earned">42.5%</span>
            </li></ul></body></html>"#;
        let doc = HtmlDocument::parse(html);
        let ctx = ExtractionContext::new(&doc, "https://www.exophase.com/game/x/trophies/");
        let records = structural_strategy(&ctx, &[&crate::families::EXOPHASE]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a1");
        assert_eq!(records[0].rarity_percent, Some(42.5));
    }

    #[test]
    fn generic_keeps_innermost_percent_rows() {
        let html = r#"<html><body><div class="card-list">
            <div class="card"><h4>Alpha</h4><p>Do alpha things</p><span>10.5%</span></div>
            <div class="card"><h4>Beta</h4><p>Do beta things</p><span>3%</span></div>
            <div class="card"><h4>Gamma</h4><p>No stats here</p></div>
        </div></body></html>"#;
        let doc = HtmlDocument::parse(html);
        let ctx = ExtractionContext::new(&doc, "https://unknown.example/x");
        let records = generic_strategy(&ctx, &[]);
        let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
        assert_eq!(records[0].description, "Do alpha things");
        assert_eq!(records[1].rarity_percent, Some(3.0));
    }

    #[test]
    fn generic_climbs_from_rarity_badge_to_its_card() {
        let html = r#"<html><body><div class="trophy-list">
            <div class="trophy-card"><h3>Ace</h3><p>Win 10 matches</p><span class="trophy-rarity">12.5%</span></div>
            <div class="trophy-card"><h3>Boss</h3><p>Defeat the boss</p><span class="trophy-rarity">3%</span></div>
        </div></body></html>"#;
        let doc = HtmlDocument::parse(html);
        let ctx = ExtractionContext::new(&doc, "https://unknown.example/game");
        let records = generic_strategy(&ctx, &[]);
        let rows: Vec<_> = records
            .iter()
            .map(|r| (r.title.as_str(), r.description.as_str(), r.rarity_percent))
            .collect();
        assert_eq!(
            rows,
            vec![("Ace", "Win 10 matches", Some(12.5)), ("Boss", "Defeat the boss", Some(3.0))]
        );
    }
}
