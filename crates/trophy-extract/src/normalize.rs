//! Raw candidate (any JSON shape) → canonical [`AchievementRecord`].
//!
//! Vendor variation lives in the alias tables below; every lookup goes through
//! [`first_non_empty`] so adding a vendor key is a data change, not a branch.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::debug;
use trophy_core::{collapse_whitespace, AchievementRecord, SourceRef};
use url::Url;

pub const TITLE_KEYS: &[&str] = &[
    "name",
    "title",
    "displayName",
    "display_name",
    "trophyName",
    "achievementName",
    "awardName",
    "label",
];

pub const DESCRIPTION_KEYS: &[&str] = &[
    "description",
    "desc",
    "trophyDetail",
    "detail",
    "achievementDescription",
    "awardDescription",
    "summary",
];

pub const RARITY_PERCENT_KEYS: &[&str] = &[
    "rarityPercent",
    "rarity_percent",
    "trophyEarnedRate",
    "earnedRate",
    "globalPercent",
    "global_percent",
    "percent",
    "percentage",
    "unlockRate",
    "rarity",
];

pub const RARITY_BUCKET_KEYS: &[&str] = &[
    "rarityBucket",
    "rarity_bucket",
    "rarityLabel",
    "rarityName",
    "trophyRare",
    "rarity",
];

pub const HIDDEN_FLAG_KEYS: &[&str] = &[
    "hidden",
    "isHidden",
    "is_hidden",
    "trophyHidden",
    "secret",
    "isSecret",
    "is_secret",
];

pub const CLASS_KEYS: &[&str] = &["class", "className", "classList"];

/// Lazy-load attributes come first: sources park the real image there and put a
/// placeholder in `src`.
pub const ICON_KEYS: &[&str] = &[
    "data-src",
    "data-lazy-src",
    "data-original",
    "data-lazy",
    "lazySrc",
    "trophyIconUrl",
    "iconUrl",
    "icon_url",
    "icon",
    "imageUrl",
    "image",
    "src",
];

pub const LOCKED_ICON_KEYS: &[&str] =
    &["icongray", "iconGray", "icon_gray", "lockedIcon", "icon_locked"];

pub const ID_KEYS: &[&str] = &[
    "trophyId",
    "trophy_id",
    "achievementId",
    "achievement_id",
    "apiname",
    "apiName",
    "awardId",
    "award_id",
    "data-id",
    "id",
];

pub const GRADE_KEYS: &[&str] = &["trophyType", "trophyGrade", "grade"];

/// PSN `trophyRare` codes.
const RARITY_CODES: &[(i64, &str)] =
    &[(0, "ultra-rare"), (1, "very-rare"), (2, "rare"), (3, "common")];

static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d.,])(\d+(?:[.,]\d+)?)\s*%").expect("percent pattern is valid")
});

static BARE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number pattern is valid"));

static BUCKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ultra[\s_-]*rare|very[\s_-]*rare|uncommon|common|rare|epic|legendary)\b")
        .expect("bucket pattern is valid")
});

fn scalar_text(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// First alias whose value is a non-empty string or a number.
pub fn first_non_empty(raw: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find_map(scalar_text)
}

pub fn parse_rarity_percent(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64().filter(|v| v.is_finite() && *v >= 0.0),
        JsonValue::String(s) => parse_percent_text(s),
        _ => None,
    }
}

/// `<number>%` first, then the first bare number. No number → `None`, never 0.
pub fn parse_percent_text(text: &str) -> Option<f64> {
    let from_percent = PERCENT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace(',', "."));
    let candidate =
        from_percent.or_else(|| BARE_NUMBER_RE.find(text).map(|m| m.as_str().to_string()))?;
    candidate
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Leftmost vocabulary hit, canonicalized (`"Ultra Rare"` → `"ultra-rare"`).
pub fn parse_rarity_bucket(text: &str) -> String {
    BUCKET_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .to_lowercase()
                .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("-")
        })
        .unwrap_or_default()
}

fn rarity_from(raw: &JsonValue) -> Option<f64> {
    RARITY_PERCENT_KEYS
        .iter()
        .filter_map(|key| raw.get(*key))
        .find_map(parse_rarity_percent)
}

fn bucket_from(raw: &JsonValue) -> String {
    for key in RARITY_BUCKET_KEYS {
        let bucket = match raw.get(*key) {
            Some(JsonValue::Number(n)) => n
                .as_i64()
                .and_then(|code| RARITY_CODES.iter().find(|(c, _)| *c == code))
                .map(|(_, label)| label.to_string())
                .unwrap_or_default(),
            Some(JsonValue::String(s)) => parse_rarity_bucket(s),
            _ => String::new(),
        };
        if !bucket.is_empty() {
            return bucket;
        }
    }
    String::new()
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        JsonValue::String(s) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
        }
        _ => false,
    }
}

fn mentions_hidden(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("hidden") || lower.contains("secret")
}

const HIDDEN_CLASS_TOKENS: &[&str] = &[
    "hidden",
    "secret",
    "is-hidden",
    "is-secret",
    "hidden-achievement",
    "hidden_achievement",
    "hidden-trophy",
];

/// Whole class token naming a hidden/secret row. Layout utilities like
/// `overflow-hidden`, `visually-hidden` or `hidden-xs` do not count.
pub fn is_hidden_class_token(token: &str) -> bool {
    let token = token.to_ascii_lowercase();
    HIDDEN_CLASS_TOKENS.contains(&token.as_str())
        || ["secret-", "secret_"].iter().any(|p| token.starts_with(p))
        || ["-secret", "_secret"].iter().any(|s| token.ends_with(s))
}

/// One weak signal feeding the hidden flag.
pub struct HiddenSignal {
    pub name: &'static str,
    pub test: fn(&JsonValue, &str, &str) -> bool,
}

pub fn text_mentions_hidden(_raw: &JsonValue, title: &str, description: &str) -> bool {
    mentions_hidden(title) || mentions_hidden(description)
}

pub fn structural_marker_set(raw: &JsonValue, _title: &str, _description: &str) -> bool {
    let flagged = HIDDEN_FLAG_KEYS
        .iter()
        .filter_map(|key| raw.get(*key))
        .any(truthy);
    let classed = CLASS_KEYS.iter().filter_map(|key| raw.get(*key)).any(|v| match v {
        JsonValue::String(s) => s.split_whitespace().any(is_hidden_class_token),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .flat_map(str::split_whitespace)
            .any(is_hidden_class_token),
        _ => false,
    });
    flagged || classed
}

pub fn nested_indicator_present(raw: &JsonValue, _title: &str, _description: &str) -> bool {
    let Some(map) = raw.as_object() else {
        return false;
    };
    map.values().filter(|v| v.is_object()).any(|child| {
        HIDDEN_FLAG_KEYS
            .iter()
            .filter_map(|key| child.get(*key))
            .any(truthy)
    })
}

/// Any one signal is enough.
pub const HIDDEN_SIGNALS: &[HiddenSignal] = &[
    HiddenSignal {
        name: "text",
        test: text_mentions_hidden,
    },
    HiddenSignal {
        name: "marker",
        test: structural_marker_set,
    },
    HiddenSignal {
        name: "nested",
        test: nested_indicator_present,
    },
];

pub fn is_hidden(raw: &JsonValue, title: &str, description: &str) -> bool {
    match HIDDEN_SIGNALS.iter().find(|signal| (signal.test)(raw, title, description)) {
        Some(signal) => {
            debug!(title, signal = signal.name, "row marked hidden");
            true
        }
        None => false,
    }
}

/// Absolute URL when resolvable; the raw string untouched when it is malformed.
pub fn resolve_icon_url(raw: &str, base: Option<&Url>) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match Url::parse(raw) {
        Ok(url) => url.to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => base
            .and_then(|b| b.join(raw).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

fn strip_title_prefix(description: String, title: &str) -> String {
    match description.strip_prefix(title) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
            rest.trim_start_matches(|c: char| c.is_whitespace() || c == '-' || c == ':').to_string()
        }
        _ => description,
    }
}

/// Build a record from `raw`, or `None` when no title alias is present.
pub fn normalize(
    raw: &JsonValue,
    base: Option<&Url>,
    source_ref: &SourceRef,
) -> Option<AchievementRecord> {
    let title = collapse_whitespace(&first_non_empty(raw, TITLE_KEYS)?);
    if title.is_empty() {
        return None;
    }
    let description = first_non_empty(raw, DESCRIPTION_KEYS)
        .map(|d| strip_title_prefix(collapse_whitespace(&d), &title))
        .unwrap_or_default();

    let mut record = AchievementRecord::new(title, source_ref.clone());
    record.hidden = is_hidden(raw, &record.title, &description);
    record.description = description;
    record.id = first_non_empty(raw, ID_KEYS).unwrap_or_default();
    record.rarity_percent = rarity_from(raw);
    record.rarity_bucket = bucket_from(raw);
    record.icon = first_non_empty(raw, ICON_KEYS)
        .map(|icon| resolve_icon_url(&icon, base))
        .unwrap_or_default();
    record.icon_locked = first_non_empty(raw, LOCKED_ICON_KEYS)
        .map(|icon| resolve_icon_url(&icon, base))
        .unwrap_or_default();
    record.grade = first_non_empty(raw, GRADE_KEYS)
        .map(|g| g.to_lowercase())
        .unwrap_or_default();
    Some(record)
}
