//! Core record model, error kinds and output shaping for trophy exports.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "trophy-core";

/// Where a record came from: a rendered page, a PSN trophy group, or a Steam app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    Page {
        url: String,
    },
    TrophyGroup {
        np_communication_id: String,
        trophy_group_id: String,
    },
    SteamApp {
        app_id: u32,
    },
}

impl SourceRef {
    pub fn page(url: impl Into<String>) -> Self {
        Self::Page { url: url.into() }
    }

    pub fn trophy_group(
        np_communication_id: impl Into<String>,
        trophy_group_id: impl Into<String>,
    ) -> Self {
        Self::TrophyGroup {
            np_communication_id: np_communication_id.into(),
            trophy_group_id: trophy_group_id.into(),
        }
    }
}

/// Canonical output unit. Built once per run from a raw candidate and never mutated
/// after it has been handed to dedup/sort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    /// `None` means the source carried no rarity; `Some(0.0)` is a real 0%.
    pub rarity_percent: Option<f64>,
    pub rarity_bucket: String,
    pub hidden: bool,
    pub icon: String,
    pub icon_locked: String,
    pub grade: String,
    pub source_ref: SourceRef,
}

impl AchievementRecord {
    pub fn new(title: impl Into<String>, source_ref: SourceRef) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            description: String::new(),
            rarity_percent: None,
            rarity_bucket: String::new(),
            hidden: false,
            icon: String::new(),
            icon_locked: String::new(),
            grade: String::new(),
            source_ref,
        }
    }

    /// Joint (title, description) key, insensitive to casing and whitespace runs.
    pub fn dedup_key(&self) -> (String, String) {
        (fold_key_fragment(&self.title), fold_key_fragment(&self.description))
    }
}

pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_key_fragment(input: &str) -> String {
    collapse_whitespace(input).to_lowercase()
}

/// Lower-case, dash-separated slug used for default output file names.
pub fn slugify(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("could not resolve {query:?}: {}", .reasons.join("; "))]
    Resolution { query: String, reasons: Vec<String> },
    #[error("no achievements could be extracted from {target}")]
    ExtractionEmpty { target: String },
    #[error("remote call failed: {0}")]
    RemoteCall(String),
    #[error("output failed: {0}")]
    Output(String),
}

impl ExportError {
    /// Process exit code, distinct per failure category.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExportError::Output(_) => 1,
            ExportError::Configuration(_) => 2,
            ExportError::RemoteCall(_) => 3,
            ExportError::Authentication(_) => 4,
            ExportError::Resolution { .. } => 5,
            ExportError::ExtractionEmpty { .. } => 6,
        }
    }
}

/// Collapse records sharing a (title, description) key and drop untitled ones.
///
/// When several records share a key the canonically smallest one survives, so the
/// result does not depend on the order candidates arrived in. First-seen key order
/// is preserved otherwise.
pub fn dedup_records(records: Vec<AchievementRecord>) -> Vec<AchievementRecord> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut out: Vec<AchievementRecord> = Vec::new();
    for record in records {
        if record.title.trim().is_empty() {
            continue;
        }
        let key = record.dedup_key();
        match index.get(&key) {
            Some(&slot) => {
                if compare_rows(&record, &out[slot]) == Ordering::Less {
                    out[slot] = record;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(record);
            }
        }
    }
    out
}

/// Output order: rarity present before absent, visible before hidden, then rarer
/// last (higher percent first). Remaining fields break ties so equal inputs always
/// serialize identically.
pub fn compare_rows(a: &AchievementRecord, b: &AchievementRecord) -> Ordering {
    let tier = |r: &AchievementRecord| (r.rarity_percent.is_none(), r.hidden);
    tier(a)
        .cmp(&tier(b))
        .then_with(|| match (a.rarity_percent, b.rarity_percent) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            _ => Ordering::Equal,
        })
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.rarity_bucket.cmp(&b.rarity_bucket))
        .then_with(|| a.grade.cmp(&b.grade))
        .then_with(|| a.icon.cmp(&b.icon))
        .then_with(|| a.icon_locked.cmp(&b.icon_locked))
        .then_with(|| a.source_ref.cmp(&b.source_ref))
}

pub fn sort_rows(records: &mut [AchievementRecord]) {
    records.sort_by(compare_rows);
}

/// Dedup then sort; the shape every exporter hands to the CSV writer.
pub fn canonicalize(records: Vec<AchievementRecord>) -> Vec<AchievementRecord> {
    let mut rows = dedup_records(records);
    sort_rows(&mut rows);
    rows
}

/// Fixed column set per export tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvLayout {
    Page,
    Psn,
    Steam,
}

impl CsvLayout {
    pub fn header(self) -> &'static [&'static str] {
        match self {
            CsvLayout::Page => &[
                "id",
                "title",
                "description",
                "rarity_percent",
                "rarity_bucket",
                "hidden",
                "icon",
                "source_url",
            ],
            CsvLayout::Psn => &[
                "np_communication_id",
                "trophy_group_id",
                "trophy_id",
                "title",
                "description",
                "grade",
                "rarity_percent",
                "rarity_bucket",
                "hidden",
                "icon",
            ],
            CsvLayout::Steam => &[
                "api_name",
                "title",
                "description",
                "hidden",
                "icon",
                "icon_gray",
                "global_percent",
            ],
        }
    }

    fn row(self, record: &AchievementRecord) -> Vec<String> {
        let hidden = if record.hidden { "true" } else { "false" }.to_string();
        match self {
            CsvLayout::Page => {
                let source_url = match &record.source_ref {
                    SourceRef::Page { url } => url.clone(),
                    _ => String::new(),
                };
                vec![
                    record.id.clone(),
                    record.title.clone(),
                    record.description.clone(),
                    format_percent(record.rarity_percent),
                    record.rarity_bucket.clone(),
                    hidden,
                    record.icon.clone(),
                    source_url,
                ]
            }
            CsvLayout::Psn => {
                let (np_id, group_id) = match &record.source_ref {
                    SourceRef::TrophyGroup {
                        np_communication_id,
                        trophy_group_id,
                    } => (np_communication_id.clone(), trophy_group_id.clone()),
                    _ => (String::new(), String::new()),
                };
                vec![
                    np_id,
                    group_id,
                    record.id.clone(),
                    record.title.clone(),
                    record.description.clone(),
                    record.grade.clone(),
                    format_percent(record.rarity_percent),
                    record.rarity_bucket.clone(),
                    hidden,
                    record.icon.clone(),
                ]
            }
            CsvLayout::Steam => vec![
                record.id.clone(),
                record.title.clone(),
                record.description.clone(),
                hidden,
                record.icon.clone(),
                record.icon_locked.clone(),
                record
                    .rarity_percent
                    .map(|p| format!("{p:.6}%"))
                    .unwrap_or_default(),
            ],
        }
    }
}

fn format_percent(value: Option<f64>) -> String {
    value.map(|p| p.to_string()).unwrap_or_default()
}

/// Render header + rows fully in memory.
pub fn render_csv(
    layout: CsvLayout,
    records: &[AchievementRecord],
) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(layout.header())
        .map_err(|e| ExportError::Output(format!("encoding csv header: {e}")))?;
    for record in records {
        writer
            .write_record(layout.row(record))
            .map_err(|e| ExportError::Output(format!("encoding csv row {:?}: {e}", record.title)))?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Output(format!("flushing csv buffer: {e}")))
}

/// Write the CSV via a temp file in the destination directory and an atomic rename,
/// so a failed run never leaves a partial file behind.
pub fn write_csv_atomic(
    path: impl AsRef<Path>,
    layout: CsvLayout,
    records: &[AchievementRecord],
) -> Result<PathBuf, ExportError> {
    let path = path.as_ref();
    let bytes = render_csv(layout, records)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| io_failure("creating", &parent, e))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .map_err(|e| io_failure("opening temp file", &temp_path, e))?;
    if let Err(err) = file.write_all(&bytes).and_then(|_| file.flush()) {
        drop(file);
        let _ = fs::remove_file(&temp_path);
        return Err(io_failure("writing temp file", &temp_path, err));
    }
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_failure("renaming temp file onto", path, err));
    }
    Ok(path.to_path_buf())
}

fn io_failure(action: &str, path: &Path, err: std::io::Error) -> ExportError {
    ExportError::Output(format!("{action} {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn rec(title: &str, rarity: Option<f64>, hidden: bool) -> AchievementRecord {
        let mut r = AchievementRecord::new(title, SourceRef::page("https://example.test/game"));
        r.rarity_percent = rarity;
        r.hidden = hidden;
        r
    }

    #[test]
    fn sort_puts_absent_rarity_last_and_hidden_after_visible() {
        let mut rows = vec![
            rec("no data", None, false),
            rec("hidden common", Some(80.0), true),
            rec("visible rare", Some(3.5), false),
            rec("visible common", Some(65.0), false),
            rec("hidden rare", Some(1.0), true),
        ];
        sort_rows(&mut rows);
        let titles: Vec<_> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["visible common", "visible rare", "hidden common", "hidden rare", "no data"]
        );
    }

    #[test]
    fn zero_rarity_is_present_not_absent() {
        let mut rows = vec![rec("absent", None, false), rec("zero", Some(0.0), false)];
        sort_rows(&mut rows);
        assert_eq!(rows[0].title, "zero");
    }

    #[test]
    fn dedup_collapses_case_and_whitespace_variants() {
        let mut a = rec("Ace", Some(42.5), false);
        a.description = "Win 10 matches".into();
        let mut b = rec("  ace ", Some(42.5), false);
        b.description = "Win   10\nmatches".into();
        let rows = dedup_records(vec![a, b]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn dedup_is_idempotent_and_drops_untitled() {
        let rows = vec![
            rec("One", Some(1.0), false),
            rec("one", Some(2.0), false),
            rec("   ", Some(3.0), false),
            rec("Two", None, true),
        ];
        let once = dedup_records(rows);
        let twice = dedup_records(once.clone());
        assert_eq!(once.len(), 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn canonical_output_does_not_depend_on_input_order() {
        let mut dup_a = rec("Same", Some(10.0), false);
        dup_a.icon = "https://cdn.test/a.png".into();
        let mut dup_b = rec("same", Some(10.0), false);
        dup_b.icon = "https://cdn.test/b.png".into();
        let rows = vec![
            rec("Gamma", Some(5.0), true),
            dup_a,
            rec("Alpha", Some(50.0), false),
            dup_b,
            rec("Beta", None, false),
            rec("Delta", Some(50.0), false),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();
        assert_eq!(canonicalize(rows), canonicalize(reversed));
    }

    #[test]
    fn csv_round_trip_preserves_awkward_description() {
        let mut r = rec("Tricky", Some(12.0), false);
        r.description = "Beat \"the boss\", then\nrest".into();
        let bytes = render_csv(CsvLayout::Page, &[r.clone()]).unwrap();

        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), CsvLayout::Page.header().to_vec());
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[2], r.description);
        assert_eq!(&row[3], "12");
        assert_eq!(&row[7], "https://example.test/game");
    }

    #[test]
    fn steam_layout_formats_percent_like_the_api_tool() {
        let mut r = rec("Portal", Some(42.5), false);
        r.id = "ACH_PORTAL".into();
        r.source_ref = SourceRef::SteamApp { app_id: 620 };
        let text = String::from_utf8(render_csv(CsvLayout::Steam, &[r]).unwrap()).unwrap();
        let header = "api_name,title,description,hidden,icon,icon_gray,global_percent\n";
        assert!(text.starts_with(header));
        assert!(text.contains("ACH_PORTAL,Portal,,false,,,42.500000%"));
    }

    #[test]
    fn psn_layout_splits_source_pair() {
        let mut r = rec("Ace", None, true);
        r.id = "7".into();
        r.grade = "gold".into();
        r.source_ref = SourceRef::trophy_group("NPWR12345_00", "default");
        let text = String::from_utf8(render_csv(CsvLayout::Psn, &[r]).unwrap()).unwrap();
        assert!(text.contains("NPWR12345_00,default,7,Ace,,gold,,,true,"));
    }

    #[test]
    fn atomic_write_leaves_only_the_final_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out").join("rows.csv");
        let written = write_csv_atomic(&path, CsvLayout::Page, &[rec("Ace", Some(1.0), false)])
            .expect("write csv");
        assert_eq!(written, path);
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["rows.csv".to_string()]);
    }

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let errors = [
            ExportError::Output("x".into()),
            ExportError::Configuration("x".into()),
            ExportError::RemoteCall("x".into()),
            ExportError::Authentication("x".into()),
            ExportError::Resolution {
                query: "x".into(),
                reasons: vec![],
            },
            ExportError::ExtractionEmpty { target: "x".into() },
        ];
        let mut codes: Vec<u8> = errors.iter().map(ExportError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn resolution_message_joins_domain_reasons() {
        let err = ExportError::Resolution {
            query: "Astro Bot".into(),
            reasons: vec![
                "ConceptGameAll: no match".into(),
                "MobileGames: search failed: 503".into(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "could not resolve \"Astro Bot\": ConceptGameAll: no match; MobileGames: search failed: 503"
        );
    }

    #[test]
    fn slugify_matches_file_name_rules() {
        assert_eq!(slugify("  Astro Bot: Rescue Mission! "), "astro-bot-rescue-mission");
    }
}
