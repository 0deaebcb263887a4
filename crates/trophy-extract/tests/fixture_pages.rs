use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use trophy_core::{canonicalize, AchievementRecord, SourceRef};
use trophy_extract::{extract, extract_from_html, ExtractionContext, HtmlDocument};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct GoldenRecord {
    id: String,
    title: String,
    description: String,
    rarity_percent: Option<f64>,
    rarity_bucket: String,
    hidden: bool,
    icon: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn fixture_page(family: &str, file: &str) -> String {
    let path = workspace_root().join("fixtures").join(family).join("sample").join(file);
    fs::read_to_string(&path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

fn read_snapshot(family: &str) -> Vec<GoldenRecord> {
    serde_json::from_str(&fixture_page(family, "snapshot.json")).expect("parse snapshot")
}

fn to_golden(records: &[AchievementRecord]) -> Vec<GoldenRecord> {
    records
        .iter()
        .map(|r| GoldenRecord {
            id: r.id.clone(),
            title: r.title.clone(),
            description: r.description.clone(),
            rarity_percent: r.rarity_percent,
            rarity_bucket: r.rarity_bucket.clone(),
            hidden: r.hidden,
            icon: r.icon.clone(),
        })
        .collect()
}

fn assert_row_invariants(records: &[AchievementRecord]) {
    for record in records {
        assert!(!record.title.trim().is_empty(), "empty title in {record:?}");
        if let Some(percent) = record.rarity_percent {
            assert!(percent.is_finite() && percent >= 0.0, "bad rarity in {record:?}");
        }
    }
}

#[test]
fn golden_snapshot_steam_community() {
    let url = "https://steamcommunity.com/stats/620/achievements";
    let records = extract_from_html(&fixture_page("steam-community", "achievements.html"), url);
    assert_row_invariants(&records);
    assert_eq!(to_golden(&records), read_snapshot("steam-community"));
    assert!(records.iter().all(|r| r.source_ref == SourceRef::page(url)));
}

#[test]
fn golden_snapshot_exophase() {
    let records = extract_from_html(
        &fixture_page("exophase", "trophies.html"),
        "https://www.exophase.com/game/astro-bot-ps5/trophies/",
    );
    assert_row_invariants(&records);
    assert_eq!(to_golden(&records), read_snapshot("exophase"));
}

#[test]
fn psnprofiles_table_rows_skip_header_and_strip_title_from_details() {
    let records = extract_from_html(
        &fixture_page("psnprofiles", "trophies.html"),
        "https://psnprofiles.com/trophies/12345-astro-bot",
    );
    assert_row_invariants(&records);
    assert_eq!(records.len(), 2);

    assert_eq!(records[0].title, "Ace");
    assert_eq!(records[0].description, "Win 10 matches");
    assert_eq!(records[0].rarity_percent, Some(42.5));
    assert_eq!(records[0].rarity_bucket, "common");
    assert!(!records[0].hidden);
    assert_eq!(records[0].icon, "https://i.psnprofiles.com/games/3f1/trophies/1S.png");

    assert_eq!(records[1].title, "Lost in Space");
    assert!(records[1].hidden);
    assert_eq!(records[1].rarity_bucket, "ultra-rare");
    assert_eq!(records[1].icon, "https://psnprofiles.com/lib/img/trophies/2S.png");
}

#[test]
fn embedded_state_is_used_when_no_structural_rows_match() {
    let records = extract_from_html(
        &fixture_page("embedded-state", "page.html"),
        "https://trophies.example.net/game/astro",
    );
    assert_row_invariants(&records);
    let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Platinum Bot", "Ace", "Night Owl"]);

    let platinum = &records[0];
    assert_eq!(platinum.id, "0");
    assert_eq!(platinum.rarity_percent, Some(4.8));
    assert_eq!(platinum.rarity_bucket, "very-rare");
    assert_eq!(platinum.grade, "platinum");
    assert_eq!(platinum.icon, "https://trophies.example.net/icons/0.png");

    let ace = &records[1];
    assert_eq!(ace.rarity_percent, Some(42.5), "duplicate without rarity must not win");

    let owl = &records[2];
    assert_eq!(owl.id, "x9");
    assert!(owl.hidden);
    assert_eq!(owl.rarity_percent, Some(7.25));
}

#[test]
fn generic_heuristic_keeps_percent_rows_and_drops_interstitials() {
    let records = extract_from_html(
        &fixture_page("generic", "page.html"),
        "https://stats.example.org/games/42",
    );
    assert_row_invariants(&records);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].title, "First Blood");
    assert_eq!(records[0].description, "Defeat an enemy");
    assert_eq!(records[0].rarity_percent, Some(88.1));
    assert_eq!(records[1].title, "Marathon");
    assert_eq!(records[1].rarity_percent, Some(0.9));
}

#[test]
fn challenge_page_yields_nothing() {
    let html = fixture_page("challenge", "page.html");
    let document = HtmlDocument::parse(&html);
    assert_eq!(document.title().as_deref(), Some("Just a moment..."));
    let ctx = ExtractionContext::new(&document, "https://www.exophase.com/game/x/trophies/");
    assert!(extract(&ctx).is_empty());
}

#[test]
fn structural_result_wins_over_later_strategies() {
    // Structural rows plus an embedded blob with different titles: only the
    // structural rows come back.
    let html = r#"<html><head>
        <script>window.__DATA__ = {"trophies":[{"trophyId":9,"trophyName":"From Script","trophyEarnedRate":"1.0"}]};</script>
        </head><body><ul class="achievement">
          <li class="award" data-award-id="1"><div class="award-title"><a>From Markup</a></div>
          <span class="award-earned">5%</span></li>
        </ul></body></html>"#;
    let records = extract_from_html(html, "https://www.exophase.com/game/x/trophies/");
    let titles: Vec<_> = records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["From Markup"]);
}

#[test]
fn canonical_order_from_extracted_rows() {
    let records = extract_from_html(
        &fixture_page("exophase", "trophies.html"),
        "https://www.exophase.com/game/astro-bot-ps5/trophies/",
    );
    let ordered: Vec<_> = canonicalize(records).into_iter().map(|r| r.title).collect();
    assert_eq!(ordered, vec!["Ace", "Hidden Path", "Completionist"]);
}

#[test]
fn card_layout_with_rarity_badges_yields_one_row_per_card() {
    let html = r#"<html><body><section class="trophy-grid">
        <div class="trophy-card"><h3>Ace</h3><p>Win 10 matches</p><span class="trophy-rarity">12.5%</span></div>
        <div class="trophy-card"><h3>Boss</h3><p>Defeat the boss</p><span class="trophy-rarity">3%</span></div>
        </section></body></html>"#;
    let records = extract_from_html(html, "https://unknown.example/game/1");
    assert_row_invariants(&records);
    let rows: Vec<_> = records
        .iter()
        .map(|r| (r.title.as_str(), r.rarity_percent, r.hidden))
        .collect();
    assert_eq!(rows, vec![("Ace", Some(12.5), false), ("Boss", Some(3.0), false)]);
}

#[test]
fn layout_utility_classes_do_not_mark_rows_hidden() {
    let html = r#"<html><body><ul>
        <li class="card overflow-hidden"><b>Ace</b> 42%</li>
        <li class="card visually-hidden hidden-xs"><b>Boss</b> 7%</li>
        <li class="card is-secret"><b>Vault</b> 1%</li>
        </ul></body></html>"#;
    let records = extract_from_html(html, "https://unknown.example/game/2");
    let flags: Vec<_> = records.iter().map(|r| (r.title.as_str(), r.hidden)).collect();
    assert_eq!(flags, vec![("Ace", false), ("Boss", false), ("Vault", true)]);
}
