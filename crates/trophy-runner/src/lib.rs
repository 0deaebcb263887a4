//! End-to-end exports: page, PSN and Steam, each ending in one atomically written CSV.

pub mod config;
pub mod page;
pub mod psn;
pub mod steam;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use trophy_core::slugify;
use url::Url;
use uuid::Uuid;

pub use config::{load_dotenv, ExportConfig};
pub use page::{export_page_with, run_page_export, PageRequest, RenderMode};
pub use psn::{export_psn_with, run_psn_export, PsnRequest};
pub use steam::{export_steam_with, run_steam_export, SteamApi, SteamRequest};

pub const CRATE_NAME: &str = "trophy-runner";

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub run_id: Uuid,
    pub tool: &'static str,
    pub target: String,
    pub output: PathBuf,
    pub rows: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// `<host-and-path-slug>_achievements.csv`.
pub fn page_output_name(url: &str) -> PathBuf {
    let label = match Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path()),
        Err(_) => url.to_string(),
    };
    let slug = slugify(&label);
    let slug = if slug.is_empty() { "page".to_string() } else { slug };
    PathBuf::from(format!("{slug}_achievements.csv"))
}

/// `psn_<query-or-id-slug>_trophies.csv`.
pub fn psn_output_name(label: &str) -> PathBuf {
    PathBuf::from(format!("psn_{}_trophies.csv", slugify(label)))
}

pub fn steam_output_name(app_id: u32) -> PathBuf {
    PathBuf::from(format!("steam_{app_id}_achievements.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names_follow_tool_conventions() {
        assert_eq!(
            page_output_name("https://www.exophase.com/game/astro-bot-ps5/trophies/"),
            PathBuf::from("www-exophase-com-game-astro-bot-ps5-trophies_achievements.csv")
        );
        assert_eq!(page_output_name("::"), PathBuf::from("page_achievements.csv"));
        assert_eq!(psn_output_name("ASTRO BOT"), PathBuf::from("psn_astro-bot_trophies.csv"));
        assert_eq!(psn_output_name("NPWR22222_00"), PathBuf::from("psn_npwr22222-00_trophies.csv"));
        assert_eq!(steam_output_name(620), PathBuf::from("steam_620_achievements.csv"));
    }
}
