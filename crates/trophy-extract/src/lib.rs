//! Achievement extraction from rendered pages and untyped API payloads.

pub mod document;
pub mod families;
pub mod normalize;
pub mod render;
pub mod strategy;

pub use document::{HtmlDocument, NodeHandle, StructuredDocument};
pub use families::{families_for, SourceFamily, KNOWN_FAMILIES};
pub use normalize::normalize;
pub use render::{BrowserlessRenderer, HttpPageRenderer, PageRenderer, RenderError, RenderedPage};
pub use strategy::{extract, is_challenge_text, ExtractionContext};

use tracing::warn;
use trophy_core::AchievementRecord;

pub const CRATE_NAME: &str = "trophy-extract";

/// Parse `html` and run the strategy chain with `page_url` as the base for links.
pub fn extract_from_html(html: &str, page_url: &str) -> Vec<AchievementRecord> {
    let document = HtmlDocument::parse(html);
    let ctx = ExtractionContext::new(&document, page_url);
    let records = extract(&ctx);
    if records.is_empty() {
        let title = document.title().unwrap_or_default();
        warn!(
            url = page_url,
            page_title = %title,
            interstitial = is_challenge_text(&title),
            "page yielded no achievements"
        );
    }
    records
}
