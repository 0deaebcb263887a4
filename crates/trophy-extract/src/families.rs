//! Per-site selector tables.
//!
//! Each field carries an ordered list of candidate selectors; the first one that
//! yields non-empty text inside a row wins. Several row selectors per family cover
//! layouts a site serves side by side.

use url::Url;

#[derive(Debug)]
pub struct FieldSelectors {
    pub title: &'static [&'static str],
    pub description: &'static [&'static str],
    pub rarity: &'static [&'static str],
    pub rarity_bucket: &'static [&'static str],
    pub icon: &'static [&'static str],
    /// Attributes read off the row element itself.
    pub id_attrs: &'static [&'static str],
    /// Nested elements whose presence marks the row as hidden/secret.
    pub hidden_markers: &'static [&'static str],
}

#[derive(Debug)]
pub struct SourceFamily {
    pub name: &'static str,
    pub hosts: &'static [&'static str],
    pub rows: &'static [&'static str],
    pub fields: FieldSelectors,
}

pub const STEAM_COMMUNITY: SourceFamily = SourceFamily {
    name: "steam-community",
    hosts: &["steamcommunity.com"],
    rows: &["div.achieveRow", "div.achievement_row"],
    fields: FieldSelectors {
        title: &[".achieveTxt h3", "h3"],
        description: &[".achieveTxt h5", "h5"],
        rarity: &[".achievePercent", ".achieveTxt .achievePercent"],
        rarity_bucket: &[],
        icon: &[".achieveImgHolder img", "img"],
        id_attrs: &["data-achievement", "id"],
        hidden_markers: &[".achieveHiddenBox", ".hidden_achievement"],
    },
};

pub const EXOPHASE: SourceFamily = SourceFamily {
    name: "exophase",
    hosts: &["exophase.com"],
    rows: &["ul.achievement > li", "li.award", "div.award"],
    fields: FieldSelectors {
        title: &[".award-title a", ".award-title", "a.title"],
        description: &[".award-description p", ".award-description"],
        rarity: &[".award-earned", "[class*=percent]", ".award-rarity"],
        rarity_bucket: &[".award-rarity", "[class*=rarity]"],
        icon: &[".image img", "img"],
        id_attrs: &["data-award-id", "data-id", "id"],
        hidden_markers: &[".secret", "[class*=secret]"],
    },
};

pub const PSNPROFILES: SourceFamily = SourceFamily {
    name: "psnprofiles",
    hosts: &["psnprofiles.com"],
    rows: &["table.zebra tr", "div.trophy-row"],
    fields: FieldSelectors {
        title: &["a.title", ".trophy-title"],
        description: &["td:nth-child(2)", ".trophy-description"],
        rarity: &[".hover-show .typo-top", ".typo-top"],
        rarity_bucket: &[".hover-show .typo-bottom", ".typo-bottom"],
        icon: &["td:first-child img", "picture img", "img"],
        id_attrs: &["data-trophy-id", "id"],
        hidden_markers: &[".secret", ".hidden-trophy"],
    },
};

pub const TRUE_ACHIEVEMENTS: SourceFamily = SourceFamily {
    name: "trueachievements",
    hosts: &["trueachievements.com", "truetrophies.com", "truesteamachievements.com"],
    rows: &["li.ach-panel", "div.ach-panel", "[data-achievementid]"],
    fields: FieldSelectors {
        title: &["a.title", ".title"],
        description: &["p", ".desc"],
        rarity: &["[class*=ratio]", "[class*=percent]"],
        rarity_bucket: &["[class*=rarity]"],
        icon: &["img"],
        id_attrs: &["data-achievementid", "data-id", "id"],
        hidden_markers: &[".secret", "[class*=secret]"],
    },
};

pub const KNOWN_FAMILIES: &[&SourceFamily] =
    &[&STEAM_COMMUNITY, &EXOPHASE, &PSNPROFILES, &TRUE_ACHIEVEMENTS];

fn host_matches(host: &str, family_host: &str) -> bool {
    host == family_host || host.ends_with(&format!(".{family_host}"))
}

/// Families whose selector tables apply to `base`. Unknown or missing hosts get
/// every known table so a mirror or new domain still has a structural pass.
pub fn families_for(base: Option<&Url>) -> Vec<&'static SourceFamily> {
    let host = base.and_then(Url::host_str).map(str::to_ascii_lowercase);
    if let Some(host) = host.as_deref() {
        let matched: Vec<_> = KNOWN_FAMILIES
            .iter()
            .copied()
            .filter(|f| f.hosts.iter().any(|h| host_matches(host, h)))
            .collect();
        if !matched.is_empty() {
            return matched;
        }
    }
    KNOWN_FAMILIES.to_vec()
}
