//! PlayStation Network: session, title → NP communication id resolution, and
//! trophy list retrieval.

pub mod resolver;
pub mod session;
pub mod trophies;

pub use resolver::{normalize_np_id, resolve, SearchPick, TitleSearch, SEARCH_DOMAINS};
pub use session::{PsnClient, PsnSession};
pub use trophies::{
    fetch_trophy_records, merge_earned_rates, GroupSelection, TrophyApi, SERVICE_NAMES,
};

use thiserror::Error;
use trophy_http::FetchError;

pub const CRATE_NAME: &str = "trophy-psn";

#[derive(Debug, Error)]
pub enum PsnError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

impl PsnError {
    /// HTTP status behind the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            PsnError::Fetch(err) => err.status(),
            PsnError::Message(_) => None,
        }
    }
}
