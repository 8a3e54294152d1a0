//! Backend collaborators: the processing client and riddle data fetches.

pub mod http_backend;
pub mod process;

use rd_core::TrackerResult;
use rd_riddle::PagesData;
use rd_riddle::RiddleData;
use std::collections::BTreeMap;

pub use http_backend::HttpRiddleBackend;
pub use process::ProcessOutcome;
pub use process::ProcessedPage;
pub use process::SessionExpiry;
pub use process::UnlockedCredentials;
pub use process::VisitedResponse;

/// Remote tracker API. Calls block; callers run them off the dispatcher thread.
pub trait RiddleBackend: Send + Sync {
    /// Reports a visited URL and returns what the backend made of it.
    fn process(&self, visited: &VisitedResponse) -> TrackerResult<ProcessOutcome>;

    fn fetch_all_riddles(&self) -> TrackerResult<BTreeMap<String, RiddleData>>;

    fn fetch_riddle(&self, alias: &str) -> TrackerResult<RiddleData>;

    /// Pages of every level, or of `level` only.
    fn fetch_pages(&self, alias: &str, level: Option<&str>) -> TrackerResult<PagesData>;
}
