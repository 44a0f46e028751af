pub mod cli;
pub mod extract;
pub mod fetch;
pub mod manager;
pub mod robots;
pub mod wayback;

pub use cli::{handle_command, CompareArgs, ReportCommands};
pub use extract::Extractor;
pub use fetch::{FetchPolicy, HttpFetcher, LiveFetcher, SnapshotFetcher};
pub use manager::{ComparisonManager, ComparisonRequest};
pub use robots::{robots_allows, RobotsGate};
pub use wayback::{select_evenly, ArchiveIndex, SnapshotQuery, SnapshotSelector, WaybackIndex};

pub mod prelude {
    pub use super::manager::{ComparisonManager, ComparisonRequest};
    pub use super::wayback::ArchiveIndex;
    pub use mr_core::{Error, Report, Result};
}
