//! Listing lifecycle orchestration over the storage contracts: the
//! reserve/claim state machine, user statistics, expiry reconciliation and
//! seeding.

mod config;
mod error;
pub mod seed;
mod service;
mod sweep;
pub mod users;
pub mod view;

pub use config::LifecycleConfig;
pub use error::LifecycleError;
pub use seed::{apply_seed, load_seed_file, SeedFile, SeedSummary};
pub use service::ListingService;
pub use sweep::ExpirySweeper;
pub use users::{RatingInput, UserActivity, UserStats, UserStatsService};
pub use view::{ListingPageView, ListingView, Pagination};

pub const CRATE_NAME: &str = "fridge-lifecycle";
