//! Listing and user persistence contracts with in-process and PostgreSQL
//! implementations.
//!
//! The lifecycle service only needs one synchronisation primitive from a
//! store: [`ListingStore::update_by_id`] applies a patch atomically, and
//! refuses when the caller's expected version no longer matches.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fridge_core::{Listing, ListingPatch, ListingQuery, Page, Party, User, UserSearch};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryListingStore, MemoryUserStore};
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "fridge-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("malformed stored record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },
}

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(Listing),
    NotFound,
    /// Someone else wrote first; carries the listing as it now stands.
    VersionConflict { current: Listing },
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn insert(&self, listing: Listing) -> Result<Listing, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Listing>, StoreError>;

    /// Filtered, sorted page plus the total match count. `now` decides the
    /// effective status of listings past expiry.
    async fn find(&self, query: &ListingQuery, now: DateTime<Utc>) -> Result<Page<Listing>, StoreError>;

    /// Listings where `user_id` is on the given side, newest first.
    async fn find_by_party(
        &self,
        party: Party,
        user_id: Uuid,
        limit: Option<u64>,
    ) -> Result<Vec<Listing>, StoreError>;

    /// Applies `patch` atomically. With `expected_version` set, the write only
    /// happens if the stored version still equals it.
    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &ListingPatch,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError>;

    /// True if some listing links `a` and `b` as donor and recipient, either way round.
    async fn has_interaction(&self, a: Uuid, b: Uuid) -> Result<bool, StoreError>;

    /// Marks available listings past expiry as expired. Returns how many moved.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: User) -> Result<User, StoreError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn get_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>, StoreError>;

    /// Matching users ordered by name, at most `limit` of them.
    async fn search(&self, search: &UserSearch, limit: usize) -> Result<Vec<User>, StoreError>;

    /// Returns false if the user does not exist.
    async fn increment_donations(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn increment_received(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn set_rating(&self, id: Uuid, rating: f64) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { database_url: String },
}

impl StoreBackend {
    /// `FRIDGE_STORE=memory|postgres`; without it, Postgres is picked when
    /// `DATABASE_URL` is set.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        match (std::env::var("FRIDGE_STORE").ok().as_deref(), database_url) {
            (Some("memory"), _) | (None, None) => StoreBackend::Memory,
            (_, Some(database_url)) => StoreBackend::Postgres { database_url },
            (Some(other), None) => {
                tracing::warn!(backend = other, "DATABASE_URL not set, falling back to in-memory store");
                StoreBackend::Memory
            }
        }
    }
}

/// Both stores behind trait objects, ready to hand to the lifecycle service.
#[derive(Clone)]
pub struct Stores {
    pub listings: Arc<dyn ListingStore>,
    pub users: Arc<dyn UserStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            listings: Arc::new(MemoryListingStore::default()),
            users: Arc::new(MemoryUserStore::default()),
        }
    }

    pub async fn connect(backend: &StoreBackend) -> Result<Self, StoreError> {
        match backend {
            StoreBackend::Memory => {
                info!("using in-memory store");
                Ok(Self::in_memory())
            }
            StoreBackend::Postgres { database_url } => {
                let store = PgStore::connect(database_url).await?;
                info!("connected to postgres store");
                Ok(Self {
                    listings: Arc::new(store.clone()),
                    users: Arc::new(store),
                })
            }
        }
    }
}
