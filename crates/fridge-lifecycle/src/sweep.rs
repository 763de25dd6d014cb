//! Periodic reconciliation that materialises `expired` on available
//! listings past their expiry. Reads never depend on it; it only keeps the
//! stored status close to the effective one.

use std::sync::Arc;

use anyhow::{Context, Result};
use fridge_core::Clock;
use fridge_storage::ListingStore;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};

use crate::{LifecycleConfig, LifecycleError};

#[derive(Clone)]
pub struct ExpirySweeper {
    listings: Arc<dyn ListingStore>,
    clock: Arc<dyn Clock>,
}

impl ExpirySweeper {
    pub fn new(listings: Arc<dyn ListingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { listings, clock }
    }

    /// One pass; returns how many listings moved to expired.
    pub async fn sweep_once(&self) -> Result<u64, LifecycleError> {
        let now = self.clock.now();
        let span = info_span!("expiry_sweep", %now);
        let moved = self.listings.expire_overdue(now).instrument(span.clone()).await?;
        span.in_scope(|| info!(moved, "expiry sweep finished"));
        Ok(moved)
    }

    pub async fn maybe_build_scheduler(&self, config: &LifecycleConfig) -> Result<Option<JobScheduler>> {
        if !config.expiry_sweep_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let sweeper = self.clone();
        let cron = config.expiry_sweep_cron.as_str();
        let job = Job::new_async(cron, move |_uuid, _l| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                if let Err(err) = sweeper.sweep_once().await {
                    error!(error = %err, "scheduled expiry sweep failed");
                }
            })
        })
        .with_context(|| format!("creating expiry sweep job for cron {cron}"))?;
        sched.add(job).await.context("adding expiry sweep job")?;
        info!(cron, "expiry sweep scheduled");
        Ok(Some(sched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use fridge_core::{Listing, ListingInput, ListingStatus, LocationInput, ManualClock};
    use fridge_storage::MemoryListingStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_moves_overdue_listings_once() {
        let start = Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).single().unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemoryListingStore::default());
        let input = ListingInput {
            title: Some("Yogurt cups".into()),
            description: Some("Twelve strawberry yogurt cups.".into()),
            category: Some("dairy".into()),
            quantity: Some("12".into()),
            condition: Some("good".into()),
            expiry_date: Some((start + Duration::days(1)).to_rfc3339()),
            location: LocationInput {
                address: Some("2 Main St".into()),
                city: Some("Springfield".into()),
                state: Some("IL".into()),
                zip_code: Some("62701".into()),
                coordinates: None,
            },
            ..Default::default()
        };
        let listing = Listing::from_new(input.validate(start).unwrap(), Uuid::new_v4(), start);
        let id = listing.id;
        store.insert(listing).await.unwrap();

        let sweeper = ExpirySweeper::new(store.clone(), clock.clone());
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

        clock.advance(Duration::days(2));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        let stored = store.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ListingStatus::Expired);
    }

    #[tokio::test]
    async fn scheduler_is_off_unless_enabled() {
        let sweeper = ExpirySweeper::new(
            Arc::new(MemoryListingStore::default()),
            Arc::new(ManualClock::new(Utc::now())),
        );
        let config = LifecycleConfig::default();
        assert!(sweeper.maybe_build_scheduler(&config).await.unwrap().is_none());
    }
}
