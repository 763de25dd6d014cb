//! The listing lifecycle: create, browse, and the reserve/claim/cancel
//! transitions, plus donor edits and deletion.
//!
//! Every write is a conditional update against the version the guards were
//! checked on. When another writer gets there first the guards run again on
//! the fresh record, so a caller who lost a race sees the real reason.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fridge_core::{
    Clock, LifecycleChange, Listing, ListingInput, ListingPatch, ListingStatus, ListingUpdateInput,
    ListingsParams, Party, SystemClock,
};
use fridge_storage::{ListingStore, Stores, UpdateOutcome, UserStore};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::users::UserStatsService;
use crate::view::{render_all, render_one, Detail, ListingPageView, ListingView, Pagination};
use crate::{LifecycleConfig, LifecycleError};

#[derive(Clone)]
pub struct ListingService {
    listings: Arc<dyn ListingStore>,
    users: Arc<dyn UserStore>,
    stats: UserStatsService,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl ListingService {
    pub fn new(stores: &Stores, config: LifecycleConfig) -> Self {
        Self::with_clock(stores, Arc::new(SystemClock), config)
    }

    pub fn with_clock(stores: &Stores, clock: Arc<dyn Clock>, config: LifecycleConfig) -> Self {
        Self {
            listings: stores.listings.clone(),
            users: stores.users.clone(),
            stats: UserStatsService::new(stores.listings.clone(), stores.users.clone(), clock.clone()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn users(&self) -> &UserStatsService {
        &self.stats
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create(&self, actor: Uuid, input: &ListingInput) -> Result<ListingView, LifecycleError> {
        let span = info_span!("create_listing", %actor);
        logged(self.create_inner(actor, input)).instrument(span).await
    }

    pub async fn list(&self, params: ListingsParams) -> Result<ListingPageView, LifecycleError> {
        let span = info_span!("list_listings");
        logged(self.list_inner(params)).instrument(span).await
    }

    pub async fn get(&self, id: Uuid) -> Result<ListingView, LifecycleError> {
        let span = info_span!("get_listing", listing_id = %id);
        logged(self.get_inner(id)).instrument(span).await
    }

    pub async fn reserve(&self, actor: Uuid, id: Uuid) -> Result<ListingView, LifecycleError> {
        let span = info_span!("reserve_listing", listing_id = %id, %actor);
        logged(self.transition(id, LifecycleChange::Reserve { by: actor }, |l, now| {
            reserve_guard(l, actor, now)
        }))
        .instrument(span)
        .await
    }

    pub async fn claim(&self, actor: Uuid, id: Uuid) -> Result<ListingView, LifecycleError> {
        let span = info_span!("claim_listing", listing_id = %id, %actor);
        logged(self.claim_inner(actor, id)).instrument(span).await
    }

    pub async fn cancel_reservation(&self, actor: Uuid, id: Uuid) -> Result<ListingView, LifecycleError> {
        let span = info_span!("cancel_reservation", listing_id = %id, %actor);
        logged(self.transition(id, LifecycleChange::CancelReservation, |l, _| {
            cancel_guard(l, actor)
        }))
        .instrument(span)
        .await
    }

    pub async fn update(
        &self,
        actor: Uuid,
        id: Uuid,
        input: &ListingUpdateInput,
    ) -> Result<ListingView, LifecycleError> {
        let span = info_span!("update_listing", listing_id = %id, %actor);
        logged(self.update_inner(actor, id, input)).instrument(span).await
    }

    pub async fn delete(&self, actor: Uuid, id: Uuid) -> Result<(), LifecycleError> {
        let span = info_span!("delete_listing", listing_id = %id, %actor);
        logged(self.delete_inner(actor, id)).instrument(span).await
    }

    /// Listings the actor donated, newest first.
    pub async fn donated(&self, actor: Uuid) -> Result<Vec<ListingView>, LifecycleError> {
        let span = info_span!("donated_listings", %actor);
        logged(self.by_party(Party::Donor, actor)).instrument(span).await
    }

    /// Listings the actor reserved or claimed, newest first.
    pub async fn received(&self, actor: Uuid) -> Result<Vec<ListingView>, LifecycleError> {
        let span = info_span!("received_listings", %actor);
        logged(self.by_party(Party::Recipient, actor)).instrument(span).await
    }

    async fn create_inner(&self, actor: Uuid, input: &ListingInput) -> Result<ListingView, LifecycleError> {
        let now = self.now();
        let new = input.validate(now)?;
        let stored = self.listings.insert(Listing::from_new(new, actor, now)).await?;
        info!(listing_id = %stored.id, category = %stored.category, "listing created");
        self.best_effort("total_donations", actor, self.stats.increment_donations(actor))
            .await;
        Ok(render_one(self.users.as_ref(), stored, Detail::Card, now).await?)
    }

    async fn get_inner(&self, id: Uuid) -> Result<ListingView, LifecycleError> {
        let listing = self.listings.get_by_id(id).await?.ok_or(LifecycleError::NotFound)?;
        Ok(render_one(self.users.as_ref(), listing, Detail::Full, self.now()).await?)
    }

    async fn claim_inner(&self, actor: Uuid, id: Uuid) -> Result<ListingView, LifecycleError> {
        let view = self
            .transition(id, LifecycleChange::Claim { by: actor }, |l, now| {
                claim_guard(l, actor, now)
            })
            .await?;
        self.best_effort("total_received", actor, self.stats.increment_received(actor))
            .await;
        Ok(view)
    }

    async fn update_inner(
        &self,
        actor: Uuid,
        id: Uuid,
        input: &ListingUpdateInput,
    ) -> Result<ListingView, LifecycleError> {
        let edit = input.validate(self.now())?;
        let updated = self
            .apply(id, &ListingPatch::Edit(edit), |l, _| update_guard(l, actor))
            .await?;
        info!(version = updated.version, "listing updated");
        Ok(render_one(self.users.as_ref(), updated, Detail::Card, self.now()).await?)
    }

    async fn list_inner(&self, params: ListingsParams) -> Result<ListingPageView, LifecycleError> {
        let query = params.into_query(self.config.default_page_size, self.config.max_page_size)?;
        let now = self.now();
        let page = self.listings.find(&query, now).await?;
        debug!(total = page.total, returned = page.items.len(), "listings query");
        let listings = render_all(self.users.as_ref(), page.items, Detail::Card, now).await?;
        Ok(ListingPageView {
            listings,
            pagination: Pagination::new(&query, page.total),
        })
    }

    async fn delete_inner(&self, actor: Uuid, id: Uuid) -> Result<(), LifecycleError> {
        let listing = self.listings.get_by_id(id).await?.ok_or(LifecycleError::NotFound)?;
        if !listing.is_donor(actor) {
            return Err(LifecycleError::NotOwner { action: "delete" });
        }
        if listing.status != ListingStatus::Available {
            if self.config.restrict_delete {
                return Err(LifecycleError::invalid("Only available listings can be deleted"));
            }
            warn!(status = %listing.status, "deleting a listing that is no longer available");
        }
        if !self.listings.delete_by_id(id).await? {
            return Err(LifecycleError::NotFound);
        }
        info!("listing deleted");
        Ok(())
    }

    async fn by_party(&self, party: Party, actor: Uuid) -> Result<Vec<ListingView>, LifecycleError> {
        let listings = self.listings.find_by_party(party, actor, None).await?;
        Ok(render_all(self.users.as_ref(), listings, Detail::Card, self.now()).await?)
    }

    async fn transition<G>(
        &self,
        id: Uuid,
        change: LifecycleChange,
        guard: G,
    ) -> Result<ListingView, LifecycleError>
    where
        G: Fn(&Listing, DateTime<Utc>) -> Result<(), LifecycleError> + Send + Sync,
    {
        let updated = self.apply(id, &ListingPatch::Transition(change), guard).await?;
        info!(transition = change.name(), status = %updated.status, "listing transitioned");
        Ok(render_one(self.users.as_ref(), updated, Detail::Card, self.now()).await?)
    }

    /// Checks `guard` against the stored listing and writes `patch` only if
    /// nobody else wrote in between; on a lost race, re-checks against the
    /// winner's version.
    async fn apply<G>(&self, id: Uuid, patch: &ListingPatch, guard: G) -> Result<Listing, LifecycleError>
    where
        G: Fn(&Listing, DateTime<Utc>) -> Result<(), LifecycleError> + Send + Sync,
    {
        let mut listing = self.listings.get_by_id(id).await?.ok_or(LifecycleError::NotFound)?;
        loop {
            let now = self.now();
            guard(&listing, now)?;
            match self
                .listings
                .update_by_id(id, patch, Some(listing.version), now)
                .await?
            {
                UpdateOutcome::Updated(updated) => {
                    if let Err(violation) = updated.check_invariants() {
                        error!(%violation, "listing invariant broken after write");
                    }
                    return Ok(updated);
                }
                UpdateOutcome::NotFound => return Err(LifecycleError::NotFound),
                UpdateOutcome::VersionConflict { current } => {
                    warn!(
                        expected = listing.version,
                        found = current.version,
                        "concurrent write detected, re-checking"
                    );
                    listing = current;
                }
            }
        }
    }

    async fn best_effort<F>(&self, counter: &'static str, user_id: Uuid, bump: F)
    where
        F: std::future::Future<Output = Result<(), LifecycleError>>,
    {
        if let Err(err) = bump.await {
            error!(counter, %user_id, error = %err, "counter update failed");
        }
    }
}

async fn logged<T, F>(op: F) -> Result<T, LifecycleError>
where
    F: std::future::Future<Output = Result<T, LifecycleError>>,
{
    let result = op.await;
    if let Err(err) = &result {
        if err.is_rejection() {
            debug!(error = %err, "request rejected");
        } else {
            error!(error = %err, "request failed");
        }
    }
    result
}

fn reserve_guard(listing: &Listing, actor: Uuid, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    if !listing.can_be_reserved(now) {
        return Err(LifecycleError::invalid("Listing cannot be reserved"));
    }
    if listing.is_donor(actor) {
        return Err(LifecycleError::SelfReservationForbidden);
    }
    Ok(())
}

fn claim_guard(listing: &Listing, actor: Uuid, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    if !listing.can_be_claimed(now) {
        return Err(LifecycleError::invalid("Listing cannot be claimed"));
    }
    if listing.reserved_by() != Some(actor) {
        return Err(LifecycleError::NotReserver { action: "claim" });
    }
    Ok(())
}

fn cancel_guard(listing: &Listing, actor: Uuid) -> Result<(), LifecycleError> {
    if listing.status != ListingStatus::Reserved {
        return Err(LifecycleError::invalid("Listing is not reserved"));
    }
    if listing.reserved_by() != Some(actor) {
        return Err(LifecycleError::NotReserver { action: "cancel" });
    }
    Ok(())
}

fn update_guard(listing: &Listing, actor: Uuid) -> Result<(), LifecycleError> {
    if !listing.is_donor(actor) {
        return Err(LifecycleError::NotOwner { action: "update" });
    }
    // Expiry is derived, so a swept listing stays as editable as an unswept one.
    if matches!(listing.status, ListingStatus::Reserved | ListingStatus::Claimed) {
        return Err(LifecycleError::invalid(
            "Cannot update a listing that is reserved or claimed",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fridge_core::{ListingInput, LocationInput};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).single().unwrap()
    }

    fn listing(donor: Uuid) -> Listing {
        let input = ListingInput {
            title: Some("Canned beans".into()),
            description: Some("Six cans of black beans, unopened.".into()),
            category: Some("canned".into()),
            quantity: Some("6 cans".into()),
            condition: Some("good".into()),
            expiry_date: Some((t0() + Duration::days(30)).to_rfc3339()),
            location: LocationInput {
                address: Some("9 Pine Rd".into()),
                city: Some("Springfield".into()),
                state: Some("IL".into()),
                zip_code: Some("62702".into()),
                coordinates: None,
            },
            ..Default::default()
        };
        Listing::from_new(input.validate(t0()).unwrap(), donor, t0())
    }

    #[test]
    fn reserve_guard_checks_state_before_identity() {
        let donor = Uuid::new_v4();
        let mut l = listing(donor);
        assert!(matches!(
            reserve_guard(&l, donor, t0()),
            Err(LifecycleError::SelfReservationForbidden)
        ));
        assert!(reserve_guard(&l, Uuid::new_v4(), t0()).is_ok());

        l.status = ListingStatus::Claimed;
        assert!(matches!(
            reserve_guard(&l, donor, t0()),
            Err(LifecycleError::InvalidState { .. })
        ));
    }

    #[test]
    fn expiry_blocks_reserve_and_claim() {
        let donor = Uuid::new_v4();
        let reserver = Uuid::new_v4();
        let mut l = listing(donor);
        let late = t0() + Duration::days(31);
        assert!(reserve_guard(&l, reserver, late).is_err());

        ListingPatch::Transition(LifecycleChange::Reserve { by: reserver }).apply(&mut l, t0());
        assert!(claim_guard(&l, reserver, t0()).is_ok());
        assert!(matches!(
            claim_guard(&l, reserver, late),
            Err(LifecycleError::InvalidState { .. })
        ));
    }

    #[test]
    fn only_the_reserver_may_claim_or_cancel() {
        let donor = Uuid::new_v4();
        let reserver = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let mut l = listing(donor);
        assert!(matches!(
            cancel_guard(&l, reserver),
            Err(LifecycleError::InvalidState { .. })
        ));

        ListingPatch::Transition(LifecycleChange::Reserve { by: reserver }).apply(&mut l, t0());
        assert!(matches!(
            claim_guard(&l, stranger, t0()),
            Err(LifecycleError::NotReserver { action: "claim" })
        ));
        assert!(matches!(
            cancel_guard(&l, stranger),
            Err(LifecycleError::NotReserver { action: "cancel" })
        ));
        assert!(cancel_guard(&l, reserver).is_ok());
    }

    #[test]
    fn donors_cannot_edit_held_listings() {
        let donor = Uuid::new_v4();
        let mut l = listing(donor);
        assert!(update_guard(&l, donor).is_ok());
        assert!(matches!(
            update_guard(&l, Uuid::new_v4()),
            Err(LifecycleError::NotOwner { action: "update" })
        ));
        l.status = ListingStatus::Expired;
        assert!(update_guard(&l, donor).is_ok());
        l.status = ListingStatus::Reserved;
        assert!(matches!(
            update_guard(&l, donor),
            Err(LifecycleError::InvalidState { .. })
        ));
    }
}
