//! Per-user counters, ratings, and the profile/statistics read side.

use std::sync::Arc;

use fridge_core::{
    rolling_rating, Clock, ListingStatus, Party, User, UserSearchParams, ValidationErrors, USER_SEARCH_LIMIT,
};
use fridge_storage::{ListingStore, UserStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::view::{render_all, Detail, ListingView};
use crate::LifecycleError;

/// Body of `POST /users/{id}/rate`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RatingInput {
    pub rating: Option<f64>,
    pub comment: Option<String>,
}

impl RatingInput {
    /// Any value from 1 to 5, half stars included.
    pub fn score(&self) -> Result<f64, ValidationErrors> {
        match self.rating {
            Some(r) if (1.0..=5.0).contains(&r) => Ok(r),
            _ => Err(ValidationErrors::single("rating", "Rating must be between 1 and 5")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DonationCounts {
    pub available: u64,
    pub reserved: u64,
    pub claimed: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceivedCounts {
    pub reserved: u64,
    pub claimed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_donations: u64,
    pub total_received: u64,
    pub rating: f64,
    pub donations: DonationCounts,
    pub received: ReceivedCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserActivity {
    pub donations: Vec<ListingView>,
    pub received: Vec<ListingView>,
}

#[derive(Clone)]
pub struct UserStatsService {
    listings: Arc<dyn ListingStore>,
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
}

impl UserStatsService {
    pub fn new(listings: Arc<dyn ListingStore>, users: Arc<dyn UserStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            listings,
            users,
            clock,
        }
    }

    pub async fn increment_donations(&self, user_id: Uuid) -> Result<(), LifecycleError> {
        if self.users.increment_donations(user_id).await? {
            Ok(())
        } else {
            Err(LifecycleError::UserNotFound)
        }
    }

    pub async fn increment_received(&self, user_id: Uuid) -> Result<(), LifecycleError> {
        if self.users.increment_received(user_id).await? {
            Ok(())
        } else {
            Err(LifecycleError::UserNotFound)
        }
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, LifecycleError> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or(LifecycleError::UserNotFound)
    }

    /// Public directory lookup, ordered by name.
    pub async fn search(&self, params: UserSearchParams) -> Result<Vec<User>, LifecycleError> {
        let search = params.into_search()?;
        let users = self.users.search(&search, USER_SEARCH_LIMIT).await?;
        debug!(returned = users.len(), "user search");
        Ok(users)
    }

    pub async fn stats(&self, user_id: Uuid) -> Result<UserStats, LifecycleError> {
        let user = self.profile(user_id).await?;
        let now = self.clock.now();

        let mut donations = DonationCounts::default();
        for listing in self.listings.find_by_party(Party::Donor, user_id, None).await? {
            match listing.effective_status(now) {
                ListingStatus::Available => donations.available += 1,
                ListingStatus::Reserved => donations.reserved += 1,
                ListingStatus::Claimed => donations.claimed += 1,
                ListingStatus::Expired => donations.expired += 1,
            }
        }

        let mut received = ReceivedCounts::default();
        for listing in self.listings.find_by_party(Party::Recipient, user_id, None).await? {
            match listing.status {
                ListingStatus::Reserved => received.reserved += 1,
                ListingStatus::Claimed => received.claimed += 1,
                _ => {}
            }
        }

        Ok(UserStats {
            total_donations: user.total_donations,
            total_received: user.total_received,
            rating: user.rating,
            donations,
            received,
        })
    }

    pub async fn activity(&self, user_id: Uuid, limit: u64) -> Result<UserActivity, LifecycleError> {
        self.profile(user_id).await?;
        let now = self.clock.now();
        let donated = self
            .listings
            .find_by_party(Party::Donor, user_id, Some(limit))
            .await?;
        let received = self
            .listings
            .find_by_party(Party::Recipient, user_id, Some(limit))
            .await?;
        Ok(UserActivity {
            donations: render_all(self.users.as_ref(), donated, Detail::Card, now).await?,
            received: render_all(self.users.as_ref(), received, Detail::Card, now).await?,
        })
    }

    /// Folds `input` into the rated user's average. Requires a listing that
    /// links the two users as donor and recipient. Returns the new rating.
    pub async fn apply_rating(
        &self,
        rater: Uuid,
        rated: Uuid,
        input: &RatingInput,
    ) -> Result<f64, LifecycleError> {
        let span = info_span!("apply_rating", %rater, %rated);
        self.rate(rater, rated, input).instrument(span).await
    }

    async fn rate(&self, rater: Uuid, rated: Uuid, input: &RatingInput) -> Result<f64, LifecycleError> {
        let score = input.score()?;
        let user = self.profile(rated).await?;
        if rater == rated {
            debug!("self-rating rejected");
            return Err(LifecycleError::SelfRatingForbidden);
        }
        if !self.listings.has_interaction(rater, rated).await? {
            debug!("rating without prior interaction rejected");
            return Err(LifecycleError::NoPriorInteraction);
        }
        let prior = user.total_donations + user.total_received;
        let rating = rolling_rating(user.rating, prior, score);
        if !self.users.set_rating(rated, rating).await? {
            return Err(LifecycleError::UserNotFound);
        }
        info!(score, rating, has_comment = input.comment.is_some(), "rating applied");
        Ok(rating)
    }
}
