//! In-process stores. A single write lock covers each check-and-apply, which
//! gives the same single-writer-wins behaviour as a row lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fridge_core::{
    LifecycleChange, Listing, ListingPatch, ListingQuery, ListingStatus, Page, Party, User, UserSearch,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{ListingStore, StoreError, UpdateOutcome, UserStore};

#[derive(Debug, Default)]
pub struct MemoryListingStore {
    listings: RwLock<HashMap<Uuid, Listing>>,
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn insert(&self, listing: Listing) -> Result<Listing, StoreError> {
        let mut map = self.listings.write().await;
        if map.contains_key(&listing.id) {
            return Err(StoreError::Duplicate {
                entity: "listing",
                key: listing.id.to_string(),
            });
        }
        map.insert(listing.id, listing.clone());
        Ok(listing)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        Ok(self.listings.read().await.get(&id).cloned())
    }

    async fn find(&self, query: &ListingQuery, now: DateTime<Utc>) -> Result<Page<Listing>, StoreError> {
        let map = self.listings.read().await;
        let mut matched = map
            .values()
            .filter(|l| query.filter.matches(l, now))
            .collect::<Vec<_>>();
        matched.sort_by(|a, b| query.compare(a, b));
        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(query.skip() as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();
        Ok(Page { items, total })
    }

    async fn find_by_party(
        &self,
        party: Party,
        user_id: Uuid,
        limit: Option<u64>,
    ) -> Result<Vec<Listing>, StoreError> {
        let map = self.listings.read().await;
        let mut out = map
            .values()
            .filter(|l| match party {
                Party::Donor => l.is_donor(user_id),
                Party::Recipient => l.is_recipient(user_id),
            })
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &ListingPatch,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut map = self.listings.write().await;
        let Some(listing) = map.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if expected_version.is_some_and(|v| v != listing.version) {
            return Ok(UpdateOutcome::VersionConflict {
                current: listing.clone(),
            });
        }
        patch.apply(listing, now);
        Ok(UpdateOutcome::Updated(listing.clone()))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.listings.write().await.remove(&id).is_some())
    }

    async fn has_interaction(&self, a: Uuid, b: Uuid) -> Result<bool, StoreError> {
        Ok(self.listings.read().await.values().any(|l| l.links(a, b)))
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let patch = ListingPatch::Transition(LifecycleChange::Expire);
        let mut map = self.listings.write().await;
        let mut moved = 0;
        for listing in map.values_mut() {
            if listing.status == ListingStatus::Available && listing.is_expired(now) {
                patch.apply(listing, now);
                moved += 1;
            }
        }
        Ok(moved)
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    async fn modify(&self, id: Uuid, f: impl FnOnce(&mut User)) -> bool {
        match self.users.write().await.get_mut(&id) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: User) -> Result<User, StoreError> {
        let mut map = self.users.write().await;
        if map.contains_key(&user.id) || map.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(StoreError::Duplicate {
                entity: "user",
                key: user.email.clone(),
            });
        }
        map.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>, StoreError> {
        let map = self.users.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| map.get(id).map(|u| (*id, u.clone())))
            .collect())
    }

    async fn search(&self, search: &UserSearch, limit: usize) -> Result<Vec<User>, StoreError> {
        let mut found: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| search.matches(u))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        found.truncate(limit);
        Ok(found)
    }

    async fn increment_donations(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.modify(id, |u| u.total_donations += 1).await)
    }

    async fn increment_received(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.modify(id, |u| u.total_received += 1).await)
    }

    async fn set_rating(&self, id: Uuid, rating: f64) -> Result<bool, StoreError> {
        Ok(self.modify(id, |u| u.rating = rating).await)
    }
}
