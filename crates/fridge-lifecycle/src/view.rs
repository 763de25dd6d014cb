//! Response shapes: listings with their parties resolved and the derived
//! expiry fields filled in.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fridge_core::{Listing, ListingQuery, User, UserSummary};
use fridge_storage::{StoreError, UserStore};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingView {
    /// `status` here is the effective status.
    #[serde(flatten)]
    pub listing: Listing,
    pub donor: Option<UserSummary>,
    pub reserved_by: Option<UserSummary>,
    pub claimed_by: Option<UserSummary>,
    pub is_expired: bool,
    pub days_until_expiry: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u64,
}

impl Pagination {
    pub fn new(query: &ListingQuery, total_items: u64) -> Self {
        Self {
            current_page: query.page,
            total_pages: query.total_pages(total_items),
            total_items,
            items_per_page: query.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingPageView {
    pub listings: Vec<ListingView>,
    pub pagination: Pagination,
}

/// How much of each party to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detail {
    Card,
    Full,
}

pub(crate) fn render(
    listing: Listing,
    people: &HashMap<Uuid, User>,
    detail: Detail,
    now: DateTime<Utc>,
) -> ListingView {
    let donor = people
        .get(&listing.donor_id)
        .map(|u| UserSummary::donor(u, detail == Detail::Full));
    let reserved_by = listing
        .reserved_by()
        .and_then(|id| people.get(&id))
        .map(UserSummary::party);
    let claimed_by = listing
        .claimed_by()
        .and_then(|id| people.get(&id))
        .map(UserSummary::party);
    let is_expired = listing.is_expired(now);
    let days_until_expiry = listing.days_until_expiry(now);
    let mut listing = listing;
    listing.status = listing.effective_status(now);
    ListingView {
        listing,
        donor,
        reserved_by,
        claimed_by,
        is_expired,
        days_until_expiry,
    }
}

/// Looks up every party of `listings` in one store call and renders them.
pub(crate) async fn render_all(
    users: &dyn UserStore,
    listings: Vec<Listing>,
    detail: Detail,
    now: DateTime<Utc>,
) -> Result<Vec<ListingView>, StoreError> {
    let mut ids = listings
        .iter()
        .flat_map(|l| [Some(l.donor_id), l.reserved_by(), l.claimed_by()])
        .flatten()
        .collect::<Vec<_>>();
    ids.sort_unstable();
    ids.dedup();
    let people = users.get_many(&ids).await?;
    Ok(listings
        .into_iter()
        .map(|l| render(l, &people, detail, now))
        .collect())
}

pub(crate) async fn render_one(
    users: &dyn UserStore,
    listing: Listing,
    detail: Detail,
    now: DateTime<Utc>,
) -> Result<ListingView, StoreError> {
    let ids = [Some(listing.donor_id), listing.reserved_by(), listing.claimed_by()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
    let people = users.get_many(&ids).await?;
    Ok(render(listing, &people, detail, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fridge_core::{ListingInput, ListingStatus, LocationInput};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 8, 0, 0).single().unwrap()
    }

    fn listing(donor: Uuid) -> Listing {
        let input = ListingInput {
            title: Some("Sourdough loaves".into()),
            description: Some("Two loaves baked this morning.".into()),
            category: Some("bread".into()),
            quantity: Some("2 loaves".into()),
            condition: Some("fresh".into()),
            expiry_date: Some((t0() + Duration::hours(36)).to_rfc3339()),
            location: LocationInput {
                address: Some("4 Oak Ave".into()),
                city: Some("Springfield".into()),
                state: Some("IL".into()),
                zip_code: Some("62704".into()),
                coordinates: None,
            },
            ..Default::default()
        };
        Listing::from_new(input.validate(t0()).unwrap(), donor, t0())
    }

    fn user(id: Uuid, name: &str) -> User {
        User {
            id,
            name: name.into(),
            email: format!("{}@example.com", name.to_lowercase()),
            phone: Some("555-0100".into()),
            address: None,
            profile_image: None,
            rating: 4.5,
            total_donations: 0,
            total_received: 0,
            is_verified: true,
            user_type: Default::default(),
            created_at: t0(),
        }
    }

    #[test]
    fn render_shows_effective_status_and_countdown() {
        let donor = Uuid::new_v4();
        let people = HashMap::from([(donor, user(donor, "Sarah"))]);

        let fresh = render(listing(donor), &people, Detail::Card, t0());
        assert_eq!(fresh.listing.status, ListingStatus::Available);
        assert_eq!(fresh.days_until_expiry, 2);
        assert!(!fresh.is_expired);
        let card = fresh.donor.unwrap();
        assert_eq!(card.name, "Sarah");
        assert_eq!(card.phone, None);

        let stale = render(listing(donor), &people, Detail::Full, t0() + Duration::days(3));
        assert_eq!(stale.listing.status, ListingStatus::Expired);
        assert!(stale.is_expired);
        assert_eq!(stale.donor.unwrap().phone.as_deref(), Some("555-0100"));
    }

    #[test]
    fn view_serialises_flat_with_camel_case_fields() {
        let donor = Uuid::new_v4();
        let view = render(listing(donor), &HashMap::new(), Detail::Card, t0());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["title"], "Sourdough loaves");
        assert_eq!(json["daysUntilExpiry"], 2);
        assert_eq!(json["isExpired"], false);
        assert!(json["donor"].is_null());
        assert_eq!(json["location"]["zipCode"], "62704");
    }
}
