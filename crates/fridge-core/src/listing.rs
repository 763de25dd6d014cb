//! Listing record, its closed vocabularies, and the pure lifecycle rules.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Closed string vocabulary with a stable wire label per variant.
macro_rules! vocabulary {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(UnknownValue { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

vocabulary!(
    /// Stored lifecycle state. `Expired` is only materialised by the sweep;
    /// readers derive it from the expiry date via [`Listing::effective_status`].
    ListingStatus, "status" {
        Available => "available",
        Reserved => "reserved",
        Claimed => "claimed",
        Expired => "expired",
    }
);

vocabulary!(FoodCategory, "category" {
    Fruits => "fruits",
    Vegetables => "vegetables",
    Dairy => "dairy",
    Bread => "bread",
    Canned => "canned",
    Frozen => "frozen",
    Pantry => "pantry",
    Meat => "meat",
    Beverages => "beverages",
    Snacks => "snacks",
    BakedGoods => "baked-goods",
    Other => "other",
});

vocabulary!(Condition, "condition" {
    Fresh => "fresh",
    Good => "good",
    Fair => "fair",
    ExpiringSoon => "expiring-soon",
});

vocabulary!(Allergen, "allergen" {
    Nuts => "nuts",
    Dairy => "dairy",
    Gluten => "gluten",
    Eggs => "eggs",
    Soy => "soy",
    Fish => "fish",
    Shellfish => "shellfish",
    Wheat => "wheat",
    None => "none",
});

vocabulary!(DietaryRestriction, "dietary restriction" {
    Vegan => "vegan",
    Vegetarian => "vegetarian",
    GlutenFree => "gluten-free",
    DairyFree => "dairy-free",
    NutFree => "nut-free",
    Organic => "organic",
    NonGmo => "non-gmo",
    Kosher => "kosher",
    Halal => "halal",
    None => "none",
});

vocabulary!(Packaging, "packaging" {
    Original => "original",
    Repackaged => "repackaged",
    Bulk => "bulk",
    Individual => "individual",
    Mixed => "mixed",
});

/// Wire value selecting a donor-supplied category label.
pub const CUSTOM_CATEGORY: &str = "custom";

/// A fixed food category or a donor-supplied label.
///
/// Serialised as a bare string. A stored label that matches a fixed
/// category reads back as that category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Fixed(FoodCategory),
    Custom(String),
}

impl Category {
    pub fn label(&self) -> &str {
        match self {
            Category::Fixed(c) => c.as_str(),
            Category::Custom(label) => label,
        }
    }
}

impl From<FoodCategory> for Category {
    fn from(value: FoodCategory) -> Self {
        Category::Fixed(value)
    }
}

impl From<String> for Category {
    fn from(value: String) -> Self {
        match value.parse::<FoodCategory>() {
            Ok(fixed) => Category::Fixed(fixed),
            Err(_) => Category::Custom(value),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Category::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

/// Who took part in a transition, and when. Reservation and claim fields
/// are always set and cleared as a pair, so they live in one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyStamp {
    pub user_id: Uuid,
    pub at: DateTime<Utc>,
}

/// Validated content of a new listing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub quantity: String,
    pub condition: Condition,
    pub allergens: BTreeSet<Allergen>,
    pub dietary_restrictions: BTreeSet<DietaryRestriction>,
    pub brand: Option<String>,
    pub packaging: Option<Packaging>,
    pub pickup_instructions: Option<String>,
    pub images: Vec<String>,
    pub is_urgent: bool,
    pub tags: Vec<String>,
    pub expiry_date: DateTime<Utc>,
    pub location: Location,
}

/// Persisted listing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub quantity: String,
    pub condition: Condition,
    #[serde(default)]
    pub allergens: BTreeSet<Allergen>,
    #[serde(default)]
    pub dietary_restrictions: BTreeSet<DietaryRestriction>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub packaging: Option<Packaging>,
    #[serde(default)]
    pub pickup_instructions: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub expiry_date: DateTime<Utc>,
    pub location: Location,
    pub status: ListingStatus,
    #[serde(default)]
    pub reservation: Option<PartyStamp>,
    #[serde(default)]
    pub claim: Option<PartyStamp>,
    /// Bumped on every write; conditional updates compare against it.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn from_new(new: NewListing, donor_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            donor_id,
            title: new.title,
            description: new.description,
            category: new.category,
            quantity: new.quantity,
            condition: new.condition,
            allergens: new.allergens,
            dietary_restrictions: new.dietary_restrictions,
            brand: new.brand,
            packaging: new.packaging,
            pickup_instructions: new.pickup_instructions,
            images: new.images,
            is_urgent: new.is_urgent,
            tags: new.tags,
            expiry_date: new.expiry_date,
            location: new.location,
            status: ListingStatus::Available,
            reservation: None,
            claim: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_date
    }

    pub fn can_be_reserved(&self, now: DateTime<Utc>) -> bool {
        self.status == ListingStatus::Available && now < self.expiry_date
    }

    pub fn can_be_claimed(&self, now: DateTime<Utc>) -> bool {
        self.status == ListingStatus::Reserved && now < self.expiry_date
    }

    /// Whole days left before expiry, rounded up. Negative once past expiry.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.expiry_date - now).num_milliseconds() as f64;
        (millis / MILLIS_PER_DAY).ceil() as i64
    }

    /// Status as readers should see it: an available listing past its
    /// expiry is expired even if the sweep has not caught up yet.
    pub fn effective_status(&self, now: DateTime<Utc>) -> ListingStatus {
        match self.status {
            ListingStatus::Available if self.is_expired(now) => ListingStatus::Expired,
            other => other,
        }
    }

    pub fn reserved_by(&self) -> Option<Uuid> {
        self.reservation.map(|stamp| stamp.user_id)
    }

    pub fn claimed_by(&self) -> Option<Uuid> {
        self.claim.map(|stamp| stamp.user_id)
    }

    pub fn is_donor(&self, user_id: Uuid) -> bool {
        self.donor_id == user_id
    }

    /// True if `user_id` holds or held this listing as a recipient.
    pub fn is_recipient(&self, user_id: Uuid) -> bool {
        self.reserved_by() == Some(user_id) || self.claimed_by() == Some(user_id)
    }

    /// Evidence that `a` and `b` transacted through this listing, in
    /// either direction.
    pub fn links(&self, a: Uuid, b: Uuid) -> bool {
        (self.is_donor(a) && self.is_recipient(b)) || (self.is_donor(b) && self.is_recipient(a))
    }

    /// Checks the pairing between stored status and the reservation/claim
    /// stamps.
    pub fn check_invariants(&self) -> Result<(), String> {
        let ok = match self.status {
            ListingStatus::Available | ListingStatus::Expired => {
                self.reservation.is_none() && self.claim.is_none()
            }
            ListingStatus::Reserved => self.reservation.is_some() && self.claim.is_none(),
            ListingStatus::Claimed => match (self.reservation, self.claim) {
                (Some(r), Some(c)) => r.user_id == c.user_id,
                _ => false,
            },
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "listing {} in status {} has reservation={:?} claim={:?}",
                self.id, self.status, self.reservation, self.claim
            ))
        }
    }
}

/// Validated donor edit. `None` leaves a field untouched; for the optional
/// attributes `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub quantity: Option<String>,
    pub condition: Option<Condition>,
    pub allergens: Option<BTreeSet<Allergen>>,
    pub dietary_restrictions: Option<BTreeSet<DietaryRestriction>>,
    pub brand: Option<Option<String>>,
    pub packaging: Option<Option<Packaging>>,
    pub pickup_instructions: Option<Option<String>>,
    pub images: Option<Vec<String>>,
    pub is_urgent: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub location: Option<Location>,
}

impl ListingEdit {
    fn apply_to(&self, listing: &mut Listing, now: DateTime<Utc>) {
        if let Some(v) = &self.title {
            listing.title = v.clone();
        }
        if let Some(v) = &self.description {
            listing.description = v.clone();
        }
        if let Some(v) = &self.category {
            listing.category = v.clone();
        }
        if let Some(v) = &self.quantity {
            listing.quantity = v.clone();
        }
        if let Some(v) = self.condition {
            listing.condition = v;
        }
        if let Some(v) = &self.allergens {
            listing.allergens = v.clone();
        }
        if let Some(v) = &self.dietary_restrictions {
            listing.dietary_restrictions = v.clone();
        }
        if let Some(v) = &self.brand {
            listing.brand = v.clone();
        }
        if let Some(v) = self.packaging {
            listing.packaging = v;
        }
        if let Some(v) = &self.pickup_instructions {
            listing.pickup_instructions = v.clone();
        }
        if let Some(v) = &self.images {
            listing.images = v.clone();
        }
        if let Some(v) = self.is_urgent {
            listing.is_urgent = v;
        }
        if let Some(v) = &self.tags {
            listing.tags = v.clone();
        }
        if let Some(v) = self.expiry_date {
            listing.expiry_date = v;
        }
        if let Some(v) = &self.location {
            listing.location = v.clone();
        }
        // A swept listing whose expiry moved into the future is available again.
        if listing.status == ListingStatus::Expired && !listing.is_expired(now) {
            listing.status = ListingStatus::Available;
        }
    }
}

/// A state-machine edge. Guards are the caller's job; this only writes
/// the resulting fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleChange {
    Reserve { by: Uuid },
    Claim { by: Uuid },
    CancelReservation,
    Expire,
}

impl LifecycleChange {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleChange::Reserve { .. } => "reserve",
            LifecycleChange::Claim { .. } => "claim",
            LifecycleChange::CancelReservation => "cancel-reservation",
            LifecycleChange::Expire => "expire",
        }
    }

    fn apply_to(self, listing: &mut Listing, now: DateTime<Utc>) {
        match self {
            LifecycleChange::Reserve { by } => {
                listing.status = ListingStatus::Reserved;
                listing.reservation = Some(PartyStamp { user_id: by, at: now });
                listing.claim = None;
            }
            LifecycleChange::Claim { by } => {
                listing.status = ListingStatus::Claimed;
                listing.claim = Some(PartyStamp { user_id: by, at: now });
            }
            LifecycleChange::CancelReservation => {
                listing.status = ListingStatus::Available;
                listing.reservation = None;
                listing.claim = None;
            }
            LifecycleChange::Expire => {
                listing.status = ListingStatus::Expired;
            }
        }
    }
}

/// A single write against a stored listing.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingPatch {
    Edit(ListingEdit),
    Transition(LifecycleChange),
}

impl ListingPatch {
    /// Applies the patch, stamps `updated_at` and bumps the version.
    pub fn apply(&self, listing: &mut Listing, now: DateTime<Utc>) {
        match self {
            ListingPatch::Edit(edit) => edit.apply_to(listing, now),
            ListingPatch::Transition(change) => change.apply_to(listing, now),
        }
        listing.updated_at = now;
        listing.version += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
    }

    pub(crate) fn sample_new(expiry: DateTime<Utc>) -> NewListing {
        NewListing {
            title: "Fresh Organic Bananas".into(),
            description: "A bunch of ripe organic bananas.".into(),
            category: FoodCategory::Fruits.into(),
            quantity: "1 bunch".into(),
            condition: Condition::Fresh,
            allergens: BTreeSet::from([Allergen::None]),
            dietary_restrictions: BTreeSet::new(),
            brand: None,
            packaging: None,
            pickup_instructions: None,
            images: vec![],
            is_urgent: false,
            tags: vec!["organic".into()],
            expiry_date: expiry,
            location: Location {
                address: "123 Main Street".into(),
                city: "Springfield".into(),
                state: "IL".into(),
                zip_code: "62701".into(),
                coordinates: None,
            },
        }
    }

    #[test]
    fn expiry_predicates_follow_the_clock() {
        let listing = Listing::from_new(sample_new(t0() + Duration::days(2)), Uuid::new_v4(), t0());
        assert!(listing.can_be_reserved(t0()));
        assert!(!listing.is_expired(t0()));
        assert_eq!(listing.days_until_expiry(t0()), 2);
        assert_eq!(listing.days_until_expiry(t0() + Duration::hours(30)), 1);

        let later = t0() + Duration::days(3);
        assert!(listing.is_expired(later));
        assert!(!listing.can_be_reserved(later));
        assert_eq!(listing.effective_status(later), ListingStatus::Expired);
        assert_eq!(listing.status, ListingStatus::Available);
    }

    #[test]
    fn extending_a_swept_listing_makes_it_available_again() {
        let mut listing = Listing::from_new(sample_new(t0() + Duration::days(1)), Uuid::new_v4(), t0());
        let later = t0() + Duration::days(2);
        ListingPatch::Transition(LifecycleChange::Expire).apply(&mut listing, later);
        assert_eq!(listing.status, ListingStatus::Expired);

        let retitle = ListingEdit {
            title: Some("Ripe bananas".into()),
            ..Default::default()
        };
        ListingPatch::Edit(retitle).apply(&mut listing, later);
        assert_eq!(listing.status, ListingStatus::Expired);

        let extend = ListingEdit {
            expiry_date: Some(later + Duration::days(3)),
            ..Default::default()
        };
        ListingPatch::Edit(extend).apply(&mut listing, later);
        assert_eq!(listing.status, ListingStatus::Available);
        listing.check_invariants().unwrap();
    }

    #[test]
    fn transitions_keep_stamps_paired_with_status() {
        let donor = Uuid::new_v4();
        let taker = Uuid::new_v4();
        let mut listing = Listing::from_new(sample_new(t0() + Duration::days(5)), donor, t0());
        listing.check_invariants().unwrap();

        ListingPatch::Transition(LifecycleChange::Reserve { by: taker }).apply(&mut listing, t0());
        assert_eq!(listing.status, ListingStatus::Reserved);
        assert_eq!(listing.reserved_by(), Some(taker));
        assert_eq!(listing.version, 1);
        listing.check_invariants().unwrap();

        ListingPatch::Transition(LifecycleChange::CancelReservation).apply(&mut listing, t0());
        assert_eq!(listing.reservation, None);
        listing.check_invariants().unwrap();

        ListingPatch::Transition(LifecycleChange::Reserve { by: taker }).apply(&mut listing, t0());
        ListingPatch::Transition(LifecycleChange::Claim { by: taker }).apply(&mut listing, t0());
        assert_eq!(listing.claimed_by(), Some(taker));
        assert!(listing.links(donor, taker));
        assert!(listing.links(taker, donor));
        assert_eq!(listing.version, 4);
        listing.check_invariants().unwrap();
    }

    #[test]
    fn broken_pairing_is_reported() {
        let mut listing = Listing::from_new(sample_new(t0() + Duration::days(1)), Uuid::new_v4(), t0());
        listing.status = ListingStatus::Reserved;
        assert!(listing.check_invariants().is_err());
    }

    #[test]
    fn category_round_trips_as_plain_label() {
        let fixed: Category = serde_json::from_str("\"baked-goods\"").unwrap();
        assert_eq!(fixed, Category::Fixed(FoodCategory::BakedGoods));
        let custom: Category = serde_json::from_str("\"Baby food\"").unwrap();
        assert_eq!(custom, Category::Custom("Baby food".into()));
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"Baby food\"");
    }

    #[test]
    fn vocabulary_labels_match_wire_names() {
        assert_eq!(Condition::ExpiringSoon.as_str(), "expiring-soon");
        assert_eq!(
            serde_json::to_string(&DietaryRestriction::NonGmo).unwrap(),
            "\"non-gmo\""
        );
        assert!("rotten".parse::<Condition>().is_err());
    }
}
