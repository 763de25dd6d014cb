//! Core domain model for the community fridge: listings, users, and the
//! pure rules that govern a listing's lifecycle.

pub mod clock;
pub mod listing;
pub mod query;
pub mod user;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use listing::{
    Allergen, Category, Condition, Coordinates, DietaryRestriction, FoodCategory, LifecycleChange,
    Listing, ListingEdit, ListingPatch, ListingStatus, Location, NewListing, Packaging, PartyStamp,
    UnknownValue, CUSTOM_CATEGORY,
};
pub use query::{ListingFilter, ListingQuery, ListingsParams, Page, Party, SortField, SortOrder};
pub use user::{
    rolling_rating, Address, User, UserSearch, UserSearchParams, UserSummary, UserType, USER_SEARCH_LIMIT,
};
pub use validation::{
    parse_timestamp, FieldError, ListingInput, ListingUpdateInput, LocationInput, ValidationErrors,
};

pub const CRATE_NAME: &str = "fridge-core";
