//! Request-shaped inputs and their validation into typed listing values.
//!
//! Validation never stops at the first problem: every violated field is
//! reported, keyed by its wire path (`location.city`, `customCategory`, ...).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::listing::{
    Category, Condition, Coordinates, FoodCategory, ListingEdit, Location, NewListing, Packaging,
    CUSTOM_CATEGORY,
};

const TITLE_MIN: usize = 3;
const DESCRIPTION_MIN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|e| e.field.as_str())
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields().any(|f| f == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields().collect::<Vec<_>>();
        write!(f, "validation failed: {}", fields.join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocationInput {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// Body of a create request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub custom_category: Option<String>,
    pub quantity: Option<String>,
    pub condition: Option<String>,
    pub allergens: Vec<String>,
    pub dietary_restrictions: Vec<String>,
    pub brand: Option<String>,
    pub packaging: Option<String>,
    pub pickup_instructions: Option<String>,
    pub images: Vec<String>,
    pub is_urgent: bool,
    pub tags: Vec<String>,
    pub expiry_date: Option<String>,
    pub location: LocationInput,
}

/// Body of an update request. Absent fields are left alone; an empty
/// string clears an optional attribute.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingUpdateInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub custom_category: Option<String>,
    pub quantity: Option<String>,
    pub condition: Option<String>,
    pub allergens: Option<Vec<String>>,
    pub dietary_restrictions: Option<Vec<String>>,
    pub brand: Option<String>,
    pub packaging: Option<String>,
    pub pickup_instructions: Option<String>,
    pub images: Option<Vec<String>>,
    pub is_urgent: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub expiry_date: Option<String>,
    pub location: Option<LocationInput>,
}

impl ListingInput {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<NewListing, ValidationErrors> {
        let mut v = Validator::default();

        let title = v.min_len("title", self.title.as_deref(), TITLE_MIN, "Title must be at least 3 characters");
        let description = v.min_len(
            "description",
            self.description.as_deref(),
            DESCRIPTION_MIN,
            "Description must be at least 10 characters",
        );
        let category = v.category(self.category.as_deref(), self.custom_category.as_deref());
        let quantity = v.required("quantity", self.quantity.as_deref(), "Quantity is required");
        let condition = v.parse_one::<Condition>("condition", self.condition.as_deref(), "Invalid condition");
        let allergens = v.parse_set("allergens", &self.allergens, "Invalid allergen");
        let dietary = v.parse_set("dietaryRestrictions", &self.dietary_restrictions, "Invalid dietary restriction");
        let packaging = v.packaging(self.packaging.as_deref());
        let images = v.images(&self.images);
        let expiry_date = v.expiry(self.expiry_date.as_deref(), now);
        let location = v.location(&self.location);

        let (
            Some(title),
            Some(description),
            Some(category),
            Some(quantity),
            Some(condition),
            Some(allergens),
            Some(dietary_restrictions),
            Some(packaging),
            Some(images),
            Some(expiry_date),
            Some(location),
        ) = (
            title,
            description,
            category,
            quantity,
            condition,
            allergens,
            dietary,
            packaging,
            images,
            expiry_date,
            location,
        )
        else {
            return Err(v.into_errors());
        };

        Ok(NewListing {
            title,
            description,
            category,
            quantity,
            condition,
            allergens,
            dietary_restrictions,
            brand: optional_text(self.brand.as_deref()),
            packaging,
            pickup_instructions: optional_text(self.pickup_instructions.as_deref()),
            images,
            is_urgent: self.is_urgent,
            tags: normalize_tags(&self.tags),
            expiry_date,
            location,
        })
    }
}

impl ListingUpdateInput {
    /// Runs the create-time rules over the touched fields only.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<ListingEdit, ValidationErrors> {
        let mut v = Validator::default();
        let mut edit = ListingEdit::default();

        if self.title.is_some() {
            edit.title = v.min_len("title", self.title.as_deref(), TITLE_MIN, "Title must be at least 3 characters");
        }
        if self.description.is_some() {
            edit.description = v.min_len(
                "description",
                self.description.as_deref(),
                DESCRIPTION_MIN,
                "Description must be at least 10 characters",
            );
        }
        if self.category.is_some() || self.custom_category.is_some() {
            // A label on its own relabels the listing as custom.
            let category = self.category.as_deref().or(Some(CUSTOM_CATEGORY));
            edit.category = v.category(category, self.custom_category.as_deref());
        }
        if self.quantity.is_some() {
            edit.quantity = v.required("quantity", self.quantity.as_deref(), "Quantity is required");
        }
        if self.condition.is_some() {
            edit.condition = v.parse_one("condition", self.condition.as_deref(), "Invalid condition");
        }
        if let Some(values) = &self.allergens {
            edit.allergens = v.parse_set("allergens", values, "Invalid allergen");
        }
        if let Some(values) = &self.dietary_restrictions {
            edit.dietary_restrictions = v.parse_set("dietaryRestrictions", values, "Invalid dietary restriction");
        }
        if let Some(brand) = &self.brand {
            edit.brand = Some(optional_text(Some(brand)));
        }
        if self.packaging.is_some() {
            edit.packaging = v.packaging(self.packaging.as_deref());
        }
        if let Some(text) = &self.pickup_instructions {
            edit.pickup_instructions = Some(optional_text(Some(text)));
        }
        if let Some(images) = &self.images {
            edit.images = v.images(images);
        }
        edit.is_urgent = self.is_urgent;
        if let Some(tags) = &self.tags {
            edit.tags = Some(normalize_tags(tags));
        }
        if self.expiry_date.is_some() {
            edit.expiry_date = v.expiry(self.expiry_date.as_deref(), now);
        }
        if let Some(location) = &self.location {
            edit.location = v.location(location);
        }

        if v.errors.is_empty() {
            Ok(edit)
        } else {
            Err(v.into_errors())
        }
    }
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM[:SS]` read as UTC, or a
/// bare date read as UTC midnight.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(ToString::to_string)
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

#[derive(Default)]
struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    fn fail<T>(&mut self, field: &str, message: impl Into<String>) -> Option<T> {
        self.errors.push(FieldError::new(field, message));
        None
    }

    fn into_errors(self) -> ValidationErrors {
        ValidationErrors(self.errors)
    }

    fn required(&mut self, field: &str, raw: Option<&str>, message: &str) -> Option<String> {
        match optional_text(raw) {
            Some(value) => Some(value),
            None => self.fail(field, message),
        }
    }

    fn min_len(&mut self, field: &str, raw: Option<&str>, min: usize, message: &str) -> Option<String> {
        let value = raw.map(str::trim).unwrap_or_default();
        if value.chars().count() >= min {
            Some(value.to_string())
        } else {
            self.fail(field, message)
        }
    }

    fn parse_one<T: FromStr>(&mut self, field: &str, raw: Option<&str>, message: &str) -> Option<T> {
        match raw.map(str::trim).and_then(|s| s.parse::<T>().ok()) {
            Some(value) => Some(value),
            None => self.fail(field, message),
        }
    }

    fn parse_set<T: FromStr + Ord>(&mut self, field: &str, raw: &[String], message: &str) -> Option<BTreeSet<T>> {
        let mut out = BTreeSet::new();
        let mut bad = Vec::new();
        for value in raw {
            match value.trim().parse::<T>() {
                Ok(parsed) => {
                    out.insert(parsed);
                }
                Err(_) => bad.push(value.as_str()),
            }
        }
        if bad.is_empty() {
            Some(out)
        } else {
            self.fail(field, format!("{message}: {}", bad.join(", ")))
        }
    }

    fn category(&mut self, raw: Option<&str>, custom: Option<&str>) -> Option<Category> {
        let raw = raw.map(str::trim).unwrap_or_default();
        if raw == CUSTOM_CATEGORY {
            return match optional_text(custom) {
                Some(label) => Some(Category::from(label)),
                None => self.fail("customCategory", "Custom category name is required"),
            };
        }
        match raw.parse::<FoodCategory>() {
            Ok(fixed) => Some(Category::Fixed(fixed)),
            Err(_) => self.fail("category", "Invalid category"),
        }
    }

    /// `Some(None)` means "no packaging given", which is valid.
    fn packaging(&mut self, raw: Option<&str>) -> Option<Option<Packaging>> {
        match optional_text(raw) {
            None => Some(None),
            Some(value) => match value.parse::<Packaging>() {
                Ok(p) => Some(Some(p)),
                Err(_) => self.fail("packaging", "Invalid packaging type"),
            },
        }
    }

    fn images(&mut self, raw: &[String]) -> Option<Vec<String>> {
        let images = raw.iter().map(|s| s.trim().to_string()).collect::<Vec<_>>();
        if images
            .iter()
            .all(|s| s.starts_with("https://") || s.starts_with("http://"))
        {
            Some(images)
        } else {
            self.fail("images", "Images must be http(s) URLs")
        }
    }

    fn expiry(&mut self, raw: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match raw.and_then(parse_timestamp) {
            None => self.fail("expiryDate", "Valid expiry date is required"),
            Some(ts) if ts <= now => self.fail("expiryDate", "Expiry date must be in the future"),
            Some(ts) => Some(ts),
        }
    }

    fn location(&mut self, input: &LocationInput) -> Option<Location> {
        let address = self.required("location.address", input.address.as_deref(), "Address is required");
        let city = self.required("location.city", input.city.as_deref(), "City is required");
        let state = self.required("location.state", input.state.as_deref(), "State is required");
        let zip_code = self.required("location.zipCode", input.zip_code.as_deref(), "Zip code is required");
        let coordinates = match input.coordinates {
            Some(c) if !coordinates_in_range(c) => {
                self.fail("location.coordinates", "Coordinates are out of range")
            }
            other => Some(other),
        };
        Some(Location {
            address: address?,
            city: city?,
            state: state?,
            zip_code: zip_code?,
            coordinates: coordinates?,
        })
    }
}

fn coordinates_in_range(c: Coordinates) -> bool {
    (-90.0..=90.0).contains(&c.lat) && (-180.0..=180.0).contains(&c.lng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::tests::t0;
    use crate::listing::{Allergen, FoodCategory};
    use chrono::Duration;

    fn valid_input() -> ListingInput {
        ListingInput {
            title: Some("  Whole Grain Bread ".into()),
            description: Some("Freshly baked whole grain bread.".into()),
            category: Some("bread".into()),
            quantity: Some("2 loaves".into()),
            condition: Some("good".into()),
            allergens: vec!["gluten".into(), "wheat".into()],
            expiry_date: Some((t0() + Duration::days(7)).to_rfc3339()),
            location: LocationInput {
                address: Some("789 Pine Street".into()),
                city: Some("Springfield".into()),
                state: Some("IL".into()),
                zip_code: Some("62703".into()),
                coordinates: Some(Coordinates { lat: 39.78, lng: -89.65 }),
            },
            tags: vec!["fresh".into(), " fresh ".into(), "".into()],
            ..Default::default()
        }
    }

    #[test]
    fn valid_create_input_is_trimmed_and_typed() {
        let new = valid_input().validate(t0()).expect("valid");
        assert_eq!(new.title, "Whole Grain Bread");
        assert_eq!(new.category, Category::Fixed(FoodCategory::Bread));
        assert!(new.allergens.contains(&Allergen::Wheat));
        assert_eq!(new.tags, vec!["fresh".to_string()]);
        assert_eq!(new.packaging, None);
    }

    #[test]
    fn every_violated_field_is_reported() {
        let input = ListingInput {
            title: Some("ab".into()),
            description: Some("short".into()),
            category: Some("gravel".into()),
            condition: Some("stale".into()),
            expiry_date: Some((t0() - Duration::hours(1)).to_rfc3339()),
            ..Default::default()
        };
        let errors = input.validate(t0()).unwrap_err();
        for field in [
            "title",
            "description",
            "category",
            "quantity",
            "condition",
            "expiryDate",
            "location.address",
            "location.city",
            "location.state",
            "location.zipCode",
        ] {
            assert!(errors.has(field), "missing error for {field}: {errors:?}");
        }
    }

    #[test]
    fn custom_category_needs_a_label() {
        let mut input = valid_input();
        input.category = Some("custom".into());
        let errors = input.validate(t0()).unwrap_err();
        assert!(errors.has("customCategory"));

        input.custom_category = Some("Baby food".into());
        let new = input.validate(t0()).unwrap();
        assert_eq!(new.category, Category::Custom("Baby food".into()));
    }

    #[test]
    fn expiry_must_be_strictly_future() {
        let mut input = valid_input();
        input.expiry_date = Some(t0().to_rfc3339());
        assert!(input.validate(t0()).unwrap_err().has("expiryDate"));

        input.expiry_date = Some("2026-03-09".into());
        let new = input.validate(t0()).unwrap();
        assert_eq!(new.expiry_date, t0() + Duration::days(7) + Duration::hours(12));
    }

    #[test]
    fn custom_label_alone_relabels_the_listing() {
        let edit = ListingUpdateInput {
            custom_category: Some("Infant food".into()),
            ..Default::default()
        }
        .validate(t0())
        .unwrap();
        assert_eq!(edit.category, Some(Category::Custom("Infant food".into())));

        let errors = ListingUpdateInput {
            custom_category: Some("  ".into()),
            ..Default::default()
        }
        .validate(t0())
        .unwrap_err();
        assert!(errors.has("customCategory"));
        assert!(!errors.has("category"));
    }

    #[test]
    fn update_only_checks_touched_fields() {
        let edit = ListingUpdateInput {
            quantity: Some("3 loaves".into()),
            brand: Some("".into()),
            ..Default::default()
        }
        .validate(t0())
        .unwrap();
        assert_eq!(edit.quantity.as_deref(), Some("3 loaves"));
        assert_eq!(edit.brand, Some(None));
        assert_eq!(edit.title, None);

        let errors = ListingUpdateInput {
            title: Some("x".into()),
            allergens: Some(vec!["nuts".into(), "sand".into()]),
            ..Default::default()
        }
        .validate(t0())
        .unwrap_err();
        assert!(errors.has("title"));
        assert!(errors.has("allergens"));
        assert!(!errors.has("description"));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let mut input = valid_input();
        input.location.coordinates = Some(Coordinates { lat: 120.0, lng: 0.0 });
        assert!(input.validate(t0()).unwrap_err().has("location.coordinates"));
    }
}
