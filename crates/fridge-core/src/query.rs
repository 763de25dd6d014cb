//! Listing search: filter, sort and page parameters.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::listing::{Listing, ListingStatus};
use crate::validation::{FieldError, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    ExpiryDate,
    Title,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "createdAt" => Some(SortField::CreatedAt),
            "expiryDate" => Some(SortField::ExpiryDate),
            "title" => Some(SortField::Title),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Which side of a listing a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Donor,
    /// Reserver or claimant.
    Recipient,
}

/// Conjunction of listing predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFilter {
    pub category: Option<String>,
    /// Case-insensitive substring of `location.city`.
    pub city: Option<String>,
    /// Case-insensitive substring of `location.state`.
    pub state: Option<String>,
    /// Compared against the effective status, so `Available` skips listings
    /// past expiry and `Expired` picks them up.
    pub status: ListingStatus,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            category: None,
            city: None,
            state: None,
            status: ListingStatus::Available,
        }
    }
}

impl ListingFilter {
    pub fn matches(&self, listing: &Listing, now: DateTime<Utc>) -> bool {
        if listing.effective_status(now) != self.status {
            return false;
        }
        if let Some(category) = &self.category {
            if listing.category.label().to_lowercase() != category.to_lowercase() {
                return false;
            }
        }
        if let Some(city) = &self.city {
            if !contains_ci(&listing.location.city, city) {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if !contains_ci(&listing.location.state, state) {
                return false;
            }
        }
        true
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingQuery {
    pub filter: ListingFilter,
    pub sort: SortField,
    pub order: SortOrder,
    /// 1-based.
    pub page: u64,
    pub limit: u64,
}

impl ListingQuery {
    pub fn skip(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit)
    }

    /// Ordering used by in-process stores; ties fall back to creation time
    /// and id so pages are stable.
    pub fn compare(&self, a: &Listing, b: &Listing) -> Ordering {
        let primary = match self.sort {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::ExpiryDate => a.expiry_date.cmp(&b.expiry_date),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        };
        let ordered = primary
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id));
        match self.order {
            SortOrder::Asc => ordered,
            SortOrder::Desc => ordered.reverse(),
        }
    }
}

/// Raw query string of `GET /listings`. Numbers arrive as text so a bad
/// value becomes a field error rather than a rejected request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingsParams {
    pub category: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub limit: Option<String>,
    pub page: Option<String>,
}

impl ListingsParams {
    pub fn into_query(self, default_limit: u64, max_limit: u64) -> Result<ListingQuery, ValidationErrors> {
        let mut errors = Vec::new();

        let status = match non_empty(self.status) {
            None => ListingStatus::Available,
            Some(raw) => raw.parse::<ListingStatus>().unwrap_or_else(|_| {
                errors.push(FieldError::new("status", "Invalid status"));
                ListingStatus::Available
            }),
        };
        let sort = match non_empty(self.sort_by) {
            None => SortField::default(),
            Some(raw) => SortField::parse(&raw).unwrap_or_else(|| {
                errors.push(FieldError::new("sortBy", "sortBy must be one of createdAt, expiryDate, title"));
                SortField::default()
            }),
        };
        let order = match non_empty(self.sort_order).as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(_) => {
                errors.push(FieldError::new("sortOrder", "sortOrder must be asc or desc"));
                SortOrder::Desc
            }
        };
        let limit = match non_empty(self.limit) {
            None => default_limit,
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n >= 1 => n.min(max_limit),
                _ => {
                    errors.push(FieldError::new("limit", "limit must be a positive integer"));
                    default_limit
                }
            },
        };
        let page = match non_empty(self.page) {
            None => 1,
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    errors.push(FieldError::new("page", "page must be an integer of at least 1"));
                    1
                }
            },
        };

        // Stores take the offset as a signed 64-bit value.
        let offset_fits = (page - 1)
            .checked_mul(limit)
            .is_some_and(|skip| i64::try_from(skip).is_ok());
        if !offset_fits {
            errors.push(FieldError::new("page", "page is out of range"));
        }

        if !errors.is_empty() {
            return Err(ValidationErrors(errors));
        }
        Ok(ListingQuery {
            filter: ListingFilter {
                category: non_empty(self.category),
                city: non_empty(self.city),
                state: non_empty(self.state),
                status,
            },
            sort,
            order,
            page,
            limit,
        })
    }
}

pub(crate) fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// One page of results plus the size of the whole match set.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}
