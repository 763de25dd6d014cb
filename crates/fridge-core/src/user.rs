//! User records as the lifecycle sees them. Account management lives
//! elsewhere; this side only reads profiles and bumps counters.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::non_empty;
use crate::validation::ValidationErrors;

/// Upper bound on users returned by one search.
pub const USER_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Donor,
    Recipient,
    #[default]
    Both,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Donor => "donor",
            UserType::Recipient => "recipient",
            UserType::Both => "both",
        }
    }
}

impl FromStr for UserType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "donor" => Ok(UserType::Donor),
            "recipient" => Ok(UserType::Recipient),
            "both" => Ok(UserType::Both),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub profile_image: Option<String>,
    /// Running average, one decimal place.
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub total_donations: u64,
    #[serde(default)]
    pub total_received: u64,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub user_type: UserType,
    pub created_at: DateTime<Utc>,
}

/// Identity fields resolved onto a listing for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl UserSummary {
    /// Donor card: name, rating and avatar; contact phone only on detail views.
    pub fn donor(user: &User, with_phone: bool) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            rating: Some(user.rating),
            profile_image: user.profile_image.clone(),
            phone: if with_phone { user.phone.clone() } else { None },
        }
    }

    /// Reserver or claimant: name only.
    pub fn party(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            rating: None,
            profile_image: None,
            phone: None,
        }
    }
}

/// Raw `GET /users/search` query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSearchParams {
    pub q: Option<String>,
    pub user_type: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl UserSearchParams {
    pub fn into_search(self) -> Result<UserSearch, ValidationErrors> {
        let user_type = match non_empty(self.user_type) {
            None => None,
            Some(raw) => Some(
                raw.parse::<UserType>()
                    .map_err(|()| ValidationErrors::single("userType", "Invalid user type"))?,
            ),
        };
        Ok(UserSearch {
            text: non_empty(self.q),
            user_type,
            city: non_empty(self.city),
            state: non_empty(self.state),
        })
    }
}

/// Text fields match as case-insensitive substrings; `text` looks at both
/// name and email. Results come back ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSearch {
    pub text: Option<String>,
    pub user_type: Option<UserType>,
    pub city: Option<String>,
    pub state: Option<String>,
}

impl UserSearch {
    pub fn matches(&self, user: &User) -> bool {
        let address = user.address.as_ref();
        let text = match &self.text {
            None => true,
            Some(t) => contains(&user.name, t) || contains(&user.email, t),
        };
        let field = |needle: &Option<String>, value: Option<&String>| match needle {
            None => true,
            Some(n) => value.is_some_and(|v| contains(v, n)),
        };
        text && self.user_type.is_none_or(|t| t == user.user_type)
            && field(&self.city, address.and_then(|a| a.city.as_ref()))
            && field(&self.state, address.and_then(|a| a.state.as_ref()))
    }
}

fn contains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Folds one score into a running average over `prior_count` earlier
/// ratings, rounded to one decimal place.
pub fn rolling_rating(current: f64, prior_count: u64, score: f64) -> f64 {
    let next = if prior_count == 0 {
        score
    } else {
        let n = prior_count as f64;
        (current * n + score) / (n + 1.0)
    };
    (next * 10.0).round() / 10.0
}
