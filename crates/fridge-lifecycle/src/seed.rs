//! Loading demo users and listings from YAML.
//!
//! Listings go through [`ListingService::create`], so they are validated and
//! their donors' counters move exactly as for a real donation.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use fridge_core::{Address, ListingInput, User, UserType};
use fridge_storage::{StoreError, UserStore};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ListingService;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub users: Vec<SeedUser>,
    pub listings: Vec<SeedListing>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedUser {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub user_type: UserType,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedListing {
    /// Email of a seeded or existing user.
    pub donor: String,
    /// Overrides `expiryDate` with a date relative to load time.
    #[serde(default)]
    pub expires_in_days: Option<i64>,
    #[serde(flatten)]
    pub listing: ListingInput,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub users_created: usize,
    pub users_existing: usize,
    pub listings_created: usize,
}

pub async fn load_seed_file(path: &Path) -> Result<SeedFile> {
    let yaml = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    serde_yaml::from_str(&yaml).with_context(|| format!("parsing seed file {}", path.display()))
}

pub async fn apply_seed(
    users: &dyn UserStore,
    service: &ListingService,
    seed: &SeedFile,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    let now = service.now();

    for entry in &seed.users {
        let user = User {
            id: Uuid::new_v4(),
            name: entry.name.clone(),
            email: entry.email.clone(),
            phone: entry.phone.clone(),
            address: entry.address.clone(),
            profile_image: entry.profile_image.clone(),
            rating: 0.0,
            total_donations: 0,
            total_received: 0,
            is_verified: entry.is_verified,
            user_type: entry.user_type,
            created_at: now,
        };
        match users.insert(user).await {
            Ok(_) => summary.users_created += 1,
            Err(StoreError::Duplicate { .. }) => summary.users_existing += 1,
            Err(err) => return Err(err).with_context(|| format!("seeding user {}", entry.email)),
        }
    }

    for (index, entry) in seed.listings.iter().enumerate() {
        let donor = users
            .get_by_email(&entry.donor)
            .await
            .with_context(|| format!("looking up donor {}", entry.donor))?
            .with_context(|| format!("seed listing #{index}: unknown donor {}", entry.donor))?;
        let mut input = entry.listing.clone();
        if let Some(days) = entry.expires_in_days {
            input.expiry_date = Some((now + Duration::days(days)).to_rfc3339());
        }
        match service.create(donor.id, &input).await {
            Ok(_) => summary.listings_created += 1,
            Err(err) if err.is_rejection() => {
                warn!(index, error = %err, "skipping invalid seed listing");
            }
            Err(err) => return Err(err).with_context(|| format!("seeding listing #{index}")),
        }
    }

    info!(
        users_created = summary.users_created,
        users_existing = summary.users_existing,
        listings_created = summary.listings_created,
        "seed applied"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LifecycleConfig;
    use fridge_storage::Stores;
    use std::io::Write;

    const SEED: &str = r#"
users:
  - name: Sarah Johnson
    email: sarah@example.com
    phone: "555-0101"
    isVerified: true
    userType: donor
  - name: Mike Chen
    email: mike@example.com
listings:
  - donor: sarah@example.com
    expiresInDays: 3
    title: Fresh Organic Bananas
    description: A bunch of ripe organic bananas from the farmers market.
    category: fruits
    quantity: 1 bunch
    condition: fresh
    dietaryRestrictions: [vegan, organic]
    location:
      address: 123 Main St
      city: Springfield
      state: IL
      zipCode: "62701"
  - donor: sarah@example.com
    title: "No"
    description: too short
    category: fruits
    quantity: "1"
    condition: fresh
"#;

    #[tokio::test]
    async fn seed_creates_users_and_valid_listings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();
        let seed = load_seed_file(file.path()).await.unwrap();
        assert_eq!(seed.users.len(), 2);
        assert_eq!(seed.listings.len(), 2);

        let stores = Stores::in_memory();
        let service = ListingService::new(&stores, LifecycleConfig::default());
        let summary = apply_seed(stores.users.as_ref(), &service, &seed).await.unwrap();
        assert_eq!(
            summary,
            SeedSummary {
                users_created: 2,
                users_existing: 0,
                listings_created: 1,
            }
        );

        let sarah = stores.users.get_by_email("sarah@example.com").await.unwrap().unwrap();
        assert_eq!(sarah.total_donations, 1);
        assert_eq!(sarah.user_type, UserType::Donor);

        let again = apply_seed(stores.users.as_ref(), &service, &SeedFile {
            users: seed.users.clone(),
            listings: vec![],
        })
        .await
        .unwrap();
        assert_eq!(again.users_existing, 2);
    }

    #[tokio::test]
    async fn bundled_sample_loads_cleanly() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../seed/sample.yaml");
        let seed = load_seed_file(&path).await.unwrap();
        let stores = Stores::in_memory();
        let service = ListingService::new(&stores, LifecycleConfig::default());
        let summary = apply_seed(stores.users.as_ref(), &service, &seed).await.unwrap();
        assert_eq!(summary.users_created, seed.users.len());
        assert_eq!(summary.listings_created, seed.listings.len());
    }

    #[tokio::test]
    async fn unknown_donor_is_an_error() {
        let seed: SeedFile = serde_yaml::from_str(
            "listings:\n  - donor: ghost@example.com\n    title: Rice\n",
        )
        .unwrap();
        let stores = Stores::in_memory();
        let service = ListingService::new(&stores, LifecycleConfig::default());
        let err = apply_seed(stores.users.as_ref(), &service, &seed).await.unwrap_err();
        assert!(err.to_string().contains("unknown donor"));
    }
}
