//! PostgreSQL stores. The full record lives in `data_json`; the columns next
//! to it mirror the fields that queries filter, sort or lock on.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fridge_core::{
    LifecycleChange, Listing, ListingPatch, ListingQuery, ListingStatus, Page, Party, SortField,
    SortOrder, User, UserSearch,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::{ListingStore, StoreError, UpdateOutcome, UserStore};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn listing_from_row(row: &PgRow) -> Result<Listing, StoreError> {
    let data_json: serde_json::Value = row.try_get("data_json")?;
    let mut listing: Listing = serde_json::from_value(data_json)?;
    let version: i64 = row.try_get("version")?;
    listing.version = version as u64;
    Ok(listing)
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let data_json: serde_json::Value = row.try_get("data_json")?;
    let mut user: User = serde_json::from_value(data_json)?;
    user.rating = row.try_get("rating")?;
    user.total_donations = row.try_get::<i64, _>("total_donations")? as u64;
    user.total_received = row.try_get::<i64, _>("total_received")? as u64;
    Ok(user)
}

fn like_pattern(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, query: &ListingQuery, now: DateTime<Utc>) {
    let filter = &query.filter;
    match filter.status {
        ListingStatus::Available => {
            builder.push(" WHERE status = 'available' AND expiry_date >= ");
            builder.push_bind(now);
        }
        ListingStatus::Expired => {
            builder.push(" WHERE (status = 'expired' OR (status = 'available' AND expiry_date < ");
            builder.push_bind(now);
            builder.push("))");
        }
        other => {
            builder.push(" WHERE status = ");
            builder.push_bind(other.as_str().to_string());
        }
    }
    if let Some(category) = &filter.category {
        builder.push(" AND lower(category) = lower(");
        builder.push_bind(category.clone());
        builder.push(")");
    }
    if let Some(city) = &filter.city {
        builder.push(" AND city ILIKE ");
        builder.push_bind(like_pattern(city));
    }
    if let Some(state) = &filter.state {
        builder.push(" AND state ILIKE ");
        builder.push_bind(like_pattern(state));
    }
}

fn push_user_search(builder: &mut QueryBuilder<'_, Postgres>, search: &UserSearch) {
    builder.push(" WHERE TRUE");
    if let Some(text) = &search.text {
        builder.push(" AND (data_json->>'name' ILIKE ");
        builder.push_bind(like_pattern(text));
        builder.push(" OR email ILIKE ");
        builder.push_bind(like_pattern(text));
        builder.push(")");
    }
    if let Some(user_type) = search.user_type {
        builder.push(" AND data_json->>'userType' = ");
        builder.push_bind(user_type.as_str());
    }
    if let Some(city) = &search.city {
        builder.push(" AND data_json->'address'->>'city' ILIKE ");
        builder.push_bind(like_pattern(city));
    }
    if let Some(state) = &search.state {
        builder.push(" AND data_json->'address'->>'state' ILIKE ");
        builder.push_bind(like_pattern(state));
    }
}

/// Titles compare lowercased in byte order, matching the in-process store.
fn order_by(query: &ListingQuery) -> String {
    let column = match query.sort {
        SortField::CreatedAt => "created_at",
        SortField::ExpiryDate => "expiry_date",
        SortField::Title => "lower(title) COLLATE \"C\"",
    };
    let direction = match query.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    format!(" ORDER BY {column} {direction}, created_at {direction}, id {direction}")
}

async fn write_listing(
    tx: &mut Transaction<'_, Postgres>,
    listing: &Listing,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE listings
           SET status = $2,
               category = $3,
               title = $4,
               city = $5,
               state = $6,
               expiry_date = $7,
               reserved_by = $8,
               claimed_by = $9,
               version = $10,
               data_json = $11,
               updated_at = $12
         WHERE id = $1
        "#,
    )
    .bind(listing.id)
    .bind(listing.status.as_str())
    .bind(listing.category.label())
    .bind(&listing.title)
    .bind(&listing.location.city)
    .bind(&listing.location.state)
    .bind(listing.expiry_date)
    .bind(listing.reserved_by())
    .bind(listing.claimed_by())
    .bind(listing.version as i64)
    .bind(serde_json::to_value(listing)?)
    .bind(listing.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ListingStore for PgStore {
    async fn insert(&self, listing: Listing) -> Result<Listing, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO listings
                (id, donor_id, status, category, title, city, state, expiry_date,
                 reserved_by, claimed_by, version, data_json, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(listing.id)
        .bind(listing.donor_id)
        .bind(listing.status.as_str())
        .bind(listing.category.label())
        .bind(&listing.title)
        .bind(&listing.location.city)
        .bind(&listing.location.state)
        .bind(listing.expiry_date)
        .bind(listing.reserved_by())
        .bind(listing.claimed_by())
        .bind(listing.version as i64)
        .bind(serde_json::to_value(&listing)?)
        .bind(listing.created_at)
        .bind(listing.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                entity: "listing",
                key: listing.id.to_string(),
            });
        }
        Ok(listing)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query("SELECT version, data_json FROM listings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(listing_from_row).transpose()
    }

    async fn find(&self, query: &ListingQuery, now: DateTime<Utc>) -> Result<Page<Listing>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM listings");
        push_filter(&mut count, query, now);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT version, data_json FROM listings");
        push_filter(&mut select, query, now);
        select.push(order_by(query));
        select.push(" LIMIT ");
        select.push_bind(query.limit as i64);
        select.push(" OFFSET ");
        select.push_bind(query.skip() as i64);

        let rows = select.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(listing_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total as u64,
        })
    }

    async fn find_by_party(
        &self,
        party: Party,
        user_id: Uuid,
        limit: Option<u64>,
    ) -> Result<Vec<Listing>, StoreError> {
        let sql = match party {
            Party::Donor => {
                r#"
                SELECT version, data_json FROM listings
                 WHERE donor_id = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2
                "#
            }
            Party::Recipient => {
                r#"
                SELECT version, data_json FROM listings
                 WHERE reserved_by = $1 OR claimed_by = $1
                 ORDER BY created_at DESC, id DESC
                 LIMIT $2
                "#
            }
        };
        let rows = sqlx::query(sql)
            .bind(user_id)
            .bind(limit.map(|n| n as i64))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(listing_from_row).collect()
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        patch: &ListingPatch,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT version, data_json FROM listings WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(UpdateOutcome::NotFound);
        };
        let mut listing = listing_from_row(&row)?;
        if expected_version.is_some_and(|v| v != listing.version) {
            return Ok(UpdateOutcome::VersionConflict { current: listing });
        }
        patch.apply(&mut listing, now);
        write_listing(&mut tx, &listing).await?;
        tx.commit().await?;
        Ok(UpdateOutcome::Updated(listing))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_interaction(&self, a: Uuid, b: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM listings
                 WHERE (donor_id = $1 AND (reserved_by = $2 OR claimed_by = $2))
                    OR (donor_id = $2 AND (reserved_by = $1 OR claimed_by = $1))
            ) AS linked
            "#,
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("linked")?)
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let span = info_span!("expire_overdue", %now);
        async {
            let patch = ListingPatch::Transition(LifecycleChange::Expire);
            let mut tx = self.pool.begin().await?;
            let rows = sqlx::query(
                r#"
                SELECT version, data_json FROM listings
                 WHERE status = 'available' AND expiry_date < $1
                 FOR UPDATE SKIP LOCKED
                "#,
            )
            .bind(now)
            .fetch_all(&mut *tx)
            .await?;
            let mut moved: u64 = 0;
            for row in &rows {
                let mut listing = listing_from_row(row)?;
                patch.apply(&mut listing, now);
                write_listing(&mut tx, &listing).await?;
                moved += 1;
            }
            tx.commit().await?;
            debug!(moved, "expired overdue listings");
            Ok::<u64, StoreError>(moved)
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert(&self, user: User) -> Result<User, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, rating, total_donations, total_received, data_json, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user.id)
        .bind(user.email.to_lowercase())
        .bind(user.rating)
        .bind(user.total_donations as i64)
        .bind(user.total_received as i64)
        .bind(serde_json::to_value(&user)?)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate {
                entity: "user",
                key: user.email.clone(),
            });
        }
        Ok(user)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT rating, total_donations, total_received, data_json FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT rating, total_donations, total_received, data_json FROM users WHERE email = $1",
        )
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT rating, total_donations, total_received, data_json FROM users WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| user_from_row(row).map(|u| (u.id, u)))
            .collect()
    }

    async fn search(&self, search: &UserSearch, limit: usize) -> Result<Vec<User>, StoreError> {
        let mut select =
            QueryBuilder::<Postgres>::new("SELECT rating, total_donations, total_received, data_json FROM users");
        push_user_search(&mut select, search);
        select.push(" ORDER BY data_json->>'name' COLLATE \"C\", id LIMIT ");
        select.push_bind(limit as i64);
        let rows = select.build().fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn increment_donations(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET total_donations = total_donations + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_received(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET total_received = total_received + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_rating(&self, id: Uuid, rating: f64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET rating = $2 WHERE id = $1")
            .bind(id)
            .bind(rating)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fridge_core::ListingsParams;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern("spring"), "%spring%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn expired_filter_covers_overdue_available_rows() {
        let query = ListingsParams {
            status: Some("expired".into()),
            city: Some("Spring".into()),
            ..Default::default()
        }
        .into_query(20, 100)
        .unwrap();
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM listings");
        push_filter(&mut builder, &query, Utc::now());
        let sql = builder.sql();
        assert!(sql.contains("status = 'expired' OR (status = 'available' AND expiry_date < $1)"));
        assert!(sql.contains("city ILIKE $2"));
    }

    #[test]
    fn title_sort_is_case_insensitive_byte_order() {
        let query = ListingsParams {
            sort_by: Some("title".into()),
            sort_order: Some("asc".into()),
            ..Default::default()
        }
        .into_query(20, 100)
        .unwrap();
        assert_eq!(
            order_by(&query),
            " ORDER BY lower(title) COLLATE \"C\" ASC, created_at ASC, id ASC"
        );
    }

    #[test]
    fn user_search_reads_the_stored_profile() {
        let search = UserSearch {
            text: Some("sam".into()),
            user_type: Some(fridge_core::UserType::Donor),
            city: Some("Spring".into()),
            state: None,
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 FROM users");
        push_user_search(&mut builder, &search);
        let sql = builder.sql();
        assert!(sql.contains("(data_json->>'name' ILIKE $1 OR email ILIKE $2)"));
        assert!(sql.contains("data_json->>'userType' = $3"));
        assert!(sql.contains("data_json->'address'->>'city' ILIKE $4"));
        assert!(!sql.contains("'state'"));
    }
}
