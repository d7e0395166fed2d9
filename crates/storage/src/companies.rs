//! Company persistence. One row per canonical website, forever; repeat
//! sightings only refresh `last_seen` and enrich what was empty.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::debug;

use dirscraper_core::canonical::{canonicalize_url, clean_name, extract_domain, normalize_phone};
use dirscraper_core::{FilterDecision, Listing, ParseMetadata, UpsertOutcome};

use crate::Storage;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompanyRow {
    pub id: i64,
    pub name: Option<String>,
    pub website_canonical: String,
    pub domain: Option<String>,
    pub phone_e164: Option<String>,
    pub address: Option<String>,
    pub rating: Option<f32>,
    pub review_count: Option<i32>,
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub parse_metadata: serde_json::Value,
}

/// Upsert one accepted listing inside the caller's transaction, so a page
/// checkpoint and its rows commit or vanish together.
pub async fn upsert_company_tx(
    tx: &mut Transaction<'_, Postgres>,
    listing: &Listing,
    decision: &FilterDecision,
    source: &str,
) -> Result<UpsertOutcome> {
    let Some(website) = listing.website.as_deref().and_then(canonicalize_url) else {
        return Ok(UpsertOutcome::Skipped);
    };
    let domain = extract_domain(&website);
    let name = listing.name.as_deref().and_then(clean_name);
    let phone = listing.phone.as_deref().and_then(normalize_phone);
    let metadata = ParseMetadata::from_listing(listing, decision);

    // Lock the row (if any) for the rest of the transaction so two workers
    // merging the same company serialize instead of clobbering each other.
    let existing = sqlx::query_as::<_, CompanyRow>(
        "SELECT * FROM companies WHERE website_canonical = $1 FOR UPDATE",
    )
    .bind(&website)
    .fetch_optional(&mut **tx)
    .await?;

    let existing = match existing {
        None => {
            let inserted = sqlx::query(
                r#"INSERT INTO companies
                       (name, website_canonical, domain, phone_e164, address,
                        rating, review_count, source, parse_metadata)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                   ON CONFLICT (website_canonical) DO NOTHING"#,
            )
            .bind(&name)
            .bind(&website)
            .bind(&domain)
            .bind(&phone)
            .bind(&listing.address)
            .bind(listing.rating)
            .bind(listing.reviews)
            .bind(source)
            .bind(serde_json::to_value(&metadata)?)
            .execute(&mut **tx)
            .await?;
            if inserted.rows_affected() == 1 {
                debug!(website = %website, "company inserted");
                return Ok(UpsertOutcome::Inserted);
            }
            // Lost a race with a concurrent writer between the select and
            // the insert; treat it as an existing row and merge into it.
            sqlx::query_as::<_, CompanyRow>(
                "SELECT * FROM companies WHERE website_canonical = $1 FOR UPDATE",
            )
            .bind(&website)
            .fetch_one(&mut **tx)
            .await?
        }
        Some(row) => row,
    };

    // Fill-empty for scalars; a higher review count is stronger evidence
    // and may refresh rating/review_count together.
    let merged_name = existing.name.clone().or(name);
    let merged_phone = existing.phone_e164.clone().or(phone);
    let merged_address = existing.address.clone().or_else(|| listing.address.clone());
    let merged_domain = existing.domain.clone().or(domain);
    let stronger_reviews = match (listing.reviews, existing.review_count) {
        (Some(new), Some(old)) => new > old,
        (Some(_), None) => true,
        _ => false,
    };
    let (merged_rating, merged_reviews) = if stronger_reviews {
        (listing.rating.or(existing.rating), listing.reviews)
    } else {
        (existing.rating.or(listing.rating), existing.review_count)
    };

    let mut merged_metadata: ParseMetadata =
        serde_json::from_value(existing.parse_metadata.clone()).unwrap_or_default();
    merged_metadata.merge_from(&metadata);

    sqlx::query(
        r#"UPDATE companies SET
               name = $2,
               domain = $3,
               phone_e164 = $4,
               address = $5,
               rating = $6,
               review_count = $7,
               parse_metadata = $8,
               last_seen = NOW()
           WHERE id = $1"#,
    )
    .bind(existing.id)
    .bind(&merged_name)
    .bind(&merged_domain)
    .bind(&merged_phone)
    .bind(&merged_address)
    .bind(merged_rating)
    .bind(merged_reviews)
    .bind(serde_json::to_value(&merged_metadata)?)
    .execute(&mut **tx)
    .await?;

    debug!(website = %website, "company updated");
    Ok(UpsertOutcome::Updated)
}

impl Storage {
    /// Standalone upsert outside a page checkpoint (used by tests and
    /// one-off imports).
    pub async fn upsert_company(
        &self,
        listing: &Listing,
        decision: &FilterDecision,
        source: &str,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool().begin().await?;
        let outcome = upsert_company_tx(&mut tx, listing, decision, source).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn get_company_by_website(&self, website: &str) -> Result<Option<CompanyRow>> {
        let Some(canonical) = canonicalize_url(website) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, CompanyRow>(
            "SELECT * FROM companies WHERE website_canonical = $1",
        )
        .bind(canonical)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }
}
