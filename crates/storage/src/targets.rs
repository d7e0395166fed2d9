//! Target store: the durable queue, claim protocol, checkpointing and
//! recovery. Coordination between workers happens exclusively through
//! row locks taken here.

use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, info, warn};

use dirscraper_core::canonical::slugify;
use dirscraper_core::{Directory, FilterDecision, Listing, Target, TargetStatus};

use crate::companies::upsert_company_tx;
use crate::Storage;

/// One line of the city registry used for seeding.
#[derive(Debug, Clone)]
pub struct CityRow {
    pub state: String,
    pub city: String,
    pub population: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StatusCounts {
    pub planned: i64,
    pub in_progress: i64,
    pub done: i64,
    pub failed: i64,
    pub stuck: i64,
    pub parked: i64,
}

fn row_to_target(row: &PgRow) -> Result<Target> {
    let status_text: String = row.try_get("status")?;
    let status = TargetStatus::parse(&status_text)
        .ok_or_else(|| anyhow::anyhow!("unknown target status: {status_text}"))?;
    Ok(Target {
        id: row.try_get("id")?,
        state: row.try_get("state")?,
        city: row.try_get("city")?,
        city_slug: row.try_get("city_slug")?,
        category: row.try_get("category")?,
        primary_url: row.try_get("primary_url")?,
        fallback_url: row.try_get("fallback_url")?,
        priority: row.try_get("priority")?,
        page_target: row.try_get("page_target")?,
        status,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        page_current: row.try_get("page_current")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        note: row.try_get("note")?,
        finished_at: row.try_get("finished_at")?,
    })
}

/// Population tiers: big cities get claimed first and crawled deeper.
fn priority_for(population: u64) -> i16 {
    if population >= 100_000 {
        1
    } else if population >= 25_000 {
        2
    } else {
        3
    }
}

impl Storage {
    /// Atomically claim one planned target for `worker_id`.
    ///
    /// `FOR UPDATE SKIP LOCKED` makes the claim race-free across parallel
    /// workers without any global lock: a row being claimed in another
    /// transaction is invisible here, never double-handed. States already
    /// at the per-state in-progress cap are excluded from the candidate
    /// set. Returns `None` when nothing is claimable.
    pub async fn claim_target(
        &self,
        shard_states: &[String],
        worker_id: &str,
        max_per_state: i64,
    ) -> Result<Option<Target>> {
        let row = sqlx::query(
            r#"WITH candidate AS (
                   SELECT t.id FROM targets t
                   WHERE t.status = 'planned'
                     AND t.state = ANY($1)
                     AND t.state NOT IN (
                         SELECT state FROM targets
                         WHERE status = 'in_progress'
                         GROUP BY state
                         HAVING COUNT(*) >= $2
                     )
                   ORDER BY t.priority ASC, random()
                   LIMIT 1
                   FOR UPDATE OF t SKIP LOCKED
               )
               UPDATE targets SET
                   status = 'in_progress',
                   claimed_by = $3,
                   claimed_at = NOW(),
                   heartbeat_at = NOW(),
                   attempts = attempts + 1
               FROM candidate
               WHERE targets.id = candidate.id
               RETURNING targets.*"#,
        )
        .bind(shard_states)
        .bind(max_per_state)
        .bind(worker_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let target = row_to_target(&row)?;
                debug!(
                    target_id = target.id,
                    state = %target.state,
                    city = %target.city,
                    category = %target.category,
                    attempts = target.attempts,
                    "target claimed"
                );
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    /// Commit one finished page: upsert its accepted listings, advance the
    /// page cursor and refresh the heartbeat, all in one transaction. A
    /// crash before the commit leaves the cursor untouched and the same
    /// listings will be re-upserted idempotently on resume.
    pub async fn checkpoint_page(
        &self,
        target_id: i64,
        page: i16,
        accepted: &[(Listing, FilterDecision)],
        rejected_reasons: &[String],
        source: &str,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for (listing, decision) in accepted {
            upsert_company_tx(&mut tx, listing, decision, source).await?;
        }

        for reason in rejected_reasons {
            sqlx::query("INSERT INTO reject_log (target_id, reason) VALUES ($1, $2)")
                .bind(target_id)
                .bind(reason)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "UPDATE targets SET page_current = $1, heartbeat_at = NOW() WHERE id = $2",
        )
        .bind(page)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(target_id, page, upserts = accepted.len(), "page checkpoint");
        Ok(())
    }

    pub async fn complete_target(&self, target_id: i64, note: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"UPDATE targets SET
                   status = 'done',
                   finished_at = NOW(),
                   note = COALESCE($2, note),
                   claimed_by = NULL,
                   claimed_at = NULL
               WHERE id = $1"#,
        )
        .bind(target_id)
        .bind(note)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_target(&self, target_id: i64, last_error: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE targets SET
                   status = 'failed',
                   last_error = $2,
                   claimed_by = NULL,
                   claimed_at = NULL
               WHERE id = $1"#,
        )
        .bind(target_id)
        .bind(last_error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Return a blocked/CAPTCHA'd target to the queue. The page cursor is
    /// preserved so the next claimant resumes where this one stopped.
    pub async fn requeue_cooldown(&self, target_id: i64) -> Result<()> {
        sqlx::query(
            r#"UPDATE targets SET
                   status = 'planned',
                   note = 'cooling_down',
                   claimed_by = NULL,
                   claimed_at = NULL
               WHERE id = $1"#,
        )
        .bind(target_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Release a target whose worker observed the stop signal mid-target.
    pub async fn release_target(&self, target_id: i64) -> Result<()> {
        sqlx::query(
            r#"UPDATE targets SET
                   status = 'planned',
                   note = 'released_on_stop',
                   claimed_by = NULL,
                   claimed_at = NULL
               WHERE id = $1 AND status = 'in_progress'"#,
        )
        .bind(target_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Reclaim targets whose worker died: anything in progress (or marked
    /// stuck) with a stale or missing heartbeat goes back to planned with
    /// its page cursor intact. Returns the number of reclaimed rows.
    pub async fn recover_orphans(
        &self,
        orphan_timeout_minutes: i64,
        shard_states: Option<&[String]>,
    ) -> Result<u64> {
        let result = match shard_states {
            Some(states) => {
                sqlx::query(
                    r#"UPDATE targets SET
                           status = 'planned',
                           note = 'orphan_recovered',
                           claimed_by = NULL,
                           claimed_at = NULL
                       WHERE status IN ('in_progress', 'stuck')
                         AND state = ANY($2)
                         AND (heartbeat_at IS NULL
                              OR heartbeat_at < NOW() - make_interval(mins => $1::int))"#,
                )
                .bind(orphan_timeout_minutes)
                .bind(states)
                .execute(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    r#"UPDATE targets SET
                           status = 'planned',
                           note = 'orphan_recovered',
                           claimed_by = NULL,
                           claimed_at = NULL
                       WHERE status IN ('in_progress', 'stuck')
                         AND (heartbeat_at IS NULL
                              OR heartbeat_at < NOW() - make_interval(mins => $1::int))"#,
                )
                .bind(orphan_timeout_minutes)
                .execute(self.pool())
                .await?
            }
        };
        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(recovered, "orphaned targets returned to queue");
        }
        Ok(recovered)
    }

    /// Failed targets still inside their retry budget go back to planned.
    /// Once attempts reach the budget they stay failed until an operator
    /// resets them.
    pub async fn requeue_retryable(&self, max_attempts: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE targets SET
                   status = 'planned',
                   note = 'retrying_after_failure'
               WHERE status = 'failed' AND attempts < $1"#,
        )
        .bind(max_attempts)
        .execute(self.pool())
        .await?;
        let requeued = result.rows_affected();
        if requeued > 0 {
            info!(requeued, "failed targets returned to queue for retry");
        }
        Ok(requeued)
    }

    /// Operator reset: failed targets become claimable again.
    pub async fn reset_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE targets SET
                   status = 'planned',
                   note = 'operator_reset',
                   last_error = NULL
               WHERE status = 'failed'"#,
        )
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Operator park: take a whole state out of rotation.
    pub async fn park_state(&self, state: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE targets SET status = 'parked' WHERE state = $1 AND status = 'planned'",
        )
        .bind(state)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_target(&self, target_id: i64) -> Result<Option<Target>> {
        let row = sqlx::query("SELECT * FROM targets WHERE id = $1")
            .bind(target_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| row_to_target(&r)).transpose()
    }

    pub async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM targets GROUP BY status")
                .fetch_all(self.pool())
                .await?;
        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            match status.as_str() {
                "planned" => counts.planned = n,
                "in_progress" => counts.in_progress = n,
                "done" => counts.done = n,
                "failed" => counts.failed = n,
                "stuck" => counts.stuck = n,
                "parked" => counts.parked = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    pub async fn company_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM companies")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }

    /// Seed the queue: one target per (city, category). Re-seeding is
    /// idempotent; existing rows keep their progress.
    pub async fn seed_targets(
        &self,
        cities: &[CityRow],
        categories: &[String],
        directory: &dyn Directory,
        max_pages_override: Option<i16>,
    ) -> Result<u64> {
        let mut inserted = 0u64;
        for city in cities {
            let city_slug = slugify(&city.city);
            let priority = priority_for(city.population);
            let page_target = max_pages_override.unwrap_or(4 - priority).clamp(1, 3);
            for category in categories {
                let (primary_url, fallback_url) =
                    directory.plan_urls(&city.state, &city.city, &city_slug, category);
                let result = sqlx::query(
                    r#"INSERT INTO targets
                           (state, city, city_slug, category, primary_url,
                            fallback_url, priority, page_target)
                       VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                       ON CONFLICT (state, city_slug, category) DO NOTHING"#,
                )
                .bind(&city.state)
                .bind(&city.city)
                .bind(&city_slug)
                .bind(category)
                .bind(&primary_url)
                .bind(&fallback_url)
                .bind(priority)
                .bind(page_target)
                .execute(self.pool())
                .await?;
                inserted += result.rows_affected();
            }
        }
        info!(
            inserted,
            cities = cities.len(),
            categories = categories.len(),
            "targets seeded"
        );
        Ok(inserted)
    }
}
