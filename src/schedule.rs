//! Plan instance scheduling and overlap validation
//!
//! A user's scheduled and active plan instances must never share a calendar day.
//! Every write that can change which days an instance holds goes through the
//! same overlap scan inside the write's transaction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{ComplianceError, Result};
use crate::models::{PlanInstance, PlanStatus};

const DATE_FORMAT: &str = "%Y-%m-%d";

const INSTANCE_COLUMNS: &str = "id, user_id, plan_id, start_date, end_date, status";

/// ---------------------------------------------------------------------------
/// Requests and Verdicts
/// ---------------------------------------------------------------------------

/// Overlap check as received at the request boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlapRequest {
  pub user_id: String,
  /// `YYYY-MM-DD`
  pub start_date: String,
  /// `YYYY-MM-DD`, inclusive
  pub end_date: String,
  /// Instance being re-saved; never conflicts with itself
  pub exclude_instance_id: Option<i64>,
}

/// A validated overlap check
#[derive(Debug, Clone, PartialEq)]
pub struct OverlapQuery {
  pub user_id: String,
  pub start: NaiveDate,
  pub end: NaiveDate,
  pub exclude_instance_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlapVerdict {
  pub has_overlap: bool,
  pub overlapping_instance: Option<PlanInstance>,
}

impl OverlapVerdict {
  fn from_match(instance: Option<&PlanInstance>) -> Self {
    Self {
      has_overlap: instance.is_some(),
      overlapping_instance: instance.cloned(),
    }
  }
}

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
    ComplianceError::Validation(format!("{} must be a YYYY-MM-DD date, got '{}'", field, value))
  })
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
  if end < start {
    return Err(ComplianceError::Validation(format!(
      "end date {} is before start date {}",
      end, start
    )));
  }
  Ok(())
}

impl OverlapRequest {
  pub fn validate(&self) -> Result<OverlapQuery> {
    let user_id = self.user_id.trim();
    if user_id.is_empty() {
      return Err(ComplianceError::Validation("user_id is required".to_string()));
    }
    let start = parse_date("start_date", &self.start_date)?;
    let end = parse_date("end_date", &self.end_date)?;
    validate_range(start, end)?;

    Ok(OverlapQuery {
      user_id: user_id.to_string(),
      start,
      end,
      exclude_instance_id: self.exclude_instance_id,
    })
  }
}

/// First candidate that blocks the queried range, in candidate order
pub fn find_overlap<'a>(candidates: &'a [PlanInstance], query: &OverlapQuery) -> Option<&'a PlanInstance> {
  candidates.iter().find(|c| {
    c.user_id == query.user_id
      && c.status.blocks_schedule()
      && Some(c.id) != query.exclude_instance_id
      && c.overlaps(query.start, query.end)
  })
}

/// ---------------------------------------------------------------------------
/// Database Operations
/// ---------------------------------------------------------------------------

pub(crate) async fn fetch_plan_instance(conn: &mut SqliteConnection, id: i64) -> Result<Option<PlanInstance>> {
  let row = sqlx::query(&format!("SELECT {} FROM plan_instances WHERE id = ?1", INSTANCE_COLUMNS))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

  row.as_ref().map(PlanInstance::from_row).transpose()
}

pub async fn load_plan_instance(pool: &SqlitePool, id: i64) -> Result<PlanInstance> {
  let mut conn = pool.acquire().await?;
  fetch_plan_instance(&mut conn, id)
    .await?
    .ok_or_else(|| ComplianceError::not_found("plan instance", id))
}

async fn scan_overlap(conn: &mut SqliteConnection, query: &OverlapQuery) -> Result<OverlapVerdict> {
  let rows = sqlx::query(&format!(
    r#"
    SELECT {}
    FROM plan_instances
    WHERE user_id = ?1 AND status IN ('scheduled', 'active')
    ORDER BY start_date, id
    "#,
    INSTANCE_COLUMNS
  ))
  .bind(&query.user_id)
  .fetch_all(&mut *conn)
  .await?;

  let candidates = rows
    .iter()
    .map(PlanInstance::from_row)
    .collect::<Result<Vec<_>>>()?;

  let verdict = OverlapVerdict::from_match(find_overlap(&candidates, query));

  tracing::debug!(
    user_id = %query.user_id,
    start = %query.start,
    end = %query.end,
    candidates = candidates.len(),
    has_overlap = verdict.has_overlap,
    blocking = ?verdict.overlapping_instance.as_ref().map(|i| i.id),
    "Overlap checked"
  );

  Ok(verdict)
}

/// Validate the request, then look for a scheduled or active instance of the
/// same user that shares at least one day with it
pub async fn check_overlap(pool: &SqlitePool, request: &OverlapRequest) -> Result<OverlapVerdict> {
  let query = request.validate()?;
  let mut conn = pool.acquire().await?;
  scan_overlap(&mut conn, &query).await
}

fn overlap_error(blocking: &PlanInstance) -> ComplianceError {
  ComplianceError::Validation(format!(
    "dates overlap plan instance {} ({} to {})",
    blocking.id, blocking.start_date, blocking.end_date
  ))
}

async fn ensure_free(conn: &mut SqliteConnection, query: &OverlapQuery) -> Result<()> {
  let verdict = scan_overlap(conn, query).await?;
  match verdict.overlapping_instance {
    Some(blocking) => Err(overlap_error(&blocking)),
    None => Ok(()),
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlanInstance {
  pub user_id: String,
  pub plan_id: i64,
  pub start_date: String,
  pub end_date: String,
}

/// Schedule a plan for a user, refusing dates held by another instance
pub async fn create_plan_instance(pool: &SqlitePool, new: &NewPlanInstance) -> Result<PlanInstance> {
  let query = OverlapRequest {
    user_id: new.user_id.clone(),
    start_date: new.start_date.clone(),
    end_date: new.end_date.clone(),
    exclude_instance_id: None,
  }
  .validate()?;

  let mut tx = pool.begin().await?;

  let plan_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM training_plans WHERE id = ?1")
    .bind(new.plan_id)
    .fetch_optional(&mut *tx)
    .await?;
  if plan_exists.is_none() {
    return Err(ComplianceError::not_found("training plan", new.plan_id));
  }

  ensure_free(&mut tx, &query).await?;

  let result = sqlx::query(
    r#"
    INSERT INTO plan_instances (user_id, plan_id, start_date, end_date, status)
    VALUES (?1, ?2, ?3, ?4, ?5)
    "#,
  )
  .bind(&query.user_id)
  .bind(new.plan_id)
  .bind(query.start)
  .bind(query.end)
  .bind(PlanStatus::Scheduled.as_str())
  .execute(&mut *tx)
  .await?;

  let id = result.last_insert_rowid();
  tx.commit().await?;

  tracing::info!(id, user_id = %query.user_id, start = %query.start, end = %query.end, "Plan instance created");

  Ok(PlanInstance {
    id,
    user_id: query.user_id,
    plan_id: new.plan_id,
    start_date: query.start,
    end_date: query.end,
    status: PlanStatus::Scheduled,
  })
}

/// Move an instance to new dates. It may keep its own days.
pub async fn update_plan_instance(
  pool: &SqlitePool,
  id: i64,
  start_date: &str,
  end_date: &str,
) -> Result<PlanInstance> {
  let start = parse_date("start_date", start_date)?;
  let end = parse_date("end_date", end_date)?;
  validate_range(start, end)?;

  let mut tx = pool.begin().await?;

  let current = fetch_plan_instance(&mut tx, id)
    .await?
    .ok_or_else(|| ComplianceError::not_found("plan instance", id))?;

  if current.status.blocks_schedule() {
    let query = OverlapQuery {
      user_id: current.user_id.clone(),
      start,
      end,
      exclude_instance_id: Some(id),
    };
    ensure_free(&mut tx, &query).await?;
  }

  sqlx::query(
    r#"
    UPDATE plan_instances
    SET start_date = ?1, end_date = ?2, updated_at = CURRENT_TIMESTAMP
    WHERE id = ?3
    "#,
  )
  .bind(start)
  .bind(end)
  .bind(id)
  .execute(&mut *tx)
  .await?;

  tx.commit().await?;

  tracing::info!(id, start = %start, end = %end, "Plan instance rescheduled");

  Ok(PlanInstance {
    start_date: start,
    end_date: end,
    ..current
  })
}

/// Change an instance's status. Reviving a completed or cancelled instance
/// re-checks its dates.
pub async fn set_plan_instance_status(pool: &SqlitePool, id: i64, status: PlanStatus) -> Result<PlanInstance> {
  let mut tx = pool.begin().await?;

  let current = fetch_plan_instance(&mut tx, id)
    .await?
    .ok_or_else(|| ComplianceError::not_found("plan instance", id))?;

  if status.blocks_schedule() && !current.status.blocks_schedule() {
    let query = OverlapQuery {
      user_id: current.user_id.clone(),
      start: current.start_date,
      end: current.end_date,
      exclude_instance_id: Some(id),
    };
    ensure_free(&mut tx, &query).await?;
  }

  sqlx::query("UPDATE plan_instances SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2")
    .bind(status.as_str())
    .bind(id)
    .execute(&mut *tx)
    .await?;

  tx.commit().await?;

  tracing::info!(id, from = %current.status, to = %status, "Plan instance status changed");

  Ok(PlanInstance { status, ..current })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{mock_plan_instance, seed_training_plan, setup_test_db, teardown_test_db};

  fn request(start: &str, end: &str, exclude: Option<i64>) -> OverlapQuery {
    OverlapRequest {
      user_id: "athlete-1".to_string(),
      start_date: start.to_string(),
      end_date: end.to_string(),
      exclude_instance_id: exclude,
    }
    .validate()
    .expect("valid request")
  }

  #[test]
  fn test_adjacent_ranges_do_not_overlap() {
    let existing = vec![mock_plan_instance(1, "2025-01-01", "2025-01-31", PlanStatus::Scheduled)];
    assert!(find_overlap(&existing, &request("2025-02-01", "2025-03-01", None)).is_none());
  }

  #[test]
  fn test_partial_overlap_returns_existing_instance() {
    let existing = vec![mock_plan_instance(7, "2025-01-15", "2025-02-15", PlanStatus::Active)];
    let hit = find_overlap(&existing, &request("2025-02-01", "2025-03-01", None));
    assert_eq!(hit.map(|i| i.id), Some(7));
  }

  #[test]
  fn test_identical_range_overlaps() {
    let existing = vec![mock_plan_instance(3, "2025-02-01", "2025-03-01", PlanStatus::Scheduled)];
    assert!(find_overlap(&existing, &request("2025-02-01", "2025-03-01", None)).is_some());
  }

  #[test]
  fn test_boundary_touch_overlaps() {
    let existing = vec![mock_plan_instance(3, "2025-02-01", "2025-03-01", PlanStatus::Scheduled)];
    assert!(find_overlap(&existing, &request("2025-03-01", "2025-03-31", None)).is_some());
    assert!(find_overlap(&existing, &request("2025-01-01", "2025-02-01", None)).is_some());
  }

  #[test]
  fn test_excluded_instance_does_not_conflict_with_itself() {
    let existing = vec![mock_plan_instance(3, "2025-02-01", "2025-03-01", PlanStatus::Scheduled)];
    assert!(find_overlap(&existing, &request("2025-02-01", "2025-03-01", Some(3))).is_none());
  }

  #[test]
  fn test_finished_instances_never_block() {
    let existing = vec![
      mock_plan_instance(1, "2025-02-01", "2025-03-01", PlanStatus::Completed),
      mock_plan_instance(2, "2025-02-01", "2025-03-01", PlanStatus::Cancelled),
    ];
    assert!(find_overlap(&existing, &request("2025-02-10", "2025-02-20", None)).is_none());
  }

  #[test]
  fn test_first_overlap_wins() {
    let existing = vec![
      mock_plan_instance(1, "2025-01-01", "2025-01-31", PlanStatus::Scheduled),
      mock_plan_instance(2, "2025-02-01", "2025-02-28", PlanStatus::Scheduled),
    ];
    let hit = find_overlap(&existing, &request("2025-01-20", "2025-02-10", None));
    assert_eq!(hit.map(|i| i.id), Some(1));
  }

  #[test]
  fn test_request_validation() {
    let bad = |user: &str, start: &str, end: &str| {
      OverlapRequest {
        user_id: user.to_string(),
        start_date: start.to_string(),
        end_date: end.to_string(),
        exclude_instance_id: None,
      }
      .validate()
      .unwrap_err()
      .kind()
    };

    assert_eq!(bad("", "2025-01-01", "2025-01-31"), "validation");
    assert_eq!(bad("athlete-1", "2025-13-01", "2025-01-31"), "validation");
    assert_eq!(bad("athlete-1", "01/02/2025", "2025-01-31"), "validation");
    assert_eq!(bad("athlete-1", "2025-02-01", "2025-01-31"), "validation");
  }

  #[tokio::test]
  async fn test_check_overlap_against_storage_is_repeatable() {
    // Arrange
    let pool = setup_test_db().await;
    let plan_id = seed_training_plan(&pool).await;
    let existing = create_plan_instance(
      &pool,
      &NewPlanInstance {
        user_id: "athlete-1".to_string(),
        plan_id,
        start_date: "2025-01-15".to_string(),
        end_date: "2025-02-15".to_string(),
      },
    )
    .await
    .expect("create");

    let req = OverlapRequest {
      user_id: "athlete-1".to_string(),
      start_date: "2025-02-01".to_string(),
      end_date: "2025-03-01".to_string(),
      exclude_instance_id: None,
    };

    // Act
    let first = check_overlap(&pool, &req).await.unwrap();
    let second = check_overlap(&pool, &req).await.unwrap();

    // Assert
    assert!(first.has_overlap);
    assert_eq!(first.overlapping_instance.as_ref().map(|i| i.id), Some(existing.id));
    assert_eq!(first, second);

    let other_user = OverlapRequest {
      user_id: "athlete-2".to_string(),
      ..req
    };
    assert!(!check_overlap(&pool, &other_user).await.unwrap().has_overlap);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_create_rejects_overlap_and_update_allows_resave() {
    let pool = setup_test_db().await;
    let plan_id = seed_training_plan(&pool).await;
    let new = NewPlanInstance {
      user_id: "athlete-1".to_string(),
      plan_id,
      start_date: "2025-02-01".to_string(),
      end_date: "2025-03-01".to_string(),
    };

    let instance = create_plan_instance(&pool, &new).await.unwrap();
    assert_eq!(instance.status, PlanStatus::Scheduled);

    let err = create_plan_instance(&pool, &new).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(err.to_string().contains(&instance.id.to_string()));

    let moved = update_plan_instance(&pool, instance.id, "2025-02-01", "2025-03-01")
      .await
      .expect("re-save with identical dates");
    assert_eq!(moved.end_date, instance.end_date);

    let moved = update_plan_instance(&pool, instance.id, "2025-02-08", "2025-03-08")
      .await
      .unwrap();
    assert_eq!(load_plan_instance(&pool, instance.id).await.unwrap(), moved);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_cancelled_instance_frees_its_dates_until_revived() {
    let pool = setup_test_db().await;
    let plan_id = seed_training_plan(&pool).await;
    let new = NewPlanInstance {
      user_id: "athlete-1".to_string(),
      plan_id,
      start_date: "2025-02-01".to_string(),
      end_date: "2025-03-01".to_string(),
    };

    let first = create_plan_instance(&pool, &new).await.unwrap();
    set_plan_instance_status(&pool, first.id, PlanStatus::Cancelled).await.unwrap();

    let second = create_plan_instance(&pool, &new).await.expect("dates are free again");

    let err = set_plan_instance_status(&pool, first.id, PlanStatus::Scheduled)
      .await
      .unwrap_err();
    assert!(err.to_string().contains(&second.id.to_string()));

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_unknown_ids_are_not_found() {
    let pool = setup_test_db().await;

    let err = create_plan_instance(
      &pool,
      &NewPlanInstance {
        user_id: "athlete-1".to_string(),
        plan_id: 42,
        start_date: "2025-02-01".to_string(),
        end_date: "2025-03-01".to_string(),
      },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let err = update_plan_instance(&pool, 42, "2025-02-01", "2025-03-01").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let err = load_plan_instance(&pool, 42).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");

    teardown_test_db(pool).await;
  }
}
