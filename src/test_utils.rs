//! Test utilities and helpers for unit and storage tests
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Seeded plans, instances, activities and matches
//! - Mock data factories
//! - Helper assertions

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::db::AppState;
use crate::models::{Activity, AthleteProfile, PlanInstance, PlanStatus, PlannedWorkout};

pub const TEST_USER: &str = "athlete-1";

/// Sweet spot session: 10 min warm-up then 2 x (20 min at 88-94% / 5 min easy), 60 min total
pub const SWEET_SPOT_JSON: &str = r#"{
  "structure": [
    {
      "type": "step",
      "length": {"value": 1, "unit": "repetition"},
      "steps": [
        {"name": "Warm up", "intensityClass": "warmUp", "length": {"value": 10, "unit": "minute"},
         "targets": [{"type": "power", "minValue": 50, "maxValue": 65, "unit": "percentOfFtp"}]}
      ]
    },
    {
      "type": "repetition",
      "length": {"value": 2, "unit": "repetition"},
      "steps": [
        {"name": "Sweet spot", "intensityClass": "active", "length": {"value": 20, "unit": "minute"},
         "targets": [{"type": "power", "minValue": 88, "maxValue": 94, "unit": "percentOfFtp"}]},
        {"name": "Easy", "intensityClass": "rest", "length": {"value": 300, "unit": "second"},
         "targets": [{"type": "power", "minValue": 45, "maxValue": 55, "unit": "percentOfFtp"}]}
      ]
    }
  ]
}"#;

/// Endurance ride stored only in the legacy encoding
pub const ENDURANCE_LEGACY_JSON: &str = r#"{
  "intervals": [
    {"name": "Zone 2", "kind": "active", "duration_seconds": 5400, "power_low": 56, "power_high": 75}
  ]
}"#;

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Application state over a fresh in-memory database with default configuration
pub async fn setup_test_state() -> AppState {
  AppState {
    db: setup_test_db().await,
    config: AppConfig::default(),
  }
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// Ids created by `seed_test_plan`
#[derive(Debug, Clone)]
pub struct SeededPlan {
  pub plan_id: i64,
  /// Sweet spot on day 0, legacy endurance ride on day 2
  pub workout_ids: Vec<i64>,
  /// 2025-03-03 to 2025-03-30, active
  pub instance_id: i64,
  /// Hour-long ride on the instance's first day
  pub activity_id: i64,
}

/// Ids created by `seed_plan_with_match`
#[derive(Debug, Clone)]
pub struct SeededMatch {
  pub instance_id: i64,
  pub workout_id: i64,
  pub activity_id: i64,
  pub match_id: i64,
}

/// Seed an empty training plan
pub async fn seed_training_plan(pool: &SqlitePool) -> i64 {
  sqlx::query("INSERT INTO training_plans (name) VALUES ('Base block')")
    .execute(pool)
    .await
    .expect("Failed to seed training plan")
    .last_insert_rowid()
}

/// Seed a planned workout on a plan
pub async fn seed_workout(
  pool: &SqlitePool,
  plan_id: i64,
  name: &str,
  day_offset: i64,
  planned_duration_seconds: Option<i64>,
  structure_json: Option<&str>,
  legacy_structure_json: Option<&str>,
) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO planned_workouts (
      plan_id, name, workout_type, day_offset, planned_duration_seconds,
      structure_json, legacy_structure_json
    )
    VALUES (?1, ?2, 'Ride', ?3, ?4, ?5, ?6)
    "#,
  )
  .bind(plan_id)
  .bind(name)
  .bind(day_offset)
  .bind(planned_duration_seconds)
  .bind(structure_json)
  .bind(legacy_structure_json)
  .execute(pool)
  .await
  .expect("Failed to seed workout")
  .last_insert_rowid()
}

/// Seed a recorded activity; `started_at` is RFC 3339
pub async fn seed_activity(
  pool: &SqlitePool,
  user_id: &str,
  started_at: &str,
  activity_type: &str,
  duration_seconds: Option<i64>,
) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO activities (user_id, activity_type, started_at, duration_seconds)
    VALUES (?1, ?2, ?3, ?4)
    "#,
  )
  .bind(user_id)
  .bind(activity_type)
  .bind(parse_utc(started_at))
  .bind(duration_seconds)
  .execute(pool)
  .await
  .expect("Failed to seed activity")
  .last_insert_rowid()
}

/// Seed a 1 Hz power stream for an activity
pub async fn seed_activity_stream(pool: &SqlitePool, activity_id: i64, watts: &[Option<f64>]) {
  sqlx::query(
    r#"
    INSERT OR REPLACE INTO activity_streams (activity_id, watts_json, sample_rate_hz)
    VALUES (?1, ?2, 1.0)
    "#,
  )
  .bind(activity_id)
  .bind(serde_json::to_string(watts).expect("watts serialize"))
  .execute(pool)
  .await
  .expect("Failed to seed activity stream");
}

/// Seed athlete baselines
pub async fn seed_athlete_profile(pool: &SqlitePool, user_id: &str, ftp: Option<i64>) {
  sqlx::query(
    r#"
    INSERT INTO athlete_profiles (user_id, ftp, lthr, resting_hr, max_hr)
    VALUES (?1, ?2, 168, 48, 188)
    ON CONFLICT(user_id) DO UPDATE SET ftp = excluded.ftp
    "#,
  )
  .bind(user_id)
  .bind(ftp)
  .execute(pool)
  .await
  .expect("Failed to seed athlete profile");
}

/// Seed a plan with two workouts, an active instance, one matching activity
/// and an athlete profile (FTP 250)
pub async fn seed_test_plan(pool: &SqlitePool) -> SeededPlan {
  let plan_id = seed_training_plan(pool).await;
  let sweet_spot = seed_workout(pool, plan_id, "Sweet spot 2x20", 0, Some(3600), Some(SWEET_SPOT_JSON), None).await;
  let endurance = seed_workout(pool, plan_id, "Endurance", 2, None, None, Some(ENDURANCE_LEGACY_JSON)).await;

  let instance_id = sqlx::query(
    r#"
    INSERT INTO plan_instances (user_id, plan_id, start_date, end_date, status)
    VALUES (?1, ?2, ?3, ?4, 'active')
    "#,
  )
  .bind(TEST_USER)
  .bind(plan_id)
  .bind(date("2025-03-03"))
  .bind(date("2025-03-30"))
  .execute(pool)
  .await
  .expect("Failed to seed plan instance")
  .last_insert_rowid();

  let activity_id = seed_activity(pool, TEST_USER, "2025-03-03T07:00:00Z", "VirtualRide", Some(3600)).await;
  seed_athlete_profile(pool, TEST_USER, Some(250)).await;

  SeededPlan {
    plan_id,
    workout_ids: vec![sweet_spot, endurance],
    instance_id,
    activity_id,
  }
}

/// `seed_test_plan` plus a manual match of the activity to the sweet spot workout
pub async fn seed_plan_with_match(pool: &SqlitePool) -> SeededMatch {
  let plan = seed_test_plan(pool).await;
  let workout_id = plan.workout_ids[0];

  let match_id = sqlx::query(
    r#"
    INSERT INTO workout_matches (
      plan_instance_id, workout_id, activity_id, match_type, confidence, created_at, updated_at
    )
    VALUES (?1, ?2, ?3, 'manual', NULL, ?4, ?4)
    "#,
  )
  .bind(plan.instance_id)
  .bind(workout_id)
  .bind(plan.activity_id)
  .bind(Utc::now())
  .execute(pool)
  .await
  .expect("Failed to seed match")
  .last_insert_rowid();

  SeededMatch {
    instance_id: plan.instance_id,
    workout_id,
    activity_id: plan.activity_id,
    match_id,
  }
}

/// Seed a current analysis (score 90, grade A) for a match of `activity_id`
pub async fn seed_analysis(pool: &SqlitePool, match_id: i64, activity_id: i64) -> i64 {
  sqlx::query(
    r#"
    INSERT INTO compliance_analyses (
      match_id, activity_id, overall_score, grade, summary, segments_total,
      segments_completed, segments_skipped, segments_json, metadata_json, analyzed_at
    )
    VALUES (?1, ?2, 90.0, 'A', 'ok', 1, 1, 0, '[]', '{}', ?3)
    "#,
  )
  .bind(match_id)
  .bind(activity_id)
  .bind(Utc::now())
  .execute(pool)
  .await
  .expect("Failed to seed analysis")
  .last_insert_rowid()
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

pub fn mock_athlete_profile() -> AthleteProfile {
  AthleteProfile {
    user_id: TEST_USER.to_string(),
    ftp: Some(250),
    lthr: Some(168),
    resting_hr: Some(48),
    max_hr: Some(188),
  }
}

pub fn mock_plan_instance(id: i64, start: &str, end: &str, status: PlanStatus) -> PlanInstance {
  PlanInstance {
    id,
    user_id: TEST_USER.to_string(),
    plan_id: 1,
    start_date: date(start),
    end_date: date(end),
    status,
  }
}

pub fn mock_workout(id: i64, day_offset: i64, workout_type: &str, planned_duration_seconds: Option<i64>) -> PlannedWorkout {
  PlannedWorkout {
    id,
    plan_id: 1,
    name: format!("Workout {}", id),
    workout_type: workout_type.to_string(),
    day_offset,
    planned_duration_seconds,
    structure_json: None,
    legacy_structure_json: None,
  }
}

pub fn mock_activity(id: i64, started_at: &str, activity_type: &str, duration_seconds: Option<i64>) -> Activity {
  Activity {
    id,
    user_id: TEST_USER.to_string(),
    external_id: Some(format!("ext-{}", id)),
    activity_type: activity_type.to_string(),
    started_at: parse_utc(started_at),
    duration_seconds,
  }
}

/// Constant power for `seconds` samples
pub fn steady_watts(watts: f64, seconds: usize) -> Vec<Option<f64>> {
  vec![Some(watts); seconds]
}

/// ---------------------------------------------------------------------------
/// Time Helpers
/// ---------------------------------------------------------------------------

pub fn date(s: &str) -> NaiveDate {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("test date")
}

pub fn parse_utc(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s)
    .expect("test timestamp")
    .with_timezone(&Utc)
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('plan_instances', 'workout_matches', 'compliance_analyses')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 3);

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_seeded_workouts_expand() {
    let pool = setup_test_db().await;
    let plan = seed_test_plan(&pool).await;

    let workouts = crate::matching::load_workouts(&pool, plan.plan_id)
      .await
      .expect("Failed to load workouts");

    assert_eq!(workouts.len(), 2);
    // Warm-up plus two work/recovery pairs
    assert_eq!(workouts[0].segments().len(), 5);
    assert_eq!(workouts[0].planned_duration_minutes(), Some(60.0));
    assert_eq!(workouts[1].segments().len(), 1);
    assert_eq!(workouts[1].planned_duration_minutes(), Some(90.0));

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_mock_factories_create_valid_data() {
    let profile = mock_athlete_profile();
    assert_eq!(profile.scoring_ftp(), Some(250.0));

    let instance = mock_plan_instance(1, "2025-01-01", "2025-01-31", PlanStatus::Scheduled);
    assert!(instance.overlaps(date("2025-01-31"), date("2025-01-31")));

    let activity = mock_activity(5, "2025-01-02T06:30:00Z", "Ride", Some(3600));
    assert_eq!(activity.started_at.date_naive(), date("2025-01-02"));
  }
}
