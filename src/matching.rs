//! Activity-to-workout matching
//!
//! Suggestions pair recorded activities with planned workouts inside a plan
//! instance by date proximity, duration and sport. Committed matches are keyed
//! by (plan instance, workout) and follow a two-priority merge rule: manual
//! writes always land, automatic writes never replace a manual match.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::compliance;
use crate::config::{MatchingConfig, MAX_MATCH_WINDOW_DAYS};
use crate::error::{ComplianceError, Result};
use crate::models::{Activity, PlanInstance, PlannedWorkout};
use crate::schedule;

const DATE_WEIGHT: f64 = 0.4;
const DURATION_WEIGHT: f64 = 0.35;
const TYPE_WEIGHT: f64 = 0.25;

/// Score used when one side of a comparison is unknown
const NEUTRAL_SCORE: f64 = 0.5;

// ---------------------------------------------------------------------------
/// Match Types and the Merge Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
  Auto,
  Manual,
}

impl MatchType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Auto => "auto",
      Self::Manual => "manual",
    }
  }

  /// Decide what an incoming write does to the match already stored for its key
  pub fn merge(existing: Option<&WorkoutMatch>, incoming: &MatchParams) -> MergeDecision {
    let Some(existing) = existing else {
      return MergeDecision::Insert;
    };

    match (existing.match_type, incoming.match_type) {
      (_, MatchType::Manual) => MergeDecision::Overwrite,
      (MatchType::Manual, MatchType::Auto) => MergeDecision::Keep,
      (MatchType::Auto, MatchType::Auto) => {
        let better = incoming.confidence.unwrap_or(0.0) > existing.confidence.unwrap_or(0.0);
        if existing.activity_id != incoming.activity_id && better {
          MergeDecision::Overwrite
        } else {
          MergeDecision::Keep
        }
      }
    }
  }
}

impl std::fmt::Display for MatchType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for MatchType {
  type Err = String;
  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "auto" => Ok(Self::Auto),
      "manual" => Ok(Self::Manual),
      _ => Err(format!("Unknown match type: {}", s)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
  Insert,
  Overwrite,
  Keep,
}

impl MergeDecision {
  pub fn writes(self) -> bool {
    !matches!(self, Self::Keep)
  }
}

/// ---------------------------------------------------------------------------
/// Records
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutMatch {
  pub id: i64,
  pub plan_instance_id: i64,
  pub workout_id: i64,
  pub activity_id: i64,
  pub match_type: MatchType,
  pub confidence: Option<f64>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl WorkoutMatch {
  fn from_row(row: &SqliteRow) -> Result<Self> {
    let match_type: String = row.try_get("match_type")?;
    Ok(Self {
      id: row.try_get("id")?,
      plan_instance_id: row.try_get("plan_instance_id")?,
      workout_id: row.try_get("workout_id")?,
      activity_id: row.try_get("activity_id")?,
      match_type: match_type.parse().map_err(ComplianceError::Database)?,
      confidence: row.try_get("confidence")?,
      created_at: row.try_get("created_at")?,
      updated_at: row.try_get("updated_at")?,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
  pub plan_instance_id: i64,
  pub workout_id: i64,
  pub activity_id: i64,
  pub match_type: MatchType,
  pub confidence: Option<f64>,
}

impl MatchParams {
  pub fn manual(plan_instance_id: i64, workout_id: i64, activity_id: i64) -> Self {
    Self {
      plan_instance_id,
      workout_id,
      activity_id,
      match_type: MatchType::Manual,
      confidence: None,
    }
  }

  fn validate(&self) -> Result<()> {
    if self.plan_instance_id <= 0 || self.workout_id <= 0 || self.activity_id <= 0 {
      return Err(ComplianceError::Validation(
        "plan_instance_id, workout_id and activity_id must be positive".to_string(),
      ));
    }
    match (self.match_type, self.confidence) {
      (MatchType::Auto, None) => Err(ComplianceError::Validation(
        "auto matches require a confidence".to_string(),
      )),
      (_, Some(c)) if !(0.0..=1.0).contains(&c) => Err(ComplianceError::Validation(format!(
        "confidence must be within 0..=1, got {}",
        c
      ))),
      _ => Ok(()),
    }
  }
}

impl From<&MatchSuggestion> for MatchParams {
  fn from(s: &MatchSuggestion) -> Self {
    Self {
      plan_instance_id: s.plan_instance_id,
      workout_id: s.workout_id,
      activity_id: s.activity_id,
      match_type: MatchType::Auto,
      confidence: Some(s.confidence),
    }
  }
}

/// A proposed pairing with its scoring breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSuggestion {
  pub plan_instance_id: i64,
  pub workout_id: i64,
  pub activity_id: i64,
  pub scheduled_date: NaiveDate,
  pub activity_date: NaiveDate,
  pub days_apart: i64,
  pub date_score: f64,
  pub duration_score: f64,
  pub type_score: f64,
  pub confidence: f64,
}

// ---------------------------------------------------------------------------
/// Suggestion Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SportFamily {
  Ride,
  Run,
  Swim,
  Strength,
  Other(String),
}

/// Group activity types that describe the same sport. `None` for blank types.
pub fn sport_family(activity_type: &str) -> Option<SportFamily> {
  let normalized = activity_type.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
  let family = match normalized.as_str() {
    "" => return None,
    "ride" | "virtualride" | "ebikeride" | "emountainbikeride" | "gravelride" | "mountainbikeride"
    | "cycling" | "bike" => SportFamily::Ride,
    "run" | "virtualrun" | "trailrun" | "running" => SportFamily::Run,
    "swim" | "openwaterswim" => SportFamily::Swim,
    "weighttraining" | "strength" | "workout" => SportFamily::Strength,
    _ => SportFamily::Other(normalized),
  };
  Some(family)
}

fn type_score(workout_type: &str, activity_type: &str) -> f64 {
  match (sport_family(workout_type), sport_family(activity_type)) {
    (Some(a), Some(b)) if a == b => 1.0,
    (Some(_), Some(_)) => 0.0,
    _ => NEUTRAL_SCORE,
  }
}

fn duration_score(planned_minutes: Option<f64>, actual_seconds: Option<i64>) -> f64 {
  let actual_minutes = actual_seconds.filter(|s| *s > 0).map(|s| s as f64 / 60.0);
  match (planned_minutes, actual_minutes) {
    (Some(p), Some(a)) if p > 0.0 => p.min(a) / p.max(a),
    _ => NEUTRAL_SCORE,
  }
}

fn date_score(days_apart: i64, window_days: i64) -> f64 {
  1.0 - days_apart as f64 / (window_days as f64 + 1.0)
}

fn round3(v: f64) -> f64 {
  (v * 1000.0).round() / 1000.0
}

/// Propose one-to-one pairings for a plan instance.
///
/// Workouts that already have a manual match, and activities tied up in a manual
/// match, are left alone. An activity auto-matched to one workout is only ever
/// proposed for that same workout.
pub fn suggest(
  instance: &PlanInstance,
  workouts: &[PlannedWorkout],
  activities: &[Activity],
  existing: &[WorkoutMatch],
  config: &MatchingConfig,
) -> Vec<MatchSuggestion> {
  let window = config.window_days.clamp(0, MAX_MATCH_WINDOW_DAYS);

  let manual_workouts: HashSet<i64> = existing
    .iter()
    .filter(|m| m.match_type == MatchType::Manual)
    .map(|m| m.workout_id)
    .collect();
  let manual_activities: HashSet<i64> = existing
    .iter()
    .filter(|m| m.match_type == MatchType::Manual)
    .map(|m| m.activity_id)
    .collect();
  let auto_reserved: HashMap<i64, i64> = existing
    .iter()
    .filter(|m| m.match_type == MatchType::Auto)
    .map(|m| (m.activity_id, m.workout_id))
    .collect();

  let mut candidates = Vec::new();
  for workout in workouts.iter().filter(|w| !manual_workouts.contains(&w.id)) {
    let Some(scheduled) = workout.scheduled_date(instance.start_date) else {
      tracing::warn!(
        workout_id = workout.id,
        day_offset = workout.day_offset,
        "Workout offset does not resolve to a date, skipping"
      );
      continue;
    };
    let planned_minutes = workout.planned_duration_minutes();

    for activity in activities {
      if manual_activities.contains(&activity.id) {
        continue;
      }
      if auto_reserved
        .get(&activity.id)
        .is_some_and(|w| *w != workout.id)
      {
        continue;
      }

      let activity_date = activity.started_at.date_naive();
      let days_apart = (activity_date - scheduled).num_days().abs();
      if days_apart > window {
        continue;
      }

      let date = date_score(days_apart, window);
      let duration = duration_score(planned_minutes, activity.duration_seconds);
      let sport = type_score(&workout.workout_type, &activity.activity_type);
      let confidence = DATE_WEIGHT * date + DURATION_WEIGHT * duration + TYPE_WEIGHT * sport;

      candidates.push(MatchSuggestion {
        plan_instance_id: instance.id,
        workout_id: workout.id,
        activity_id: activity.id,
        scheduled_date: scheduled,
        activity_date,
        days_apart,
        date_score: round3(date),
        duration_score: round3(duration),
        type_score: round3(sport),
        confidence: round3(confidence),
      });
    }
  }

  candidates.sort_by(|a, b| {
    b.confidence
      .total_cmp(&a.confidence)
      .then(a.days_apart.cmp(&b.days_apart))
      .then(a.workout_id.cmp(&b.workout_id))
      .then(a.activity_id.cmp(&b.activity_id))
  });

  let mut used_workouts = HashSet::new();
  let mut used_activities = HashSet::new();
  candidates
    .into_iter()
    .filter(|c| {
      if used_workouts.contains(&c.workout_id) || used_activities.contains(&c.activity_id) {
        return false;
      }
      used_workouts.insert(c.workout_id);
      used_activities.insert(c.activity_id);
      true
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Database Operations
// ---------------------------------------------------------------------------

const MATCH_COLUMNS: &str =
  "id, plan_instance_id, workout_id, activity_id, match_type, confidence, created_at, updated_at";

async fn fetch_match(
  conn: &mut SqliteConnection,
  plan_instance_id: i64,
  workout_id: i64,
) -> Result<Option<WorkoutMatch>> {
  let row = sqlx::query(&format!(
    "SELECT {} FROM workout_matches WHERE plan_instance_id = ?1 AND workout_id = ?2",
    MATCH_COLUMNS
  ))
  .bind(plan_instance_id)
  .bind(workout_id)
  .fetch_optional(&mut *conn)
  .await?;

  row.as_ref().map(WorkoutMatch::from_row).transpose()
}

/// Load a match by id
pub async fn load_match(pool: &SqlitePool, match_id: i64) -> Result<WorkoutMatch> {
  let row = sqlx::query(&format!(
    "SELECT {} FROM workout_matches WHERE id = ?1",
    MATCH_COLUMNS
  ))
  .bind(match_id)
  .fetch_optional(pool)
  .await?;

  match row {
    Some(row) => WorkoutMatch::from_row(&row),
    None => Err(ComplianceError::not_found("match", match_id)),
  }
}

pub async fn list_matches(pool: &SqlitePool, plan_instance_id: i64) -> Result<Vec<WorkoutMatch>> {
  let rows = sqlx::query(&format!(
    "SELECT {} FROM workout_matches WHERE plan_instance_id = ?1 ORDER BY workout_id",
    MATCH_COLUMNS
  ))
  .bind(plan_instance_id)
  .fetch_all(pool)
  .await?;

  rows.iter().map(WorkoutMatch::from_row).collect()
}

pub async fn load_workouts(pool: &SqlitePool, plan_id: i64) -> Result<Vec<PlannedWorkout>> {
  let workouts = sqlx::query_as::<_, PlannedWorkout>(
    r#"
    SELECT id, plan_id, name, workout_type, day_offset, planned_duration_seconds,
           structure_json, legacy_structure_json
    FROM planned_workouts
    WHERE plan_id = ?1
    ORDER BY day_offset, id
    "#,
  )
  .bind(plan_id)
  .fetch_all(pool)
  .await?;

  Ok(workouts)
}

/// Score candidate activities against every workout of a plan instance
pub async fn suggest_for_instance(
  pool: &SqlitePool,
  plan_instance_id: i64,
  config: &MatchingConfig,
) -> Result<Vec<MatchSuggestion>> {
  let instance = schedule::load_plan_instance(pool, plan_instance_id).await?;
  let workouts = load_workouts(pool, instance.plan_id).await?;

  let window = Duration::days(config.window_days.clamp(0, MAX_MATCH_WINDOW_DAYS));
  let from = instance.start_date.checked_sub_signed(window).unwrap_or(NaiveDate::MIN);
  let to = instance.end_date.checked_add_signed(window).unwrap_or(NaiveDate::MAX);
  let activities = sqlx::query_as::<_, Activity>(
    r#"
    SELECT id, user_id, external_id, activity_type, started_at, duration_seconds
    FROM activities
    WHERE user_id = ?1 AND date(started_at) BETWEEN ?2 AND ?3
    ORDER BY started_at, id
    "#,
  )
  .bind(&instance.user_id)
  .bind(from)
  .bind(to)
  .fetch_all(pool)
  .await?;

  let existing = list_matches(pool, plan_instance_id).await?;
  let suggestions = suggest(&instance, &workouts, &activities, &existing, config);

  tracing::debug!(
    plan_instance_id,
    workouts = workouts.len(),
    activities = activities.len(),
    suggestions = suggestions.len(),
    "Match suggestions computed"
  );

  Ok(suggestions)
}

/// Validate a match against stored rows, apply the merge rule and write.
/// Returns the stored match and whether anything changed.
async fn commit_match(conn: &mut SqliteConnection, params: &MatchParams) -> Result<(WorkoutMatch, bool)> {
  params.validate()?;

  let instance = schedule::fetch_plan_instance(&mut *conn, params.plan_instance_id)
    .await?
    .ok_or_else(|| ComplianceError::not_found("plan instance", params.plan_instance_id))?;

  let workout_plan: Option<i64> = sqlx::query_scalar("SELECT plan_id FROM planned_workouts WHERE id = ?1")
    .bind(params.workout_id)
    .fetch_optional(&mut *conn)
    .await?;
  match workout_plan {
    None => return Err(ComplianceError::not_found("workout", params.workout_id)),
    Some(plan_id) if plan_id != instance.plan_id => {
      return Err(ComplianceError::Validation(format!(
        "workout {} does not belong to the plan of instance {}",
        params.workout_id, instance.id
      )))
    }
    Some(_) => {}
  }

  let activity_user: Option<String> = sqlx::query_scalar("SELECT user_id FROM activities WHERE id = ?1")
    .bind(params.activity_id)
    .fetch_optional(&mut *conn)
    .await?;
  match activity_user {
    None => return Err(ComplianceError::not_found("activity", params.activity_id)),
    Some(user) if user != instance.user_id => {
      return Err(ComplianceError::Validation(format!(
        "activity {} belongs to a different user than instance {}",
        params.activity_id, instance.id
      )))
    }
    Some(_) => {}
  }

  let existing = fetch_match(&mut *conn, params.plan_instance_id, params.workout_id).await?;
  let decision = MatchType::merge(existing.as_ref(), params);

  if decision.writes() {
    // Guard repeats the merge rule for writers racing past the read above
    sqlx::query(
      r#"
      INSERT INTO workout_matches (
        plan_instance_id, workout_id, activity_id, match_type, confidence,
        created_at, updated_at
      )
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
      ON CONFLICT(plan_instance_id, workout_id) DO UPDATE SET
        activity_id = excluded.activity_id,
        match_type = excluded.match_type,
        confidence = excluded.confidence,
        updated_at = excluded.updated_at
      WHERE excluded.match_type = 'manual'
         OR (workout_matches.match_type = 'auto'
             AND workout_matches.activity_id != excluded.activity_id
             AND COALESCE(excluded.confidence, 0) > COALESCE(workout_matches.confidence, 0))
      "#,
    )
    .bind(params.plan_instance_id)
    .bind(params.workout_id)
    .bind(params.activity_id)
    .bind(params.match_type.as_str())
    .bind(params.confidence)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
  }

  let stored = fetch_match(&mut *conn, params.plan_instance_id, params.workout_id)
    .await?
    .ok_or_else(|| ComplianceError::Database("match vanished after write".to_string()))?;

  if let Some(previous) = &existing {
    if previous.activity_id != stored.activity_id {
      compliance::invalidate_analysis(&mut *conn, stored.id).await?;
    }
  }

  tracing::debug!(
    plan_instance_id = params.plan_instance_id,
    workout_id = params.workout_id,
    activity_id = stored.activity_id,
    match_type = %stored.match_type,
    decision = ?decision,
    "Match merged"
  );

  Ok((stored, decision.writes()))
}

/// Create or update the match for (plan instance, workout). Repeating the same
/// call leaves a single row.
pub async fn match_workout(pool: &SqlitePool, params: &MatchParams) -> Result<WorkoutMatch> {
  let mut tx = pool.begin().await?;
  let (stored, _) = commit_match(&mut tx, params).await?;
  tx.commit().await?;
  Ok(stored)
}

/// Commit suggestions strictly above the configured confidence floor.
/// Returns how many matches were created or replaced.
pub async fn apply_auto_matches(
  pool: &SqlitePool,
  plan_instance_id: i64,
  suggestions: &[MatchSuggestion],
  config: &MatchingConfig,
) -> Result<usize> {
  let mut tx = pool.begin().await?;
  let mut applied = 0;

  for suggestion in suggestions {
    if suggestion.plan_instance_id != plan_instance_id {
      return Err(ComplianceError::Validation(format!(
        "suggestion for instance {} passed to instance {}",
        suggestion.plan_instance_id, plan_instance_id
      )));
    }
    if suggestion.confidence <= config.auto_match_min_confidence {
      continue;
    }
    let (_, changed) = commit_match(&mut tx, &MatchParams::from(suggestion)).await?;
    if changed {
      applied += 1;
    }
  }

  tx.commit().await?;

  tracing::info!(
    plan_instance_id,
    offered = suggestions.len(),
    applied,
    "Auto matches applied"
  );

  Ok(applied)
}

/// Remove the match for (plan instance, workout) together with its analysis
pub async fn unmatch(pool: &SqlitePool, plan_instance_id: i64, workout_id: i64) -> Result<()> {
  let mut tx = pool.begin().await?;

  let existing = fetch_match(&mut tx, plan_instance_id, workout_id)
    .await?
    .ok_or_else(|| {
      ComplianceError::not_found("match", format!("instance {} workout {}", plan_instance_id, workout_id))
    })?;

  sqlx::query("DELETE FROM compliance_analyses WHERE match_id = ?1")
    .bind(existing.id)
    .execute(&mut *tx)
    .await?;
  sqlx::query("DELETE FROM workout_matches WHERE id = ?1")
    .bind(existing.id)
    .execute(&mut *tx)
    .await?;

  tx.commit().await?;

  tracing::info!(plan_instance_id, workout_id, match_id = existing.id, "Workout unmatched");
  Ok(())
}
