use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::ComplianceError;
use crate::structure::{self, FlatSegment};

/// A workout as planned inside a training plan
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlannedWorkout {
  pub id: i64,
  pub plan_id: i64,
  pub name: String,
  pub workout_type: String,
  /// Days after the plan instance start date
  pub day_offset: i64,
  pub planned_duration_seconds: Option<i64>,
  /// Current structure encoding
  pub structure_json: Option<String>,
  /// Legacy structure encoding, used only when no current encoding is stored
  pub legacy_structure_json: Option<String>,
}

impl PlannedWorkout {
  /// Calendar date this workout lands on for an instance starting on `instance_start`,
  /// `None` when the offset runs past the representable calendar
  pub fn scheduled_date(&self, instance_start: NaiveDate) -> Option<NaiveDate> {
    Duration::try_days(self.day_offset).and_then(|offset| instance_start.checked_add_signed(offset))
  }

  /// Flat target timeline, empty when the workout has no usable structure
  pub fn segments(&self) -> Vec<FlatSegment> {
    structure::resolve_structure(
      self.structure_json.as_deref(),
      self.legacy_structure_json.as_deref(),
    )
    .map(|s| structure::expand(&s))
    .unwrap_or_default()
  }

  /// Planned duration in minutes: explicit value first, then the structure's total
  pub fn planned_duration_minutes(&self) -> Option<f64> {
    if let Some(seconds) = self.planned_duration_seconds.filter(|s| *s > 0) {
      return Some(seconds as f64 / 60.0);
    }
    let total = structure::total_duration_minutes(&self.segments());
    (total > 0.0).then_some(total)
  }
}

pub async fn load_workout(pool: &SqlitePool, id: i64) -> Result<PlannedWorkout, ComplianceError> {
  sqlx::query_as::<_, PlannedWorkout>(
    r#"
    SELECT id, plan_id, name, workout_type, day_offset, planned_duration_seconds,
           structure_json, legacy_structure_json
    FROM planned_workouts
    WHERE id = ?1
    "#,
  )
  .bind(id)
  .fetch_optional(pool)
  .await?
  .ok_or_else(|| ComplianceError::not_found("workout", id))
}
