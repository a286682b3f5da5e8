use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::compliance::{PowerSample, PowerStream};
use crate::error::ComplianceError;

/// A recorded activity
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
  pub id: i64,
  pub user_id: String,
  pub external_id: Option<String>,
  pub activity_type: String,
  pub started_at: DateTime<Utc>,
  pub duration_seconds: Option<i64>,
}

/// Stored power samples for an activity. `null` watts are dropouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStream {
  pub activity_id: i64,
  pub watts: Vec<Option<f64>>,
  /// Explicit per-sample offsets in seconds; implicit from `sample_rate_hz` when absent
  pub time: Option<Vec<f64>>,
  pub sample_rate_hz: f64,
}

impl ActivityStream {
  pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, ComplianceError> {
    let watts_json: String = row.try_get("watts_json")?;
    let time_json: Option<String> = row.try_get("time_json")?;
    Ok(Self {
      activity_id: row.try_get("activity_id")?,
      watts: serde_json::from_str(&watts_json)?,
      time: time_json.map(|t| serde_json::from_str(&t)).transpose()?,
      sample_rate_hz: row.try_get("sample_rate_hz")?,
    })
  }

  /// Convert to a time-ordered power stream, dropping missing samples
  pub fn to_power_stream(&self) -> PowerStream {
    let rate = if self.sample_rate_hz > 0.0 {
      self.sample_rate_hz
    } else {
      1.0
    };

    let samples = self
      .watts
      .iter()
      .enumerate()
      .filter_map(|(i, w)| {
        let watts = (*w)?;
        let offset_seconds = match &self.time {
          Some(time) => *time.get(i)?,
          None => i as f64 / rate,
        };
        Some(PowerSample {
          offset_seconds,
          watts,
        })
      })
      .collect();

    PowerStream::new(samples)
  }
}

/// Stored stream for an activity, if one was recorded
pub async fn load_activity_stream(
  pool: &SqlitePool,
  activity_id: i64,
) -> Result<Option<ActivityStream>, ComplianceError> {
  let row = sqlx::query(
    "SELECT activity_id, watts_json, time_json, sample_rate_hz FROM activity_streams WHERE activity_id = ?1",
  )
  .bind(activity_id)
  .fetch_optional(pool)
  .await?;

  row.as_ref().map(ActivityStream::from_row).transpose()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_implicit_offsets_skip_dropouts() {
    let stream = ActivityStream {
      activity_id: 1,
      watts: vec![Some(200.0), None, Some(210.0)],
      time: None,
      sample_rate_hz: 1.0,
    };

    let power = stream.to_power_stream();
    let offsets: Vec<f64> = power.samples().iter().map(|s| s.offset_seconds).collect();
    assert_eq!(offsets, vec![0.0, 2.0]);
  }

  #[test]
  fn test_explicit_offsets_are_used() {
    let stream = ActivityStream {
      activity_id: 1,
      watts: vec![Some(180.0), Some(190.0)],
      time: Some(vec![0.0, 5.0]),
      sample_rate_hz: 1.0,
    };

    let power = stream.to_power_stream();
    assert_eq!(power.samples()[1].offset_seconds, 5.0);
    assert_eq!(power.samples()[1].watts, 190.0);
  }
}
