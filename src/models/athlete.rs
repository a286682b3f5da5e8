use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::ComplianceError;

/// Physiological baselines for one athlete
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AthleteProfile {
  pub user_id: String,
  pub ftp: Option<i64>,
  /// Carried through to analysis metadata for auditing; not used in scoring
  pub lthr: Option<i64>,
  pub resting_hr: Option<i64>,
  pub max_hr: Option<i64>,
}

impl AthleteProfile {
  /// FTP usable for scoring, if one is configured
  pub fn scoring_ftp(&self) -> Option<f64> {
    self.ftp.filter(|f| *f > 0).map(|f| f as f64)
  }
}

pub async fn load_athlete_profile(
  pool: &SqlitePool,
  user_id: &str,
) -> Result<Option<AthleteProfile>, ComplianceError> {
  let profile = sqlx::query_as::<_, AthleteProfile>(
    "SELECT user_id, ftp, lthr, resting_hr, max_hr FROM athlete_profiles WHERE user_id = ?1",
  )
  .bind(user_id)
  .fetch_optional(pool)
  .await?;

  Ok(profile)
}
