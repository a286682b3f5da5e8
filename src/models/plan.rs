use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::ComplianceError;

/// Lifecycle of a dated plan instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
  Scheduled,
  Active,
  Completed,
  Cancelled,
}

impl PlanStatus {
  /// Only scheduled and active instances hold on to their dates
  pub fn blocks_schedule(self) -> bool {
    matches!(self, Self::Scheduled | Self::Active)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Scheduled => "scheduled",
      Self::Active => "active",
      Self::Completed => "completed",
      Self::Cancelled => "cancelled",
    }
  }
}

impl std::fmt::Display for PlanStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for PlanStatus {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "scheduled" => Ok(Self::Scheduled),
      "active" => Ok(Self::Active),
      "completed" => Ok(Self::Completed),
      "cancelled" => Ok(Self::Cancelled),
      _ => Err(format!("Unknown plan status: {}", s)),
    }
  }
}

/// A concrete, dated scheduling of a training plan for one user.
/// `end_date` is inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanInstance {
  pub id: i64,
  pub user_id: String,
  pub plan_id: i64,
  pub start_date: NaiveDate,
  pub end_date: NaiveDate,
  pub status: PlanStatus,
}

impl PlanInstance {
  pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, ComplianceError> {
    let status: String = row.try_get("status")?;
    Ok(Self {
      id: row.try_get("id")?,
      user_id: row.try_get("user_id")?,
      plan_id: row.try_get("plan_id")?,
      start_date: row.try_get("start_date")?,
      end_date: row.try_get("end_date")?,
      status: status.parse().map_err(ComplianceError::Database)?,
    })
  }

  /// Inclusive day-range intersection
  pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
    start <= self.end_date && end >= self.start_date
  }
}
