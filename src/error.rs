//! Error taxonomy shared by every component
//!
//! Validation, not-found, missing data and computation failures are domain
//! errors. Storage failures are reported separately as `Database` so callers can
//! tell a failed save apart from a failed analysis.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
  #[error("Validation failed: {0}")]
  Validation(String),

  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("Data unavailable: {0}")]
  DataUnavailable(String),

  #[error("Computation failed: {0}")]
  Computation(String),

  #[error("Database error: {0}")]
  Database(String),
}

impl ComplianceError {
  pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
    Self::NotFound {
      entity,
      id: id.to_string(),
    }
  }

  /// Machine-readable category, stable across message changes
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Validation(_) => "validation",
      Self::NotFound { .. } => "not_found",
      Self::DataUnavailable(_) => "data_unavailable",
      Self::Computation(_) => "computation",
      Self::Database(_) => "database",
    }
  }
}

impl From<sqlx::Error> for ComplianceError {
  fn from(e: sqlx::Error) -> Self {
    Self::Database(e.to_string())
  }
}

impl From<serde_json::Error> for ComplianceError {
  fn from(e: serde_json::Error) -> Self {
    Self::Database(format!("Malformed stored JSON: {}", e))
  }
}

impl Serialize for ComplianceError {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

pub type Result<T> = std::result::Result<T, ComplianceError>;
