//! Training compliance and schedule integrity
//!
//! - `structure` expands nested workout descriptions into flat target segments
//! - `compliance` scores a recorded power stream against those segments
//! - `matching` links recorded activities to planned workouts
//! - `schedule` keeps a user's plan instances from overlapping
//!
//! `commands` wires these to storage for request handlers.

pub mod commands;
pub mod compliance;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod matching;
pub mod models;
pub mod schedule;
pub mod structure;

#[cfg(test)]
mod test_utils;

pub use compliance::{ComplianceAnalysis, ComplianceAnalyzer, ComplianceResult, Grade, PowerStream};
pub use config::AppConfig;
pub use db::AppState;
pub use error::{ComplianceError, Result};
pub use matching::{MatchParams, MatchSuggestion, MatchType, WorkoutMatch};
pub use schedule::{OverlapRequest, OverlapVerdict};
pub use structure::{expand, resolve_structure, FlatSegment, WorkoutStructure};

/// Load configuration, install logging and open the database
pub async fn bootstrap() -> std::result::Result<AppState, Box<dyn std::error::Error>> {
  let config = AppConfig::from_env()?;

  if let Err(e) = logging::LoggingConfig::from_env().init() {
    eprintln!("{}", e);
  }

  let state = AppState::initialize(config).await?;
  tracing::info!("Training compliance engine ready");
  Ok(state)
}
