use serde::Serialize;

use crate::compliance::{load_analysis, upsert_analysis, ComplianceAnalysis, ComplianceAnalyzer};
use crate::db::AppState;
use crate::error::{ComplianceError, Result};
use crate::matching::load_match;
use crate::models::{load_activity_stream, load_athlete_profile, load_workout};
use crate::schedule::load_plan_instance;

/// A computed analysis and whether it reached storage
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
  pub analysis: ComplianceAnalysis,
  pub persisted: bool,
  /// Present when the analysis was computed but could not be saved
  pub save_error: Option<String>,
}

/// ---------------------------------------------------------------------------
/// Compliance Commands
/// ---------------------------------------------------------------------------

/// Score the activity of a match against its planned workout and store the result.
/// Validation and computation failures abort; a failed save is reported
/// alongside the analysis.
pub async fn analyze_match(state: &AppState, match_id: i64) -> Result<AnalysisOutcome> {
  let matched = load_match(&state.db, match_id).await?;
  let instance = load_plan_instance(&state.db, matched.plan_instance_id).await?;
  let workout = load_workout(&state.db, matched.workout_id).await?;

  let segments = workout.segments();
  if segments.is_empty() {
    return Err(ComplianceError::Validation(format!(
      "workout {} has no usable structure",
      workout.id
    )));
  }

  let athlete = load_athlete_profile(&state.db, &instance.user_id)
    .await?
    .ok_or_else(|| ComplianceError::DataUnavailable(format!("no athlete profile for {}", instance.user_id)))?;
  let ftp = athlete
    .scoring_ftp()
    .ok_or_else(|| ComplianceError::DataUnavailable(format!("no FTP configured for {}", instance.user_id)))?;

  let stream = load_activity_stream(&state.db, matched.activity_id)
    .await?
    .map(|s| s.to_power_stream())
    .filter(|s| !s.is_empty())
    .ok_or_else(|| {
      ComplianceError::DataUnavailable(format!("no power data for activity {}", matched.activity_id))
    })?;

  let analyzer = ComplianceAnalyzer::new(state.config.analyzer.clone());
  let result = analyzer.analyze(&segments, &stream, ftp)?;
  let mut analysis = ComplianceAnalysis::from_result(match_id, matched.activity_id, result, &athlete);

  tracing::info!(
    match_id,
    workout_id = workout.id,
    activity_id = matched.activity_id,
    score = analysis.overall_score,
    grade = analysis.grade.as_str(),
    "Compliance analyzed"
  );

  match upsert_analysis(&state.db, &analysis).await {
    Ok(Some(id)) => {
      analysis.id = Some(id);
      Ok(AnalysisOutcome {
        analysis,
        persisted: true,
        save_error: None,
      })
    }
    Ok(None) => Ok(AnalysisOutcome {
      analysis,
      persisted: false,
      save_error: Some(format!(
        "match {} no longer points at activity {}",
        match_id, matched.activity_id
      )),
    }),
    Err(e) => {
      tracing::warn!(match_id, error = %e, "Failed to save compliance analysis");
      Ok(AnalysisOutcome {
        analysis,
        persisted: false,
        save_error: Some(e.to_string()),
      })
    }
  }
}

/// Current analysis for a match, `None` if it was never analyzed or is stale
pub async fn get_compliance_analysis(state: &AppState, match_id: i64) -> Result<Option<ComplianceAnalysis>> {
  load_match(&state.db, match_id).await?;
  load_analysis(&state.db, match_id).await
}
