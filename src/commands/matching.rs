use crate::db::AppState;
use crate::error::Result;
use crate::matching::{self, MatchParams, MatchSuggestion, WorkoutMatch};

/// Proposed pairings for a plan instance
pub async fn suggest_matches(state: &AppState, plan_instance_id: i64) -> Result<Vec<MatchSuggestion>> {
  matching::suggest_for_instance(&state.db, plan_instance_id, &state.config.matching).await
}

/// Commit suggestions that clear the configured confidence floor
pub async fn apply_auto_matches(
  state: &AppState,
  plan_instance_id: i64,
  suggestions: Vec<MatchSuggestion>,
) -> Result<usize> {
  matching::apply_auto_matches(&state.db, plan_instance_id, &suggestions, &state.config.matching).await
}

/// Suggest and commit in one step
pub async fn auto_match_instance(state: &AppState, plan_instance_id: i64) -> Result<usize> {
  let suggestions = suggest_matches(state, plan_instance_id).await?;
  apply_auto_matches(state, plan_instance_id, suggestions).await
}

pub async fn match_workout(state: &AppState, params: MatchParams) -> Result<WorkoutMatch> {
  matching::match_workout(&state.db, &params).await
}

pub async fn unmatch_workout(state: &AppState, plan_instance_id: i64, workout_id: i64) -> Result<()> {
  matching::unmatch(&state.db, plan_instance_id, workout_id).await
}

pub async fn list_matches(state: &AppState, plan_instance_id: i64) -> Result<Vec<WorkoutMatch>> {
  matching::list_matches(&state.db, plan_instance_id).await
}
