use crate::db::AppState;
use crate::error::{ComplianceError, Result};
use crate::models::{PlanInstance, PlanStatus};
use crate::schedule::{self, NewPlanInstance, OverlapRequest, OverlapVerdict};

pub async fn check_plan_overlap(state: &AppState, request: OverlapRequest) -> Result<OverlapVerdict> {
  schedule::check_overlap(&state.db, &request).await
}

pub async fn create_plan_instance(state: &AppState, new: NewPlanInstance) -> Result<PlanInstance> {
  schedule::create_plan_instance(&state.db, &new).await
}

pub async fn update_plan_instance(
  state: &AppState,
  id: i64,
  start_date: String,
  end_date: String,
) -> Result<PlanInstance> {
  schedule::update_plan_instance(&state.db, id, &start_date, &end_date).await
}

/// `status` is one of scheduled, active, completed, cancelled
pub async fn set_plan_instance_status(state: &AppState, id: i64, status: String) -> Result<PlanInstance> {
  let status: PlanStatus = status.parse().map_err(ComplianceError::Validation)?;
  schedule::set_plan_instance_status(&state.db, id, status).await
}
