pub mod activity;
pub mod athlete;
pub mod plan;
pub mod workout;

pub use activity::{load_activity_stream, Activity, ActivityStream};
pub use athlete::{load_athlete_profile, AthleteProfile};
pub use plan::{PlanInstance, PlanStatus};
pub use workout::{load_workout, PlannedWorkout};
