//! Plan persistence.
//!
//! `save_plan` is an optimistic compare-and-swap on the plan version: the
//! write lands only if the stored version still equals `expected_version`,
//! and the stored copy comes back with the bumped version.

mod memory;
mod postgres;

pub use memory::InMemoryPlanStore;
pub use postgres::PgPlanStore;

use async_trait::async_trait;
use uuid::Uuid;

use careplan_db::models::TreatmentPlan;

use crate::error::PlanError;

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Store a new plan. Fails if the code is already taken.
    async fn insert_plan(&self, plan: &TreatmentPlan) -> Result<(), PlanError>;

    /// Load a plan with all phases, items, and linked appointments.
    async fn load_plan(&self, code: &str) -> Result<TreatmentPlan, PlanError>;

    /// Replace the stored plan if its version is still `expected_version`.
    ///
    /// Returns [`PlanError::StaleState`] on a version mismatch and
    /// [`PlanError::NotFound`] if the plan does not exist.
    async fn save_plan(
        &self,
        plan: &TreatmentPlan,
        expected_version: i32,
    ) -> Result<TreatmentPlan, PlanError>;

    async fn plan_code_for_item(&self, item_id: Uuid) -> Result<Option<String>, PlanError>;

    /// All plans, newest first.
    async fn list_plans(&self) -> Result<Vec<TreatmentPlan>, PlanError>;
}

// Compile-time assertion: PlanStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore) {}
};
