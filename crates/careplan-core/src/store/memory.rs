use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use careplan_db::models::TreatmentPlan;

use super::PlanStore;
use crate::error::PlanError;

/// Plans held in process memory, keyed by code.
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    plans: RwLock<HashMap<String, TreatmentPlan>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for InMemoryPlanStore {
    async fn insert_plan(&self, plan: &TreatmentPlan) -> Result<(), PlanError> {
        let mut plans = self.plans.write().await;
        if plans.contains_key(&plan.code) {
            return Err(PlanError::DuplicateCode(plan.code.clone()));
        }
        plans.insert(plan.code.clone(), plan.clone());
        Ok(())
    }

    async fn load_plan(&self, code: &str) -> Result<TreatmentPlan, PlanError> {
        self.plans
            .read()
            .await
            .get(code)
            .cloned()
            .ok_or_else(|| PlanError::NotFound(format!("plan {code}")))
    }

    async fn save_plan(
        &self,
        plan: &TreatmentPlan,
        expected_version: i32,
    ) -> Result<TreatmentPlan, PlanError> {
        let mut plans = self.plans.write().await;
        let stored = plans
            .get_mut(&plan.code)
            .ok_or_else(|| PlanError::NotFound(format!("plan {}", plan.code)))?;

        if stored.version != expected_version {
            return Err(PlanError::StaleState {
                code: plan.code.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        let mut saved = plan.clone();
        saved.version = expected_version + 1;
        *stored = saved.clone();
        Ok(saved)
    }

    async fn plan_code_for_item(&self, item_id: Uuid) -> Result<Option<String>, PlanError> {
        Ok(self
            .plans
            .read()
            .await
            .values()
            .find(|p| p.find_item(item_id).is_some())
            .map(|p| p.code.clone()))
    }

    async fn list_plans(&self) -> Result<Vec<TreatmentPlan>, PlanError> {
        let mut plans: Vec<TreatmentPlan> = self.plans.read().await.values().cloned().collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.code.cmp(&b.code)));
        Ok(plans)
    }
}
