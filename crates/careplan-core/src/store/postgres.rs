use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use careplan_db::models::TreatmentPlan;
use careplan_db::queries::plans;

use super::PlanStore;
use crate::error::PlanError;

/// Plans stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const PLAN_CODE_CONSTRAINT: &str = "treatment_plans_code_key";

fn is_duplicate_code(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(sqlx::Error::as_database_error)
        .is_some_and(|db| {
            db.is_unique_violation() && db.constraint() == Some(PLAN_CODE_CONSTRAINT)
        })
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn insert_plan(&self, plan: &TreatmentPlan) -> Result<(), PlanError> {
        plans::insert_plan(&self.pool, plan).await.map_err(|err| {
            if is_duplicate_code(&err) {
                PlanError::DuplicateCode(plan.code.clone())
            } else {
                PlanError::Storage(err)
            }
        })
    }

    async fn load_plan(&self, code: &str) -> Result<TreatmentPlan, PlanError> {
        plans::get_plan_by_code(&self.pool, code)
            .await?
            .ok_or_else(|| PlanError::NotFound(format!("plan {code}")))
    }

    async fn save_plan(
        &self,
        plan: &TreatmentPlan,
        expected_version: i32,
    ) -> Result<TreatmentPlan, PlanError> {
        let rows = plans::update_plan_versioned(&self.pool, plan, expected_version).await?;

        if rows == 0 {
            // Distinguish a missing plan from a concurrent writer.
            return match plans::get_plan_version(&self.pool, &plan.code).await? {
                None => Err(PlanError::NotFound(format!("plan {}", plan.code))),
                Some(actual) => Err(PlanError::StaleState {
                    code: plan.code.clone(),
                    expected: expected_version,
                    actual,
                }),
            };
        }

        let mut saved = plan.clone();
        saved.version = expected_version + 1;
        Ok(saved)
    }

    async fn plan_code_for_item(&self, item_id: Uuid) -> Result<Option<String>, PlanError> {
        Ok(plans::plan_code_for_item(&self.pool, item_id).await?)
    }

    async fn list_plans(&self) -> Result<Vec<TreatmentPlan>, PlanError> {
        let codes = plans::list_plan_codes(&self.pool).await?;
        let mut out = Vec::with_capacity(codes.len());
        for code in codes {
            if let Some(plan) = plans::get_plan_by_code(&self.pool, &code).await? {
                out.push(plan);
            }
        }
        Ok(out)
    }
}
