//! Plan totals and the financial impact of edits.
//!
//! `total_cost` is the sum of every non-skipped item price, whether or not
//! the item has been scheduled yet. `final_cost` is `total_cost` minus the
//! discount and may never go negative.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use careplan_db::models::{ItemStatus, Phase, TreatmentPlan};

use crate::error::ValidationError;

/// Recomputed plan totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total_cost: Decimal,
    pub final_cost: Decimal,
}

/// Compute plan totals from its phases and a discount.
pub fn recompute(phases: &[Phase], discount_amount: Decimal) -> Result<Totals, ValidationError> {
    if discount_amount < Decimal::ZERO {
        return Err(ValidationError::NegativeDiscount(discount_amount));
    }

    let mut total_cost = Decimal::ZERO;
    for item in phases.iter().flat_map(|p| p.items.iter()) {
        if item.price < Decimal::ZERO {
            return Err(ValidationError::NegativePrice {
                item: item.item_name.clone(),
                price: item.price,
            });
        }
        if item.status != ItemStatus::Skipped {
            total_cost = total_cost
                .checked_add(item.price)
                .ok_or(ValidationError::CostOverflow)?;
        }
    }

    let final_cost = total_cost - discount_amount;
    if final_cost < Decimal::ZERO {
        return Err(ValidationError::NegativeFinalCost(final_cost));
    }

    Ok(Totals {
        total_cost,
        final_cost,
    })
}

// ---------------------------------------------------------------------------
// Financial impact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostDirection {
    Increased,
    Decreased,
    Unchanged,
}

impl fmt::Display for CostDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Increased => "increased",
            Self::Decreased => "decreased",
            Self::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// Before/after totals of a single edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialImpact {
    pub old_total_cost: Decimal,
    pub new_total_cost: Decimal,
    pub old_final_cost: Decimal,
    pub new_final_cost: Decimal,
    /// `new_final_cost - old_final_cost`.
    pub price_change: Decimal,
}

impl FinancialImpact {
    pub fn between(old: Totals, new: Totals) -> Self {
        Self {
            old_total_cost: old.total_cost,
            new_total_cost: new.total_cost,
            old_final_cost: old.final_cost,
            new_final_cost: new.final_cost,
            price_change: new.final_cost - old.final_cost,
        }
    }

    pub fn direction(&self) -> CostDirection {
        if self.price_change > Decimal::ZERO {
            CostDirection::Increased
        } else if self.price_change < Decimal::ZERO {
            CostDirection::Decreased
        } else {
            CostDirection::Unchanged
        }
    }

    /// Human-readable summary, e.g. `plan cost increased by 50.00`.
    pub fn describe(&self) -> String {
        match self.direction() {
            CostDirection::Unchanged => "plan cost unchanged".to_owned(),
            dir => format!("plan cost {dir} by {:.2}", self.price_change.abs()),
        }
    }
}

/// Recompute the plan's totals and stamp them onto it.
///
/// On error the plan is left untouched.
pub fn apply_totals(plan: &mut TreatmentPlan) -> Result<FinancialImpact, ValidationError> {
    let old = Totals {
        total_cost: plan.total_cost,
        final_cost: plan.final_cost,
    };
    let new = recompute(&plan.phases, plan.discount_amount)?;
    plan.total_cost = new.total_cost;
    plan.final_cost = new.final_cost;
    Ok(FinancialImpact::between(old, new))
}
