//! Custom plan builder.
//!
//! Validates a [`CustomPlanRequest`], expands item quantities into
//! individually trackable items, resolves prerequisite keys to item ids, and
//! stamps the financial totals. The result is a draft plan with no status.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use careplan_db::models::{ApprovalStatus, Item, ItemStatus, PaymentType, Phase, TreatmentPlan};

use crate::error::ValidationError;
use crate::financial;

pub const MAX_QUANTITY: i32 = 100;

/// Everything needed to build a custom plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPlanRequest {
    pub plan_name: String,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub discount_amount: Decimal,
    pub payment_type: PaymentType,
    pub start_date: NaiveDate,
    pub expected_end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub phases: Vec<PhaseRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRequest {
    pub phase_number: i32,
    pub name: String,
    pub description: Option<String>,
    pub estimated_duration_days: Option<i32>,
    pub items: Vec<ItemTemplate>,
}

/// One service line of a phase. `quantity` copies are created, each with
/// its own sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub sequence_number: i32,
    pub service_id: i64,
    pub item_name: String,
    pub price: Decimal,
    pub estimated_time_minutes: i32,
    pub quantity: i32,
    /// Name other items use to refer to this one as a prerequisite.
    pub key: Option<String>,
    /// Key of the item that must be completed first.
    pub prerequisite: Option<String>,
    pub spacing_days: Option<i32>,
    pub default_doctor_id: Option<i64>,
}

impl ItemTemplate {
    fn label(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.item_name)
    }
}

/// Position of a template in the plan: (phase number, sequence number).
type Position = (i32, i32);

/// Build a draft plan from a request.
pub fn build_custom_plan(
    request: &CustomPlanRequest,
    now: DateTime<Utc>,
) -> Result<TreatmentPlan, ValidationError> {
    validate_request(request)?;

    let plan_id = Uuid::new_v4();
    let mut phases_in = request.phases.iter().collect::<Vec<_>>();
    phases_in.sort_by_key(|p| p.phase_number);

    let mut key_to_item: HashMap<&str, Uuid> = HashMap::new();
    let mut phases = Vec::with_capacity(phases_in.len());

    for phase_req in phases_in {
        let phase_id = Uuid::new_v4();
        let mut templates = phase_req.items.iter().collect::<Vec<_>>();
        templates.sort_by_key(|t| t.sequence_number);

        let mut items = Vec::new();
        let mut next_sequence = 1;
        for template in templates {
            // Prerequisites always resolve: they were validated to come earlier
            // and to expand into a single item.
            let prerequisite_item_id = template
                .prerequisite
                .as_deref()
                .and_then(|key| key_to_item.get(key).copied());

            for _ in 0..template.quantity {
                let item = Item {
                    id: Uuid::new_v4(),
                    phase_id,
                    sequence_number: next_sequence,
                    service_id: template.service_id,
                    item_name: template.item_name.trim().to_owned(),
                    price: template.price,
                    estimated_time_minutes: template.estimated_time_minutes,
                    status: ItemStatus::Pending,
                    prerequisite_item_id,
                    spacing_days: template.spacing_days,
                    default_doctor_id: template.default_doctor_id,
                    completed_on: None,
                    completion_note: None,
                    linked_appointments: Vec::new(),
                };
                if let Some(key) = template.key.as_deref() {
                    key_to_item.insert(key, item.id);
                }
                items.push(item);
                next_sequence += 1;
            }
        }

        phases.push(Phase {
            id: phase_id,
            plan_id,
            phase_number: phase_req.phase_number,
            name: phase_req.name.trim().to_owned(),
            description: phase_req.description.clone(),
            estimated_duration_days: phase_req.estimated_duration_days,
            released: false,
            items,
        });
    }

    let totals = financial::recompute(&phases, request.discount_amount)?;

    Ok(TreatmentPlan {
        id: plan_id,
        code: plan_code(plan_id, now),
        name: request.plan_name.trim().to_owned(),
        patient_id: request.patient_id,
        doctor_id: request.doctor_id,
        approval_status: ApprovalStatus::Draft,
        status: None,
        start_date: request.start_date,
        expected_end_date: request.expected_end_date,
        total_cost: totals.total_cost,
        discount_amount: request.discount_amount,
        final_cost: totals.final_cost,
        payment_type: request.payment_type,
        notes: request.notes.clone(),
        review_notes: None,
        version: 1,
        created_at: now,
        submitted_at: None,
        reviewed_at: None,
        approved_at: None,
        completed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
        phases,
    })
}

/// `TP-<yyyymmdd>-<first eight hex digits of the id>`.
pub fn plan_code(id: Uuid, now: DateTime<Utc>) -> String {
    let hex = id.simple().to_string();
    format!("TP-{}-{}", now.format("%Y%m%d"), hex[..8].to_uppercase())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a request without building it.
pub fn validate_request(request: &CustomPlanRequest) -> Result<(), ValidationError> {
    if request.plan_name.trim().is_empty() {
        return Err(ValidationError::EmptyPlanName);
    }
    if request.discount_amount < Decimal::ZERO {
        return Err(ValidationError::NegativeDiscount(request.discount_amount));
    }

    check_phase_numbers(request)?;

    for phase in &request.phases {
        check_templates(phase)?;
    }

    let keyed = collect_keys(request)?;
    check_for_cycles(request)?;
    check_prerequisite_order(request, &keyed)?;

    let total = request
        .phases
        .iter()
        .flat_map(|p| p.items.iter())
        .try_fold(Decimal::ZERO, |acc, t| {
            t.price
                .checked_mul(Decimal::from(t.quantity))
                .and_then(|line| acc.checked_add(line))
        })
        .ok_or(ValidationError::CostOverflow)?;
    let final_cost = total - request.discount_amount;
    if final_cost < Decimal::ZERO {
        return Err(ValidationError::NegativeFinalCost(final_cost));
    }

    Ok(())
}

fn check_phase_numbers(request: &CustomPlanRequest) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for phase in &request.phases {
        if !seen.insert(phase.phase_number) {
            return Err(ValidationError::DuplicatePhaseNumber(phase.phase_number));
        }
    }

    let mut numbers: Vec<i32> = seen.into_iter().collect();
    numbers.sort_unstable();
    for (expected, found) in (1..).zip(numbers) {
        if expected != found {
            return Err(ValidationError::NonContiguousPhaseNumbers { expected, found });
        }
    }
    Ok(())
}

fn check_templates(phase: &PhaseRequest) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for template in &phase.items {
        if !seen.insert(template.sequence_number) {
            return Err(ValidationError::DuplicateSequenceNumber {
                phase_number: phase.phase_number,
                sequence_number: template.sequence_number,
            });
        }
        if !(1..=MAX_QUANTITY).contains(&template.quantity) {
            return Err(ValidationError::InvalidQuantity {
                item: template.item_name.clone(),
                quantity: template.quantity,
            });
        }
        if template.price < Decimal::ZERO {
            return Err(ValidationError::NegativePrice {
                item: template.item_name.clone(),
                price: template.price,
            });
        }
        if template.estimated_time_minutes <= 0 {
            return Err(ValidationError::InvalidEstimatedTime {
                item: template.item_name.clone(),
                minutes: template.estimated_time_minutes,
            });
        }
        if let Some(days) = template.spacing_days.filter(|d| *d < 0) {
            return Err(ValidationError::NegativeSpacing {
                item: template.item_name.clone(),
                days,
            });
        }
    }
    Ok(())
}

/// Map each key to its template's position and quantity, and check that
/// every prerequisite names a known key.
fn collect_keys(
    request: &CustomPlanRequest,
) -> Result<HashMap<&str, (Position, i32)>, ValidationError> {
    let mut keyed = HashMap::new();
    for phase in &request.phases {
        for template in &phase.items {
            if let Some(key) = template.key.as_deref() {
                let position = (phase.phase_number, template.sequence_number);
                if keyed.insert(key, (position, template.quantity)).is_some() {
                    return Err(ValidationError::DuplicateItemKey(key.to_owned()));
                }
            }
        }
    }

    for template in request.phases.iter().flat_map(|p| p.items.iter()) {
        if let Some(prereq) = template.prerequisite.as_deref() {
            if !keyed.contains_key(prereq) {
                return Err(ValidationError::UnknownPrerequisite {
                    item: template.label().to_owned(),
                    prerequisite: prereq.to_owned(),
                });
            }
        }
    }
    Ok(keyed)
}

/// Detect prerequisite cycles with Kahn's algorithm.
///
/// Each template is a node; an edge runs from a prerequisite to the template
/// that depends on it. A template naming its own key is a cycle.
fn check_for_cycles(request: &CustomPlanRequest) -> Result<(), ValidationError> {
    let templates: Vec<&ItemTemplate> = request
        .phases
        .iter()
        .flat_map(|p| p.items.iter())
        .collect();
    let key_to_idx: HashMap<&str, usize> = templates
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.key.as_deref().map(|k| (k, i)))
        .collect();

    let n = templates.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for (idx, template) in templates.iter().enumerate() {
        if let Some(&dep) = template
            .prerequisite
            .as_deref()
            .and_then(|k| key_to_idx.get(k))
        {
            adj[dep].push(idx);
            in_degree[idx] += 1;
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, deg)| **deg == 0)
        .map(|(i, _)| i)
        .collect();

    let mut sorted_count = 0usize;
    while let Some(node) = queue.pop_front() {
        sorted_count += 1;
        for &neighbor in &adj[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                queue.push_back(neighbor);
            }
        }
    }

    if sorted_count != n {
        let cycle: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| templates[i].label())
            .collect();
        return Err(ValidationError::CyclicPrerequisite(cycle.join(", ")));
    }
    Ok(())
}

/// Prerequisites must come earlier in (phase, sequence) order and expand
/// into exactly one item.
fn check_prerequisite_order(
    request: &CustomPlanRequest,
    keyed: &HashMap<&str, (Position, i32)>,
) -> Result<(), ValidationError> {
    for phase in &request.phases {
        for template in &phase.items {
            let Some(prereq) = template.prerequisite.as_deref() else {
                continue;
            };
            let Some(&(prereq_position, quantity)) = keyed.get(prereq) else {
                continue;
            };
            if prereq_position >= (phase.phase_number, template.sequence_number) {
                return Err(ValidationError::ForwardPrerequisite {
                    item: template.label().to_owned(),
                    prerequisite: prereq.to_owned(),
                });
            }
            if quantity > 1 {
                return Err(ValidationError::AmbiguousPrerequisite {
                    item: template.label().to_owned(),
                    prerequisite: prereq.to_owned(),
                    quantity,
                });
            }
        }
    }
    Ok(())
}
