use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::Slot;

pub const DEFAULT_MAX_SEARCH_DAYS: u32 = 60;

/// Which items a run considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "phase", rename_all = "snake_case")]
pub enum ScheduleScope {
    Plan,
    Phase(i32),
}

impl ScheduleScope {
    pub fn includes(&self, phase_number: i32) -> bool {
        match self {
            Self::Plan => true,
            Self::Phase(n) => *n == phase_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Search starts no earlier than this or the plan start date.
    pub from_date: Option<NaiveDate>,
    /// Calendar days scanned per item from its earliest allowed date.
    pub max_search_days: u32,
    /// Overrides the plan doctor as the assigned doctor.
    pub preferred_doctor_id: Option<i64>,
    #[serde(skip)]
    pub per_item_timeout: Option<Duration>,
}

impl Default for ScheduleRequest {
    fn default() -> Self {
        Self {
            from_date: None,
            max_search_days: DEFAULT_MAX_SEARCH_DAYS,
            preferred_doctor_id: None,
            per_item_timeout: None,
        }
    }
}

/// A proposed, non-binding appointment for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub item_id: Uuid,
    pub phase_number: i32,
    pub sequence_number: i32,
    pub item_name: String,
    pub date: NaiveDate,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub doctor_id: i64,
    pub warning: Option<String>,
    pub requires_reassign: bool,
}

impl Suggestion {
    pub fn slot(&self) -> Slot {
        Slot {
            doctor_id: self.doctor_id,
            room_id: None,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Suggested(Suggestion),
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: Uuid,
    pub phase_number: i32,
    pub sequence_number: i32,
    pub item_name: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub total_items_processed: usize,
    pub successful_suggestions: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub warnings: usize,
    pub reassignments: usize,
}

impl ScheduleSummary {
    pub fn from_results(results: &[ItemResult]) -> Self {
        let mut summary = Self {
            total_items_processed: results.len(),
            ..Self::default()
        };
        for result in results {
            match &result.outcome {
                ItemOutcome::Suggested(s) => {
                    summary.successful_suggestions += 1;
                    if s.warning.is_some() {
                        summary.warnings += 1;
                    }
                    if s.requires_reassign {
                        summary.reassignments += 1;
                    }
                }
                ItemOutcome::Failed { .. } => summary.failed_items += 1,
                ItemOutcome::Skipped { .. } => summary.skipped_items += 1,
            }
        }
        summary
    }
}

/// Per-item outcomes in scheduling order, plus their tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub items: Vec<ItemResult>,
    pub summary: ScheduleSummary,
}

impl ScheduleResult {
    pub fn new(items: Vec<ItemResult>) -> Self {
        let summary = ScheduleSummary::from_results(&items);
        Self { items, summary }
    }

    pub fn suggestions(&self) -> impl Iterator<Item = &Suggestion> {
        self.items.iter().filter_map(|r| match &r.outcome {
            ItemOutcome::Suggested(s) => Some(s),
            _ => None,
        })
    }

    pub fn suggestion_for(&self, item_id: Uuid) -> Option<&Suggestion> {
        self.suggestions().find(|s| s.item_id == item_id)
    }
}
