//! TOML format types for plan definition files.
//!
//! Dates and money are written as strings (`"2026-10-19"`, `"120.50"`) so
//! they survive the round trip without float rounding.

use serde::{Deserialize, Serialize};

/// Top-level structure of a `plan.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanFile {
    pub plan: PlanMeta,
    #[serde(default)]
    pub phases: Vec<PhaseToml>,
}

/// Plan-level fields in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMeta {
    pub name: String,
    pub patient_id: i64,
    pub doctor_id: i64,
    /// `YYYY-MM-DD`.
    pub start_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_end_date: Option<String>,
    #[serde(default = "default_discount")]
    pub discount: String,
    /// "full", "phased", or "installment".
    #[serde(default = "default_payment_type")]
    pub payment_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A `[[phases]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseToml {
    pub number: i32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_days: Option<i32>,
    #[serde(default)]
    pub items: Vec<ItemToml>,
}

/// A `[[phases.items]]` entry. Sequence numbers default to file order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i32>,
    pub service_id: i64,
    pub name: String,
    pub price: String,
    pub minutes: i32,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spacing_days: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<i64>,
}

fn default_discount() -> String {
    "0".to_string()
}

fn default_payment_type() -> String {
    "full".to_string()
}

fn default_quantity() -> i32 {
    1
}
