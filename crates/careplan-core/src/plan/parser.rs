//! Plan TOML parser.
//!
//! Turns a `plan.toml` string into a [`CustomPlanRequest`] and runs the same
//! validation the builder applies, so a file that parses will build.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use careplan_db::models::PaymentType;

use super::builder::{CustomPlanRequest, ItemTemplate, PhaseRequest, validate_request};
use super::toml_format::{ItemToml, PhaseToml, PlanFile};
use crate::error::ValidationError;

/// Errors raised while reading a plan file.
#[derive(Debug, Error)]
pub enum PlanFileError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid {field} {value:?}")]
    BadValue { field: String, value: String },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Parse and validate a `plan.toml` string.
pub fn parse_plan_toml(content: &str) -> Result<CustomPlanRequest, PlanFileError> {
    let file: PlanFile = toml::from_str(content)?;
    let request = into_request(file)?;
    validate_request(&request)?;
    Ok(request)
}

fn into_request(file: PlanFile) -> Result<CustomPlanRequest, PlanFileError> {
    let meta = file.plan;
    let expected_end_date = match meta.expected_end_date.as_deref() {
        Some(raw) => Some(parse_field::<NaiveDate>("expected_end_date", raw)?),
        None => None,
    };

    Ok(CustomPlanRequest {
        start_date: parse_field("start_date", &meta.start_date)?,
        expected_end_date,
        discount_amount: parse_field::<Decimal>("discount", &meta.discount)?,
        payment_type: parse_field::<PaymentType>("payment_type", &meta.payment_type)?,
        plan_name: meta.name,
        patient_id: meta.patient_id,
        doctor_id: meta.doctor_id,
        notes: meta.notes,
        phases: file
            .phases
            .into_iter()
            .map(into_phase)
            .collect::<Result<_, _>>()?,
    })
}

fn into_phase(phase: PhaseToml) -> Result<PhaseRequest, PlanFileError> {
    let items = phase
        .items
        .into_iter()
        .zip(1..)
        .map(|(item, position)| into_template(item, position))
        .collect::<Result<_, _>>()?;
    Ok(PhaseRequest {
        phase_number: phase.number,
        name: phase.name,
        description: phase.description,
        estimated_duration_days: phase.estimated_duration_days,
        items,
    })
}

fn into_template(item: ItemToml, position: i32) -> Result<ItemTemplate, PlanFileError> {
    Ok(ItemTemplate {
        sequence_number: item.sequence.unwrap_or(position),
        price: parse_field(&format!("price for {:?}", item.name), &item.price)?,
        service_id: item.service_id,
        item_name: item.name,
        estimated_time_minutes: item.minutes,
        quantity: item.quantity,
        key: item.key,
        prerequisite: item.after,
        spacing_days: item.spacing_days,
        default_doctor_id: item.doctor_id,
    })
}

fn parse_field<T: FromStr>(field: &str, raw: &str) -> Result<T, PlanFileError> {
    raw.trim().parse().map_err(|_| PlanFileError::BadValue {
        field: field.to_owned(),
        value: raw.to_owned(),
    })
}
