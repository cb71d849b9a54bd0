//! Custom plan construction: request validation, quantity expansion, and the
//! `plan.toml` authoring format.

pub mod builder;
pub mod parser;
pub mod toml_format;

pub use builder::{
    CustomPlanRequest, ItemTemplate, MAX_QUANTITY, PhaseRequest, build_custom_plan, plan_code,
    validate_request,
};
pub use parser::{PlanFileError, parse_plan_toml};
pub use toml_format::{ItemToml, PhaseToml, PlanFile, PlanMeta};
