//! Query functions, one module per table group.

pub mod appointments;
pub mod holidays;
pub mod plans;
