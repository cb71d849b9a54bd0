//! Treatment plan lifecycle and auto-scheduling engine.
//!
//! The pure domain rules live in [`financial`], [`status`], [`approval`],
//! [`plan`], and [`tracker`]. [`scheduler`] proposes appointment slots
//! against the [`calendar`] and [`availability`] collaborators, and
//! [`service`] ties everything to a [`store::PlanStore`] under per-plan
//! locking.

pub mod access;
pub mod approval;
pub mod availability;
pub mod booking;
pub mod calendar;
pub mod error;
pub mod financial;
pub mod locks;
pub mod plan;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod test_fixtures;

pub use error::{PlanError, ValidationError};
