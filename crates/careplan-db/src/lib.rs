//! Persistence layer for treatment plans: row models, connection pooling,
//! embedded migrations, and query functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
