//! Database module
//!
//! PostgreSQL persistence for stream overrides using sqlx:
//! - Connection pool management
//! - Row types with FromRow
//! - Repository functions for data access

pub mod models;
pub mod pool;
pub mod repository;

// Re-export commonly used items
pub use pool::{create_pool, health_check, run_migrations};
