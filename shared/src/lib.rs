//! Shared types and models for the water conditions service
//!
//! This crate contains the domain model and the pure rules (classification,
//! compass conversion, validation) shared by the backend and its tests.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
