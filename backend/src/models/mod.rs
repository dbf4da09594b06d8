//! Domain models for the water conditions service
//!
//! Re-exports models from the shared crate

pub use shared::models::*;
pub use shared::types::*;
