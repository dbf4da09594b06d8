//! HTTP handlers

pub mod conditions;
pub mod health;

pub use conditions::{get_widget_conditions, get_widget_conditions_by_key};
pub use health::health_check;
