//! Domain models for the water conditions service

mod condition;
mod location;
mod refresh;
mod sample;

pub use condition::*;
pub use location::*;
pub use refresh::*;
pub use sample::*;
