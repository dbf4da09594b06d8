//! External API integrations

pub mod normalize;
pub mod weather;

pub use normalize::{normalize_current, NormalizedReading};
pub use weather::{FetchedReading, WeatherClient, WeatherSource};
