//! Request extractors and middleware

pub mod api_key;

pub use api_key::ApiKey;
