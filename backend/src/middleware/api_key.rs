//! Widget API key extraction
//!
//! Embedded widgets authenticate with a per-tenant API key sent either in the
//! `X-API-Key` header or as the `api_key` query parameter.

use axum::{extract::Query, http::request::Parts};
use serde::Deserialize;

use crate::error::AppError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Raw API key presented by the caller. Not yet checked against a tenant.
#[derive(Clone, Debug)]
pub struct ApiKey(pub String);

#[derive(Debug, Deserialize)]
struct ApiKeyQuery {
    api_key: Option<String>,
}

impl ApiKey {
    /// Header wins over the query parameter; blank values count as missing
    fn from_parts(parts: &Parts) -> Option<Self> {
        let from_header = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        from_header
            .or_else(|| {
                Query::<ApiKeyQuery>::try_from_uri(&parts.uri)
                    .ok()
                    .and_then(|Query(q)| q.api_key)
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
            })
            .map(ApiKey)
    }
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        ApiKey::from_parts(parts)
            .ok_or_else(|| AppError::Unauthorized("API key required".to_string()))
    }
}
