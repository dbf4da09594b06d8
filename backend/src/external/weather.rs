//! Weather API client for fetching current conditions
//!
//! Integrates with the WeatherAPI `current.json` endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use shared::Coordinates;

use super::normalize::{normalize_current, NormalizedReading, ProviderPayload};
use crate::error::FetchError;

/// Upstream error bodies are cut to this many characters before storing
const MAX_ERROR_BODY: usize = 200;

/// One successful provider call
#[derive(Debug, Clone)]
pub struct FetchedReading {
    pub reading: NormalizedReading,
    pub raw: serde_json::Value,
}

/// Anything that can produce a normalized reading for a coordinate pair
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, coordinates: Coordinates) -> Result<FetchedReading, FetchError>;
}

/// Weather API client
#[derive(Clone)]
pub struct WeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl WeatherClient {
    /// Create a new WeatherClient
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, FetchError> {
        Self::with_base_url(api_key, "https://api.weatherapi.com/v1".to_string(), timeout)
    }

    /// Create a new WeatherClient with custom base URL (for testing)
    pub fn with_base_url(
        api_key: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl WeatherSource for WeatherClient {
    async fn fetch(&self, coordinates: Coordinates) -> Result<FetchedReading, FetchError> {
        let url = format!("{}/current.json", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("q", coordinates.as_query().as_str()),
                ("aqi", "no"),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("Weather API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Upstream {
                status,
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to read weather response: {}", e)))?;

        let raw: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Parse(format!("response is not JSON: {}", e)))?;
        let payload: ProviderPayload = serde_json::from_value(raw.clone())
            .map_err(|e| FetchError::Parse(format!("unexpected response shape: {}", e)))?;

        let reading = normalize_current(&payload.current);
        Ok(FetchedReading { reading, raw })
    }
}
