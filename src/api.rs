// Search backend client
// The backend is job based: start a search, poll it with the returned token, stop it when no longer needed

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::types::{CountriesMap, GeoResponse, HotelsMap, PricesMap, SearchToken};

// Status code the backend uses for "results not ready yet, come back at waitUntil"
pub const NOT_READY_CODE: u16 = 425;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    // Backend answered with an error body
    #[error("{message}")]
    Rejected {
        code: u16,
        message: String,
        wait_until: Option<DateTime<Utc>>,
    },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl ApiError {
    pub fn rejected(code: u16, message: impl Into<String>) -> Self {
        ApiError::Rejected {
            code,
            message: message.into(),
            wait_until: None,
        }
    }

    pub fn not_ready(wait_until: DateTime<Utc>) -> Self {
        ApiError::Rejected {
            code: NOT_READY_CODE,
            message: "Search results are not ready yet".to_string(),
            wait_until: Some(wait_until),
        }
    }

    pub fn code(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    // When the backend asked to come back later with `code`, the time to come back at
    pub fn retry_at(&self, rate_limit_code: u16) -> Option<DateTime<Utc>> {
        match self {
            ApiError::Rejected {
                code,
                wait_until: Some(at),
                ..
            } if *code == rate_limit_code => Some(*at),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::DecodeError(err.to_string())
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSearch {
    pub token: SearchToken,
    pub wait_until: DateTime<Utc>,
}

#[async_trait]
pub trait SearchApi: Send + Sync + 'static {
    // Create a price search job for a destination
    async fn start_search(&self, destination_id: &str) -> Result<StartedSearch, ApiError>;

    // Fetch results of a job; NOT_READY_CODE with wait_until while still running
    async fn poll_search(&self, token: &SearchToken) -> Result<PricesMap, ApiError>;

    // Ask the backend to drop a job nobody is waiting for
    async fn stop_search(&self, token: &SearchToken) -> Result<(), ApiError>;

    async fn list_destinations(&self) -> Result<CountriesMap, ApiError>;

    async fn search_places(&self, query: &str) -> Result<GeoResponse, ApiError>;

    async fn list_hotels(&self, destination_id: &str) -> Result<HotelsMap, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    code: u16,
    message: String,
    #[serde(default)]
    wait_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PricesBody {
    prices: PricesMap,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBody<'a> {
    country_id: &'a str,
}

// reqwest backed implementation of the search backend
#[derive(Debug)]
pub struct HttpSearchApi {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpSearchApi {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.base_url.trim().is_empty() {
            return Err(ClientError::ConfigError("base_url is empty".to_string()));
        }
        if config.timeout_ms == 0 {
            return Err(ClientError::ConfigError(
                "timeout_ms must be positive".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let reason = status.canonical_reason().unwrap_or("Request failed");
        let bytes = response.bytes().await?;
        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => Err(ApiError::Rejected {
                code: body.code,
                message: body.message,
                wait_until: body.wait_until,
            }),
            Err(_) => Err(ApiError::rejected(status.as_u16(), reason)),
        }
    }
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn start_search(&self, destination_id: &str) -> Result<StartedSearch, ApiError> {
        let response = self
            .client
            .post(self.url("prices/search"))
            .json(&StartBody {
                country_id: destination_id,
            })
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn poll_search(&self, token: &SearchToken) -> Result<PricesMap, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("prices/search/{}", token)))
            .send()
            .await?;
        let body: PricesBody = Self::decode(response).await?;
        Ok(body.prices)
    }

    async fn stop_search(&self, token: &SearchToken) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("prices/search/{}", token)))
            .send()
            .await?;
        Self::decode::<serde_json::Value>(response).await.map(|_| ())
    }

    async fn list_destinations(&self) -> Result<CountriesMap, ApiError> {
        let response = self.client.get(self.url("countries")).send().await?;
        Self::decode(response).await
    }

    async fn search_places(&self, query: &str) -> Result<GeoResponse, ApiError> {
        let response = self
            .client
            .get(self.url("geo"))
            .query(&[("query", query)])
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn list_hotels(&self, destination_id: &str) -> Result<HotelsMap, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("countries/{}/hotels", destination_id)))
            .send()
            .await?;
        Self::decode(response).await
    }
}

// Scripted in-process backend for tests and local runs
pub mod mock_server {
    use super::*;
    use crate::types::GeoEntity;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::{Mutex, Notify};

    #[derive(Default)]
    pub struct MockSearchApi {
        start_replies: Mutex<HashMap<String, VecDeque<Result<StartedSearch, ApiError>>>>,
        poll_replies: Mutex<HashMap<SearchToken, VecDeque<Result<PricesMap, ApiError>>>>,
        hotel_replies: Mutex<HashMap<String, Result<HotelsMap, ApiError>>>,
        destinations: Mutex<CountriesMap>,
        places: Mutex<GeoResponse>,
        start_gates: Mutex<HashMap<String, Arc<Notify>>>,
        poll_gates: Mutex<HashMap<SearchToken, Arc<Notify>>>,
        stopped: Mutex<Vec<SearchToken>>,
        start_count: AtomicUsize,
        poll_count: AtomicUsize,
        stop_count: AtomicUsize,
        hotel_count: AtomicUsize,
    }

    impl MockSearchApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn add_start_response(
            &self,
            destination_id: &str,
            response: Result<StartedSearch, ApiError>,
        ) {
            let mut replies = self.start_replies.lock().await;
            replies
                .entry(destination_id.to_string())
                .or_default()
                .push_back(response);
        }

        pub async fn add_poll_response(
            &self,
            token: &str,
            response: Result<PricesMap, ApiError>,
        ) {
            let mut replies = self.poll_replies.lock().await;
            replies
                .entry(SearchToken::new(token))
                .or_default()
                .push_back(response);
        }

        pub async fn set_hotels(&self, destination_id: &str, response: Result<HotelsMap, ApiError>) {
            let mut replies = self.hotel_replies.lock().await;
            replies.insert(destination_id.to_string(), response);
        }

        pub async fn set_destinations(&self, destinations: CountriesMap) {
            *self.destinations.lock().await = destinations;
        }

        pub async fn set_places(&self, places: GeoResponse) {
            *self.places.lock().await = places;
        }

        // The next start call for the destination blocks until the returned gate is notified
        pub async fn hold_next_start(&self, destination_id: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.start_gates
                .lock()
                .await
                .insert(destination_id.to_string(), gate.clone());
            gate
        }

        // The next poll for the token blocks until the returned gate is notified
        pub async fn hold_next_poll(&self, token: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.poll_gates
                .lock()
                .await
                .insert(SearchToken::new(token), gate.clone());
            gate
        }

        pub fn start_calls(&self) -> usize {
            self.start_count.load(Ordering::SeqCst)
        }

        pub fn poll_calls(&self) -> usize {
            self.poll_count.load(Ordering::SeqCst)
        }

        pub fn stop_calls(&self) -> usize {
            self.stop_count.load(Ordering::SeqCst)
        }

        pub fn hotel_calls(&self) -> usize {
            self.hotel_count.load(Ordering::SeqCst)
        }

        pub async fn stopped_tokens(&self) -> Vec<SearchToken> {
            self.stopped.lock().await.clone()
        }
    }

    #[async_trait]
    impl SearchApi for MockSearchApi {
        async fn start_search(&self, destination_id: &str) -> Result<StartedSearch, ApiError> {
            self.start_count.fetch_add(1, Ordering::SeqCst);

            let gate = self.start_gates.lock().await.remove(destination_id);
            if let Some(gate) = gate {
                gate.notified().await;
            }

            let mut replies = self.start_replies.lock().await;
            replies
                .get_mut(destination_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(ApiError::rejected(404, "Unknown destination")))
        }

        async fn poll_search(&self, token: &SearchToken) -> Result<PricesMap, ApiError> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);

            let gate = self.poll_gates.lock().await.remove(token);
            if let Some(gate) = gate {
                gate.notified().await;
            }

            let mut replies = self.poll_replies.lock().await;
            replies
                .get_mut(token)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Err(ApiError::rejected(404, "Search not found")))
        }

        async fn stop_search(&self, token: &SearchToken) -> Result<(), ApiError> {
            self.stop_count.fetch_add(1, Ordering::SeqCst);
            self.stopped.lock().await.push(token.clone());
            Ok(())
        }

        async fn list_destinations(&self) -> Result<CountriesMap, ApiError> {
            Ok(self.destinations.lock().await.clone())
        }

        async fn search_places(&self, query: &str) -> Result<GeoResponse, ApiError> {
            let needle = query.to_lowercase();
            let places = self.places.lock().await;
            Ok(places
                .iter()
                .filter(|(_, entity)| {
                    let name = match entity {
                        GeoEntity::Country(c) => &c.name,
                        GeoEntity::City(c) => &c.name,
                        GeoEntity::Hotel(h) => &h.name,
                    };
                    needle.is_empty() || name.to_lowercase().contains(&needle)
                })
                .map(|(id, entity)| (id.clone(), entity.clone()))
                .collect())
        }

        async fn list_hotels(&self, destination_id: &str) -> Result<HotelsMap, ApiError> {
            self.hotel_count.fetch_add(1, Ordering::SeqCst);
            let replies = self.hotel_replies.lock().await;
            replies
                .get(destination_id)
                .cloned()
                .unwrap_or_else(|| Err(ApiError::NetworkError("Failed to fetch hotels".to_string())))
        }
    }
}
