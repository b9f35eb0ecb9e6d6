// Main library file for the tour price search engine

// Building blocks, leaves first
pub mod types;
pub mod api;
pub mod clock;
pub mod cache;
pub mod enrichment;
pub mod retry;
pub mod state;
pub mod cancellation;
pub mod orchestrator;

// Re-export key types for convenience
pub use api::{ApiError, ClientConfig, ClientError, HttpSearchApi, SearchApi, StartedSearch};
pub use cache::{CacheStats, CachedResults, ResultCache};
pub use clock::{ManualScheduler, Scheduler, TokioScheduler};
pub use orchestrator::{SearchConfig, SearchOrchestrator};
pub use retry::RetryConfig;
pub use state::{SearchFailure, SearchSnapshot, SearchStatus};
pub use types::{GeoEntity, Hotel, PriceOffer, SearchToken, TourWithHotel};
