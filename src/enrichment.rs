// Hotel metadata per destination, loaded lazily and at most once
// A failed fetch is remembered as an empty set so it is never retried

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::api::SearchApi;
use crate::types::HotelsMap;

pub struct EnrichmentLoader {
    api: Arc<dyn SearchApi>,
    hotels: DashMap<String, Arc<OnceCell<HotelsMap>>>,
}

impl EnrichmentLoader {
    pub fn new(api: Arc<dyn SearchApi>) -> Self {
        Self {
            api,
            hotels: DashMap::new(),
        }
    }

    pub async fn ensure_loaded(&self, destination_id: &str) {
        // Clone the cell out so no map guard lives across the fetch
        let cell = self
            .hotels
            .entry(destination_id.to_string())
            .or_default()
            .clone();

        if cell.initialized() {
            return;
        }

        cell.get_or_init(|| async {
            match self.api.list_hotels(destination_id).await {
                Ok(hotels) => {
                    debug!(destination_id, count = hotels.len(), "hotels loaded");
                    hotels
                }
                Err(err) => {
                    warn!(destination_id, error = %err, "hotel enrichment failed, recording empty set");
                    HotelsMap::new()
                }
            }
        })
        .await;
    }

    // None until a load for the destination has finished
    pub fn hotels_for(&self, destination_id: &str) -> Option<HotelsMap> {
        self.hotels
            .get(destination_id)
            .and_then(|cell| cell.get().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{mock_server::MockSearchApi, ApiError};
    use crate::types::fixtures::{hotel, hotels};

    #[tokio::test]
    async fn test_loads_once_per_destination() {
        let server = Arc::new(MockSearchApi::new());
        server
            .set_hotels("UA", Ok(hotels(vec![hotel(1, "UA"), hotel(2, "UA")])))
            .await;
        let loader = EnrichmentLoader::new(server.clone());

        assert!(loader.hotels_for("UA").is_none());
        loader.ensure_loaded("UA").await;
        loader.ensure_loaded("UA").await;

        assert_eq!(server.hotel_calls(), 1);
        assert_eq!(loader.hotels_for("UA").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_recorded_as_empty_and_not_retried() {
        let server = Arc::new(MockSearchApi::new());
        server
            .set_hotels("PL", Err(ApiError::NetworkError("Failed to fetch hotels".into())))
            .await;
        let loader = EnrichmentLoader::new(server.clone());

        loader.ensure_loaded("PL").await;
        // a later success must not be picked up
        server.set_hotels("PL", Ok(hotels(vec![hotel(3, "PL")]))).await;
        loader.ensure_loaded("PL").await;

        assert_eq!(server.hotel_calls(), 1);
        assert_eq!(loader.hotels_for("PL"), Some(HotelsMap::new()));
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let server = Arc::new(MockSearchApi::new());
        server.set_hotels("ES", Ok(hotels(vec![hotel(9, "ES")]))).await;
        let loader = EnrichmentLoader::new(server.clone());

        tokio::join!(
            loader.ensure_loaded("ES"),
            loader.ensure_loaded("ES"),
            loader.ensure_loaded("ES")
        );

        assert_eq!(server.hotel_calls(), 1);
        assert_eq!(loader.hotels_for("ES").unwrap().len(), 1);
    }
}
