// Supersession of in-flight search jobs
// Cooperative: an invalidated poll loop keeps running until its next currency check

use std::sync::Arc;

use tracing::debug;

use crate::api::SearchApi;
use crate::state::SearchStore;
use crate::types::SearchToken;

pub struct CancellationController {
    api: Arc<dyn SearchApi>,
    store: Arc<SearchStore>,
}

impl CancellationController {
    pub fn new(api: Arc<dyn SearchApi>, store: Arc<SearchStore>) -> Self {
        Self { api, store }
    }

    pub fn active_token(&self) -> Option<SearchToken> {
        self.store.active_token()
    }

    // Drops `token` as the active one right away and tells the backend without waiting for it
    pub fn invalidate(&self, token: &SearchToken) -> bool {
        let cleared = self.store.clear_active_token(token);
        debug!(%token, cleared, "search superseded");
        self.stop_in_background(token.clone());
        cleared
    }

    // Supersedes whatever search is in flight; returns its token if there was one
    pub fn invalidate_active(&self) -> Option<SearchToken> {
        let token = self.store.take_active_token()?;
        debug!(%token, "search superseded");
        self.stop_in_background(token.clone());
        Some(token)
    }

    // For a token that was never made active, e.g. issued to a start that lost the race
    pub fn release_orphan(&self, token: SearchToken) {
        debug!(%token, "releasing orphaned search job");
        self.stop_in_background(token);
    }

    fn stop_in_background(&self, token: SearchToken) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(err) = api.stop_search(&token).await {
                debug!(%token, error = %err, "stop request failed, ignoring");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_server::MockSearchApi;
    use crate::state::{Continuation, SearchStatus};

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_invalidate_clears_token_and_stops_job() {
        let server = Arc::new(MockSearchApi::new());
        let store = Arc::new(SearchStore::new());
        let controller = CancellationController::new(server.clone(), store.clone());

        let token = SearchToken::new("t1");
        store.apply(crate::state::Transition::Started {
            destination_id: "UA".to_string(),
        });
        store.bind_token(&Continuation::pending("UA"), token.clone());
        assert_eq!(controller.active_token(), Some(token.clone()));

        assert!(controller.invalidate(&token));
        assert_eq!(controller.active_token(), None);
        // status is left to the orchestrator
        assert_eq!(store.snapshot().status, SearchStatus::Polling);

        settle().await;
        assert_eq!(server.stopped_tokens().await, vec![token]);
    }

    #[tokio::test]
    async fn test_invalidate_active_takes_and_stops_current_token() {
        let server = Arc::new(MockSearchApi::new());
        let store = Arc::new(SearchStore::new());
        let controller = CancellationController::new(server.clone(), store.clone());

        assert_eq!(controller.invalidate_active(), None);

        store.apply(crate::state::Transition::Started {
            destination_id: "UA".to_string(),
        });
        store.bind_token(&Continuation::pending("UA"), SearchToken::new("t7"));

        assert_eq!(controller.invalidate_active(), Some(SearchToken::new("t7")));
        assert_eq!(controller.active_token(), None);

        settle().await;
        assert_eq!(server.stopped_tokens().await, vec![SearchToken::new("t7")]);
    }

    #[tokio::test]
    async fn test_invalidate_other_token_keeps_active() {
        let server = Arc::new(MockSearchApi::new());
        let store = Arc::new(SearchStore::new());
        let controller = CancellationController::new(server.clone(), store.clone());

        store.apply(crate::state::Transition::Started {
            destination_id: "UA".to_string(),
        });
        store.bind_token(&Continuation::pending("UA"), SearchToken::new("t2"));

        assert!(!controller.invalidate(&SearchToken::new("t1")));
        assert_eq!(controller.active_token(), Some(SearchToken::new("t2")));

        settle().await;
        assert_eq!(server.stop_calls(), 1);
    }
}
