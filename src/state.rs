// Search state and the only ways to change it
// Every change from an async continuation is validated and applied under one write lock

use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{PriceOffer, SearchToken};

const EVENTS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    #[default]
    Idle,
    Starting,
    Polling,
    Success,
    Empty,
    Error,
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchStatus::Idle => "idle",
            SearchStatus::Starting => "starting",
            SearchStatus::Polling => "polling",
            SearchStatus::Success => "success",
            SearchStatus::Empty => "empty",
            SearchStatus::Error => "error",
        };
        f.write_str(name)
    }
}

// Failures that reach the user; Display is the message shown
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchFailure {
    #[error("{0}")]
    StartFailure(String),

    #[error("{0}")]
    PollExhausted(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub status: SearchStatus,
    // Cheapest first
    pub results: Vec<PriceOffer>,
    pub error: Option<String>,
    pub last_destination_id: Option<String>,
    pub active_token: Option<SearchToken>,
}

// What observers get to see
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSnapshot {
    pub status: SearchStatus,
    pub results: Vec<PriceOffer>,
    pub error: Option<String>,
    pub last_destination_id: Option<String>,
}

impl From<&SearchState> for SearchSnapshot {
    fn from(state: &SearchState) -> Self {
        Self {
            status: state.status,
            results: state.results.clone(),
            error: state.error.clone(),
            last_destination_id: state.last_destination_id.clone(),
        }
    }
}

/// Identity of an async continuation of one search.
///
/// Before the backend hands out a token a continuation is identified by the
/// destination it was started for; afterwards by the token itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Pending { destination_id: String },
    Bound { token: SearchToken },
}

impl Continuation {
    pub fn pending(destination_id: &str) -> Self {
        Continuation::Pending {
            destination_id: destination_id.to_string(),
        }
    }

    pub fn bound(token: SearchToken) -> Self {
        Continuation::Bound { token }
    }

    pub fn is_current(&self, state: &SearchState) -> bool {
        match self {
            Continuation::Bound { token } => state.active_token.as_ref() == Some(token),
            Continuation::Pending { destination_id } => {
                state.last_destination_id.as_deref() == Some(destination_id.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Transition {
    Started { destination_id: String },
    Polling { token: SearchToken },
    Completed {
        destination_id: String,
        results: Vec<PriceOffer>,
    },
    Failed(SearchFailure),
}

impl Transition {
    fn apply(self, state: &mut SearchState) {
        match self {
            Transition::Started { destination_id } => {
                state.status = SearchStatus::Starting;
                state.error = None;
                state.last_destination_id = Some(destination_id);
                state.active_token = None;
            }
            Transition::Polling { token } => {
                state.status = SearchStatus::Polling;
                state.active_token = Some(token);
            }
            Transition::Completed {
                destination_id,
                results,
            } => {
                state.status = if results.is_empty() {
                    SearchStatus::Empty
                } else {
                    SearchStatus::Success
                };
                state.results = results;
                state.error = None;
                state.active_token = None;
                state.last_destination_id = Some(destination_id);
            }
            Transition::Failed(failure) => {
                state.status = SearchStatus::Error;
                state.error = Some(failure.to_string());
                state.active_token = None;
            }
        }
    }
}

// Outcome of binding a freshly issued token
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Binding {
    // The continuation was superseded before the token arrived
    Stale,
    // Token is active; carries a token it replaced, if any
    Bound { displaced: Option<SearchToken> },
}

pub struct SearchStore {
    state: RwLock<SearchState>,
    events: broadcast::Sender<SearchSnapshot>,
}

impl Default for SearchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            state: RwLock::new(SearchState::default()),
            events,
        }
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot::from(&*self.state.read())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SearchSnapshot> {
        self.events.subscribe()
    }

    pub fn active_token(&self) -> Option<SearchToken> {
        self.state.read().active_token.clone()
    }

    pub fn last_destination_id(&self) -> Option<String> {
        self.state.read().last_destination_id.clone()
    }

    pub fn is_current(&self, continuation: &Continuation) -> bool {
        continuation.is_current(&self.state.read())
    }

    fn publish(&self, state: &SearchState) {
        // Nobody listening is fine
        let _ = self.events.send(SearchSnapshot::from(state));
    }

    // For transitions made by the caller of `start` itself
    pub(crate) fn apply(&self, transition: Transition) {
        let mut state = self.state.write();
        transition.apply(&mut state);
        self.publish(&state);
    }

    // Applies the transition only if the continuation is still authoritative
    pub(crate) fn apply_if_current(
        &self,
        continuation: &Continuation,
        transition: Transition,
    ) -> bool {
        let mut state = self.state.write();
        if !continuation.is_current(&state) {
            return false;
        }
        transition.apply(&mut state);
        self.publish(&state);
        true
    }

    pub(crate) fn bind_token(&self, continuation: &Continuation, token: SearchToken) -> Binding {
        let mut state = self.state.write();
        if !continuation.is_current(&state) {
            return Binding::Stale;
        }
        let displaced = state.active_token.take().filter(|old| *old != token);
        Transition::Polling { token }.apply(&mut state);
        self.publish(&state);
        Binding::Bound { displaced }
    }

    // Takes whatever token is active in one step, so a concurrent bind can't slip in between
    pub(crate) fn take_active_token(&self) -> Option<SearchToken> {
        self.state.write().active_token.take()
    }

    // Clears the active token only if it is `token`; no snapshot, the token is not observable
    pub(crate) fn clear_active_token(&self, token: &SearchToken) -> bool {
        let mut state = self.state.write();
        if state.active_token.as_ref() == Some(token) {
            state.active_token = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::offer;

    #[test]
    fn test_pending_continuation_follows_last_destination() {
        let mut state = SearchState::default();
        let continuation = Continuation::pending("UA");
        assert!(!continuation.is_current(&state));

        state.last_destination_id = Some("UA".to_string());
        assert!(continuation.is_current(&state));

        state.last_destination_id = Some("PL".to_string());
        assert!(!continuation.is_current(&state));
    }

    #[test]
    fn test_bound_continuation_follows_active_token() {
        let mut state = SearchState {
            last_destination_id: Some("UA".to_string()),
            active_token: Some(SearchToken::new("t1")),
            ..Default::default()
        };
        let continuation = Continuation::bound(SearchToken::new("t1"));
        assert!(continuation.is_current(&state));

        // same destination, newer job
        state.active_token = Some(SearchToken::new("t2"));
        assert!(!continuation.is_current(&state));

        state.active_token = None;
        assert!(!continuation.is_current(&state));
    }

    #[test]
    fn test_stale_transition_is_dropped() {
        let store = SearchStore::new();
        store.apply(Transition::Started {
            destination_id: "PL".to_string(),
        });

        let applied = store.apply_if_current(
            &Continuation::pending("UA"),
            Transition::Failed(SearchFailure::StartFailure("nope".to_string())),
        );

        assert!(!applied);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.status, SearchStatus::Starting);
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.last_destination_id.as_deref(), Some("PL"));
    }

    #[test]
    fn test_completed_picks_success_or_empty() {
        let store = SearchStore::new();
        store.apply(Transition::Completed {
            destination_id: "UA".to_string(),
            results: vec![offer("1", 10.0, None)],
        });
        assert_eq!(store.snapshot().status, SearchStatus::Success);

        store.apply(Transition::Completed {
            destination_id: "PL".to_string(),
            results: vec![],
        });
        let snapshot = store.snapshot();
        assert_eq!(snapshot.status, SearchStatus::Empty);
        assert!(snapshot.results.is_empty());
        assert_eq!(snapshot.last_destination_id.as_deref(), Some("PL"));
    }

    #[test]
    fn test_bind_token_reports_displaced_token() {
        let store = SearchStore::new();
        store.apply(Transition::Started {
            destination_id: "UA".to_string(),
        });
        let pending = Continuation::pending("UA");

        assert_eq!(
            store.bind_token(&pending, SearchToken::new("t1")),
            Binding::Bound { displaced: None }
        );
        assert_eq!(
            store.bind_token(&pending, SearchToken::new("t2")),
            Binding::Bound {
                displaced: Some(SearchToken::new("t1"))
            }
        );
        assert_eq!(store.active_token(), Some(SearchToken::new("t2")));

        assert_eq!(
            store.bind_token(&Continuation::pending("PL"), SearchToken::new("t3")),
            Binding::Stale
        );
    }

    #[test]
    fn test_clear_active_token_only_matching() {
        let store = SearchStore::new();
        store.apply(Transition::Polling {
            token: SearchToken::new("t1"),
        });

        assert!(!store.clear_active_token(&SearchToken::new("t0")));
        assert!(store.clear_active_token(&SearchToken::new("t1")));
        assert_eq!(store.active_token(), None);
    }

    #[test]
    fn test_take_active_token_empties_slot() {
        let store = SearchStore::new();
        assert_eq!(store.take_active_token(), None);

        store.apply(Transition::Started {
            destination_id: "UA".to_string(),
        });
        store.bind_token(&Continuation::pending("UA"), SearchToken::new("t1"));

        assert_eq!(store.take_active_token(), Some(SearchToken::new("t1")));
        assert_eq!(store.take_active_token(), None);
        assert!(!store.is_current(&Continuation::bound(SearchToken::new("t1"))));
    }

    #[test]
    fn test_transitions_are_broadcast() {
        let store = SearchStore::new();
        let mut events = store.subscribe();

        store.apply(Transition::Started {
            destination_id: "UA".to_string(),
        });
        store.apply(Transition::Failed(SearchFailure::PollExhausted(
            "Internal Server Error".to_string(),
        )));

        assert_eq!(events.try_recv().unwrap().status, SearchStatus::Starting);
        let failed = events.try_recv().unwrap();
        assert_eq!(failed.status, SearchStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("Internal Server Error"));
        assert!(events.try_recv().is_err());
    }
}
