//! Transient interceptor bookkeeping: in-flight auth requests and stale native-dialog tabs.

use rd_core::RequestId;
use rd_core::TabId;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

/// Lifecycle of one native auth challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    ChallengeObserved,
    NativeFallback,
    PromptIssued,
    TabReplacementInFlight,
    Resolved,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    state: AuthState,
    since: Instant,
}

/// Request ids that produced a challenge within the debounce window.
#[derive(Debug, Clone)]
pub struct InFlightAuthRequests {
    window: Duration,
    requests: HashMap<RequestId, InFlight>,
}

impl InFlightAuthRequests {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            requests: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self, request: &RequestId) -> AuthState {
        self.requests
            .get(request)
            .map_or(AuthState::Idle, |entry| entry.state)
    }

    /// Starts tracking `request`; returns the prior state when it was already in flight.
    pub fn observe(&mut self, request: &RequestId, now: Instant) -> Option<AuthState> {
        self.prune(now);
        if let Some(entry) = self.requests.get(request) {
            return Some(entry.state);
        }

        self.requests.insert(
            request.clone(),
            InFlight {
                state: AuthState::ChallengeObserved,
                since: now,
            },
        );
        None
    }

    /// Moves a tracked request to `state`; untracked requests are ignored.
    pub fn transition(&mut self, request: &RequestId, state: AuthState) {
        if let Some(entry) = self.requests.get_mut(request) {
            tracing::trace!(request = %request, from = ?entry.state, to = ?state, "auth transition");
            entry.state = state;
        }
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.requests
            .retain(|_, entry| now.saturating_duration_since(entry.since) < window);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

/// Tabs whose native auth dialog has already fired once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleNativeAuthTabs {
    tabs: BTreeSet<TabId>,
}

impl StaleNativeAuthTabs {
    pub fn mark(&mut self, tab: TabId) -> bool {
        self.tabs.insert(tab)
    }

    pub fn contains(&self, tab: TabId) -> bool {
        self.tabs.contains(&tab)
    }

    pub fn clear_tab(&mut self, tab: TabId) -> bool {
        self.tabs.remove(&tab)
    }

    pub fn clear(&mut self) {
        self.tabs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::AuthState;
    use super::InFlightAuthRequests;
    use rd_core::RequestId;
    use std::time::Duration;
    use std::time::Instant;

    #[test]
    fn repeated_request_reports_prior_state_until_window_expires() {
        let mut in_flight = InFlightAuthRequests::new(Duration::from_secs(3));
        let request = RequestId::new("42");
        let start = Instant::now();

        assert_eq!(in_flight.observe(&request, start), None);
        in_flight.transition(&request, AuthState::PromptIssued);
        assert_eq!(
            in_flight.observe(&request, start + Duration::from_secs(1)),
            Some(AuthState::PromptIssued)
        );
        assert_eq!(in_flight.observe(&request, start + Duration::from_secs(4)), None);
        assert_eq!(in_flight.state(&request), AuthState::ChallengeObserved);
    }

    #[test]
    fn untracked_requests_stay_idle() {
        let mut in_flight = InFlightAuthRequests::new(Duration::from_secs(3));
        let request = RequestId::new("7");
        in_flight.transition(&request, AuthState::Resolved);
        assert_eq!(in_flight.state(&request), AuthState::Idle);
        assert!(in_flight.is_empty());
    }
}
