//! The tracker session: sole owner of riddle state for one logged-in player.
//!
//! Riddle registry and page trees live in one immutable [`RiddleSnapshot`]. Writers build a
//! replacement and publish it with a single swap; readers on other threads pin whatever
//! snapshot was current when they loaded it and never observe a partial rebuild.

use arc_swap::ArcSwap;
use rd_net::VisitedUrl;
use rd_riddle::ResolvedPath;
use rd_riddle::RiddleSnapshot;
use rd_riddle::SensitivePathRules;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

/// Cloneable lock-free view of the published snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    snapshot: Arc<ArcSwap<RiddleSnapshot>>,
}

impl SnapshotReader {
    pub fn load(&self) -> Arc<RiddleSnapshot> {
        self.snapshot.load_full()
    }

    pub fn resolve(&self, raw_url: &str) -> Option<ResolvedPath> {
        self.snapshot.load().resolve_str(raw_url)
    }

    /// Replacement URL for a blacklisted page.
    pub fn blacklist_redirect(&self, raw_url: &str) -> Option<String> {
        let url = VisitedUrl::parse(raw_url).ok()?;
        self.snapshot.load().registry().blacklist_redirect(&url)
    }
}

pub struct Session {
    snapshot: Arc<ArcSwap<RiddleSnapshot>>,
    sensitive: SensitivePathRules,
    current_riddle: Option<String>,
    generation: u64,
    login_debounce: Duration,
    last_login_prompt: Option<Instant>,
}

impl Session {
    pub fn new(sensitive: SensitivePathRules, login_debounce: Duration) -> Self {
        Self {
            snapshot: Arc::new(ArcSwap::from_pointee(RiddleSnapshot::empty())),
            sensitive,
            current_riddle: None,
            generation: 0,
            login_debounce,
            last_login_prompt: None,
        }
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            snapshot: Arc::clone(&self.snapshot),
        }
    }

    pub fn snapshot(&self) -> Arc<RiddleSnapshot> {
        self.snapshot.load_full()
    }

    pub fn publish(&self, snapshot: RiddleSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    pub fn sensitive_paths(&self) -> &SensitivePathRules {
        &self.sensitive
    }

    pub fn current_riddle(&self) -> Option<&str> {
        self.current_riddle.as_deref()
    }

    pub fn set_current_riddle(&mut self, alias: &str) {
        if self.current_riddle.as_deref() != Some(alias) {
            tracing::info!(riddle = alias, "current riddle changed");
            self.current_riddle = Some(alias.to_owned());
        }
    }

    /// Bumped on every expiry; results fetched under an older generation are discarded.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Drops all riddle state until the next rebuild.
    pub fn expire(&mut self) {
        self.generation += 1;
        self.current_riddle = None;
        self.publish(RiddleSnapshot::empty());
        tracing::info!(generation = self.generation, "session expired; riddle state cleared");
    }

    /// Whether a login tab may be opened now; at most once per debounce window.
    pub fn should_prompt_login(&mut self, now: Instant) -> bool {
        let recent = self
            .last_login_prompt
            .is_some_and(|last| now.saturating_duration_since(last) < self.login_debounce);
        if recent {
            return false;
        }
        self.last_login_prompt = Some(now);
        true
    }
}
