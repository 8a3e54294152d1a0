//! Credential prompt channel: messages to and from the in-page prompt.

use rd_core::Credentials;
use rd_core::PromptChannelId;
use rd_core::RequestId;
use rd_core::TabId;
use rd_net::VisitedUrl;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

/// What the prompt shows: the realm and, when known, credentials to prefill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptMessage {
    pub realm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_credentials: Option<Credentials>,
}

/// The prompt's answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPromptReply")]
pub enum PromptReply {
    Submitted(Credentials),
    Disconnected,
}

#[derive(Deserialize)]
struct RawPromptReply {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    disconnect: bool,
}

impl TryFrom<RawPromptReply> for PromptReply {
    type Error = String;

    fn try_from(raw: RawPromptReply) -> Result<Self, Self::Error> {
        if raw.disconnect {
            return Ok(Self::Disconnected);
        }
        match (raw.username, raw.password) {
            (Some(username), Some(password)) => {
                Ok(Self::Submitted(Credentials::new(username, password)))
            }
            _ => Err("prompt reply needs `username` and `password`, or `disconnect`".to_owned()),
        }
    }
}

/// An open prompt awaiting its single reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrompt {
    pub tab: TabId,
    pub riddle: String,
    pub url: VisitedUrl,
    pub request: Option<RequestId>,
    pub opened: Instant,
}

/// Open prompt channels, at most one per tab. A channel is removed as soon as it answers,
/// disconnects, is superseded, or its tab goes away.
#[derive(Debug, Clone, Default)]
pub struct PromptChannels {
    next_id: u64,
    open: HashMap<PromptChannelId, PendingPrompt>,
}

impl PromptChannels {
    /// Opens a channel, closing any channel still open on the same tab.
    pub fn open(&mut self, pending: PendingPrompt) -> PromptChannelId {
        let superseded = self.close_tab(pending.tab);
        if superseded > 0 {
            tracing::trace!(tab = %pending.tab, superseded, "prompt channel superseded");
        }

        self.next_id += 1;
        let id = PromptChannelId(self.next_id);
        self.open.insert(id, pending);
        id
    }

    pub fn take(&mut self, id: PromptChannelId) -> Option<PendingPrompt> {
        self.open.remove(&id)
    }

    /// Closes every channel owned by `tab`; returns how many were open.
    pub fn close_tab(&mut self, tab: TabId) -> usize {
        let before = self.open.len();
        self.open.retain(|_, pending| pending.tab != tab);
        before - self.open.len()
    }

    /// Whether `tab` already shows a prompt for `riddle` opened less than `window` ago.
    pub fn issued_within(&self, tab: TabId, riddle: &str, now: Instant, window: Duration) -> bool {
        self.open.values().any(|pending| {
            pending.tab == tab
                && pending.riddle == riddle
                && now.saturating_duration_since(pending.opened) < window
        })
    }

    pub fn is_open(&self, id: PromptChannelId) -> bool {
        self.open.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::PendingPrompt;
    use super::PromptChannels;
    use super::PromptMessage;
    use super::PromptReply;
    use rd_core::Credentials;
    use rd_core::TabId;
    use rd_net::VisitedUrl;
    use std::time::Duration;
    use std::time::Instant;

    #[test]
    fn message_omits_missing_credentials() {
        let bare = PromptMessage {
            realm: "Members".to_owned(),
            unlocked_credentials: None,
        };
        assert_eq!(
            serde_json::to_string(&bare).unwrap_or_default(),
            r#"{"realm":"Members"}"#
        );

        let filled = PromptMessage {
            realm: "Members".to_owned(),
            unlocked_credentials: Some(Credentials::new("u", "p")),
        };
        assert_eq!(
            serde_json::to_string(&filled).unwrap_or_default(),
            r#"{"realm":"Members","unlockedCredentials":{"username":"u","password":"p"}}"#
        );
    }

    #[test]
    fn replies_decode_submission_and_disconnect() {
        let submitted: Result<PromptReply, _> =
            serde_json::from_str(r#"{"username": "u", "password": "p"}"#);
        assert_eq!(
            submitted.ok(),
            Some(PromptReply::Submitted(Credentials::new("u", "p")))
        );

        let gone: Result<PromptReply, _> = serde_json::from_str(r#"{"disconnect": true}"#);
        assert_eq!(gone.ok(), Some(PromptReply::Disconnected));

        let partial: Result<PromptReply, _> = serde_json::from_str(r#"{"username": "u"}"#);
        assert!(partial.is_err());
    }

    fn pending(tab: i64, opened: Instant) -> PendingPrompt {
        PendingPrompt {
            tab: TabId(tab),
            riddle: "rns".to_owned(),
            url: VisitedUrl::parse("https://example.com/secret/")
                .unwrap_or_else(|error| panic!("{error}")),
            request: None,
            opened,
        }
    }

    #[test]
    fn channels_answer_once() {
        let now = Instant::now();
        let mut channels = PromptChannels::default();
        let first = channels.open(pending(1, now));
        let second = channels.open(pending(2, now));
        assert_ne!(first, second);

        assert!(channels.take(first).is_some_and(|pending| pending.tab == TabId(1)));
        assert!(channels.take(first).is_none());
        assert!(channels.is_open(second));
        channels.clear();
        assert!(channels.is_empty());
    }

    #[test]
    fn new_channel_supersedes_same_tab() {
        let now = Instant::now();
        let mut channels = PromptChannels::default();
        let old = channels.open(pending(1, now));
        let other_tab = channels.open(pending(2, now));
        let replacement = channels.open(pending(1, now + Duration::from_secs(5)));

        assert!(!channels.is_open(old));
        assert!(channels.is_open(other_tab));
        assert!(channels.is_open(replacement));
        assert_eq!(channels.len(), 2);
    }

    #[test]
    fn closing_tab_drops_its_channels() {
        let now = Instant::now();
        let mut channels = PromptChannels::default();
        channels.open(pending(1, now));
        let kept = channels.open(pending(2, now));

        assert_eq!(channels.close_tab(TabId(1)), 1);
        assert_eq!(channels.close_tab(TabId(1)), 0);
        assert_eq!(channels.len(), 1);
        assert!(channels.is_open(kept));
    }

    #[test]
    fn issued_window_matches_tab_and_riddle() {
        let now = Instant::now();
        let window = Duration::from_secs(3);
        let mut channels = PromptChannels::default();
        channels.open(pending(1, now));

        assert!(channels.issued_within(TabId(1), "rns", now + Duration::from_secs(1), window));
        assert!(!channels.issued_within(TabId(1), "other", now, window));
        assert!(!channels.issued_within(TabId(2), "rns", now, window));
        assert!(!channels.issued_within(TabId(1), "rns", now + window, window));
    }
}
