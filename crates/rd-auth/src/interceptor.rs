//! Auth interceptor: decides how each native challenge or backend hint is handled.
//!
//! Decisions are made synchronously from the current [`RiddleSnapshot`]; anything that
//! touches tabs or prompts is returned as an [`AuthFollowup`] and run afterwards, so the
//! native dialog is always answered before the first host round trip.

use crate::AuthChallenge;
use crate::AuthResponse;
use crate::PromptHost;
use crate::TabHost;
use crate::missing::MissingAuthPaths;
use crate::prompt::PendingPrompt;
use crate::prompt::PromptChannels;
use crate::prompt::PromptMessage;
use crate::prompt::PromptReply;
use crate::state::AuthState;
use crate::state::InFlightAuthRequests;
use crate::state::StaleNativeAuthTabs;
use rd_core::PromptChannelId;
use rd_core::RequestId;
use rd_core::TabId;
use rd_core::TrackerResult;
use rd_net::VisitedUrl;
use rd_riddle::RiddleSnapshot;
use std::time::Duration;
use std::time::Instant;

const STATUS_UNAUTHORIZED: u16 = 401;
const STATUS_FORBIDDEN: u16 = 403;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecisionReason {
    /// Same request id already handled within the debounce window.
    Debounced,
    /// The tab already shows a prompt for this riddle, opened within the debounce window.
    PromptPending,
    Unresolved,
    Sensitive,
    StaleTab,
    EmbeddedCredentials,
    Prompt,
}

impl AuthDecisionReason {
    fn state(self) -> Option<AuthState> {
        match self {
            Self::Debounced => None,
            Self::Unresolved | Self::Sensitive => Some(AuthState::NativeFallback),
            Self::StaleTab => Some(AuthState::TabReplacementInFlight),
            Self::EmbeddedCredentials => Some(AuthState::Resolved),
            Self::PromptPending | Self::Prompt => Some(AuthState::PromptIssued),
        }
    }
}

/// Host work to run after the native challenge has been answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFollowup {
    ReplaceTab {
        request: RequestId,
        tab: TabId,
        url: String,
    },
    OpenPrompt {
        channel: PromptChannelId,
        tab: TabId,
        message: PromptMessage,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    pub response: AuthResponse,
    pub followup: Option<AuthFollowup>,
    pub reason: AuthDecisionReason,
}

impl AuthDecision {
    fn native(reason: AuthDecisionReason) -> Self {
        Self {
            response: AuthResponse::NativeDialog,
            followup: None,
            reason,
        }
    }
}

/// A `403` from the processing endpoint naming a protected path the user has not unlocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingCredentialsHint {
    pub riddle: String,
    pub realm: String,
    pub credentials_path: String,
    pub tab: TabId,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingHintOutcome {
    AlreadyPending,
    /// The tab left the hinted URL before the hint could be acted on.
    Stale,
    /// The tab could not be queried or navigated.
    Unreachable,
    Prompted(PromptChannelId),
}

#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    in_flight: InFlightAuthRequests,
    stale_tabs: StaleNativeAuthTabs,
    missing: MissingAuthPaths,
    prompts: PromptChannels,
}

impl AuthInterceptor {
    pub fn new(debounce: Duration) -> Self {
        Self {
            in_flight: InFlightAuthRequests::new(debounce),
            stale_tabs: StaleNativeAuthTabs::default(),
            missing: MissingAuthPaths::default(),
            prompts: PromptChannels::default(),
        }
    }

    pub fn missing(&self) -> &MissingAuthPaths {
        &self.missing
    }

    pub fn stale_tabs(&self) -> &StaleNativeAuthTabs {
        &self.stale_tabs
    }

    pub fn prompts(&self) -> &PromptChannels {
        &self.prompts
    }

    pub fn request_state(&self, request: &RequestId) -> AuthState {
        self.in_flight.state(request)
    }

    /// Flags `tab` as having shown the native dialog already.
    pub fn mark_stale_tab(&mut self, tab: TabId) {
        if self.stale_tabs.mark(tab) {
            tracing::debug!(tab = %tab, "tab marked stale after native dialog");
        }
    }

    pub fn on_auth_required(
        &mut self,
        challenge: &AuthChallenge,
        snapshot: &RiddleSnapshot,
        now: Instant,
    ) -> AuthDecision {
        if let Some(prior) = self.in_flight.observe(&challenge.request_id, now) {
            return self.debounced(challenge, prior);
        }

        let decision = self.decide(challenge, snapshot, now);
        if let Some(state) = decision.reason.state() {
            self.in_flight.transition(&challenge.request_id, state);
        }
        tracing::debug!(
            request = %challenge.request_id,
            tab = %challenge.tab_id,
            reason = ?decision.reason,
            "native auth challenge"
        );
        decision
    }

    fn debounced(&mut self, challenge: &AuthChallenge, prior: AuthState) -> AuthDecision {
        if prior == AuthState::NativeFallback {
            return AuthDecision::native(AuthDecisionReason::Debounced);
        }

        // A repeat for a cancelled request means the browser re-showed its dialog. The repeat
        // itself gets no followup; the tab is only replaced on its next fresh challenge.
        self.mark_stale_tab(challenge.tab_id);
        AuthDecision {
            response: AuthResponse::Cancel,
            followup: None,
            reason: AuthDecisionReason::Debounced,
        }
    }

    fn decide(
        &mut self,
        challenge: &AuthChallenge,
        snapshot: &RiddleSnapshot,
        now: Instant,
    ) -> AuthDecision {
        let url = match VisitedUrl::parse(&challenge.url) {
            Ok(url) => url,
            Err(error) => {
                tracing::debug!(%error, "challenge url not parseable");
                return AuthDecision::native(AuthDecisionReason::Unresolved);
            }
        };
        let Some(resolved) = snapshot.resolve(&url) else {
            return AuthDecision::native(AuthDecisionReason::Unresolved);
        };
        if snapshot
            .entry(&resolved.riddle)
            .is_some_and(|entry| entry.is_sensitive(&resolved.path))
        {
            return AuthDecision::native(AuthDecisionReason::Sensitive);
        }

        if self.stale_tabs.contains(challenge.tab_id) {
            return AuthDecision {
                response: AuthResponse::Cancel,
                followup: Some(AuthFollowup::ReplaceTab {
                    request: challenge.request_id.clone(),
                    tab: challenge.tab_id,
                    url: url.without_userinfo(),
                }),
                reason: AuthDecisionReason::StaleTab,
            };
        }

        if let Some(credentials) = url.embedded_credentials() {
            return AuthDecision {
                response: AuthResponse::Provide(credentials),
                followup: None,
                reason: AuthDecisionReason::EmbeddedCredentials,
            };
        }

        if self.prompts.issued_within(
            challenge.tab_id,
            &resolved.riddle,
            now,
            self.in_flight.window(),
        ) {
            return AuthDecision {
                response: AuthResponse::Cancel,
                followup: None,
                reason: AuthDecisionReason::PromptPending,
            };
        }

        let message = PromptMessage {
            realm: challenge.realm.clone().unwrap_or_default(),
            unlocked_credentials: snapshot
                .unlocked_credentials(&resolved.riddle, &resolved.path)
                .cloned()
                .or_else(|| url.userinfo_credentials()),
        };
        let channel = self.prompts.open(PendingPrompt {
            tab: challenge.tab_id,
            riddle: resolved.riddle,
            url,
            request: Some(challenge.request_id.clone()),
            opened: now,
        });
        AuthDecision {
            response: AuthResponse::Cancel,
            followup: Some(AuthFollowup::OpenPrompt {
                channel,
                tab: challenge.tab_id,
                message,
            }),
            reason: AuthDecisionReason::Prompt,
        }
    }

    /// Runs the host side of a decision. Host failures abort the action silently.
    pub fn run_followup<H>(&mut self, followup: AuthFollowup, host: &H)
    where
        H: TabHost + PromptHost + ?Sized,
    {
        match followup {
            AuthFollowup::ReplaceTab { request, tab, url } => {
                match replace_tab(host, tab, &url) {
                    Ok(replacement) => {
                        self.stale_tabs.clear_tab(tab);
                        self.in_flight.transition(&request, AuthState::Resolved);
                        tracing::info!(tab = %tab, replacement = %replacement, "replaced stale auth tab");
                    }
                    Err(error) => tracing::debug!(tab = %tab, %error, "tab replacement aborted"),
                }
            }
            AuthFollowup::OpenPrompt {
                channel,
                tab,
                message,
            } => {
                if let Err(error) = host.open_prompt(channel, tab, &message) {
                    self.prompts.take(channel);
                    tracing::debug!(tab = %tab, %error, "credential prompt not opened");
                }
            }
        }
    }

    /// Handles the single reply of a prompt channel; returns the tab that was re-navigated.
    pub fn on_prompt_reply<H>(
        &mut self,
        channel: PromptChannelId,
        reply: PromptReply,
        host: &H,
    ) -> Option<TabId>
    where
        H: TabHost + ?Sized,
    {
        let Some(pending) = self.prompts.take(channel) else {
            tracing::trace!(%channel, "reply for closed prompt channel");
            return None;
        };
        if let Some(request) = &pending.request {
            self.in_flight.transition(request, AuthState::Resolved);
        }

        let credentials = match reply {
            PromptReply::Submitted(credentials) => credentials,
            PromptReply::Disconnected => return None,
        };
        let target = match pending.url.with_userinfo(&credentials) {
            Ok(target) => target,
            Err(error) => {
                tracing::debug!(%channel, %error, "credentials cannot be embedded");
                return None;
            }
        };

        match host.navigate_tab(pending.tab, &target) {
            Ok(()) => Some(pending.tab),
            Err(error) => {
                tracing::debug!(tab = %pending.tab, %error, "prompt navigation aborted");
                None
            }
        }
    }

    pub fn on_missing_credentials<H>(
        &mut self,
        hint: &MissingCredentialsHint,
        snapshot: &RiddleSnapshot,
        host: &H,
        now: Instant,
    ) -> MissingHintOutcome
    where
        H: TabHost + PromptHost + ?Sized,
    {
        if !self
            .missing
            .record(&hint.riddle, &hint.credentials_path, &hint.realm)
        {
            return MissingHintOutcome::AlreadyPending;
        }
        tracing::debug!(
            riddle = %hint.riddle,
            path = %hint.credentials_path,
            realm = %hint.realm,
            "missing credentials recorded"
        );

        let Ok(url) = VisitedUrl::parse(&hint.url) else {
            return MissingHintOutcome::Stale;
        };
        match tab_is_on(host, hint.tab, &url) {
            Ok(true) => {}
            Ok(false) => return MissingHintOutcome::Stale,
            Err(error) => {
                tracing::debug!(tab = %hint.tab, %error, "tab query failed");
                return MissingHintOutcome::Unreachable;
            }
        }
        if let Err(error) = host.navigate_tab(hint.tab, url.as_str()) {
            tracing::debug!(tab = %hint.tab, %error, "tab reload failed");
            return MissingHintOutcome::Unreachable;
        }

        let message = PromptMessage {
            realm: hint.realm.clone(),
            unlocked_credentials: snapshot
                .unlocked_credentials(&hint.riddle, &hint.credentials_path)
                .cloned(),
        };
        let channel = self.prompts.open(PendingPrompt {
            tab: hint.tab,
            riddle: hint.riddle.clone(),
            url,
            request: None,
            opened: now,
        });
        if let Err(error) = host.open_prompt(channel, hint.tab, &message) {
            self.prompts.take(channel);
            tracing::debug!(tab = %hint.tab, %error, "credential prompt not opened");
            return MissingHintOutcome::Unreachable;
        }
        MissingHintOutcome::Prompted(channel)
    }

    /// Clears the pending entry covering `path` once a response shows it is reachable.
    pub fn on_unlocked_response<H>(
        &mut self,
        riddle: &str,
        path: &str,
        status: u16,
        tab: TabId,
        url: &str,
        host: &H,
    ) -> bool
    where
        H: TabHost + ?Sized,
    {
        if status == STATUS_UNAUTHORIZED || status == STATUS_FORBIDDEN {
            return false;
        }
        let Some(pending) = self.missing.containing(riddle, path).map(str::to_owned) else {
            return false;
        };
        self.missing.remove(riddle, &pending);
        tracing::debug!(riddle, path = %pending, "missing credentials resolved");

        let Ok(url) = VisitedUrl::parse(url) else {
            return true;
        };
        match tab_is_on(host, tab, &url) {
            Ok(true) => {
                if let Err(error) = host.navigate_tab(tab, url.as_str()) {
                    tracing::debug!(tab = %tab, %error, "tab refresh failed");
                }
            }
            Ok(false) => {}
            Err(error) => tracing::debug!(tab = %tab, %error, "tab query failed"),
        }
        true
    }

    /// Drops per-tab state for a closed tab, including its open prompt channel.
    pub fn forget_tab(&mut self, tab: TabId) {
        self.stale_tabs.clear_tab(tab);
        let closed = self.prompts.close_tab(tab);
        if closed > 0 {
            tracing::debug!(tab = %tab, closed, "prompt channels closed with tab");
        }
    }

    /// Forgets everything; used when the session expires.
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.stale_tabs.clear();
        self.missing.clear();
        self.prompts.clear();
    }
}

fn replace_tab<H>(host: &H, tab: TabId, url: &str) -> TrackerResult<TabId>
where
    H: TabHost + ?Sized,
{
    let replacement = host.duplicate_tab(tab)?;
    host.navigate_tab(replacement, url)?;
    host.remove_tab(tab)?;
    Ok(replacement)
}

fn tab_is_on<H>(host: &H, tab: TabId, url: &VisitedUrl) -> TrackerResult<bool>
where
    H: TabHost + ?Sized,
{
    let info = host.get_tab(tab)?;
    Ok(VisitedUrl::parse(&info.url).is_ok_and(|current| current.same_location(url)))
}
