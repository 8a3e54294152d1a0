//! Native auth interception and the credential prompt channel.

pub mod interceptor;
pub mod missing;
pub mod prompt;
pub mod state;

use rd_core::Credentials;
use rd_core::PromptChannelId;
use rd_core::RequestId;
use rd_core::TabId;
use rd_core::TrackerResult;
use serde::Deserialize;
use serde::Serialize;

pub use interceptor::AuthDecision;
pub use interceptor::AuthDecisionReason;
pub use interceptor::AuthFollowup;
pub use interceptor::AuthInterceptor;
pub use interceptor::MissingCredentialsHint;
pub use interceptor::MissingHintOutcome;
pub use missing::MissingAuthPaths;
pub use prompt::PendingPrompt;
pub use prompt::PromptChannels;
pub use prompt::PromptMessage;
pub use prompt::PromptReply;
pub use state::AuthState;
pub use state::InFlightAuthRequests;
pub use state::StaleNativeAuthTabs;

/// A native basic-auth challenge reported before the browser shows its dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthChallenge {
    pub request_id: RequestId,
    pub tab_id: TabId,
    pub url: String,
    #[serde(default)]
    pub realm: Option<String>,
}

/// Answer to a native challenge, issued synchronously by the challenge handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AuthResponse {
    /// Let the browser show its own dialog.
    NativeDialog,
    /// Suppress the native dialog.
    Cancel,
    Provide(Credentials),
}

/// Tab state as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
    #[serde(default)]
    pub active: bool,
}

/// Tab lifecycle operations. Every call may fail because the tab closed meanwhile.
pub trait TabHost {
    fn get_tab(&self, tab: TabId) -> TrackerResult<TabInfo>;

    /// Duplicates `tab` and returns the new tab's id.
    fn duplicate_tab(&self, tab: TabId) -> TrackerResult<TabId>;

    fn remove_tab(&self, tab: TabId) -> TrackerResult<()>;

    fn navigate_tab(&self, tab: TabId, url: &str) -> TrackerResult<()>;

    fn create_tab(&self, url: &str, active: bool) -> TrackerResult<TabId>;
}

/// Opens the in-page credential prompt for one channel.
pub trait PromptHost {
    fn open_prompt(
        &self,
        channel: PromptChannelId,
        tab: TabId,
        message: &PromptMessage,
    ) -> TrackerResult<()>;
}

/// Delivers the answer to a pending native challenge.
pub trait AuthResponder {
    fn answer_auth(&self, request: &RequestId, response: &AuthResponse) -> TrackerResult<()>;
}
