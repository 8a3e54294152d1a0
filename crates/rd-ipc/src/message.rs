//! Typed messages exchanged with the extension.

use rd_auth::AuthChallenge;
use rd_auth::AuthResponse;
use rd_auth::PromptMessage;
use rd_auth::PromptReply;
use rd_auth::TabInfo;
use rd_core::PromptChannelId;
use rd_core::RequestId;
use rd_core::TabId;
use serde::Deserialize;
use serde::Serialize;

/// Extension → host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtensionMessage {
    #[serde(rename_all = "camelCase")]
    ResponseCompleted {
        tab_id: TabId,
        url: String,
        status_code: u16,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        content_location: Option<String>,
    },
    AuthRequired(AuthChallenge),
    #[serde(rename_all = "camelCase")]
    TabLoading {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        active: bool,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    TabReply {
        query_id: u64,
        outcome: TabReplyOutcome,
    },
    PromptReply {
        channel: PromptChannelId,
        reply: PromptReply,
    },
    #[serde(rename_all = "camelCase")]
    ResolveUrl { query_id: u64, url: String },
    Shutdown,
}

/// Result of one host tab request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TabReplyOutcome {
    Tab(TabInfo),
    Done,
    Failed { message: String },
}

/// Host → extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    #[serde(rename_all = "camelCase")]
    AuthDecision {
        request_id: RequestId,
        response: AuthResponse,
    },
    #[serde(rename_all = "camelCase")]
    GetTab { query_id: u64, tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    DuplicateTab { query_id: u64, tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    RemoveTab { query_id: u64, tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    NavigateTab {
        query_id: u64,
        tab_id: TabId,
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateTab {
        query_id: u64,
        url: String,
        active: bool,
    },
    #[serde(rename_all = "camelCase")]
    OpenPrompt {
        channel: PromptChannelId,
        tab_id: TabId,
        message: PromptMessage,
    },
    #[serde(rename_all = "camelCase")]
    Resolved {
        query_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        riddle: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        /// Replacement URL when the resolved page is blacklisted.
        #[serde(skip_serializing_if = "Option::is_none")]
        redirect: Option<String>,
    },
}

impl HostMessage {
    /// Query id of tab requests awaiting a `tabReply`.
    pub fn query_id(&self) -> Option<u64> {
        match self {
            Self::GetTab { query_id, .. }
            | Self::DuplicateTab { query_id, .. }
            | Self::RemoveTab { query_id, .. }
            | Self::NavigateTab { query_id, .. }
            | Self::CreateTab { query_id, .. } => Some(*query_id),
            Self::AuthDecision { .. } | Self::OpenPrompt { .. } | Self::Resolved { .. } => None,
        }
    }
}
