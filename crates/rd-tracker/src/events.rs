//! Events consumed by the dispatcher: host callbacks plus results posted back by workers.

use rd_auth::AuthChallenge;
use rd_auth::PromptReply;
use rd_backend::ProcessOutcome;
use rd_backend::UnlockedCredentials;
use rd_backend::VisitedResponse;
use rd_core::PromptChannelId;
use rd_core::TabId;
use rd_core::TrackerResult;
use rd_riddle::PagesData;
use rd_riddle::RiddleData;
use std::collections::BTreeMap;

#[derive(Debug)]
pub enum TrackerEvent {
    ResponseCompleted {
        tab: TabId,
        response: VisitedResponse,
    },
    AuthRequired(AuthChallenge),
    TabLoading {
        tab: TabId,
        url: String,
        active: bool,
    },
    TabRemoved {
        tab: TabId,
    },
    PromptReply {
        channel: PromptChannelId,
        reply: PromptReply,
    },
    /// Fetch of every riddle and its pages.
    Bootstrapped {
        generation: u64,
        result: TrackerResult<RiddleBundle>,
    },
    Processed {
        generation: u64,
        tab: TabId,
        response: VisitedResponse,
        outcome: TrackerResult<ProcessOutcome>,
    },
    RiddleFetched {
        generation: u64,
        alias: String,
        result: TrackerResult<(RiddleData, PagesData)>,
        unlocked: Option<UnlockedCredentials>,
    },
    LevelPagesFetched {
        generation: u64,
        alias: String,
        set_name: String,
        level_name: String,
        result: TrackerResult<PagesData>,
        unlocked: Option<UnlockedCredentials>,
    },
    Shutdown,
}

impl TrackerEvent {
    /// True for results posted by a backend worker thread.
    pub fn is_worker_result(&self) -> bool {
        matches!(
            self,
            Self::Bootstrapped { .. }
                | Self::Processed { .. }
                | Self::RiddleFetched { .. }
                | Self::LevelPagesFetched { .. }
        )
    }
}

/// Riddles keyed by alias, with the pages of each.
#[derive(Debug, Clone, Default)]
pub struct RiddleBundle {
    pub riddles: BTreeMap<String, RiddleData>,
    pub pages: BTreeMap<String, PagesData>,
}
