//! Processing endpoint vocabulary: what the backend says about a visited page.

use rd_core::Credentials;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use serde::Deserialize;
use serde::Serialize;

const NOT_LOGGED_IN: &str = "Not logged in";

/// A completed browser response forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitedResponse {
    pub url: String,
    pub status_code: u16,
    pub location: Option<String>,
    pub content_location: Option<String>,
}

impl VisitedResponse {
    pub fn new(url: impl Into<String>, status_code: u16) -> Self {
        Self {
            url: url.into(),
            status_code,
            location: None,
            content_location: None,
        }
    }
}

/// Credentials the player has already unlocked for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockedCredentials {
    pub path: String,
    pub username: String,
    pub password: String,
}

impl UnlockedCredentials {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedPage {
    pub riddle: String,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default)]
    pub level_name: Option<String>,
    pub path: String,
    #[serde(default)]
    pub unlocked_credentials: Option<UnlockedCredentials>,
    /// `201`: first time this player reached the page.
    #[serde(skip)]
    pub first_visit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExpiry {
    NotLoggedIn,
    /// Logged in, but not a member of the guild; carries the invite code.
    NotGuildMember { invite: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed(ProcessedPage),
    SessionExpired(SessionExpiry),
    MissingCredentials {
        riddle: Option<String>,
        realm: String,
        credentials_path: String,
    },
    Locked { riddle: Option<String> },
    ShortRun { riddle: Option<String> },
    NotFound { riddle: Option<String> },
    Discarded { riddle: Option<String> },
    NotLevelPage { riddle: String },
    OutsideRiddles,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefusalBody {
    #[serde(default)]
    riddle: Option<String>,
    #[serde(default)]
    realm: Option<String>,
    #[serde(default)]
    credentials_path: Option<String>,
}

/// Maps a `/process` status code and body to an outcome.
pub fn decode_process_response(status: u16, body: &str) -> TrackerResult<ProcessOutcome> {
    match status {
        200 | 201 => {
            let mut page: ProcessedPage = serde_json::from_str(body).map_err(|error| {
                TrackerError::new(
                    "backend.process.decode_failed",
                    format!("processed page payload is malformed: {error}"),
                )
            })?;
            page.first_visit = status == 201;
            Ok(ProcessOutcome::Processed(page))
        }
        401 => {
            let text = body.trim();
            if text.is_empty() || text == NOT_LOGGED_IN {
                Ok(ProcessOutcome::SessionExpired(SessionExpiry::NotLoggedIn))
            } else {
                Ok(ProcessOutcome::SessionExpired(SessionExpiry::NotGuildMember {
                    invite: text.to_owned(),
                }))
            }
        }
        403 => {
            let refusal = refusal(body);
            match (refusal.realm, refusal.credentials_path) {
                (Some(realm), Some(credentials_path)) => Ok(ProcessOutcome::MissingCredentials {
                    riddle: refusal.riddle,
                    realm,
                    credentials_path,
                }),
                _ => Ok(ProcessOutcome::Locked {
                    riddle: refusal.riddle,
                }),
            }
        }
        202 => Ok(ProcessOutcome::ShortRun {
            riddle: refusal(body).riddle,
        }),
        404 => Ok(ProcessOutcome::NotFound {
            riddle: refusal(body).riddle,
        }),
        410 => Ok(ProcessOutcome::Discarded {
            riddle: refusal(body).riddle,
        }),
        412 => Ok(match refusal(body).riddle {
            Some(riddle) => ProcessOutcome::NotLevelPage { riddle },
            None => ProcessOutcome::OutsideRiddles,
        }),
        other => Err(TrackerError::new(
            "backend.process.unexpected_status",
            format!("processing endpoint answered `{other}`"),
        )),
    }
}

// Refusals are JSON when the URL belongs to a riddle and plain text otherwise.
fn refusal(body: &str) -> RefusalBody {
    serde_json::from_str(body).unwrap_or_default()
}
