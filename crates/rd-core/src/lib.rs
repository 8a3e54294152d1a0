//! Shared primitives used across the riddle tracker crates.

use core::fmt;
use serde::Deserialize;
use serde::Serialize;

/// Result alias used across the workspace.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Workspace error carrying a dotted machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerError {
    pub code: &'static str,
    pub message: String,
}

impl TrackerError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true when the code belongs to the given dotted namespace (`"tabs"`, `"net.http"`).
    pub fn is_in(&self, namespace: &str) -> bool {
        self.code
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for TrackerError {}

/// Browser tab identifier as reported by the extension host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network request identifier; stable across redirects and repeated auth challenges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one credential prompt channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptChannelId(pub u64);

impl fmt::Display for PromptChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prompt-{}", self.0)
    }
}

/// HTTP basic auth username/password pair.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Passwords never reach log output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Credentials;
    use super::TrackerError;

    #[test]
    fn error_display_includes_code() {
        let error = TrackerError::new("tabs.gone", "tab 4 was closed");
        assert_eq!(error.to_string(), "tabs.gone: tab 4 was closed");
    }

    #[test]
    fn namespace_check_respects_segment_boundaries() {
        let error = TrackerError::new("net.http.status_invalid", "bad");
        assert!(error.is_in("net"));
        assert!(error.is_in("net.http"));
        assert!(error.is_in("net.http.status_invalid"));
        assert!(!error.is_in("net.ht"));
        assert!(!error.is_in("tabs"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
