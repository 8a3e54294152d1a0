//! Backend JSON payloads describing riddles and their discovered pages.

use rd_core::TrackerError;
use rd_core::TrackerResult;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-riddle progress record returned by `get-user-riddle-data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiddleData {
    pub alias: String,
    /// Either a single root URL or a JSON-encoded array of root URLs.
    pub root_path: String,
    #[serde(default)]
    pub ordered_levels: Vec<LevelData>,
    #[serde(default)]
    pub last_visited_set: Option<String>,
    #[serde(default)]
    pub last_visited_level: Option<String>,
    #[serde(default)]
    pub blacklisted_pages: Vec<BlacklistedPage>,
}

impl RiddleData {
    /// Every configured root URL, in declaration order.
    pub fn root_paths(&self) -> Vec<String> {
        let trimmed = self.root_path.trim();
        if trimmed.starts_with('[') {
            if let Ok(paths) = serde_json::from_str::<Vec<String>>(trimmed) {
                return paths;
            }
        }
        vec![trimmed.to_owned()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelData {
    pub name: String,
    #[serde(default)]
    pub set_name: String,
}

/// A page that must never be opened directly; `next_path` is opened instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistedPage {
    pub path: String,
    pub next_path: String,
}

/// `levelName → level pages`, as returned by `get-pages`.
pub type PagesData = BTreeMap<String, LevelPagesData>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPagesData {
    #[serde(rename = "/", default)]
    pub root: Option<PageNodeData>,
}

/// Raw page/folder node before validation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageNodeData {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, deserialize_with = "folder_flag")]
    pub folder: bool,
    #[serde(default)]
    pub children: Option<BTreeMap<String, PageNodeData>>,
    #[serde(default)]
    pub level_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub files_found: Option<u32>,
    #[serde(default)]
    pub files_total: Option<u32>,
    #[serde(default)]
    pub access_time: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FolderFlag {
    Bool(bool),
    Int(i64),
}

// The backend stores the flag as a SQL integer on some endpoints.
fn folder_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match FolderFlag::deserialize(deserializer)? {
        FolderFlag::Bool(value) => value,
        FolderFlag::Int(value) => value != 0,
    })
}

pub fn parse_riddles(json: &str) -> TrackerResult<BTreeMap<String, RiddleData>> {
    serde_json::from_str(json).map_err(|error| {
        TrackerError::new(
            "riddle.data.invalid_json",
            format!("failed to decode riddle list: {error}"),
        )
    })
}

pub fn parse_riddle(json: &str) -> TrackerResult<RiddleData> {
    serde_json::from_str(json).map_err(|error| {
        TrackerError::new(
            "riddle.data.invalid_json",
            format!("failed to decode riddle data: {error}"),
        )
    })
}

pub fn parse_pages(json: &str) -> TrackerResult<PagesData> {
    serde_json::from_str(json).map_err(|error| {
        TrackerError::new(
            "riddle.data.invalid_json",
            format!("failed to decode page data: {error}"),
        )
    })
}
