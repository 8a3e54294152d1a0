//! Immutable view of every tracked riddle, swapped wholesale on refresh.

use crate::data::PagesData;
use crate::data::RiddleData;
use crate::levels::LevelIndex;
use crate::registry::ResolvedPath;
use crate::registry::RiddleEntry;
use crate::registry::RiddleRegistry;
use crate::registry::SensitivePathRules;
use crate::tree::PageTree;
use rd_core::Credentials;
use rd_core::TrackerResult;
use rd_net::VisitedUrl;
use std::collections::BTreeMap;

/// Progress state of one riddle.
#[derive(Debug, Clone, Default)]
pub struct RiddleProgress {
    pub levels: LevelIndex,
    pub tree: PageTree,
    pub last_visited_set: Option<String>,
    pub last_visited_level: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RiddleSnapshot {
    registry: RiddleRegistry,
    riddles: BTreeMap<String, RiddleProgress>,
}

impl RiddleSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a snapshot from every riddle's data and pages. Riddles without pages get an
    /// empty tree.
    pub fn build(
        riddles: &BTreeMap<String, RiddleData>,
        pages: &BTreeMap<String, PagesData>,
        sensitive: &SensitivePathRules,
    ) -> TrackerResult<Self> {
        let empty = PagesData::new();
        let mut entries = Vec::with_capacity(riddles.len());
        let mut progress = BTreeMap::new();

        for data in riddles.values() {
            entries.push(RiddleEntry::from_data(data, sensitive)?);
            let riddle_pages = pages.get(&data.alias).unwrap_or(&empty);
            progress.insert(data.alias.clone(), build_progress(data, riddle_pages)?);
        }

        Ok(Self {
            registry: RiddleRegistry::new(entries)?,
            riddles: progress,
        })
    }

    /// A new snapshot with one riddle fully rebuilt (or added).
    pub fn with_riddle(
        &self,
        data: &RiddleData,
        pages: &PagesData,
        sensitive: &SensitivePathRules,
    ) -> TrackerResult<Self> {
        let entry = RiddleEntry::from_data(data, sensitive)?;
        let mut riddles = self.riddles.clone();
        riddles.insert(data.alias.clone(), build_progress(data, pages)?);

        Ok(Self {
            registry: self.registry.with_entry(entry),
            riddles,
        })
    }

    /// A new snapshot with the given level pages merged into an already known riddle.
    pub fn with_level_pages(
        &self,
        alias: &str,
        set_name: &str,
        level_name: &str,
        pages: &PagesData,
    ) -> TrackerResult<Self> {
        let mut riddles = self.riddles.clone();
        let progress = riddles.entry(alias.to_owned()).or_default();
        progress.tree = progress.tree.merged(pages)?;
        progress.last_visited_set = Some(set_name.to_owned());
        progress.last_visited_level = Some(level_name.to_owned());

        Ok(Self {
            registry: self.registry.clone(),
            riddles,
        })
    }

    /// A new snapshot where `path` of `alias` holds `credentials`; `None` if the page is unknown.
    pub fn with_credentials(
        &self,
        alias: &str,
        path: &str,
        credentials: &Credentials,
    ) -> Option<Self> {
        let tree = self.riddles.get(alias)?.tree.with_credentials(path, credentials)?;
        let mut riddles = self.riddles.clone();
        if let Some(progress) = riddles.get_mut(alias) {
            progress.tree = tree;
        }

        Some(Self {
            registry: self.registry.clone(),
            riddles,
        })
    }

    pub fn registry(&self) -> &RiddleRegistry {
        &self.registry
    }

    pub fn entry(&self, alias: &str) -> Option<&RiddleEntry> {
        self.registry.entry(alias)
    }

    pub fn progress(&self, alias: &str) -> Option<&RiddleProgress> {
        self.riddles.get(alias)
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn resolve(&self, url: &VisitedUrl) -> Option<ResolvedPath> {
        self.registry.resolve(url)
    }

    pub fn resolve_str(&self, raw: &str) -> Option<ResolvedPath> {
        self.registry.resolve_str(raw)
    }

    /// Whether `level` of `set_name` is already part of the local riddle data.
    pub fn knows_level(&self, alias: &str, set_name: &str, level: &str) -> bool {
        self.riddles
            .get(alias)
            .is_some_and(|progress| progress.levels.contains_in_set(set_name, level))
    }

    pub fn unlocked_credentials(&self, alias: &str, path: &str) -> Option<&Credentials> {
        self.riddles.get(alias)?.tree.unlocked_credentials(path)
    }
}

fn build_progress(data: &RiddleData, pages: &PagesData) -> TrackerResult<RiddleProgress> {
    let levels = LevelIndex::build(&data.ordered_levels);
    let tree = PageTree::build(pages, levels.names())?;
    Ok(RiddleProgress {
        levels,
        tree,
        last_visited_set: data.last_visited_set.clone(),
        last_visited_level: data.last_visited_level.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::RiddleSnapshot;
    use crate::data::parse_pages;
    use crate::data::parse_riddles;
    use crate::registry::SensitivePathRules;
    use rd_core::Credentials;
    use std::collections::BTreeMap;

    fn snapshot() -> RiddleSnapshot {
        let riddles = parse_riddles(
            r#"{"rns": {"alias": "rns", "rootPath": "https://example.com/riddle/*",
                "orderedLevels": [{"name": "1", "setName": "Act I"}]}}"#,
        );
        let riddles = riddles.unwrap_or_else(|error| panic!("{error}"));
        let pages = parse_pages(
            r#"{"1": {"/": {"path": "/", "folder": true, "children": {
                "secret": {"path": "/secret", "folder": true, "username": "u", "password": "p",
                    "children": {}}
            }}}}"#,
        );
        let mut all_pages = BTreeMap::new();
        all_pages.insert("rns".to_owned(), pages.unwrap_or_else(|error| panic!("{error}")));

        RiddleSnapshot::build(&riddles, &all_pages, &SensitivePathRules::default())
            .unwrap_or_else(|error| panic!("{error}"))
    }

    #[test]
    fn resolves_and_finds_unlocked_credentials() {
        let snapshot = snapshot();
        let resolved = snapshot.resolve_str("https://example.com/riddle/secret/page.htm");
        let resolved = resolved.unwrap_or_else(|| unreachable!());
        assert_eq!(resolved.path, "/secret/page.htm");
        assert_eq!(
            snapshot.unlocked_credentials(&resolved.riddle, &resolved.path),
            Some(&Credentials::new("u", "p"))
        );
        assert!(snapshot.knows_level("rns", "Act I", "1"));
        assert!(!snapshot.knows_level("rns", "Act I", "2"));
    }

    #[test]
    fn level_merge_records_last_visited_level() {
        let snapshot = snapshot();
        let pages = parse_pages(
            r#"{"1": {"/": {"path": "/", "folder": true, "children": {
                "fresh.htm": {"path": "/fresh.htm", "folder": false}
            }}}}"#,
        );
        let pages = pages.unwrap_or_else(|error| panic!("{error}"));
        let merged = snapshot.with_level_pages("rns", "Act I", "1", &pages);
        let merged = merged.unwrap_or_else(|error| panic!("{error}"));

        let progress = merged.progress("rns").unwrap_or_else(|| unreachable!());
        assert!(progress.tree.lookup("/fresh.htm").is_some());
        assert_eq!(progress.last_visited_level.as_deref(), Some("1"));
        assert!(snapshot.progress("rns").is_some_and(|old| old.tree.lookup("/fresh.htm").is_none()));
    }

    #[test]
    fn empty_snapshot_resolves_nothing() {
        let snapshot = RiddleSnapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.resolve_str("https://example.com/riddle/"), None);
    }
}
