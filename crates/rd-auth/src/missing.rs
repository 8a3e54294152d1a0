//! Paths flagged by the backend as protected but not yet unlocked.

use rd_riddle::find_containing_path;
use std::collections::BTreeMap;

/// Per riddle, `credentials path → realm`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingAuthPaths {
    riddles: BTreeMap<String, BTreeMap<String, String>>,
}

impl MissingAuthPaths {
    /// Records `path`; returns false when it was already pending.
    pub fn record(&mut self, riddle: &str, path: &str, realm: &str) -> bool {
        let paths = self.riddles.entry(riddle.to_owned()).or_default();
        if paths.contains_key(path) {
            return false;
        }
        paths.insert(path.to_owned(), realm.to_owned());
        true
    }

    pub fn contains(&self, riddle: &str, path: &str) -> bool {
        self.riddles
            .get(riddle)
            .is_some_and(|paths| paths.contains_key(path))
    }

    pub fn realm(&self, riddle: &str, path: &str) -> Option<&str> {
        self.riddles.get(riddle)?.get(path).map(String::as_str)
    }

    /// The pending entry covering `path` (itself or its longest ancestor).
    pub fn containing(&self, riddle: &str, path: &str) -> Option<&str> {
        find_containing_path(path, self.riddles.get(riddle)?)
    }

    pub fn remove(&mut self, riddle: &str, path: &str) -> Option<String> {
        let paths = self.riddles.get_mut(riddle)?;
        let realm = paths.remove(path);
        if paths.is_empty() {
            self.riddles.remove(riddle);
        }
        realm
    }

    pub fn len(&self) -> usize {
        self.riddles.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.riddles.is_empty()
    }

    pub fn clear(&mut self) {
        self.riddles.clear();
    }
}
