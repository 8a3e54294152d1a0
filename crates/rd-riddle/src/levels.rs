//! Level ordering: previous/next links between levels and between level sets.

use crate::data::LevelData;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelInfo {
    pub name: String,
    pub set_name: String,
    pub previous: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSet {
    pub name: String,
    pub first_level: String,
    pub last_level: String,
    pub previous: Option<String>,
    pub next: Option<String>,
}

/// Levels of one riddle, in play order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelIndex {
    order: Vec<String>,
    levels: BTreeMap<String, LevelInfo>,
    sets: BTreeMap<String, LevelSet>,
}

impl LevelIndex {
    pub fn build(ordered: &[LevelData]) -> Self {
        let mut index = Self::default();
        let mut current_set: Option<String> = None;

        for (position, level) in ordered.iter().enumerate() {
            let previous = position
                .checked_sub(1)
                .map(|prior| ordered[prior].name.clone());
            let next = ordered.get(position + 1).map(|after| after.name.clone());

            if current_set.as_deref() != Some(level.set_name.as_str()) {
                if let Some(closing) = current_set.as_ref().and_then(|name| index.sets.get_mut(name)) {
                    closing.next = Some(level.set_name.clone());
                }
                index.sets.insert(
                    level.set_name.clone(),
                    LevelSet {
                        name: level.set_name.clone(),
                        first_level: level.name.clone(),
                        last_level: level.name.clone(),
                        previous: current_set.clone(),
                        next: None,
                    },
                );
                current_set = Some(level.set_name.clone());
            }

            if let Some(set) = index.sets.get_mut(&level.set_name) {
                set.last_level = level.name.clone();
            }

            index.order.push(level.name.clone());
            index.levels.insert(
                level.name.clone(),
                LevelInfo {
                    name: level.name.clone(),
                    set_name: level.set_name.clone(),
                    previous,
                    next,
                },
            );
        }

        index
    }

    pub fn get(&self, name: &str) -> Option<&LevelInfo> {
        self.levels.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.levels.contains_key(name)
    }

    pub fn set(&self, name: &str) -> Option<&LevelSet> {
        self.sets.get(name)
    }

    /// Whether `level` is known and belongs to `set_name`.
    pub fn contains_in_set(&self, set_name: &str, level: &str) -> bool {
        self.levels
            .get(level)
            .is_some_and(|info| info.set_name == set_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
