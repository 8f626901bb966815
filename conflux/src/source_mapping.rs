//! Maps a subscriber group to the event sources it wants to consume.
use crate::identifier::Identifier;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// What sources a group wants to consume, keyed by group name.
#[derive(Default)]
pub struct SourceMappingRegistry {
    mappings: Mutex<HashMap<String, HashSet<Identifier>>>,
}

impl SourceMappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the set of sources `group` should consume, replacing any prior entry.
    pub fn register(&self, group: impl Into<String>, sources: impl IntoIterator<Item = Identifier>) {
        self.mappings
            .lock()
            .expect("source mapping mutex poisoned")
            .insert(group.into(), sources.into_iter().collect());
    }

    /// Returns the sources registered for `group`, or an empty set if none.
    pub fn get(&self, group: &str) -> HashSet<Identifier> {
        self.mappings
            .lock()
            .expect("source mapping mutex poisoned")
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns all registered group names.
    pub fn groups(&self) -> Vec<String> {
        self.mappings
            .lock()
            .expect("source mapping mutex poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
