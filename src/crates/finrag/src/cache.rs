//! In-process answer cache keyed by the normalized standalone query.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::config::CacheConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Default)]
struct Entries {
    answers: HashMap<String, CachedAnswer>,
    order: VecDeque<String>,
}

/// Bounded FIFO cache
pub struct AnswerCache {
    enabled: bool,
    max_entries: usize,
    entries: Mutex<Entries>,
}

impl AnswerCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled && config.max_entries > 0,
            max_entries: config.max_entries,
            entries: Mutex::new(Entries::default()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            max_entries: 0,
        })
    }

    /// Lowercase, collapse whitespace, drop trailing `?`/`.`/`!`
    pub fn normalize(query: &str) -> String {
        query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
            .trim_end_matches(['?', '.', '!'])
            .trim_end()
            .to_string()
    }

    pub fn get(&self, query: &str) -> Option<CachedAnswer> {
        if !self.enabled {
            return None;
        }
        self.entries.lock().answers.get(&Self::normalize(query)).cloned()
    }

    pub fn put(&self, query: &str, answer: CachedAnswer) {
        let key = Self::normalize(query);
        if !self.enabled || key.is_empty() || answer.answer.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.answers.insert(key.clone(), answer).is_none() {
            entries.order.push_back(key);
        }
        while entries.order.len() > self.max_entries {
            if let Some(oldest) = entries.order.pop_front() {
                entries.answers.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AnswerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerCache")
            .field("enabled", &self.enabled)
            .field("max_entries", &self.max_entries)
            .field("len", &self.len())
            .finish()
    }
}
