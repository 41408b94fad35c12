//! Translation cache
//!
//! Bounded LRU of successful translations keyed by direction, style and source text.
//! Shared across the jobs of one translator.

use crate::prompt::{Direction, PromptOptions, TranslationStyle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries; 0 disables caching.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub direction: Direction,
    pub style: TranslationStyle,
    pub text: String,
}

impl CacheKey {
    pub fn new(options: &PromptOptions, text: &str) -> Self {
        Self {
            direction: options.direction,
            style: options.style,
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Default)]
struct Inner {
    max_entries: usize,
    entries: HashMap<CacheKey, (String, u64)>,
    /// Recency tick -> key; the smallest tick is evicted first.
    recency: BTreeMap<u64, CacheKey>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn touch(&mut self, key: &CacheKey) {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, old_tick)) = self.entries.get_mut(key) {
            self.recency.remove(&*old_tick);
            *old_tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }
}

pub struct TranslationCache {
    inner: Mutex<Inner>,
}

impl TranslationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                max_entries: config.max_entries,
                ..Inner::default()
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().max_entries > 0
    }

    /// Applies a new capacity, evicting least recently used entries that no longer fit.
    pub fn configure(&self, config: CacheConfig) {
        let mut inner = self.inner.lock();
        if inner.max_entries == config.max_entries {
            return;
        }
        debug!(
            from = inner.max_entries,
            to = config.max_entries,
            "Resizing translation cache"
        );
        inner.max_entries = config.max_entries;
        while inner.entries.len() > inner.max_entries {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.max_entries == 0 {
            return None;
        }
        let value = inner.entries.get(key).map(|(value, _)| value.clone());
        match value {
            Some(value) => {
                inner.hits += 1;
                inner.touch(key);
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn insert(&self, key: CacheKey, translation: String) {
        let mut inner = self.inner.lock();
        if inner.max_entries == 0 {
            return;
        }
        if inner.entries.contains_key(&key) {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.0 = translation;
            }
            inner.touch(&key);
            return;
        }
        while inner.entries.len() >= inner.max_entries {
            let Some((_, oldest)) = inner.recency.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
        inner.tick += 1;
        let tick = inner.tick;
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(key, (translation, tick));
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.entries.len(),
            max_size: inner.max_entries,
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }
}
