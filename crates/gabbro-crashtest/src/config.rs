//! Layered parameter maps and per-iteration resolved configurations.
//!
//! A [`ParamMap`] holds `Resolvable` entries accumulated from catalog
//! layers; later layers strictly override earlier ones per key. A single
//! [`ParamMap::resolve`] pass evaluates every sampled entry exactly once,
//! producing the [`Configuration`] for one iteration.

use std::collections::BTreeMap;

use crate::catalog::Resolvable;
use crate::rng::StressRng;
use crate::value::OptionValue;

// ============================================================================
// Parameter Map
// ============================================================================

/// Ordered map from option name to its resolution rule.
#[derive(Debug, Clone, Default)]
pub struct ParamMap {
    entries: BTreeMap<String, Resolvable>,
}

impl ParamMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one catalog layer; entries override any earlier layer.
    pub fn apply(&mut self, layer: Vec<(&'static str, Resolvable)>) {
        for (key, resolvable) in layer {
            self.entries.insert(key.to_owned(), resolvable);
        }
    }

    /// Sets a single entry, overriding any earlier layer.
    pub fn set(&mut self, key: impl Into<String>, resolvable: Resolvable) {
        self.entries.insert(key.into(), resolvable);
    }

    /// Looks up an entry.
    pub fn get(&self, key: &str) -> Option<&Resolvable> {
        self.entries.get(key)
    }

    /// Whether the map contains `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Reads a `Fixed` integer entry; sampled or non-integer entries read as
    /// `None`.
    pub fn fixed_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(Resolvable::Fixed(value)) => value.as_int(),
            _ => None,
        }
    }

    /// Reads a `Fixed` string entry.
    pub fn fixed_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(Resolvable::Fixed(value)) => value.as_str(),
            _ => None,
        }
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Resolvable)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Evaluates every sampled entry exactly once, producing the concrete
    /// configuration for one iteration.
    pub fn resolve(&self, rng: &mut StressRng) -> Configuration {
        let mut values = BTreeMap::new();
        for (key, resolvable) in &self.entries {
            let value = match resolvable {
                Resolvable::Fixed(value) => value.clone(),
                Resolvable::Sampled(sampler) => sampler.sample(rng),
            };
            values.insert(key.clone(), value);
        }
        Configuration { values }
    }
}

// ============================================================================
// Resolved Configuration
// ============================================================================

/// Concrete option values for exactly one iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    values: BTreeMap<String, OptionValue>,
}

impl Configuration {
    /// Creates an empty configuration (useful in tests).
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Integer view with the same absent-means-zero semantics the
    /// compatibility rules are written against.
    pub fn int(&self, key: &str) -> i64 {
        self.values.get(key).and_then(OptionValue::as_int).unwrap_or(0)
    }

    /// Float view; absent keys read as zero.
    pub fn float(&self, key: &str) -> f64 {
        self.values
            .get(key)
            .and_then(OptionValue::as_float)
            .unwrap_or(0.0)
    }

    /// String view; absent keys read as the empty string.
    pub fn str(&self, key: &str) -> &str {
        self.values.get(key).and_then(OptionValue::as_str).unwrap_or("")
    }

    /// Adds `delta` to an integer key (used for percentage-budget folds).
    pub fn add_int(&mut self, key: &str, delta: i64) {
        let next = self.int(key) + delta;
        self.values.insert(key.to_owned(), OptionValue::Int(next));
    }

    /// Whether the configuration contains `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the configuration is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
