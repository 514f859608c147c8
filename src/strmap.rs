//! Insertion-ordered, ASCII-case-insensitive multimap.
//!
//! Headers, cookies, query parameters, and multipart fields are all modeled
//! with this type. Each entry keeps the case-preserved name the caller
//! supplied plus a lowercased lookup key, and a plain `Vec` (rather than a
//! hash table) keeps iteration in insertion order for free.

use crate::error::{Error, Result};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrMapEntry {
    key: String,
    name: String,
    value: String,
}

impl StrMapEntry {
    fn new(name: &str, value: &str) -> Self {
        Self {
            key: ascii_lower(name),
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Lowercases ASCII bytes only, leaving bytes `>= 0x80` (UTF-8 continuation
/// and lead bytes of multi-byte sequences) untouched — a per-char
/// `to_lowercase()` would mangle those.
fn ascii_lower(s: &str) -> String {
    let bytes: Vec<u8> = s.bytes().map(|b| b.to_ascii_lowercase()).collect();
    String::from_utf8(bytes).expect("ascii-only transform preserves UTF-8 validity")
}

#[derive(Debug, Clone, Default)]
pub struct StrMap {
    entries: Vec<StrMapEntry>,
}

impl StrMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new entry, admitting duplicate names.
    pub fn add(&mut self, name: &str, value: &str) {
        self.entries.push(StrMapEntry::new(name, value));
    }

    /// Replaces the first entry with a matching key, or appends if absent.
    pub fn set(&mut self, name: &str, value: &str) {
        let key = ascii_lower(name);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.name = name.to_owned();
            entry.value = value.to_owned();
        } else {
            self.entries.push(StrMapEntry::new(name, value));
        }
    }

    /// Locates the first entry by case-insensitive name.
    pub fn find(&self, name: &str) -> Option<&StrMapEntry> {
        let key = ascii_lower(name);
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut StrMapEntry> {
        let key = ascii_lower(name);
        self.entries.iter_mut().find(|e| e.key == key)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.find(name).map(|e| e.value())
    }

    /// Removes the first entry matching `name`. Returns whether anything
    /// was removed.
    pub fn rm(&mut self, name: &str) -> bool {
        let key = ascii_lower(name);
        if let Some(pos) = self.entries.iter().position(|e| e.key == key) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Visits entries in insertion order. Stops as soon as `cb` returns
    /// non-zero, propagating that code verbatim to the caller.
    pub fn iter<F>(&self, mut cb: F) -> i32
    where
        F: FnMut(&StrMapEntry) -> i32,
    {
        for entry in &self.entries {
            let rc = cb(entry);
            if rc != 0 {
                return rc;
            }
        }
        0
    }

    /// Stable sort driven by a caller comparator.
    pub fn sort<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&StrMapEntry, &StrMapEntry) -> Ordering,
    {
        self.entries.sort_by(|a, b| cmp(a, b));
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StrMapEntry] {
        &self.entries
    }

    pub fn cleanup(&mut self) {
        self.entries.clear();
    }
}

/// Fallible variant matching the C API's `invalid_argument` contract for
/// callers that pass through empty names.
pub fn checked_add(map: &mut StrMap, name: &str, value: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument);
    }
    map.add(name, value);
    Ok(())
}
