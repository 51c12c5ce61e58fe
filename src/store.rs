//! In-memory, insertion-ordered collection of entries
//!
//! The store exclusively owns its entries. Readers get short-lived borrows
//! ([`RecordStore::find`], [`RecordStore::iter`]) or owned copies
//! ([`RecordStore::snapshot`]). Because `iter` borrows the store, the borrow
//! checker rules out mutation while an iteration is in progress; callers that
//! need to mutate while walking the entries take a snapshot first.

use crate::error::{Result, VaultError};
use crate::record::{Entry, EntryKey};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use zeroize::Zeroize;

#[derive(Debug, Default)]
pub struct RecordStore {
    entries: Vec<Entry>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry at the tail.
    pub fn add(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    fn position(&self, key: &EntryKey) -> Option<usize> {
        self.entries.iter().position(|e| key.matches(e))
    }

    /// Remove the earliest entry matching `key`, keeping the order of the rest.
    pub fn remove(&mut self, key: &EntryKey) -> Result<Entry> {
        match self.position(key) {
            Some(idx) => Ok(self.entries.remove(idx)),
            None => Err(VaultError::not_found(format!("no entry {}", key))),
        }
    }

    /// Remove the entry at `key` and append `entry` at the tail.
    ///
    /// Returns the replaced entry.
    pub fn replace(&mut self, key: &EntryKey, entry: Entry) -> Result<Entry> {
        let old = self.remove(key)?;
        self.add(entry);
        Ok(old)
    }

    pub fn find(&self, key: &EntryKey) -> Option<&Entry> {
        self.entries.iter().find(|e| key.matches(e))
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.position(key).is_some()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.entries.iter()
    }

    /// Owned copy of all entries in insertion order.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.entries.clone()
    }

    /// Owned copy ordered by `compare`. The store itself keeps insertion order.
    pub fn sorted_by<F>(&self, mut compare: F) -> Vec<Entry>
    where
        F: FnMut(&Entry, &Entry) -> Ordering,
    {
        let mut out = self.snapshot();
        out.sort_by(|a, b| compare(a, b));
        out
    }

    pub fn as_slice(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Each entry wipes its fields as it goes.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Distinct non-empty group names in sorted order.
    pub fn groups(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| !e.group.is_empty())
            .map(|e| e.group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// `title` if `(group, title, user)` is free, otherwise the first free
    /// `"title (n)"` for n = 1, 2, ...
    pub fn unique_title(&self, group: &str, title: &str, user: &str) -> String {
        let mut key = EntryKey::new(group, title, user);
        let mut n = 0u32;
        while self.contains(&key) {
            n += 1;
            key.title.zeroize();
            key.title = format!("{} ({})", title, n);
        }
        std::mem::take(&mut key.title)
    }
}

impl Extend<Entry> for RecordStore {
    fn extend<I: IntoIterator<Item = Entry>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl<'a> IntoIterator for &'a RecordStore {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn entry(group: &str, title: &str, user: &str) -> Entry {
        Entry::new(group, title, user, format!("pw-{}", title), "")
    }

    fn titles(store: &RecordStore) -> Vec<String> {
        store.iter().map(|e| e.title.clone()).collect()
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut store = RecordStore::new();
        store.add(entry("b", "zeta", "u"));
        store.add(entry("a", "alpha", "u"));
        store.add(entry("c", "mid", "u"));
        assert_eq!(titles(&store), ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_find_by_composite_key() {
        let mut store = RecordStore::new();
        store.add(entry("Work", "git", "alice"));
        store.add(entry("Work", "git", "bob"));

        let found = store.find(&EntryKey::new("Work", "git", "bob")).unwrap();
        assert_eq!(found.password_str(), Some("pw-git"));
        assert_eq!(found.user, "bob");
        assert!(store.find(&EntryKey::new("Home", "git", "bob")).is_none());
    }

    #[test]
    fn test_remove_keeps_remaining_order() {
        let mut store = RecordStore::new();
        store.add(entry("", "one", "u"));
        store.add(entry("", "two", "u"));
        store.add(entry("", "three", "u"));

        let removed = store.remove(&EntryKey::new("", "two", "u")).unwrap();
        assert_eq!(removed.title, "two");
        assert_eq!(titles(&store), ["one", "three"]);
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut store = RecordStore::new();
        let err = store.remove(&EntryKey::new("", "nope", "u")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_triples_resolve_to_earliest() {
        let mut store = RecordStore::new();
        store.add(Entry::new("", "dup", "u", "first", ""));
        store.add(Entry::new("", "dup", "u", "second", ""));
        let key = EntryKey::new("", "dup", "u");

        assert_eq!(store.find(&key).unwrap().password_str(), Some("first"));
        store.remove(&key).unwrap();
        assert_eq!(store.find(&key).unwrap().password_str(), Some("second"));
    }

    #[test]
    fn test_replace_moves_entry_to_tail() {
        let mut store = RecordStore::new();
        store.add(entry("", "one", "u"));
        store.add(entry("", "two", "u"));

        let old = store
            .replace(&EntryKey::new("", "one", "u"), entry("", "uno", "u"))
            .unwrap();
        assert_eq!(old.title, "one");
        assert_eq!(titles(&store), ["two", "uno"]);
    }

    #[test]
    fn test_replace_missing_leaves_store_untouched() {
        let mut store = RecordStore::new();
        store.add(entry("", "one", "u"));
        let err = store
            .replace(&EntryKey::new("", "two", "u"), entry("", "x", "u"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(titles(&store), ["one"]);
    }

    #[test]
    fn test_snapshot_is_not_a_live_view() {
        let mut store = RecordStore::new();
        store.add(entry("", "one", "u"));
        let snap = store.snapshot();
        store.add(entry("", "two", "u"));
        store.remove(&EntryKey::new("", "one", "u")).unwrap();

        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].title, "one");
    }

    #[test]
    fn test_iteration_is_restartable() {
        let mut store = RecordStore::new();
        store.add(entry("", "a", "u"));
        store.add(entry("", "b", "u"));
        let first: Vec<_> = store.iter().map(|e| e.title.clone()).collect();
        let second: Vec<_> = (&store).into_iter().map(|e| e.title.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sorted_by_does_not_reorder_store() {
        let mut store = RecordStore::new();
        store.add(entry("", "b", "u"));
        store.add(entry("", "a", "u"));
        let sorted = store.sorted_by(|x, y| x.title.cmp(&y.title));
        assert_eq!(sorted[0].title, "a");
        assert_eq!(titles(&store), ["b", "a"]);
    }

    #[test]
    fn test_groups_are_unique_and_sorted() {
        let mut store = RecordStore::new();
        store.add(entry("Work", "a", "u"));
        store.add(entry("", "b", "u"));
        store.add(entry("Bank", "c", "u"));
        store.add(entry("Work", "d", "u"));
        assert_eq!(store.groups(), ["Bank", "Work"]);
    }

    #[test]
    fn test_unique_title() {
        let mut store = RecordStore::new();
        assert_eq!(store.unique_title("g", "mail", "u"), "mail");
        store.add(entry("g", "mail", "u"));
        assert_eq!(store.unique_title("g", "mail", "u"), "mail (1)");
        store.add(entry("g", "mail (1)", "u"));
        assert_eq!(store.unique_title("g", "mail", "u"), "mail (2)");
        assert_eq!(store.unique_title("g", "mail", "other"), "mail");
    }

    #[test]
    fn test_clear_empties_store() {
        let mut store = RecordStore::new();
        store.extend([entry("", "a", "u"), entry("", "b", "u")]);
        assert_eq!(store.len(), 2);
        store.clear();
        assert!(store.is_empty());
    }
}
