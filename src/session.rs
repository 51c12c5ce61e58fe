//! Database session: one open container and the entries read from it
//!
//! The session owns the container (and with it the derived cipher key) and
//! the [`RecordStore`]. Nothing outside the session holds key material or
//! decrypted fields past [`DatabaseSession::close`].

use crate::config::VaultConfig;
use crate::container::Container;
use crate::error::{Result, VaultError};
use crate::file_ops;
use crate::record::{self, Entry, EntryKey};
use crate::store::RecordStore;
use crate::transfer::{self, ImportSummary};
use std::io::{BufRead, Write};
use std::path::Path;

pub struct DatabaseSession {
    container: Container,
    store: RecordStore,
    config: VaultConfig,
    modified: bool,
    /// Number of leading store entries known to match the file, in order.
    /// `None` once a removal or replacement means only a full rewrite will do.
    persisted: Option<usize>,
}

impl DatabaseSession {
    /// Open `path`, verify `passphrase`, and load every entry.
    pub fn open(path: &Path, passphrase: &[u8]) -> Result<Self> {
        Self::open_with_config(path, passphrase, VaultConfig::default())
    }

    pub fn open_with_config(path: &Path, passphrase: &[u8], config: VaultConfig) -> Result<Self> {
        let container = Container::open(path, passphrase)?;
        let mut store = RecordStore::new();
        store.extend(container.read_all_records()?);
        tracing::info!(path = %path.display(), entries = store.len(), "opened database");
        Ok(Self {
            persisted: Some(store.len()),
            container,
            store,
            config,
            modified: false,
        })
    }

    /// Create an empty database at `path`, replacing any file there.
    pub fn new_database(path: &Path, passphrase: &[u8]) -> Result<Self> {
        Self::new_database_with_config(path, passphrase, VaultConfig::default())
    }

    pub fn new_database_with_config(
        path: &Path,
        passphrase: &[u8],
        config: VaultConfig,
    ) -> Result<Self> {
        let container = Container::create(path, passphrase)?;
        Ok(Self {
            container,
            store: RecordStore::new(),
            config,
            modified: false,
            persisted: Some(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.container.path()
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// True when there are changes not yet saved.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Owned copy of every entry in insertion order.
    pub fn records(&self) -> Vec<Entry> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn find(&self, key: &EntryKey) -> Option<&Entry> {
        self.store.find(key)
    }

    /// Append `entry`, stamping its timestamps if it has none.
    pub fn add(&mut self, mut entry: Entry) {
        let now = record::now();
        if entry.created().is_none() {
            entry.set_created(Some(now));
        }
        if entry.modified().is_none() {
            entry.set_modified(Some(now));
        }
        self.store.add(entry);
        self.modified = true;
    }

    pub fn remove(&mut self, key: &EntryKey) -> Result<Entry> {
        let removed = self.store.remove(key)?;
        self.persisted = None;
        self.modified = true;
        Ok(removed)
    }

    /// Replace the entry at `key` with `entry`, moving it to the tail.
    ///
    /// `entry` inherits the old creation time when it has none, and is
    /// stamped as modified now.
    pub fn replace(&mut self, key: &EntryKey, mut entry: Entry) -> Result<Entry> {
        let created = self
            .store
            .find(key)
            .ok_or_else(|| VaultError::not_found(format!("no entry {}", key)))?
            .created();
        if entry.created().is_none() {
            entry.set_created(created);
        }
        entry.set_modified(Some(record::now()));

        let old = self.store.replace(key, entry)?;
        self.persisted = None;
        self.modified = true;
        Ok(old)
    }

    /// Add every entry of a plaintext export read from `input`.
    ///
    /// Titles that collide with an existing entry are renamed, and entries
    /// without timestamps are stamped as in [`DatabaseSession::add`].
    pub fn import_text(&mut self, input: &mut dyn BufRead, group_prefix: &str) -> Result<ImportSummary> {
        let parsed = transfer::read_text(input, group_prefix)?;
        let summary = ImportSummary {
            imported: parsed.entries.len(),
            skipped: parsed.skipped,
        };
        for mut entry in parsed.entries {
            transfer::retitle(&self.store, &mut entry);
            self.add(entry);
        }
        tracing::info!(
            path = %self.path().display(),
            imported = summary.imported,
            skipped = summary.skipped,
            "imported entries"
        );
        Ok(summary)
    }

    /// Write every entry in plaintext to `out`.
    pub fn export_text(&self, out: &mut dyn Write) -> Result<usize> {
        transfer::export_text(&self.store, out)
    }

    fn backup(&self, target: &Path) {
        if let Err(e) = file_ops::backup_existing(target, &self.config.backup) {
            tracing::warn!(path = %target.display(), error = %e, "backup failed, saving anyway");
        }
    }

    /// Persist the store to the container.
    ///
    /// When only entries have been added since the last save, and
    /// `append_on_save` is set, the new entries are appended to the file;
    /// otherwise the file is rewritten. Both read back identically.
    pub fn save(&mut self) -> Result<()> {
        let len = self.store.len();
        match self.persisted {
            Some(done) if done == len => {
                tracing::debug!(path = %self.path().display(), "nothing to save");
            }
            Some(done) if self.config.append_on_save && done < len => {
                self.backup(self.container.path());
                self.container
                    .append_records(&self.store.as_slice()[done..])?;
            }
            _ => return self.rewrite(),
        }
        self.persisted = Some(len);
        self.modified = false;
        tracing::info!(path = %self.path().display(), entries = len, "saved database");
        Ok(())
    }

    /// Rewrite the whole container from the store, whether or not anything
    /// changed since the last save.
    pub fn rewrite(&mut self) -> Result<()> {
        self.backup(self.container.path());
        self.container.write_all_records(self.store.as_slice())?;
        self.persisted = Some(self.store.len());
        self.modified = false;
        tracing::info!(path = %self.path().display(), entries = self.store.len(), "rewrote database");
        Ok(())
    }

    /// Write every entry under the current key to `path` and continue the
    /// session there.
    pub fn save_as(&mut self, path: &Path) -> Result<()> {
        self.backup(path);
        self.container.save_as(path, self.store.as_slice())?;
        self.persisted = Some(self.store.len());
        self.modified = false;
        Ok(())
    }

    /// Re-key the database from `old` to `new`, rewriting every entry.
    ///
    /// Unsaved changes are written along with the re-keyed entries.
    pub fn change_passphrase(&mut self, old: &[u8], new: &[u8]) -> Result<()> {
        if !self.container.verify(old)? {
            return Err(VaultError::wrong_passphrase());
        }
        self.backup(self.container.path());
        self.container
            .change_passphrase(new, self.store.as_slice())?;
        self.persisted = Some(self.store.len());
        self.modified = false;
        Ok(())
    }

    /// End the session, wiping every entry. Unsaved changes are discarded.
    pub fn close(mut self) {
        if self.modified {
            tracing::warn!(path = %self.path().display(), "closing with unsaved changes");
        }
        self.store.clear();
        tracing::info!(path = %self.path().display(), "closed database");
    }
}

impl std::fmt::Debug for DatabaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSession")
            .field("path", &self.path())
            .field("entries", &self.store.len())
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}
