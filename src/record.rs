//! Password entries and their composite lookup key

use crate::secure::SecureBuffer;
use time::OffsetDateTime;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Current time at the whole-second precision stored on disk.
pub(crate) fn now() -> OffsetDateTime {
    truncate_to_second(OffsetDateTime::now_utc())
}

fn truncate_to_second(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(0).unwrap_or(t)
}

/// One password database entry.
///
/// All text fields are wiped when the entry is dropped; the password lives
/// in a [`SecureBuffer`].
#[derive(Clone, Debug, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Entry {
    pub group: String,
    pub title: String,
    pub user: String,
    pub password: SecureBuffer,
    pub notes: String,
    #[zeroize(skip)]
    created: Option<OffsetDateTime>,
    #[zeroize(skip)]
    modified: Option<OffsetDateTime>,
}

impl Entry {
    pub fn new(
        group: impl Into<String>,
        title: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<SecureBuffer>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            title: title.into(),
            user: user.into(),
            password: password.into(),
            notes: notes.into(),
            created: None,
            modified: None,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.group.clone(), self.title.clone(), self.user.clone())
    }

    /// The password as UTF-8 text, if it is valid UTF-8.
    pub fn password_str(&self) -> Option<&str> {
        self.password.as_str()
    }

    pub fn created(&self) -> Option<OffsetDateTime> {
        self.created
    }

    pub fn modified(&self) -> Option<OffsetDateTime> {
        self.modified
    }

    /// Timestamps are kept at whole-second precision.
    pub fn set_created(&mut self, at: Option<OffsetDateTime>) {
        self.created = at.map(truncate_to_second);
    }

    pub fn set_modified(&mut self, at: Option<OffsetDateTime>) {
        self.modified = at.map(truncate_to_second);
    }

    pub fn with_created(mut self, at: OffsetDateTime) -> Self {
        self.set_created(Some(at));
        self
    }

    pub fn with_modified(mut self, at: OffsetDateTime) -> Self {
        self.set_modified(Some(at));
        self
    }
}

/// Lookup identity of an entry: (group, title, user).
///
/// Not unique by construction; lookups resolve to the earliest match in
/// insertion order. Keys are copies of decrypted fields and are wiped on
/// drop like the entry they came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Zeroize, ZeroizeOnDrop)]
pub struct EntryKey {
    pub group: String,
    pub title: String,
    pub user: String,
}

impl EntryKey {
    pub fn new(group: impl Into<String>, title: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            title: title.into(),
            user: user.into(),
        }
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.group == entry.group && self.title == entry.title && self.user == entry.user
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{} [{}]", self.title, self.user)
        } else {
            write!(f, "{}/{} [{}]", self.group, self.title, self.user)
        }
    }
}
