//! pwvault - passphrase-protected password database
//!
//! Entries live in an encrypted container file: a header carrying a
//! passphrase verification tag, key-derivation salt and chain IV, followed
//! by length-prefixed fields encrypted with Blowfish in CBC mode. Open a
//! database through [`DatabaseSession`].

#![forbid(unsafe_code)]

pub mod cipher;
pub mod config;
pub mod container;
pub mod error;
pub mod field;
pub mod file_ops;
pub mod kdf;
pub mod passphrase;
pub mod pwgen;
pub mod random;
pub mod record;
pub mod secure;
pub mod session;
pub mod store;
pub mod transfer;
pub mod verifier;

pub use config::{BackupConfig, BackupMode, VaultConfig};
pub use container::Container;
pub use error::{ErrorCategory, ErrorKind, Result, VaultError};
pub use pwgen::{CharClass, PasswordPolicy};
pub use record::{Entry, EntryKey};
pub use secure::SecureBuffer;
pub use session::DatabaseSession;
pub use store::RecordStore;
