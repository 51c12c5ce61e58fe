use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Condition flags consumers branch on. Every error carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The container path is missing or unreadable.
    CannotOpen,
    /// The passphrase does not match the container's verification tag.
    /// Expected and recoverable: re-prompt.
    WrongPassphrase,
    /// The container bytes are structurally invalid (truncated header,
    /// impossible length prefix, partial record, ...).
    CorruptContainer,
    /// Writing the container failed. The previous file content is intact.
    CannotWrite,
    /// Lookup or removal of a key that is not in the record store.
    NotFound,
    /// The file exists but holds no container yet (empty file or an
    /// all-zero verification header).
    NoContainer,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Low-level scrypt key derivation failed.
    KeyDerivation,
    /// A configuration file could not be parsed.
    InvalidConfig,
    /// A plaintext export or import file cannot be written or understood.
    InvalidText,
    /// Password generation options that no password can satisfy.
    InvalidPolicy,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct VaultError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Specific condition tag.
    pub kind: ErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl VaultError {
    /// Creates a new error with a category, kind and display message.
    pub fn new(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::new(ErrorCategory::User, ErrorKind::CorruptContainer, msg)
    }

    pub fn wrong_passphrase() -> Self {
        Self::new(
            ErrorCategory::User,
            ErrorKind::WrongPassphrase,
            "passphrase does not match this container",
        )
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCategory::User, ErrorKind::NotFound, msg)
    }

    pub fn cannot_write(msg: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::with_source(ErrorCategory::Internal, ErrorKind::CannotWrite, msg, source)
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// True for the expected "re-prompt" outcome of a bad passphrase.
    pub fn is_wrong_passphrase(&self) -> bool {
        self.kind == ErrorKind::WrongPassphrase
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, VaultError>;
