//! Random password generation from selectable character classes
//!
//! Every position is drawn uniformly from the union of the selected
//! classes, so larger classes contribute proportionally more characters.
//! A candidate that misses one of the selected classes is discarded and
//! drawn again.

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::random;
use crate::secure::SecureBuffer;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"+-=_@#$%^&;:,.<>/~\\[](){}?!|";
const HEX_DIGITS: &[u8] = b"0123456789abcdef";

// Look-alike characters (l, I, O, 0, 1, ...) removed.
const EASY_LOWERCASE: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const EASY_UPPERCASE: &[u8] = b"ABCDEFGHJKLMNPQRTUVWXY";
const EASY_DIGITS: &[u8] = b"346789";
const EASY_SYMBOLS: &[u8] = b"+-=_@#$%^&<>/~\\?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CharClass {
    Lowercase,
    Uppercase,
    Digit,
    Symbol,
    HexDigit,
}

impl CharClass {
    pub const ALL: [CharClass; 5] = [
        CharClass::Lowercase,
        CharClass::Uppercase,
        CharClass::Digit,
        CharClass::Symbol,
        CharClass::HexDigit,
    ];

    fn chars(self, easy_vision: bool) -> &'static [u8] {
        match (self, easy_vision) {
            (CharClass::Lowercase, false) => LOWERCASE,
            (CharClass::Lowercase, true) => EASY_LOWERCASE,
            (CharClass::Uppercase, false) => UPPERCASE,
            (CharClass::Uppercase, true) => EASY_UPPERCASE,
            (CharClass::Digit, false) => DIGITS,
            (CharClass::Digit, true) => EASY_DIGITS,
            (CharClass::Symbol, false) => SYMBOLS,
            (CharClass::Symbol, true) => EASY_SYMBOLS,
            (CharClass::HexDigit, _) => HEX_DIGITS,
        }
    }
}

/// What a generated password must look like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub length: usize,
    pub classes: Vec<CharClass>,
    /// Leave out characters that are easily confused with one another.
    pub easy_vision: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: 16,
            classes: vec![
                CharClass::Lowercase,
                CharClass::Uppercase,
                CharClass::Digit,
                CharClass::Symbol,
            ],
            easy_vision: false,
        }
    }
}

impl PasswordPolicy {
    /// Generate a password of `length` characters containing at least one
    /// character of every selected class.
    pub fn generate(&self) -> Result<SecureBuffer> {
        let mut classes = self.classes.clone();
        classes.sort();
        classes.dedup();
        if classes.is_empty() {
            return Err(policy_error("no character class selected"));
        }
        if self.length < classes.len() {
            return Err(policy_error(format!(
                "a password of {} characters cannot contain all {} selected classes",
                self.length,
                classes.len()
            )));
        }

        // Segment end offsets of each class inside the pool.
        let mut pool = Vec::new();
        let mut ends = Vec::with_capacity(classes.len());
        for class in &classes {
            pool.extend_from_slice(class.chars(self.easy_vision));
            ends.push(pool.len());
        }

        let mut draws = Draws::new(pool.len());
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut password = SecureBuffer::zeroed(self.length);
            let mut seen = vec![false; classes.len()];
            for slot in password.as_mut_bytes() {
                let idx = draws.next();
                *slot = pool[idx];
                let class = ends.iter().position(|&end| idx < end).unwrap_or(0);
                seen[class] = true;
            }
            if seen.iter().all(|&s| s) {
                tracing::debug!(length = self.length, attempts, "generated password");
                return Ok(password);
            }
        }
    }
}

/// Generate a `length`-character password from the standard alphabets of
/// `classes`.
pub fn generate_password(length: usize, classes: &[CharClass]) -> Result<SecureBuffer> {
    PasswordPolicy {
        length,
        classes: classes.to_vec(),
        easy_vision: false,
    }
    .generate()
}

fn policy_error(msg: impl Into<String>) -> VaultError {
    VaultError::new(ErrorCategory::User, ErrorKind::InvalidPolicy, msg)
}

/// Uniform indices in `0..bound` from random bytes, rejecting the bytes
/// that would bias the low indices.
struct Draws {
    bound: usize,
    limit: usize,
    buf: SecureBuffer,
    pos: usize,
}

impl Draws {
    fn new(bound: usize) -> Self {
        debug_assert!(bound > 0 && bound <= 256);
        let mut buf = SecureBuffer::zeroed(64);
        random::fill(buf.as_mut_bytes());
        Self {
            bound,
            limit: 256 - 256 % bound,
            buf,
            pos: 0,
        }
    }

    fn next(&mut self) -> usize {
        loop {
            if self.pos == self.buf.len() {
                random::fill(self.buf.as_mut_bytes());
                self.pos = 0;
            }
            let byte = self.buf.as_bytes()[self.pos] as usize;
            self.pos += 1;
            if byte < self.limit {
                return byte % self.bound;
            }
        }
    }
}
