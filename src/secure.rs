//! Owned secret storage that is overwritten before it is released
//!
//! Every passphrase, piece of derived key material and decrypted field value
//! lives in a [`SecureBuffer`]. The buffer is wiped on every destruction path
//! (explicit [`SecureBuffer::release`], scope exit, unwinding), and copies are
//! only made through an explicit `clone()`, each of which wipes itself in turn.

use std::fmt;
use zeroize::Zeroize;

pub struct SecureBuffer {
    bytes: Vec<u8>,
}

impl SecureBuffer {
    /// Takes ownership of `bytes` without copying.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// The contents as UTF-8, if they are valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Wipes and frees the buffer now instead of at scope exit.
    pub fn release(self) {
        drop(self);
    }

    fn wipe(&mut self) {
        #[cfg(test)]
        let held = self.bytes.clone();

        self.bytes.as_mut_slice().zeroize();

        #[cfg(test)]
        wipe_observer::record(held, &self.bytes);

        // Covers spare capacity as well, then truncates to zero length.
        self.bytes.zeroize();
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl Zeroize for SecureBuffer {
    fn zeroize(&mut self) {
        self.wipe();
    }
}

impl Clone for SecureBuffer {
    fn clone(&self) -> Self {
        Self::from_slice(&self.bytes)
    }
}

/// Compares every byte regardless of where the first mismatch is.
impl PartialEq for SecureBuffer {
    fn eq(&self, other: &Self) -> bool {
        if self.bytes.len() != other.bytes.len() {
            return false;
        }
        let diff = self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0
    }
}

impl Eq for SecureBuffer {}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer(<{} bytes redacted>)", self.bytes.len())
    }
}

impl From<Vec<u8>> for SecureBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<String> for SecureBuffer {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<&str> for SecureBuffer {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

impl AsRef<[u8]> for SecureBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Test-only instrumentation: records, per thread, what each buffer held
/// and what its backing memory contained right after the overwrite.
#[cfg(test)]
pub(crate) mod wipe_observer {
    use std::cell::RefCell;

    pub(crate) struct Wiped {
        pub held: Vec<u8>,
        pub after: Vec<u8>,
    }

    thread_local! {
        static SEEN: RefCell<Option<Vec<Wiped>>> = const { RefCell::new(None) };
    }

    pub(crate) fn start() {
        SEEN.with(|seen| *seen.borrow_mut() = Some(Vec::new()));
    }

    pub(crate) fn take() -> Vec<Wiped> {
        SEEN.with(|seen| seen.borrow_mut().take().unwrap_or_default())
    }

    pub(super) fn record(held: Vec<u8>, after: &[u8]) {
        SEEN.with(|seen| {
            if let Some(list) = seen.borrow_mut().as_mut() {
                list.push(Wiped {
                    held,
                    after: after.to_vec(),
                });
            }
        });
    }
}
