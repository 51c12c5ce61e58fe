//! Length-prefixed field encoding on top of [`ChainedCipher`]
//!
//! One field on disk is
//!
//! ```text
//! E( len:u32 little-endian || bytes || zero padding )
//! ```
//!
//! padded to whole cipher blocks and chained from the header IV. The reader
//! decrypts the first block to learn the declared length, checks that the
//! remaining input can hold it, and only then decrypts the rest.

use crate::cipher::{BLOCK_LEN, ChainedCipher, padded_len};
use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::secure::SecureBuffer;

/// Width of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Encrypt one field and append its ciphertext to `out`.
pub fn write(cipher: &ChainedCipher, field: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let declared = u32::try_from(field.len()).map_err(|_| {
        VaultError::new(
            ErrorCategory::User,
            ErrorKind::CannotWrite,
            format!("field of {} bytes exceeds the 4 GiB field limit", field.len()),
        )
    })?;

    let mut plain = SecureBuffer::zeroed(LENGTH_PREFIX_LEN + field.len());
    plain.as_mut_bytes()[..LENGTH_PREFIX_LEN].copy_from_slice(&declared.to_le_bytes());
    plain.as_mut_bytes()[LENGTH_PREFIX_LEN..].copy_from_slice(field);
    out.extend_from_slice(&cipher.encrypt_field(plain.as_bytes()));
    Ok(())
}

/// Sequential field reader over an in-memory ciphertext stream.
pub struct FieldReader<'a> {
    cipher: &'a ChainedCipher,
    input: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(cipher: &'a ChainedCipher, input: &'a [u8]) -> Self {
        Self {
            cipher,
            input,
            pos: 0,
        }
    }

    /// True once every byte of the input has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos == self.input.len()
    }

    /// Offset of the next field within the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read the next field.
    ///
    /// Returns `Ok(None)` when the input ends exactly on a field boundary,
    /// which is the normal end of a container. A stream that ends inside a
    /// field, or declares more bytes than remain, is `CorruptContainer`.
    pub fn read(&mut self) -> Result<Option<SecureBuffer>> {
        let remaining = &self.input[self.pos..];
        if remaining.is_empty() {
            return Ok(None);
        }
        if remaining.len() < BLOCK_LEN {
            return Err(VaultError::corrupt(format!(
                "input truncated inside the length block of the field at offset {}",
                self.pos
            )));
        }

        let mut chain = self.cipher.iv();
        let mut first = SecureBuffer::from_slice(&remaining[..BLOCK_LEN]);
        self.cipher.decrypt_blocks(&mut chain, first.as_mut_bytes());

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        prefix.copy_from_slice(&first.as_bytes()[..LENGTH_PREFIX_LEN]);
        let declared = u32::from_le_bytes(prefix) as usize;

        let total = LENGTH_PREFIX_LEN
            .checked_add(declared)
            .map(padded_len)
            .ok_or_else(|| VaultError::corrupt("field length overflows"))?;
        if total > remaining.len() {
            return Err(VaultError::corrupt(format!(
                "field at offset {} declares {} bytes but only {} bytes of input remain",
                self.pos,
                declared,
                remaining.len() - LENGTH_PREFIX_LEN.min(remaining.len())
            )));
        }

        let mut rest = SecureBuffer::from_slice(&remaining[BLOCK_LEN..total]);
        self.cipher.decrypt_blocks(&mut chain, rest.as_mut_bytes());

        // Plaintext is first[4..] followed by rest; take `declared` bytes of it.
        let head = &first.as_bytes()[LENGTH_PREFIX_LEN..];
        let from_head = declared.min(head.len());
        let from_rest = declared - from_head;

        let padding_ok = head[from_head..].iter().all(|&b| b == 0)
            && rest.as_bytes()[from_rest..].iter().all(|&b| b == 0);
        if !padding_ok {
            return Err(VaultError::corrupt(format!(
                "field at offset {} has non-zero padding",
                self.pos
            )));
        }

        let mut field = SecureBuffer::zeroed(declared);
        field.as_mut_bytes()[..from_head].copy_from_slice(&head[..from_head]);
        field.as_mut_bytes()[from_head..].copy_from_slice(&rest.as_bytes()[..from_rest]);

        self.pos += total;
        Ok(Some(field))
    }
}
