//! Blowfish in cipher-block-chaining mode, restarted from the header IV for
//! every field.

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::kdf;
use crate::secure::SecureBuffer;
use blowfish::Blowfish;
use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use std::fmt;

/// Cipher block size in bytes
pub const BLOCK_LEN: usize = 8;

/// Length of the key-derivation salt in bytes
pub const SALT_LEN: usize = 20;

/// Length of the chain IV in bytes
pub const IV_LEN: usize = BLOCK_LEN;

/// Size of `len` bytes once padded to whole blocks; never less than one block.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_LEN).max(1) * BLOCK_LEN
}

fn xor_block(block: &mut [u8], chain: &[u8; BLOCK_LEN]) {
    for (b, c) in block.iter_mut().zip(chain.iter()) {
        *b ^= c;
    }
}

/// Key schedule plus the per-file chain IV.
///
/// The key schedule is wiped when the cipher is dropped.
pub struct ChainedCipher {
    schedule: Blowfish,
    iv: [u8; IV_LEN],
}

impl ChainedCipher {
    /// Derive the key schedule from `(passphrase, salt)`.
    pub fn new(passphrase: &[u8], salt: &[u8; SALT_LEN], iv: [u8; IV_LEN]) -> Result<Self> {
        let key = kdf::derive_key(passphrase, salt)?;
        Self::with_key(&key, iv)
    }

    pub(crate) fn with_key(key: &SecureBuffer, iv: [u8; IV_LEN]) -> Result<Self> {
        let schedule = Blowfish::new_from_slice(key.as_bytes()).map_err(|e| {
            VaultError::new(
                ErrorCategory::Internal,
                ErrorKind::KeyDerivation,
                format!("invalid cipher key: {}", e),
            )
        })?;
        Ok(Self { schedule, iv })
    }

    pub fn iv(&self) -> [u8; IV_LEN] {
        self.iv
    }

    /// Encrypt whole blocks in place, continuing from `chain`.
    ///
    /// `data.len()` must be a multiple of [`BLOCK_LEN`].
    pub fn encrypt_blocks(&self, chain: &mut [u8; BLOCK_LEN], data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_LEN, 0);
        for block in data.chunks_exact_mut(BLOCK_LEN) {
            xor_block(block, chain);
            self.schedule
                .encrypt_block(GenericArray::from_mut_slice(block));
            chain.copy_from_slice(block);
        }
    }

    /// Decrypt whole blocks in place, continuing from `chain`.
    ///
    /// `data.len()` must be a multiple of [`BLOCK_LEN`].
    pub fn decrypt_blocks(&self, chain: &mut [u8; BLOCK_LEN], data: &mut [u8]) {
        debug_assert_eq!(data.len() % BLOCK_LEN, 0);
        for block in data.chunks_exact_mut(BLOCK_LEN) {
            let mut next = [0u8; BLOCK_LEN];
            next.copy_from_slice(block);
            self.schedule
                .decrypt_block(GenericArray::from_mut_slice(block));
            xor_block(block, chain);
            *chain = next;
        }
    }

    /// Zero-pad `plain` to whole blocks and encrypt it from a fresh chain.
    pub fn encrypt_field(&self, plain: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; padded_len(plain.len())];
        out[..plain.len()].copy_from_slice(plain);
        let mut chain = self.iv;
        self.encrypt_blocks(&mut chain, &mut out);
        out
    }

    /// Decrypt a whole field from a fresh chain. Padding is left in place;
    /// the caller interprets the length prefix.
    pub fn decrypt_field(&self, cipher: &[u8]) -> Result<SecureBuffer> {
        if cipher.is_empty() || cipher.len() % BLOCK_LEN != 0 {
            return Err(VaultError::corrupt(format!(
                "ciphertext of {} bytes is not a whole number of blocks",
                cipher.len()
            )));
        }
        let mut out = SecureBuffer::from_slice(cipher);
        let mut chain = self.iv;
        self.decrypt_blocks(&mut chain, out.as_mut_bytes());
        Ok(out)
    }
}

impl fmt::Debug for ChainedCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedCipher").finish_non_exhaustive()
    }
}
