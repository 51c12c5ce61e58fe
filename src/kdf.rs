//! Passphrase stretching with scrypt
//!
//! Both the verification tag and the cipher key are derived from the master
//! passphrase through the same fixed scrypt parameters, salted differently
//! (verification nonce vs. key-derivation salt).

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::secure::SecureBuffer;
use scrypt::{Params, scrypt};

/// Length of derived key in bytes
pub const KEY_LEN: usize = 32;

/// scrypt log2(N) parameter (CPU/memory cost, N = 32768)
const SCRYPT_LOG_N: u8 = 15;

/// scrypt r parameter (block size)
const SCRYPT_R: u32 = 8;

/// scrypt p parameter (parallelization)
const SCRYPT_P: u32 = 1;

/// Derive a 32-byte key from a passphrase and salt using scrypt
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<SecureBuffer> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN).map_err(|e| {
        VaultError::new(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("failed to create scrypt params: {}", e),
        )
    })?;

    let mut key = SecureBuffer::zeroed(KEY_LEN);
    scrypt(passphrase, salt, &params, key.as_mut_bytes()).map_err(|e| {
        VaultError::new(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;

    Ok(key)
}
