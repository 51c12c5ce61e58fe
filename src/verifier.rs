//! Passphrase verification without storing the passphrase
//!
//! A container header carries a random nonce and a tag computed as
//! `H(passphrase, nonce)`:
//!
//! ```text
//! stretched = scrypt(passphrase, nonce)
//! tag       = HMAC-SHA256(stretched, "pwvault-verifier")[..20]
//! ```
//!
//! Neither the passphrase nor the cipher key (which uses a different salt)
//! can be recovered from the pair.

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::kdf;
use crate::random;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of the verification nonce in bytes
pub const NONCE_LEN: usize = 8;

/// Length of the stored verification tag in bytes
pub const TAG_LEN: usize = 20;

const VERIFIER_CONTEXT: &[u8] = b"pwvault-verifier";

/// A nonce and the tag it yields for one passphrase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verification {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

fn keyed_mac(passphrase: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<HmacSha256> {
    let stretched = kdf::derive_key(passphrase, nonce)?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(stretched.as_bytes()).map_err(|e| {
        VaultError::new(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("failed to key verifier MAC: {}", e),
        )
    })?;
    mac.update(VERIFIER_CONTEXT);
    Ok(mac)
}

/// Compute `H(passphrase, nonce)`.
pub fn compute_tag(passphrase: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<[u8; TAG_LEN]> {
    let digest = keyed_mac(passphrase, nonce)?.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&digest[..TAG_LEN]);
    Ok(tag)
}

/// Draw a fresh nonce and compute its tag for `passphrase`.
pub fn generate(passphrase: &[u8]) -> Result<Verification> {
    let nonce = random::array::<NONCE_LEN>();
    let tag = compute_tag(passphrase, &nonce)?;
    Ok(Verification { nonce, tag })
}

/// Recompute the tag for `passphrase` and compare it to `tag`.
///
/// A mismatch is `Ok(false)`, never an error. The comparison does not exit
/// early on the first differing byte.
pub fn verify(passphrase: &[u8], nonce: &[u8; NONCE_LEN], tag: &[u8; TAG_LEN]) -> Result<bool> {
    Ok(keyed_mac(passphrase, nonce)?.verify_truncated_left(tag).is_ok())
}
