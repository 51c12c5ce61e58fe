//! Process-wide random source for salts, IVs and verification nonces
//!
//! A single ChaCha-based generator, seeded once from the OS on first use.
//! There is no error path: if the OS entropy source is unavailable at
//! seeding time the process aborts via panic, since no secret can be created
//! safely without it.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::{Mutex, OnceLock};

static SOURCE: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn source() -> &'static Mutex<StdRng> {
    SOURCE.get_or_init(|| Mutex::new(StdRng::from_entropy()))
}

/// Fill `buf` with cryptographically suitable random bytes.
pub fn fill(buf: &mut [u8]) {
    // A poisoned lock only means another thread panicked mid-fill; the
    // generator state itself is still valid.
    let mut rng = source().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    rng.fill_bytes(buf);
}

/// Convenience for fixed-size header values.
pub fn array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    fill(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_produces_distinct_values() {
        let a: [u8; 20] = array();
        let b: [u8; 20] = array();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_covers_whole_buffer() {
        // 64 zero bytes surviving a fill is vanishingly unlikely.
        let mut buf = [0u8; 64];
        fill(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_fill_from_many_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| array::<8>()))
            .collect();
        let values: Vec<[u8; 8]> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (i, a) in values.iter().enumerate() {
            for b in &values[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
