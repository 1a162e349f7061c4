//! SHA-1 based node/key hashing (spec §3, §6).
//!
//! Both protocols place identifiers on a ring by hashing `str(id)` with
//! SHA-1 and keeping the low-order hex digits. Grounded in the same
//! digest-family idiom `pants`'s `hashing` crate uses for content hashes:
//! a `Digest` impl from the `sha1`/`digest` family, formatted with `hex`.

use sha1::{Digest, Sha1};

/// Hash `id` with SHA-1 over its decimal string representation (UTF-8,
/// matching `hashlib.sha1(str(id).encode('utf-8'))` in the source) and
/// return the value of its first `hex_digits` hex characters.
///
/// # Panics
/// Panics if `hex_digits` is 0 or exceeds 40 (SHA-1 produces 20 bytes, i.e.
/// 40 hex digits) — both are configuration errors, not runtime conditions.
pub fn hash_id(id: u64, hex_digits: usize) -> u64 {
    assert!(
        hex_digits > 0 && hex_digits <= 40,
        "hex_digits must be in 1..=40, got {hex_digits}"
    );
    hash_bytes(id.to_string().as_bytes(), hex_digits)
}

/// Same as [`hash_id`] but over an arbitrary byte string — used for hashing
/// Chord/Pastry *keys*, which the source also routes through `str(key)`.
pub fn hash_bytes(data: &[u8], hex_digits: usize) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let hex_str = hex::encode(digest);
    u64::from_str_radix(&hex_str[..hex_digits], 16).expect("hex digest always parses as hex")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_id(42, 6), hash_id(42, 6));
    }

    #[test]
    fn hash_fits_requested_digits() {
        let h = hash_id(1234, 6);
        assert!(h < 16u64.pow(6));
    }

    #[test]
    fn different_ids_usually_differ() {
        assert_ne!(hash_id(1, 6), hash_id(2, 6));
    }
}
