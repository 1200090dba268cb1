//! Password hashing helpers
//!
//! Clients never send the raw password: they send `sha256(password)` as hex.
//! The server stores `sha256(salt || client_hash)` and, on login, re-salts the
//! submitted client hash with the stored salt and compares in constant time.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Bytes of random salt generated per user
pub const SALT_BYTES: usize = 64;

/// Client-side pre-hash sent over the wire in place of the password
pub fn prehash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Fresh random salt, hex encoded
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Salted server-side hash of a client hash, hex encoded
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the salted hash of `password` and compare it to `stored_hash`
pub fn verify_password(password: &str, salt: &str, stored_hash: &str) -> bool {
    let candidate = hash_password(password, salt);
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prehash_is_sha256_hex() {
        let hash = prehash_password("pw1");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, prehash_password("pw1"));
        assert_ne!(hash, prehash_password("pw2"));
    }

    #[test]
    fn test_salt_changes_hash() {
        let a = generate_salt();
        let b = generate_salt();
        assert_eq!(a.len(), SALT_BYTES * 2);
        assert_ne!(a, b);
        assert_ne!(hash_password("x", &a), hash_password("x", &b));
    }

    #[test]
    fn test_verify() {
        let salt = generate_salt();
        let client = prehash_password("secret");
        let stored = hash_password(&client, &salt);

        assert!(verify_password(&client, &salt, &stored));
        assert!(!verify_password(&prehash_password("wrong"), &salt, &stored));
        // submitting the stored hash itself must not authenticate
        assert!(!verify_password(&stored, &salt, &stored));
    }
}
