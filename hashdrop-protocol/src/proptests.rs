//! Property-based tests for the digest engine.

use proptest::prelude::*;

use crate::digest::{
    compute_digest, compute_digest_with_salt, verify_digest, DIGEST_HEX_LEN, SALT_LEN,
};

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

proptest! {
    /// An unsalted digest always verifies against its own payload.
    #[test]
    fn unsalted_digest_verifies(payload: Vec<u8>) {
        let digest = compute_digest(&payload);
        prop_assert!(verify_digest(&payload, &[], digest.as_str()));
    }

    /// A salted digest verifies when the same salt is supplied.
    #[test]
    fn salted_digest_verifies(payload: Vec<u8>) {
        let (digest, salt) = compute_digest_with_salt(&payload).unwrap();
        prop_assert_eq!(salt.len(), SALT_LEN);
        prop_assert!(verify_digest(&payload, salt.as_bytes(), digest.as_str()));
    }

    /// Flipping any single bit of the payload breaks verification.
    #[test]
    fn single_bit_flip_fails_verification(
        payload in prop::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (digest, salt) = compute_digest_with_salt(&payload).unwrap();
        let mut mutated = payload.clone();
        let i = index.index(mutated.len());
        mutated[i] ^= 1 << bit;
        prop_assert!(!verify_digest(&mutated, salt.as_bytes(), digest.as_str()));
    }

    /// Same input, same digest.
    #[test]
    fn compute_is_deterministic(payload: Vec<u8>) {
        prop_assert_eq!(compute_digest(&payload), compute_digest(&payload));
    }

    /// Two salted digests of one input use different salts and differ.
    #[test]
    fn salted_digests_are_unique_per_call(payload: Vec<u8>) {
        let (d1, s1) = compute_digest_with_salt(&payload).unwrap();
        let (d2, s2) = compute_digest_with_salt(&payload).unwrap();
        prop_assert_ne!(s1, s2);
        prop_assert_ne!(d1, d2);
    }

    /// Digests are fixed-length lowercase hex.
    #[test]
    fn digest_is_fixed_length_lowercase_hex(payload: Vec<u8>) {
        let digest = compute_digest(&payload);
        prop_assert_eq!(digest.as_str().len(), DIGEST_HEX_LEN);
        prop_assert!(is_lower_hex(digest.as_str()));

        let (salted, _) = compute_digest_with_salt(&payload).unwrap();
        prop_assert_eq!(salted.as_str().len(), DIGEST_HEX_LEN);
        prop_assert!(is_lower_hex(salted.as_str()));
    }
}
