//! Referral code derivation
//!
//! Codes are 8 characters from a 32-symbol alphabet (no I/L/O/U, so codes
//! survive being read aloud or retyped), derived from a SHA3-256 digest of
//! the user id and a retry nonce. The caller bumps the nonce until the
//! unique index on `user_profiles.referral_code` accepts the insert.

use sha3::{Digest, Sha3_256};

use crate::referral::UserId;

const CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKMNPQRSTVWXYZ0123456789";

/// Length of generated referral codes (column allows up to 12).
pub const CODE_LEN: usize = 8;

/// Maximum derivation attempts before giving up on a unique code.
pub const MAX_CODE_ATTEMPTS: u32 = 16;

/// Derive the candidate referral code for a user and attempt number.
pub fn derive_code(user_id: UserId, attempt: u32) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(user_id.to_le_bytes());
    hasher.update(attempt.to_le_bytes());
    let digest = hasher.finalize();

    digest
        .iter()
        .take(CODE_LEN)
        .map(|b| CODE_ALPHABET[(b % 32) as usize] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_deterministic() {
        assert_eq!(derive_code(42, 0), derive_code(42, 0));
    }

    #[test]
    fn codes_vary_by_user_and_attempt() {
        assert_ne!(derive_code(1, 0), derive_code(2, 0));
        assert_ne!(derive_code(1, 0), derive_code(1, 1));
    }

    #[test]
    fn codes_use_the_restricted_alphabet() {
        for user_id in [1i64, 99, 1_000_000] {
            let code = derive_code(user_id, 0);
            assert_eq!(code.len(), CODE_LEN);
            for c in code.bytes() {
                assert!(
                    CODE_ALPHABET.contains(&c),
                    "unexpected character {:?} in code {}",
                    c as char,
                    code
                );
            }
        }
    }
}
