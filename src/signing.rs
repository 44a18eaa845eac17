//! Magic-link tokens, one-time passcodes and signer ordering rules for the
//! contract e-signature flow. Tokens are only ever persisted as SHA-256
//! hex digests.

use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};

pub const SIGNER_PENDING: &str = "PENDING";
pub const SIGNER_VIEWED: &str = "VIEWED";
pub const SIGNER_SIGNED: &str = "SIGNED";
pub const SIGNER_DECLINED: &str = "DECLINED";
pub const SIGNER_EXPIRED: &str = "EXPIRED";

pub const WORKFLOW_SEQUENTIAL: &str = "SEQUENTIAL";
pub const WORKFLOW_PARALLEL: &str = "PARALLEL";

pub const ENVELOPE_DRAFT: &str = "DRAFT";
pub const ENVELOPE_SENT: &str = "SENT";
pub const ENVELOPE_COMPLETED: &str = "COMPLETED";
pub const ENVELOPE_DECLINED: &str = "DECLINED";
pub const ENVELOPE_VOIDED: &str = "VOIDED";

pub fn signer_is_terminal(status: &str) -> bool {
    matches!(status, SIGNER_SIGNED | SIGNER_DECLINED | SIGNER_EXPIRED)
}

pub fn generate_magic_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_otp() -> String {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    format!("{code:06}")
}

/// Sequential workflow rule: signer N may only sign once every signer with
/// a lower sequence number has signed. Callers skip this check for
/// parallel envelopes.
pub fn blocked_by_earlier_signer<'a, I>(signers: I, sequence_number: i32) -> bool
where
    I: IntoIterator<Item = (i32, &'a str)>,
{
    signers
        .into_iter()
        .any(|(seq, status)| seq < sequence_number && status != SIGNER_SIGNED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_tokens_are_unique_and_hashed() {
        let a = generate_magic_token();
        let b = generate_magic_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn sequential_order_is_enforced() {
        let signers = [(1, SIGNER_SIGNED), (2, SIGNER_PENDING), (3, SIGNER_PENDING)];
        assert!(!blocked_by_earlier_signer(signers, 2));
        assert!(blocked_by_earlier_signer(signers, 3));
    }

    #[test]
    fn first_signer_is_never_blocked() {
        let signers = [(1, SIGNER_PENDING), (2, SIGNER_PENDING)];
        assert!(!blocked_by_earlier_signer(signers, 1));
    }

    #[test]
    fn viewed_or_declined_predecessors_still_block() {
        let signers = [(1, SIGNER_VIEWED), (2, SIGNER_PENDING)];
        assert!(blocked_by_earlier_signer(signers, 2));
        let signers = [(1, SIGNER_DECLINED), (2, SIGNER_PENDING)];
        assert!(blocked_by_earlier_signer(signers, 2));
    }

    #[test]
    fn terminal_statuses_are_recognised() {
        assert!(signer_is_terminal(SIGNER_SIGNED));
        assert!(signer_is_terminal(SIGNER_DECLINED));
        assert!(signer_is_terminal(SIGNER_EXPIRED));
        assert!(!signer_is_terminal(SIGNER_PENDING));
        assert!(!signer_is_terminal(SIGNER_VIEWED));
    }
}
