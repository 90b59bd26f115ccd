//! Referral code generation.
//!
//! Codes are short random tokens from an unambiguous charset. Uniqueness
//! is collision-checked against the store with a bounded retry.

use rand::Rng;

use crate::error::{EngineError, Result};
use crate::interfaces::CommissionStore;

/// Charset excludes easily-confused characters (0/O, 1/I/L).
const CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generate one random referral code of `length` characters.
pub fn referral_code(length: u32) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate a referral code not yet present in the store.
///
/// Retries up to `max_attempts` times before giving up.
pub async fn unique_referral_code(
    store: &dyn CommissionStore,
    length: u32,
    max_attempts: u32,
) -> Result<String> {
    for _ in 0..max_attempts {
        let code = referral_code(length);
        if store.affiliate_by_code(&code).await?.is_none() {
            return Ok(code);
        }
    }
    Err(EngineError::ReferralCodeExhausted {
        attempts: max_attempts,
    })
}
