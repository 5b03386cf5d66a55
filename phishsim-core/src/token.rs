//! Tracking token codec.
//!
//! Tokens are purely random: they encode nothing about the campaign or the
//! recipient, so no client-visible identifier can be decoded or forged into
//! another recipient's tracking state. The (token -> campaign, user)
//! mapping lives server-side in the result store.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::Error;

/// Raw entropy per token. 24 bytes -> 32 base64url chars.
const TOKEN_BYTES: usize = 24;

/// Fixed length of every minted token.
pub const TOKEN_LEN: usize = 32;

/// Mint a fresh opaque tracking identifier from the OS RNG.
pub fn mint_tracking_id() -> Result<String, Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Parse(format!("system rng unavailable: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Cheap shape check done before any database lookup, so malformed probes
/// never reach the result store.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn minted_tokens_have_fixed_length_and_safe_alphabet() {
        for _ in 0..100 {
            let t = mint_tracking_id().unwrap();
            assert_eq!(t.len(), TOKEN_LEN);
            assert!(is_well_formed(&t), "bad token: {t}");
        }
    }

    #[test]
    fn minted_tokens_do_not_collide_in_practice() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(mint_tracking_id().unwrap()));
        }
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"a".repeat(TOKEN_LEN + 1)));
        assert!(!is_well_formed(&format!("{}!", "a".repeat(TOKEN_LEN - 1))));
        // padded base64 is not something we ever mint
        assert!(!is_well_formed(&format!("{}==", "a".repeat(TOKEN_LEN - 2))));
    }
}
