//! Security primitives: random tokens and session cookies.

pub mod cookies;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Generate an unguessable token: 32 random bytes, base64url without
/// padding. Used for CSRF tokens and per-session secrets.
pub fn random_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = random_token();
        let b = random_token();

        assert_ne!(a, b);
        // 32 bytes -> 43 base64url characters, no padding.
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
