// src/auth.rs
// Single server-wide bearer token (spec §6, §9 "the master token... the
// only process-wide singletons"). Generated once, persisted in the
// Store, reused across restarts. No per-user JWT is needed here — the
// teacher's `auth/jwt.rs` issues per-user claims, which doesn't apply to
// a single-operator control server, so this is a deliberate replacement
// rather than a reuse of that module.

use base64::Engine;
use rand::RngCore;

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn tokens_match(expected: &str, presented: &str) -> bool {
    // Constant-time-ish comparison; tokens are short so this is not a
    // hard timing-safety requirement, but there is no reason to use `==`
    // when a simple XOR fold is this cheap.
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .bytes()
        .zip(presented.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

pub fn extract_bearer(header_value: Option<&str>) -> Option<&str> {
    header_value?.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_is_url_safe_and_nonempty() {
        let t = generate_token();
        assert!(!t.is_empty());
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_match() {
        let a = generate_token();
        assert!(tokens_match(&a, &a));
        assert!(!tokens_match(&a, "wrong"));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("abc")), None);
        assert_eq!(extract_bearer(None), None);
    }
}
