//! Cache key fingerprints.
//!
//! Keys are hex-encoded SHA-256 digests prefixed with their cache family, so response and
//! query entries can never collide even if they end up in the same store.

use sha2::{Digest, Sha256};

pub const RESPONSE_KEY_PREFIX: &str = "resp:";
pub const QUERY_KEY_PREFIX: &str = "q:";

/// Fingerprint of an HTTP request: digest of `METHOD:path?query`.
pub fn response_key(method: &str, path: &str, raw_query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b":");
    hasher.update(path.as_bytes());
    hasher.update(b"?");
    hasher.update(raw_query.as_bytes());
    format!("{RESPONSE_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Fingerprint of a logical query string.
pub fn query_key(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    format!("{QUERY_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_keys_are_deterministic_and_prefixed() {
        let first = response_key("GET", "/api/menus", "page=1");
        let second = response_key("GET", "/api/menus", "page=1");

        assert_eq!(first, second);
        assert!(first.starts_with(RESPONSE_KEY_PREFIX));
        // prefix + 32 bytes of hex
        assert_eq!(first.len(), RESPONSE_KEY_PREFIX.len() + 64);
    }

    #[test]
    fn method_path_and_query_all_contribute() {
        let base = response_key("GET", "/api/menus", "page=1");

        assert_ne!(base, response_key("HEAD", "/api/menus", "page=1"));
        assert_ne!(base, response_key("GET", "/api/menu", "page=1"));
        assert_ne!(base, response_key("GET", "/api/menus", "page=2"));
    }

    #[test]
    fn keys_do_not_reveal_the_path() {
        let key = response_key("GET", "/api/users", "");
        assert!(!key.contains("users"));
    }

    #[test]
    fn query_keys_use_their_own_namespace() {
        let key = query_key("SELECT * FROM menus");

        assert!(key.starts_with(QUERY_KEY_PREFIX));
        assert_eq!(key, query_key("SELECT * FROM menus"));
        assert_ne!(key, query_key("SELECT * FROM items"));
    }
}
