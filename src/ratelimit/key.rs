//! Rate limit key generation.

/// A key that uniquely addresses one limiting window in the coordination store.
///
/// The key is the namespace prefix and the caller-supplied identifier
/// (usually a client address) joined by `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Namespace prefix shared by every key of one limiter
    pub prefix: String,
    /// Caller-supplied identifier
    pub identifier: String,
}

impl RateLimitKey {
    /// Create a new rate limit key.
    pub fn new(prefix: &str, identifier: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// The key as stored in the coordination store.
    pub fn to_store_key(&self) -> String {
        format!("{}:{}", self.prefix, self.identifier)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_creation() {
        let key = RateLimitKey::new("rl", "203.0.113.9");

        assert_eq!(key.prefix, "rl");
        assert_eq!(key.identifier, "203.0.113.9");
        assert_eq!(key.to_store_key(), "rl:203.0.113.9");
        assert_eq!(key.to_string(), "rl:203.0.113.9");
    }

    #[test]
    fn test_ipv6_identifier_keeps_colons() {
        let key = RateLimitKey::new("rl", "2001:db8::1");
        assert_eq!(key.to_store_key(), "rl:2001:db8::1");
    }

    #[test]
    fn test_key_equality() {
        assert_eq!(RateLimitKey::new("rl", "a"), RateLimitKey::new("rl", "a"));
        assert_ne!(RateLimitKey::new("rl", "a"), RateLimitKey::new("bot", "a"));
    }
}
