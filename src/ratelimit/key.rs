//! Store key derivation.

/// Compute the time bucket index for `now_secs`.
///
/// Buckets are `interval_secs` wide and aligned to the Unix epoch, so every
/// instance derives the same index for the same second.
pub fn time_bucket(now_secs: u64, interval_secs: u64) -> u64 {
    now_secs / interval_secs.max(1)
}

/// A key that identifies one counter in the shared store.
///
/// The key is the strategy prefix followed by the caller's identity and,
/// for bucketed strategies, `:` and the time bucket index. Because the
/// bucket is part of the key, windows roll over without an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitKey<'a> {
    /// Namespace and strategy segment, e.g. `rate:limiter:fixed:`
    pub prefix: &'a str,
    /// Caller-supplied identity
    pub identity: &'a str,
    /// Time bucket index, if the strategy is bucketed
    pub bucket: Option<u64>,
}

impl<'a> RateLimitKey<'a> {
    /// A key without a time bucket.
    pub fn plain(prefix: &'a str, identity: &'a str) -> Self {
        Self {
            prefix,
            identity,
            bucket: None,
        }
    }

    /// A key scoped to a time bucket.
    pub fn bucketed(prefix: &'a str, identity: &'a str, bucket: u64) -> Self {
        Self {
            prefix,
            identity,
            bucket: Some(bucket),
        }
    }
}

impl std::fmt::Display for RateLimitKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bucket {
            Some(bucket) => write!(f, "{}{}:{}", self.prefix, self.identity, bucket),
            None => write!(f, "{}{}", self.prefix, self.identity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key() {
        let key = RateLimitKey::plain("rate:limiter:token:", "client_a");
        assert_eq!(key.to_string(), "rate:limiter:token:client_a");
    }

    #[test]
    fn test_bucketed_key() {
        let key = RateLimitKey::bucketed("rate:limiter:fixed:", "client_a", 1704067200);
        assert_eq!(key.to_string(), "rate:limiter:fixed:client_a:1704067200");
    }

    #[test]
    fn test_time_bucket() {
        assert_eq!(time_bucket(0, 1), 0);
        assert_eq!(time_bucket(1000, 1), 1000);
        assert_eq!(time_bucket(1019, 10), 101);
        assert_eq!(time_bucket(1020, 10), 102);
        assert_eq!(time_bucket(59, 60), 0);
    }

    #[test]
    fn test_time_bucket_zero_interval() {
        assert_eq!(time_bucket(1234, 0), 1234);
    }

    #[test]
    fn test_key_equality() {
        let a = RateLimitKey::bucketed("p:", "id", 5);
        let b = RateLimitKey::bucketed("p:", "id", 5);
        let c = RateLimitKey::bucketed("p:", "id", 6);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
