//! Per-connection trace ids
//!
//! A trace id only correlates log lines of one session, it never changes
//! how the session behaves.

use rand::Rng;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

const SALT_MIN: u32 = 1 << 20;
const SALT_MAX: u32 = 1 << 30;

/// TraceId is the hex concatenation of the unix time in milliseconds, the
/// local IPv4 address and a random salt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    pub fn generate(local_ip: Option<Ipv4Addr>) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let ip = local_ip.map(u32::from).unwrap_or_default();
        let salt = rand::thread_rng().gen_range(SALT_MIN..SALT_MAX);

        Self(format!("{millis:x}{ip:x}{salt:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_local_ip() {
        let id = TraceId::generate(Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(id.as_str().contains("a000001"));
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_differ() {
        let a = TraceId::generate(None);
        let b = TraceId::generate(None);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_str());
    }
}
