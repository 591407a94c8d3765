//! Client identifier derivation for admission control.

use axum::http::HeaderMap;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::warn;

/// Header carrying the original client address through proxies.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identifier shared by every request that cannot be attributed to a client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Proxy addresses allowed to report the client through `X-Forwarded-For`.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    addrs: HashSet<IpAddr>,
}

impl TrustedProxies {
    /// Parse proxy addresses, skipping entries that are not IP addresses.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut addrs = HashSet::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.parse::<IpAddr>() {
                Ok(ip) => {
                    addrs.insert(ip.to_canonical());
                }
                Err(e) => warn!(entry, error = %e, "Ignoring invalid trusted proxy address"),
            }
        }
        Self { addrs }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.addrs.contains(&ip.to_canonical())
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// Derive the rate limit identifier for a request.
///
/// The left-most `X-Forwarded-For` address is used only when the connecting
/// peer is a trusted proxy; otherwise the peer address itself. Requests with
/// neither share the [`UNKNOWN_CLIENT`] bucket.
pub fn client_identifier(headers: &HeaderMap, peer: Option<IpAddr>, trusted: &TrustedProxies) -> String {
    if let Some(peer) = peer {
        if trusted.contains(&peer) {
            if let Some(forwarded) = forwarded_client(headers) {
                return forwarded;
            }
        }
        return peer.to_canonical().to_string();
    }
    UNKNOWN_CLIENT.to_string()
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}
