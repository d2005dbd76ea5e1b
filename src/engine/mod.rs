//! The gline tracking engine: record model, prefix index, and store.
//!
//! Raw protocol lines are parsed elsewhere ([`crate::parser`]); this module
//! owns the reconciled table of ban records. One [`store::GlineStore`] exists
//! per IRC network session and is discarded wholesale on reconnect.

pub mod prefix;
pub mod record;
pub mod store;

pub use prefix::{GlineBucket, PrefixIndex};
pub use record::{ActiveFlag, GlineRecord};
pub use store::{GlineStore, Upsert};

use crate::error::EngineError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::IpAddr;

/// Current unix time in seconds.
pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Normalize the host portion of a gline mask (or a lookup argument) into a
/// canonical network.
///
/// A bare address gets a `/32` (IPv4) or `/128` (IPv6) suffix; a string that
/// already carries a `/` is parsed as a CIDR network as-is. Host bits below
/// the prefix are zeroed so that equal networks compare equal.
pub fn normalize_host(host: &str) -> Result<IpNet, EngineError> {
    if host.contains('/') {
        return host
            .parse::<IpNet>()
            .map(|net| net.trunc())
            .map_err(|_| EngineError::InvalidAddress(host.to_string()));
    }
    match host.parse::<IpAddr>() {
        Ok(addr) => Ok(host_net(addr)),
        Err(_) => Err(EngineError::InvalidAddress(host.to_string())),
    }
}

/// The single-address network for a bare IP (`/32` or `/128`).
pub fn host_net(addr: IpAddr) -> IpNet {
    match addr {
        IpAddr::V4(v4) => IpNet::V4(Ipv4Net::new_assert(v4, 32)),
        IpAddr::V6(v6) => IpNet::V6(Ipv6Net::new_assert(v6, 128)),
    }
}

/// Split a gline mask at its `@` into `(user, host)`.
pub(crate) fn split_mask(mask: &str) -> Result<(&str, &str), EngineError> {
    match mask.split_once('@') {
        Some((user, host)) if !host.is_empty() => Ok((user, host)),
        _ => Err(EngineError::BadMask(mask.to_string())),
    }
}
