//! A single gline record and the tri-state active flag applied to it.

use super::now_ts;
use ipnet::IpNet;

/// What an incoming event says about a gline's enforcement state.
///
/// Modelled explicitly rather than as an `Option<bool>` so that call sites
/// cannot confuse "no information" with "deactivate".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveFlag {
    /// The event carries no activation information; leave the record as-is.
    Unchanged,
    /// The gline is being enforced.
    SetActive,
    /// The gline exists but is not enforced.
    SetInactive,
}

impl ActiveFlag {
    /// Lift a parsed boolean into an explicit flag.
    pub fn explicit(active: bool) -> Self {
        if active { Self::SetActive } else { Self::SetInactive }
    }

    /// The boolean to apply, or `None` for `Unchanged`.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unchanged => None,
            Self::SetActive => Some(true),
            Self::SetInactive => Some(false),
        }
    }
}

/// One ban mask as reconstructed from server notices.
///
/// `mask` is the case-insensitive identity key within a bucket. Records are
/// mutated in place by later events and never deleted; an expired record is
/// still reported, distinct from "not found".
#[derive(Debug, Clone)]
pub struct GlineRecord {
    network: IpNet,
    user: String,
    mask: String,
    reason: String,
    expire_ts: i64,
    last_mod_ts: i64,
    active: bool,
}

impl GlineRecord {
    pub fn new(
        network: IpNet,
        user: &str,
        mask: &str,
        expire_ts: i64,
        last_mod_ts: i64,
        reason: &str,
        active: bool,
    ) -> Self {
        Self {
            network,
            user: user.to_string(),
            mask: mask.to_string(),
            reason: reason.to_string(),
            expire_ts,
            last_mod_ts,
            active,
        }
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn mask(&self) -> &str {
        &self.mask
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn expire_ts(&self) -> i64 {
        self.expire_ts
    }

    pub fn last_mod_ts(&self) -> i64 {
        self.last_mod_ts
    }

    /// The raw enforcement flag, ignoring expiry.
    pub fn raw_active(&self) -> bool {
        self.active
    }

    /// Whether the gline is currently enforced: flagged active and not expired.
    pub fn is_active(&self) -> bool {
        self.active && self.expire_ts > now_ts()
    }

    pub fn seconds_until_expiration(&self) -> i64 {
        self.expire_ts - now_ts()
    }

    /// Hours until expiry, rounded up: one hour and one second reports 2.
    pub fn hours_until_expiration(&self) -> i64 {
        ((self.expire_ts - now_ts()) as f64 / 3600.0).ceil() as i64
    }

    /// Hours since the last mutation, rounded up.
    pub fn hours_since_last_mod(&self) -> i64 {
        ((now_ts() - self.last_mod_ts) as f64 / 3600.0).ceil() as i64
    }

    /// Apply an update event in place.
    ///
    /// `expire_ts == 0` and an empty `reason` mean "leave unchanged";
    /// `active` follows its own tri-state. The modification timestamp is
    /// always refreshed.
    pub fn update(&mut self, active: ActiveFlag, expire_ts: i64, reason: &str) {
        self.last_mod_ts = now_ts();
        if let Some(flag) = active.as_bool() {
            self.active = flag;
        }
        if !reason.is_empty() {
            self.reason = reason.to_string();
        }
        if expire_ts != 0 {
            self.expire_ts = expire_ts;
        }
    }
}
