//! Reconciliation store: merges ban events into the prefix index without
//! duplicating records, and answers point/range lookups.
//!
//! The index sits behind a read/write lock: the protocol worker mutates
//! through `add_or_update` (write lock), while HTTP and channel lookups run
//! `check` concurrently (read lock). Hold time is bounded by one bucket scan.

use super::prefix::{GlineBucket, PrefixIndex};
use super::record::{ActiveFlag, GlineRecord};
use super::{host_net, normalize_host, split_mask};
use crate::error::EngineError;
use ipnet::IpNet;
use parking_lot::RwLock;
use std::net::IpAddr;
use tracing::{debug, warn};

/// How `add_or_update` disposed of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// An existing record with the same mask was updated in place.
    Merged,
    /// A new user-mask joined an existing bucket for the same network.
    InsertedIntoBucket,
    /// A previously unseen network got its first record.
    InsertedNewBucket,
}

/// The ban table for one IRC network session.
#[derive(Debug, Default)]
pub struct GlineStore {
    index: RwLock<PrefixIndex>,
}

impl GlineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard all state. Called on reconnect: the table is a cache of
    /// server truth and is re-primed by the next snapshot burst.
    pub fn reset(&self) {
        *self.index.write() = PrefixIndex::new();
    }

    /// Insert or merge one ban event.
    ///
    /// The mask's host portion selects the bucket by exact network equality
    /// after normalization. On a merge, `expire_ts == 0`, an empty `reason`
    /// and `ActiveFlag::Unchanged` each leave the corresponding field alone.
    /// A brand-new bucket requires an explicit flag and a non-empty reason;
    /// anything else is an upstream parser defect and rejects the event.
    pub fn add_or_update(
        &self,
        mask: &str,
        expire_ts: i64,
        last_mod_ts: i64,
        reason: &str,
        active: ActiveFlag,
        raw_line: &str,
    ) -> Result<Upsert, EngineError> {
        let (user, host) = split_mask(mask)?;
        let target = normalize_host(host)?;

        let mut index = self.index.write();
        if let Some(bucket) = index.exact_mut(&target) {
            if let Some(record) = bucket.find_mut(mask) {
                debug!(mask, "updating existing gline");
                record.update(active, expire_ts, reason);
                return Ok(Upsert::Merged);
            }
            // Same network, different user-mask.
            let enforced = active.as_bool().unwrap_or_else(|| {
                warn!(mask, line = raw_line, "no active flag for a new gline on a known network");
                true
            });
            debug!(mask, network = %target, "adding gline to existing bucket");
            bucket.push(GlineRecord::new(
                target, user, mask, expire_ts, last_mod_ts, reason, enforced,
            ));
            return Ok(Upsert::InsertedIntoBucket);
        }

        let Some(enforced) = active.as_bool() else {
            return Err(EngineError::IntegrityViolation { mask: mask.to_string() });
        };
        if reason.is_empty() {
            return Err(EngineError::IntegrityViolation { mask: mask.to_string() });
        }
        let mut bucket = GlineBucket::new(target);
        bucket.push(GlineRecord::new(
            target, user, mask, expire_ts, last_mod_ts, reason, enforced,
        ));
        index.insert(bucket);
        Ok(Upsert::InsertedNewBucket)
    }

    /// Look up an IP or CIDR range.
    ///
    /// Returns `(active, inactive)` record snapshots; the inactive list holds
    /// both expired and explicitly deactivated glines. With `exact_cidr`,
    /// only records whose bucket network equals the normalized query survive.
    ///
    /// Range semantics: a ban on
    /// `1.2.3.0/24` is found when querying `1.2.3.4` or the covering
    /// `1.2.0.0/16`, and when querying the covered `1.2.3.0/25`. A partially
    /// overlapping range never matches.
    pub fn check(
        &self,
        query: &str,
        exact_cidr: bool,
    ) -> Result<(Vec<GlineRecord>, Vec<GlineRecord>), EngineError> {
        let index = self.index.read();
        let (buckets, target): (Vec<&GlineBucket>, IpNet) = match query.parse::<IpAddr>() {
            Ok(addr) => (index.containing(addr), host_net(addr)),
            Err(_) => {
                let net = normalize_host(query)?;
                (index.covering_or_covered(&net), net)
            }
        };

        let mut active = Vec::new();
        let mut inactive = Vec::new();
        for bucket in buckets {
            if exact_cidr && bucket.network() != target {
                continue;
            }
            for record in bucket.records() {
                if record.is_active() {
                    active.push(record.clone());
                } else {
                    inactive.push(record.clone());
                }
            }
        }
        Ok((active, inactive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::now_ts;
    use std::sync::Arc;

    fn future() -> i64 {
        now_ts() + 86400
    }

    #[test]
    fn double_upsert_keeps_one_record() {
        let store = GlineStore::new();
        let first = store
            .add_or_update("*@1.1.1.1", future(), now_ts(), "drone", ActiveFlag::SetActive, "")
            .unwrap();
        assert_eq!(first, Upsert::InsertedNewBucket);

        let second = store
            .add_or_update("*@1.1.1.1", future(), now_ts(), "drone", ActiveFlag::SetActive, "")
            .unwrap();
        assert_eq!(second, Upsert::Merged);

        let (active, inactive) = store.check("1.1.1.1", false).unwrap();
        assert_eq!(active.len(), 1);
        assert!(inactive.is_empty());
    }

    #[test]
    fn mask_identity_is_case_insensitive() {
        let store = GlineStore::new();
        store
            .add_or_update("*!Abc@1.1.1.1", future(), now_ts(), "x", ActiveFlag::SetActive, "")
            .unwrap();
        let outcome = store
            .add_or_update("*!abc@1.1.1.1", future(), now_ts(), "x", ActiveFlag::SetActive, "")
            .unwrap();
        assert_eq!(outcome, Upsert::Merged);
    }

    #[test]
    fn second_user_mask_joins_existing_bucket() {
        let store = GlineStore::new();
        store
            .add_or_update("*@1.1.1.1", future(), now_ts(), "a", ActiveFlag::SetActive, "")
            .unwrap();
        let outcome = store
            .add_or_update("~ident@1.1.1.1", future(), now_ts(), "b", ActiveFlag::SetActive, "")
            .unwrap();
        assert_eq!(outcome, Upsert::InsertedIntoBucket);

        let (active, _) = store.check("1.1.1.1", false).unwrap();
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn new_bucket_without_flag_or_reason_is_rejected() {
        let store = GlineStore::new();
        let err = store
            .add_or_update("*@1.1.1.1", future(), now_ts(), "reason", ActiveFlag::Unchanged, "")
            .unwrap_err();
        assert!(matches!(err, EngineError::IntegrityViolation { .. }));

        let err = store
            .add_or_update("*@1.1.1.1", future(), now_ts(), "", ActiveFlag::SetActive, "")
            .unwrap_err();
        assert!(matches!(err, EngineError::IntegrityViolation { .. }));

        // Nothing was inserted by the rejected events.
        let (active, inactive) = store.check("1.1.1.1", false).unwrap();
        assert!(active.is_empty() && inactive.is_empty());
    }

    #[test]
    fn deactivation_moves_record_to_inactive_list() {
        let store = GlineStore::new();
        let expiry = future();
        store
            .add_or_update("*@1.1.1.2", expiry, now_ts(), "test", ActiveFlag::SetActive, "")
            .unwrap();
        store
            .add_or_update("*@1.1.1.2", 0, now_ts(), "", ActiveFlag::SetInactive, "")
            .unwrap();

        let (active, inactive) = store.check("1.1.1.2", false).unwrap();
        assert!(active.is_empty());
        assert_eq!(inactive.len(), 1);
        // Expiry was left unchanged by the deactivation.
        assert_eq!(inactive[0].expire_ts(), expiry);
    }

    #[test]
    fn expired_record_reports_inactive() {
        let store = GlineStore::new();
        store
            .add_or_update("*@1.1.1.3", now_ts() - 10, now_ts(), "old", ActiveFlag::SetActive, "")
            .unwrap();
        let (active, inactive) = store.check("1.1.1.3", false).unwrap();
        assert!(active.is_empty());
        assert_eq!(inactive.len(), 1);
        assert!(inactive[0].raw_active());
    }

    #[test]
    fn range_ban_found_by_point_query_but_not_exact() {
        let store = GlineStore::new();
        store
            .add_or_update("*@2.1.1.0/24", future(), now_ts(), "identd", ActiveFlag::SetActive, "")
            .unwrap();

        let (active, _) = store.check("2.1.1.1", false).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].mask(), "*@2.1.1.0/24");

        // exact_cidr: the /32 of the point does not equal the /24 bucket.
        let (active, inactive) = store.check("2.1.1.1", true).unwrap();
        assert!(active.is_empty() && inactive.is_empty());

        let (active, _) = store.check("2.1.1.0/24", true).unwrap();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn narrower_range_query_sees_covering_ban_unless_exact() {
        let store = GlineStore::new();
        store
            .add_or_update("*@1.2.3.0/24", future(), now_ts(), "x", ActiveFlag::SetActive, "")
            .unwrap();

        let (active, _) = store.check("1.2.3.0/25", false).unwrap();
        assert_eq!(active.len(), 1);

        let (active, inactive) = store.check("1.2.3.0/25", true).unwrap();
        assert!(active.is_empty() && inactive.is_empty());

        let (active, _) = store.check("1.2.0.0/16", false).unwrap();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn invalid_query_is_an_error_not_a_panic() {
        let store = GlineStore::new();
        assert!(matches!(
            store.check("not-an-ip", false),
            Err(EngineError::InvalidAddress(_))
        ));
        assert!(matches!(
            store.check("1.2.3.4/banana", false),
            Err(EngineError::InvalidAddress(_))
        ));
    }

    #[test]
    fn hostname_mask_is_rejected() {
        let store = GlineStore::new();
        let err = store
            .add_or_update("*@spam.example.org", future(), now_ts(), "x", ActiveFlag::SetActive, "")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAddress(_)));
    }

    #[test]
    fn reset_discards_all_state() {
        let store = GlineStore::new();
        store
            .add_or_update("*@1.1.1.1", future(), now_ts(), "x", ActiveFlag::SetActive, "")
            .unwrap();
        store.reset();
        let (active, inactive) = store.check("1.1.1.1", false).unwrap();
        assert!(active.is_empty() && inactive.is_empty());
    }

    #[test]
    fn concurrent_upserts_and_checks_stay_consistent() {
        let store = Arc::new(GlineStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    let mask = format!("*@10.{}.{}.{}", i % 200, (i / 200) % 200, i % 250);
                    store
                        .add_or_update(&mask, now_ts() + 86400, now_ts(), "load", ActiveFlag::SetActive, "")
                        .unwrap();
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    let query = format!("10.{}.0.{}", i % 200, i % 250);
                    let (active, inactive) = store.check(&query, false).unwrap();
                    // Each returned snapshot is internally consistent.
                    for rec in active.iter().chain(inactive.iter()) {
                        assert!(rec.mask().starts_with("*@10."));
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }
}
