//! Parsers for server-announced gline state transitions.
//!
//! ircu-family servers describe the same underlying transitions in several
//! human-readable notice shapes plus the numeric 280 snapshot reply. Each
//! shape is matched independently here and reduced to one normalized
//! [`GlineEvent`]; lines that pass the relevance filters but fail extraction
//! are a [`NoticeParseError`], everything else is `NotRelevant`.
//!
//! The "adding" shapes have a stable grammar and are read by token position.
//! The "modifying" shape gains and loses clauses (lifetime extension, reason
//! change) depending on what the operator touched, so its fields are pulled
//! out by regex instead of offsets.

use crate::engine::ActiveFlag;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static RE_ACTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"globally (de)?activating G-line").expect("activation pattern")
});
static RE_EXPIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"changing expiration time to (\d+)").expect("expiration pattern")
});
static RE_REASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"changing reason to "(.*)"$"#).expect("reason pattern"));

/// Minimum token count shared by all recognized notice shapes.
const MIN_NOTICE_TOKENS: usize = 15;

/// A normalized gline state transition extracted from a server notice.
///
/// `expire_ts == 0` and an empty `reason` mean the notice did not mention
/// that field; the store leaves the current value untouched on a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlineEvent {
    pub mask: String,
    pub active: ActiveFlag,
    pub expire_ts: i64,
    pub reason: String,
}

/// One line of the numeric 280 snapshot burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLine {
    pub mask: String,
    pub active: bool,
    pub expire_ts: i64,
    pub last_mod_ts: i64,
    pub reason: String,
}

/// Result of feeding a line through the notice parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeOutcome {
    /// Not a gline announcement from this session's server; silently ignored.
    NotRelevant,
    /// A gline transition to reconcile into the store.
    Event(GlineEvent),
}

/// A line that looked like a gline announcement but failed extraction.
#[derive(Debug, Error)]
pub enum NoticeParseError {
    #[error("truncated gline notice: {0}")]
    Truncated(String),

    #[error("bad timestamp {value:?} in gline line: {line}")]
    BadTimestamp { value: String, line: String },
}

/// Strip the one trailing punctuation character the notice prose leaves on
/// masks and timestamps ("for *@1.2.3.4," / "expiring at 1669690015:").
fn strip_trailing_punct(token: &str) -> &str {
    token
        .strip_suffix([',', ':'])
        .unwrap_or(token)
}

fn parse_ts(value: &str, line: &str) -> Result<i64, NoticeParseError> {
    value.parse::<i64>().map_err(|_| NoticeParseError::BadTimestamp {
        value: value.to_string(),
        line: line.to_string(),
    })
}

/// Parse one raw server notice (or JOIN/QUIT carrier line) into a gline event.
///
/// Relevance filters: enough tokens for any known shape, the sender is this
/// session's server, the notice targets the network-wide broadcast marker,
/// and the `global GLINE` markers sit at their expected positions.
pub fn parse_server_notice(
    raw: &str,
    server_name: &str,
) -> Result<NoticeOutcome, NoticeParseError> {
    let t: Vec<&str> = raw.split(' ').collect();
    if t.len() < MIN_NOTICE_TOKENS {
        return Ok(NoticeOutcome::NotRelevant);
    }
    if server_name.is_empty() || t[0].strip_prefix(':') != Some(server_name) {
        return Ok(NoticeOutcome::NotRelevant);
    }
    if t[2] != "*" {
        return Ok(NoticeOutcome::NotRelevant);
    }

    // :server NOTICE * :*** Notice -- origin adding deactivated global GLINE
    // for <mask>, expiring at <ts>: <reason>
    if t[8] == "deactivated" && t[9] == "global" && t[10] == "GLINE" {
        if t.len() < 16 {
            return Err(NoticeParseError::Truncated(raw.to_string()));
        }
        let mask = strip_trailing_punct(t[12]);
        let expire_ts = parse_ts(strip_trailing_punct(t[15]), raw)?;
        let reason = if t.len() > 16 { t[16..].join(" ") } else { String::new() };
        return Ok(NoticeOutcome::Event(GlineEvent {
            mask: mask.to_string(),
            active: ActiveFlag::SetInactive,
            expire_ts,
            reason,
        }));
    }

    if t[8] != "global" || t[9] != "GLINE" {
        return Ok(NoticeOutcome::NotRelevant);
    }

    // ... origin adding global GLINE for <mask>, expiring at <ts>: <reason>
    if t[7] == "adding" {
        if t.len() <= 15 {
            return Err(NoticeParseError::Truncated(raw.to_string()));
        }
        let mask = strip_trailing_punct(t[11]);
        let expire_ts = parse_ts(strip_trailing_punct(t[14]), raw)?;
        return Ok(NoticeOutcome::Event(GlineEvent {
            mask: mask.to_string(),
            active: ActiveFlag::SetActive,
            expire_ts,
            reason: t[15..].join(" "),
        }));
    }

    // ... origin modifying global GLINE for <mask>: <free-text clauses>
    if t[7] == "modifying" {
        let mask = strip_trailing_punct(t[11]);
        let active = match RE_ACTIVE.captures(raw) {
            None => ActiveFlag::Unchanged,
            Some(caps) if caps.get(1).is_some() => ActiveFlag::SetInactive,
            Some(_) => ActiveFlag::SetActive,
        };
        let expire_ts = match RE_EXPIRE.captures(raw).and_then(|c| c.get(1)) {
            Some(m) => parse_ts(m.as_str(), raw)?,
            None => 0,
        };
        let reason = RE_REASON
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        return Ok(NoticeOutcome::Event(GlineEvent {
            mask: mask.to_string(),
            active,
            expire_ts,
            reason,
        }));
    }

    Ok(NoticeOutcome::NotRelevant)
}

/// Parse one numeric 280 reply from the snapshot burst.
///
/// Fixed field positions:
/// `:server 280 nick <mask> <expire> <lastmod> <lifetime> * <+|-> :<reason>`
pub fn parse_snapshot(raw: &str) -> Result<SnapshotLine, NoticeParseError> {
    let t: Vec<&str> = raw.split(' ').collect();
    if t.len() < 10 {
        return Err(NoticeParseError::Truncated(raw.to_string()));
    }
    let mask = t[3].to_string();
    let expire_ts = parse_ts(t[4], raw)?;
    let last_mod_ts = parse_ts(t[5], raw)?;
    let active = t[8] != "-";
    let mut reason = t[9..].join(" ");
    if reason.starts_with(':') {
        reason.remove(0);
    }
    Ok(SnapshotLine { mask, active, expire_ts, last_mod_ts, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = "hidden.undernet.org";

    fn event(raw: &str) -> GlineEvent {
        match parse_server_notice(raw, SERVER).unwrap() {
            NoticeOutcome::Event(ev) => ev,
            NoticeOutcome::NotRelevant => panic!("expected event for: {raw}"),
        }
    }

    #[test]
    fn add_deactivated_shape() {
        let ev = event(":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org adding deactivated global GLINE for *@1.1.1.1, expiring at 1669690015: Unknown G-Line");
        assert_eq!(ev.mask, "*@1.1.1.1");
        assert_eq!(ev.active, ActiveFlag::SetInactive);
        assert_eq!(ev.expire_ts, 1669690015);
        assert_eq!(ev.reason, "Unknown G-Line");
    }

    #[test]
    fn add_active_shape() {
        let ev = event(":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org adding global GLINE for *@1.1.1.2, expiring at 1669689587: [0] test");
        assert_eq!(ev.mask, "*@1.1.1.2");
        assert_eq!(ev.active, ActiveFlag::SetActive);
        assert_eq!(ev.expire_ts, 1669689587);
        assert_eq!(ev.reason, "[0] test");
    }

    #[test]
    fn add_active_long_auto_reason() {
        let ev = event(":hidden.undernet.org NOTICE * :*** Notice -- dronescan.undernet.org adding global GLINE for *@171.253.56.186, expiring at 1670191909: AUTO [0] (171.253.56.186) You were identified as a drone. Email abuse@undernet.org for removal. Visit https://www.undernet.org/gline#drone for more information. (P540)");
        assert_eq!(ev.mask, "*@171.253.56.186");
        assert_eq!(ev.expire_ts, 1670191909);
        assert!(ev.reason.starts_with("AUTO [0] (171.253.56.186)"));
    }

    #[test]
    fn add_active_cidr_mask() {
        let ev = event(":hidden.undernet.org NOTICE * :*** Notice -- uworld.eu.undernet.org adding global GLINE for *@2.1.1.0/24, expiring at 1672262160: AUTO Please install identd before you reconnect.");
        assert_eq!(ev.mask, "*@2.1.1.0/24");
        assert_eq!(ev.active, ActiveFlag::SetActive);
    }

    #[test]
    fn modify_deactivate_only() {
        let ev = event(":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org modifying global GLINE for *@1.1.1.3: globally deactivating G-line");
        assert_eq!(ev.mask, "*@1.1.1.3");
        assert_eq!(ev.active, ActiveFlag::SetInactive);
        assert_eq!(ev.expire_ts, 0);
        assert_eq!(ev.reason, "");
    }

    #[test]
    fn modify_deactivate_with_reason() {
        let ev = event(r#":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org modifying global GLINE for *@1.1.1.4: globally deactivating G-line; and changing reason to "[0] test2""#);
        assert_eq!(ev.active, ActiveFlag::SetInactive);
        assert_eq!(ev.reason, "[0] test2");
        assert_eq!(ev.expire_ts, 0);
    }

    #[test]
    fn modify_activate_with_expiration() {
        let ev = event(":hidden.undernet.org NOTICE * :*** Notice -- uworld.eu.undernet.org modifying global GLINE for ~*@1.1.1.5: globally activating G-line; changing expiration time to 1670260017; and extending record lifetime to 1670260033");
        assert_eq!(ev.mask, "~*@1.1.1.5");
        assert_eq!(ev.active, ActiveFlag::SetActive);
        assert_eq!(ev.expire_ts, 1670260017);
        assert_eq!(ev.reason, "");
    }

    #[test]
    fn modify_expiration_only_leaves_active_unchanged() {
        let ev = event(":hidden.undernet.org NOTICE * :*** Notice -- dronescan.undernet.org modifying global GLINE for *@2a01:cb00:8bd9:4700:cd83:55e2:f420:b455: changing expiration time to 1670207809; and extending record lifetime to 1670207809");
        assert_eq!(ev.mask, "*@2a01:cb00:8bd9:4700:cd83:55e2:f420:b455");
        assert_eq!(ev.active, ActiveFlag::Unchanged);
        assert_eq!(ev.expire_ts, 1670207809);
    }

    #[test]
    fn modify_full_clause_chain() {
        let ev = event(r#":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org modifying global GLINE for *@1.1.1.7: globally activating G-line; changing expiration time to 1734297618; extending record lifetime to 1734297618; and changing reason to "[0] :test2""#);
        assert_eq!(ev.mask, "*@1.1.1.7");
        assert_eq!(ev.active, ActiveFlag::SetActive);
        assert_eq!(ev.expire_ts, 1734297618);
        assert_eq!(ev.reason, "[0] :test2");
    }

    #[test]
    fn modify_deactivate_full_clause_chain() {
        let ev = event(r#":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org modifying global GLINE for *@1.1.1.8: globally deactivating G-line; changing expiration time to 1734297618; extending record lifetime to 1734297618; and changing reason to "[0] :test2""#);
        assert_eq!(ev.active, ActiveFlag::SetInactive);
        assert_eq!(ev.expire_ts, 1734297618);
        assert_eq!(ev.reason, "[0] :test2");
    }

    #[test]
    fn mask_with_explicit_cidr_suffix() {
        let ev = event(r#":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org modifying global GLINE for *@1.1.1.7/32: changing expiration time to 1669689583; extending record lifetime to 1669689583; and changing reason to "Unknown G-Line""#);
        assert_eq!(ev.mask, "*@1.1.1.7/32");
        assert_eq!(ev.expire_ts, 1669689583);
        assert_eq!(ev.reason, "Unknown G-Line");
    }

    #[test]
    fn wrong_server_is_not_relevant() {
        let raw = ":other.undernet.org NOTICE * :*** Notice -- gnu.undernet.org adding global GLINE for *@1.1.1.2, expiring at 1669689587: [0] test";
        assert_eq!(
            parse_server_notice(raw, SERVER).unwrap(),
            NoticeOutcome::NotRelevant
        );
    }

    #[test]
    fn unlearned_server_name_matches_nothing() {
        let raw = ":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org adding global GLINE for *@1.1.1.2, expiring at 1669689587: [0] test";
        assert_eq!(
            parse_server_notice(raw, "").unwrap(),
            NoticeOutcome::NotRelevant
        );
    }

    #[test]
    fn non_broadcast_target_is_not_relevant() {
        let raw = ":hidden.undernet.org NOTICE nick :*** Notice -- gnu.undernet.org adding global GLINE for *@1.1.1.2, expiring at 1669689587: [0] test";
        assert_eq!(
            parse_server_notice(raw, SERVER).unwrap(),
            NoticeOutcome::NotRelevant
        );
    }

    #[test]
    fn short_lines_are_not_relevant() {
        assert_eq!(
            parse_server_notice(":hidden.undernet.org NOTICE * :short", SERVER).unwrap(),
            NoticeOutcome::NotRelevant
        );
    }

    #[test]
    fn non_gline_server_notice_is_not_relevant() {
        let raw = ":hidden.undernet.org NOTICE * :*** Notice -- Client connecting: nick (user@host) [1.2.3.4] {users} <modes> on server something";
        assert_eq!(
            parse_server_notice(raw, SERVER).unwrap(),
            NoticeOutcome::NotRelevant
        );
    }

    #[test]
    fn adding_without_reason_is_a_parse_error() {
        let raw = ":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org adding global GLINE for *@1.1.1.2, expiring at 1669689587:";
        assert!(matches!(
            parse_server_notice(raw, SERVER),
            Err(NoticeParseError::Truncated(_))
        ));
    }

    #[test]
    fn non_numeric_expiry_is_a_parse_error() {
        let raw = ":hidden.undernet.org NOTICE * :*** Notice -- gnu.undernet.org adding global GLINE for *@1.1.1.2, expiring at soon,: [0] test";
        assert!(matches!(
            parse_server_notice(raw, SERVER),
            Err(NoticeParseError::BadTimestamp { .. })
        ));
    }

    #[test]
    fn snapshot_line_fixed_fields() {
        let raw = ":h27.eu.undernet.org 280 hid *@74.102.24.245 1666617171 1666530771 1666617171 * + :AUTO [0] (74.102.24.245) You were identified as a drone.";
        let snap = parse_snapshot(raw).unwrap();
        assert_eq!(snap.mask, "*@74.102.24.245");
        assert_eq!(snap.expire_ts, 1666617171);
        assert_eq!(snap.last_mod_ts, 1666530771);
        assert!(snap.active);
        assert_eq!(snap.reason, "AUTO [0] (74.102.24.245) You were identified as a drone.");
    }

    #[test]
    fn snapshot_minus_flag_means_deactivated() {
        let raw = ":h27.eu.undernet.org 280 hid *@5.6.7.8 1666617171 1666530771 1666617171 * - :Unknown G-Line";
        let snap = parse_snapshot(raw).unwrap();
        assert!(!snap.active);
    }

    #[test]
    fn truncated_snapshot_is_a_parse_error() {
        assert!(matches!(
            parse_snapshot(":h27.eu.undernet.org 280 hid *@5.6.7.8"),
            Err(NoticeParseError::Truncated(_))
        ));
    }
}
