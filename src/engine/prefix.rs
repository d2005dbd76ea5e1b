//! Longest-prefix-match index over IP networks.
//!
//! A plain binary trie, one per address family, with at most one
//! [`GlineBucket`] per distinct network. Point lookups walk the address bits
//! and collect every bucket on the path; range lookups additionally sweep the
//! subtree below the query network (covered networks). Partial overlap
//! between two networks never matches, only true containment.

use super::record::GlineRecord;
use ipnet::IpNet;
use std::net::IpAddr;

/// All records sharing one exact IP network.
///
/// Multiple user-masks can ban the same network (`*@1.2.3.4` and
/// `~ident@1.2.3.4` are distinct records in one bucket).
#[derive(Debug)]
pub struct GlineBucket {
    network: IpNet,
    records: Vec<GlineRecord>,
}

impl GlineBucket {
    pub fn new(network: IpNet) -> Self {
        Self { network, records: Vec::with_capacity(2) }
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    pub fn records(&self) -> &[GlineRecord] {
        &self.records
    }

    pub fn push(&mut self, record: GlineRecord) {
        self.records.push(record);
    }

    /// Case-insensitive record lookup by full mask.
    pub fn find_mut(&mut self, mask: &str) -> Option<&mut GlineRecord> {
        self.records
            .iter_mut()
            .find(|rec| rec.mask().eq_ignore_ascii_case(mask))
    }
}

#[derive(Debug, Default)]
struct Node {
    children: [Option<Box<Node>>; 2],
    bucket: Option<GlineBucket>,
}

impl Node {
    fn collect_subtree<'a>(&'a self, out: &mut Vec<&'a GlineBucket>) {
        if let Some(bucket) = &self.bucket {
            out.push(bucket);
        }
        for child in self.children.iter().flatten() {
            child.collect_subtree(out);
        }
    }
}

/// Left-aligned bit representation of a network: IPv4 occupies the top 32
/// bits of the u128 so one walk routine serves both families.
fn net_key(net: &IpNet) -> (u128, u8) {
    match net {
        IpNet::V4(v4) => ((u32::from(v4.network()) as u128) << 96, v4.prefix_len()),
        IpNet::V6(v6) => (u128::from(v6.network()), v6.prefix_len()),
    }
}

fn addr_key(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => ((u32::from(v4) as u128) << 96, 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

#[inline]
fn bit_at(key: u128, depth: u8) -> usize {
    ((key >> (127 - depth)) & 1) as usize
}

/// Prefix-indexed bucket container for one IRC network session.
#[derive(Debug, Default)]
pub struct PrefixIndex {
    v4: Node,
    v6: Node,
}

impl PrefixIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn root(&self, net: &IpNet) -> &Node {
        match net {
            IpNet::V4(_) => &self.v4,
            IpNet::V6(_) => &self.v6,
        }
    }

    fn root_mut(&mut self, net: &IpNet) -> &mut Node {
        match net {
            IpNet::V4(_) => &mut self.v4,
            IpNet::V6(_) => &mut self.v6,
        }
    }

    /// Add a bucket under its network key. The caller guarantees the network
    /// is canonical and not yet present.
    pub fn insert(&mut self, bucket: GlineBucket) {
        let net = bucket.network();
        let (key, prefix_len) = net_key(&net);
        let mut node = self.root_mut(&net);
        for depth in 0..prefix_len {
            let bit = bit_at(key, depth);
            node = node.children[bit].get_or_insert_default();
        }
        node.bucket = Some(bucket);
    }

    /// All buckets whose network contains the given address.
    pub fn containing(&self, addr: IpAddr) -> Vec<&GlineBucket> {
        let (key, max_len) = addr_key(addr);
        let root = match addr {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        };
        let mut out = Vec::new();
        let mut node = root;
        for depth in 0..=max_len {
            if let Some(bucket) = &node.bucket {
                out.push(bucket);
            }
            if depth == max_len {
                break;
            }
            match &node.children[bit_at(key, depth)] {
                Some(child) => node = child,
                None => break,
            }
        }
        out
    }

    /// All buckets whose network contains `net` or is contained by it.
    pub fn covering_or_covered(&self, net: &IpNet) -> Vec<&GlineBucket> {
        let (key, prefix_len) = net_key(net);
        let mut out = Vec::new();
        let mut node = self.root(net);
        for depth in 0..prefix_len {
            if let Some(bucket) = &node.bucket {
                out.push(bucket);
            }
            match &node.children[bit_at(key, depth)] {
                Some(child) => node = child,
                None => return out,
            }
        }
        // Everything at or below the query prefix is covered by it.
        node.collect_subtree(&mut out);
        out
    }

    /// The unique bucket whose network is exactly `net`, if any.
    pub fn exact_mut(&mut self, net: &IpNet) -> Option<&mut GlineBucket> {
        let (key, prefix_len) = net_key(net);
        let mut node = self.root_mut(net);
        for depth in 0..prefix_len {
            node = node.children[bit_at(key, depth)].as_deref_mut()?;
        }
        node.bucket.as_mut()
    }
}
