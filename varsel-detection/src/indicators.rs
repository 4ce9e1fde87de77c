//! Fixed-depth octet trie for IPv4 indicator membership.
//!
//! Lookup cost is three map probes plus one bit test regardless of how many
//! indicators are loaded, and addresses sharing a /8, /16 or /24 prefix share
//! interior nodes. Descent is index-based over arena-allocated nodes rather
//! than pointer-chasing recursion.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("indicator file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interior node: octet value to arena index of the next level.
#[derive(Debug, Default)]
struct Node {
    children: HashMap<u8, u32>,
}

/// Final level: 256-bit set of last octets. Key existence is membership.
#[derive(Debug, Default)]
struct Leaf {
    bits: [u64; 4],
}

impl Leaf {
    #[inline]
    fn contains(&self, octet: u8) -> bool {
        self.bits[octet as usize / 64] & (1 << (octet as usize % 64)) != 0
    }

    #[inline]
    fn set(&mut self, octet: u8) -> bool {
        let present = self.contains(octet);
        self.bits[octet as usize / 64] |= 1 << (octet as usize % 64);
        !present
    }
}

/// Membership structure for IPv4 indicators.
///
/// Built once at startup from the indicator list and immutable during the
/// consume loop. An address is a member iff a child exists at every level
/// along its octet path.
#[derive(Debug)]
pub struct IndicatorTrie {
    /// Interior nodes for levels 0..=2; index 0 is the root.
    nodes: Vec<Node>,
    /// Level-3 sets, referenced by level-2 children.
    leaves: Vec<Leaf>,
    len: usize,
}

impl IndicatorTrie {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            leaves: Vec::new(),
            len: 0,
        }
    }

    /// Inserts an address; returns `true` if it was not already present.
    pub fn insert(&mut self, addr: Ipv4Addr) -> bool {
        let [a, b, c, d] = addr.octets();
        let level1 = self.interior_child(0, a);
        let level2 = self.interior_child(level1, b);
        let leaf = self.leaf_child(level2, c);
        let inserted = self.leaves[leaf].set(d);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Membership test: three map probes and one bit test.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let [a, b, c, d] = addr.octets();
        let Some(&level1) = self.nodes[0].children.get(&a) else {
            return false;
        };
        let Some(&level2) = self.nodes[level1 as usize].children.get(&b) else {
            return false;
        };
        let Some(&leaf) = self.nodes[level2 as usize].children.get(&c) else {
            return false;
        };
        self.leaves[leaf as usize].contains(d)
    }

    /// Number of distinct addresses stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total allocated nodes (interior plus leaf), reported at startup.
    pub fn node_count(&self) -> usize {
        self.nodes.len() + self.leaves.len()
    }

    fn interior_child(&mut self, node: usize, octet: u8) -> usize {
        if let Some(&child) = self.nodes[node].children.get(&octet) {
            return child as usize;
        }
        let child = self.nodes.len() as u32;
        self.nodes.push(Node::default());
        self.nodes[node].children.insert(octet, child);
        child as usize
    }

    fn leaf_child(&mut self, node: usize, octet: u8) -> usize {
        if let Some(&leaf) = self.nodes[node].children.get(&octet) {
            return leaf as usize;
        }
        let leaf = self.leaves.len() as u32;
        self.leaves.push(Leaf::default());
        self.nodes[node].children.insert(octet, leaf);
        leaf as usize
    }
}

impl Default for IndicatorTrie {
    fn default() -> Self {
        Self::new()
    }
}

/// Line counts from loading an indicator list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Builds a trie from a line-oriented indicator list.
///
/// Lines must be strict dotted-decimal IPv4 (four octets, 0-255, no extra
/// characters, no leading zeros). Malformed lines are logged and counted as
/// rejected, never inserted; blank lines are skipped silently. A membership
/// entry for `0.0.0.0` therefore only exists if the list genuinely carries
/// that address.
pub fn load_indicators<R: BufRead>(reader: R) -> Result<(IndicatorTrie, LoadReport), IndicatorError> {
    let mut trie = IndicatorTrie::new();
    let mut report = LoadReport::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse::<Ipv4Addr>() {
            Ok(addr) => {
                trie.insert(addr);
                report.accepted += 1;
            }
            Err(_) => {
                warn!(line, "rejected malformed indicator");
                report.rejected += 1;
            }
        }
    }

    Ok((trie, report))
}

/// File-backed variant of [`load_indicators`]. Open failure is fatal.
pub fn load_indicator_file<P: AsRef<Path>>(
    path: P,
) -> Result<(IndicatorTrie, LoadReport), IndicatorError> {
    let file = std::fs::File::open(path)?;
    load_indicators(BufReader::new(file))
}
