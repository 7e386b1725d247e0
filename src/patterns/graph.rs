//! Relationship graph analysis: clustering and circular-flow detection
//!
//! Both analyses run over a batch of profiles. Clustering builds an
//! undirected counterparty graph and groups it with a union-find structure
//! (union by rank, path-compressed find). Circular-flow detection walks the
//! directed edge set with a depth-bounded DFS, reporting any return to the
//! start node after three or more hops as a suspected wash-trading cycle.
//!
//! Cycle reports and the per-profile reciprocal-counterparty heuristic in
//! `rules` are independent signals with independent thresholds.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{Pattern, PatternType, Severity};
use crate::types::{AddressProfile, CounterpartyStats};

/// Graph analysis thresholds
mod graph_thresholds {
    /// Minimum transactions for a counterparty link to count as an edge
    pub const MIN_EDGE_TRANSACTIONS: u32 = 5;

    /// Minimum component size worth reporting as a cluster
    pub const MIN_CLUSTER_MEMBERS: usize = 3;

    /// Component size above which a cluster is high severity
    pub const HIGH_SEVERITY_MEMBERS: usize = 10;

    /// DFS depth bound for circular-flow search
    pub const MAX_CYCLE_DEPTH: usize = 4;

    /// Minimum hops before a return to the start counts as a cycle
    pub const MIN_CYCLE_HOPS: usize = 3;
}

/// Disjoint-set structure with union by rank and path compression
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    /// Root of the set containing `node`, compressing the path walked
    pub fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Second pass: point everything on the path at the root
        let mut current = node;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Join the sets containing `a` and `b`; returns false if already joined
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }

        if self.rank[root_a] < self.rank[root_b] {
            self.parent[root_a] = root_b;
        } else if self.rank[root_a] > self.rank[root_b] {
            self.parent[root_b] = root_a;
        } else {
            self.parent[root_b] = root_a;
            self.rank[root_a] += 1;
        }
        true
    }
}

/// Composite relationship strength for one counterparty link (0.0-1.0)
///
/// Volume, frequency, and reciprocity components averaged; clusters report
/// the mean strength over their edges as supporting evidence.
pub fn relationship_strength(link: &CounterpartyStats) -> f64 {
    let volume = link.total_volume().to_f64().unwrap_or(f64::MAX);
    let volume_score = (volume.ln_1p() / 20.0).min(1.0);

    let frequency_score = (link.transaction_count as f64 / 50.0).min(1.0);

    let sent = link.volume_sent.to_f64().unwrap_or(f64::MAX);
    let received = link.volume_received.to_f64().unwrap_or(f64::MAX);
    let reciprocity_score = if sent.max(received) > 0.0 {
        sent.min(received) / sent.max(received)
    } else {
        0.0
    };

    (volume_score + frequency_score + reciprocity_score) / 3.0
}

/// Group addresses into connected components over counterparty links
///
/// Nodes are every profiled address plus every counterparty it links to
/// with at least five transactions. Components with three or more members
/// are reported; more than ten members raises severity to high.
pub fn find_clusters(profiles: &[Arc<AddressProfile>], now: i64) -> Vec<Pattern> {
    use graph_thresholds::*;

    // Index every address that appears on a qualifying edge
    let mut id_of = HashMap::new();
    let mut addresses: Vec<String> = Vec::new();
    let mut qualifying_edges: Vec<(usize, usize, f64)> = Vec::new();

    for profile in profiles {
        for link in &profile.counterparties {
            if link.transaction_count < MIN_EDGE_TRANSACTIONS {
                continue;
            }
            let a = intern_address(&mut id_of, &mut addresses, &profile.address);
            let b = intern_address(&mut id_of, &mut addresses, &link.address);
            qualifying_edges.push((a, b, relationship_strength(link)));
        }
    }

    if qualifying_edges.is_empty() {
        return Vec::new();
    }

    let mut sets = UnionFind::new(addresses.len());
    for &(a, b, _) in &qualifying_edges {
        sets.union(a, b);
    }

    // Collect members and mean edge strength per component root
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for node in 0..addresses.len() {
        let root = sets.find(node);
        members.entry(root).or_default().push(node);
    }

    let mut strength_sums: HashMap<usize, (f64, usize)> = HashMap::new();
    for &(a, _, strength) in &qualifying_edges {
        let root = sets.find(a);
        let entry = strength_sums.entry(root).or_insert((0.0, 0));
        entry.0 += strength;
        entry.1 += 1;
    }

    let mut patterns = Vec::new();
    for (root, nodes) in members {
        if nodes.len() < MIN_CLUSTER_MEMBERS {
            continue;
        }

        let mut cluster: Vec<String> = nodes.iter().map(|&n| addresses[n].clone()).collect();
        cluster.sort();

        let severity = if nodes.len() > HIGH_SEVERITY_MEMBERS {
            Severity::High
        } else {
            Severity::Medium
        };

        let mean_strength = strength_sums
            .get(&root)
            .map(|&(sum, count)| sum / count as f64)
            .unwrap_or(0.0);

        patterns.push(
            Pattern::new(PatternType::AddressCluster, cluster[0].clone(), now)
                .with_addresses(cluster.clone())
                .with_severity(severity)
                .with_evidence(json!({
                    "member_count": cluster.len(),
                    "members": cluster,
                    "mean_relationship_strength": mean_strength,
                })),
        );
    }

    // Deterministic output order regardless of hash iteration
    patterns.sort_by(|a, b| a.addresses.cmp(&b.addresses));
    patterns
}

/// Stable integer id for an address, assigning one on first sight
fn intern_address(
    id_of: &mut HashMap<String, usize>,
    addresses: &mut Vec<String>,
    address: &str,
) -> usize {
    if let Some(&id) = id_of.get(address) {
        return id;
    }
    let id = addresses.len();
    addresses.push(address.to_string());
    id_of.insert(address.to_string(), id);
    id
}

/// Search the directed transfer graph for short circular flows
///
/// Bounded DFS (max depth 4) from each unvisited node; a path returning to
/// its start after at least three hops is reported as a wash-trading cycle
/// with the volume summed from the edges actually traversed.
pub fn detect_cycles(profiles: &[Arc<AddressProfile>], now: i64) -> Vec<Pattern> {
    use graph_thresholds::*;

    // Directed edge a -> b where a sent volume to b
    let mut adjacency: HashMap<&str, Vec<(&str, &BigUint)>> = HashMap::new();
    for profile in profiles {
        for link in &profile.counterparties {
            if link.transaction_count < MIN_EDGE_TRANSACTIONS || link.volume_sent.is_zero() {
                continue;
            }
            adjacency
                .entry(profile.address.as_str())
                .or_default()
                .push((link.address.as_str(), &link.volume_sent));
        }
    }

    let mut starts: Vec<&str> = adjacency.keys().copied().collect();
    starts.sort();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut seen_cycles: HashSet<Vec<String>> = HashSet::new();
    let mut patterns = Vec::new();

    for start in starts {
        if visited.contains(start) {
            continue;
        }

        let mut path: Vec<&str> = vec![start];
        let mut volumes: Vec<BigUint> = Vec::new();
        walk(
            &adjacency,
            start,
            start,
            &mut path,
            &mut volumes,
            MAX_CYCLE_DEPTH,
            MIN_CYCLE_HOPS,
            &mut seen_cycles,
            &mut patterns,
            now,
        );

        visited.insert(start);
    }

    patterns
}

/// One DFS step; `path` holds the nodes from the start to the current node
#[allow(clippy::too_many_arguments)]
fn walk<'a>(
    adjacency: &HashMap<&'a str, Vec<(&'a str, &'a BigUint)>>,
    start: &'a str,
    current: &'a str,
    path: &mut Vec<&'a str>,
    volumes: &mut Vec<BigUint>,
    max_depth: usize,
    min_hops: usize,
    seen_cycles: &mut HashSet<Vec<String>>,
    patterns: &mut Vec<Pattern>,
    now: i64,
) {
    let Some(neighbors) = adjacency.get(current) else {
        return;
    };

    for &(next, volume) in neighbors {
        if next == start {
            let hops = path.len(); // closing edge included
            if hops >= min_hops {
                let mut cycle: Vec<String> = path.iter().map(|s| s.to_string()).collect();

                let mut key = cycle.clone();
                key.sort();
                if seen_cycles.insert(key) {
                    let cycle_volume: BigUint =
                        volumes.iter().cloned().sum::<BigUint>() + volume;
                    cycle.sort();
                    patterns.push(
                        Pattern::new(PatternType::WashTradingCycle, start.to_string(), now)
                            .with_addresses(cycle.clone())
                            .with_severity(Severity::High)
                            .with_evidence(json!({
                                "source": "circular-flow",
                                "cycle_length": hops,
                                "cycle": cycle,
                                "cycle_volume": cycle_volume.to_string(),
                            })),
                    );
                }
            }
            continue;
        }

        if path.len() >= max_depth || path.contains(&next) {
            continue;
        }

        path.push(next);
        volumes.push((*volume).clone());
        walk(
            adjacency, start, next, path, volumes, max_depth, min_hops, seen_cycles, patterns, now,
        );
        path.pop();
        volumes.pop();
    }
}
