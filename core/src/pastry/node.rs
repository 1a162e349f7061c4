use crate::fabric::NodeId;
use crate::ring::circular_distance;

use super::PastryNetwork;

/// Columns per routing-table row: one per possible hex digit value
/// (`B = 4` bits, spec §4.3).
const BASE: usize = 16;

fn hex_digit(id: u64, digit_index: usize, num_digits: usize) -> usize {
    let shift = (num_digits - 1 - digit_index) * 4;
    ((id >> shift) & 0xF) as usize
}

/// Length of the shared prefix of `a` and `b` in hex digits (spec §4.3,
/// `common_prefix`).
fn common_prefix_len(a: u64, b: u64, num_digits: usize) -> usize {
    (0..num_digits)
        .take_while(|&i| hex_digit(a, i, num_digits) == hex_digit(b, i, num_digits))
        .count()
}

/// Which side of `self.id` a leaf-set member or a repair target falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeafSide {
    Smaller,
    Larger,
}

/// A Pastry ring participant: a prefix-routing table, a leaf set, and a
/// neighborhood set. Pastry stores nothing beyond membership (spec §1) —
/// there is no key/value store here, unlike Chord.
pub struct PastryNode {
    id: NodeId,
    num_digits: usize,
    leaf_set_max: usize,
    neighborhood_set_max: usize,
    routing_table: Vec<Vec<Option<NodeId>>>,
    leaf_set: Vec<NodeId>,
    neighborhood_set: Vec<NodeId>,
}

impl PastryNode {
    pub fn new(id: NodeId, num_digits: usize, leaf_set_max: usize, neighborhood_set_max: usize) -> Self {
        Self {
            id,
            num_digits,
            leaf_set_max,
            neighborhood_set_max,
            routing_table: vec![vec![None; BASE]; num_digits],
            leaf_set: Vec::new(),
            neighborhood_set: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn leaf_set(&self) -> &[NodeId] {
        &self.leaf_set
    }

    pub fn neighborhood_set(&self) -> &[NodeId] {
        &self.neighborhood_set
    }

    fn ring_size(&self) -> u64 {
        (BASE as u64).pow(self.num_digits as u32)
    }

    /// Join via whichever peer the fabric's bootstrap primitive finds. A
    /// solitary node keeps empty sets and an all-`None` routing table.
    pub fn join(&mut self, fabric: &PastryNetwork) {
        let Some(bootstrap) = fabric.bootstrap_peer(self.id) else {
            return;
        };
        let visited = node_arrival(fabric, bootstrap, self.id, self.num_digits);
        self.node_init(fabric, &visited);
        for &peer in &visited {
            if peer == self.id {
                continue;
            }
            if let Some(cell) = fabric.get_node(peer) {
                cell.borrow_mut().node_update(fabric, self.id);
            }
        }
    }

    /// Seed this node's tables from the nodes the join message passed
    /// through: the bootstrap's neighborhood set, the numerically closest
    /// hop's leaf set, and one routing-table row per hop (spec §4.3,
    /// `node_init`).
    fn node_init(&mut self, fabric: &PastryNetwork, visited: &[NodeId]) {
        if let Some(&bootstrap) = visited.first() {
            if let Some(cell) = fabric.get_node(bootstrap) {
                self.neighborhood_set = cell
                    .borrow()
                    .neighborhood_set
                    .iter()
                    .copied()
                    .filter(|&id| id != self.id)
                    .take(self.neighborhood_set_max)
                    .collect();
            }
        }
        if let Some(&closest) = visited.last() {
            if let Some(cell) = fabric.get_node(closest) {
                let mut incoming: Vec<NodeId> = cell.borrow().leaf_set.clone();
                incoming.push(closest);
                self.merge_leaf_set(fabric, &incoming);
            }
        }
        for (i, &hop_id) in visited.iter().enumerate() {
            if i >= self.num_digits {
                break;
            }
            if let Some(cell) = fabric.get_node(hop_id) {
                self.routing_table[i] = cell.borrow().routing_table[i].clone();
            }
        }
        let l = visited.len().min(self.num_digits.saturating_sub(1));
        if l < self.num_digits {
            let d = hex_digit(self.id, l, self.num_digits);
            self.routing_table[l][d] = Some(self.id);
        }
    }

    /// Merge `incoming` ids into the leaf set, keeping up to
    /// `leaf_set_max / 2` closest on each side of `self.id`, excluding any
    /// id known dead and ties resolved by ascending numeric id (which
    /// `sort_unstable` + `dedup` already gives us for free).
    fn merge_leaf_set(&mut self, fabric: &PastryNetwork, incoming: &[NodeId]) {
        let mut combined: Vec<NodeId> = self
            .leaf_set
            .iter()
            .chain(incoming.iter())
            .copied()
            .filter(|&id| id != self.id && fabric.is_alive(id))
            .collect();
        combined.sort_unstable();
        combined.dedup();

        let half = (self.leaf_set_max / 2).max(1);
        let mut below: Vec<NodeId> = combined.iter().copied().filter(|&id| id < self.id).collect();
        below.sort_unstable();
        let below = below.into_iter().rev().take(half).collect::<Vec<_>>();

        let above: Vec<NodeId> = combined
            .iter()
            .copied()
            .filter(|&id| id > self.id)
            .take(half)
            .collect();

        let mut merged: Vec<NodeId> = below.into_iter().rev().collect();
        merged.extend(above);
        self.leaf_set = merged;
    }

    /// The current farthest leaf-set member on `side`, excluding any id in
    /// `excluding` — or `self.id` if that side is empty once excluded
    /// (spec §4.3, `extreme_leaf_set`).
    fn extreme_leaf_set(&self, side: LeafSide, excluding: &[NodeId]) -> NodeId {
        let candidates = self.leaf_set.iter().copied().filter(|&id| !excluding.contains(&id));
        match side {
            LeafSide::Smaller => candidates.filter(|&id| id < self.id).min(),
            LeafSide::Larger => candidates.filter(|&id| id > self.id).max(),
        }
        .unwrap_or(self.id)
    }

    /// Learn of a newly arrived node: fold it into the leaf set, the
    /// matching routing-table slot, and the neighborhood set if there's
    /// still room (spec §4.3, `node_update`).
    fn node_update(&mut self, fabric: &PastryNetwork, arriving: NodeId) {
        if arriving == self.id {
            return;
        }
        self.merge_leaf_set(fabric, &[arriving]);
        let l = common_prefix_len(self.id, arriving, self.num_digits);
        if l < self.num_digits {
            let d = hex_digit(arriving, l, self.num_digits);
            self.routing_table[l][d] = Some(arriving);
        }
        if self.neighborhood_set.len() < self.neighborhood_set_max && !self.neighborhood_set.contains(&arriving) {
            self.neighborhood_set.push(arriving);
        }
    }

    /// Actively source a replacement for `failed` in whichever table it
    /// appears in, rather than just dropping the stale pointer (spec §4.3,
    /// `__repair`).
    fn repair(&mut self, fabric: &PastryNetwork, failed: NodeId) {
        if self.leaf_set.contains(&failed) {
            self.leaf_set.retain(|&id| id != failed);
            let side = if failed < self.id { LeafSide::Smaller } else { LeafSide::Larger };
            let mut excluded = vec![failed];
            loop {
                let source = self.extreme_leaf_set(side, &excluded);
                if source == self.id {
                    break;
                }
                if !fabric.is_alive(source) {
                    excluded.push(source);
                    continue;
                }
                if let Some(cell) = fabric.get_node(source) {
                    let incoming = cell.borrow().leaf_set.clone();
                    self.merge_leaf_set(fabric, &incoming);
                }
                break;
            }
        }

        if let Some(pos) = self.neighborhood_set.iter().position(|&id| id == failed) {
            self.neighborhood_set.remove(pos);
            let ring_size = self.ring_size();
            let nearest = self
                .neighborhood_set
                .iter()
                .copied()
                .filter(|&id| fabric.is_alive(id))
                .min_by_key(|&id| circular_distance(self.id, id, ring_size));
            if let Some(nearest) = nearest {
                if let Some(cell) = fabric.get_node(nearest) {
                    let their_set = cell.borrow().neighborhood_set.clone();
                    let addition = their_set
                        .iter()
                        .copied()
                        .filter(|&id| id != self.id && !self.neighborhood_set.contains(&id) && fabric.is_alive(id))
                        .min_by_key(|&id| circular_distance(self.id, id, ring_size));
                    if let Some(addition) = addition {
                        if self.neighborhood_set.len() < self.neighborhood_set_max {
                            self.neighborhood_set.push(addition);
                        }
                    }
                }
            }
        }

        for l in 0..self.routing_table.len() {
            for d in 0..BASE {
                if self.routing_table[l][d] != Some(failed) {
                    continue;
                }
                let mut contacts: Vec<NodeId> = self.routing_table[l].iter().filter_map(|o| *o).collect();
                if l + 1 < self.routing_table.len() {
                    contacts.extend(self.routing_table[l + 1].iter().filter_map(|o| *o));
                }
                let mut replacement = None;
                for contact in contacts {
                    if contact == failed || contact == self.id || !fabric.is_alive(contact) {
                        continue;
                    }
                    let Some(cell) = fabric.get_node(contact) else { continue };
                    if let Some(alt) = cell.borrow().routing_table[l][d] {
                        if alt != failed && fabric.is_alive(alt) {
                            replacement = Some(alt);
                            break;
                        }
                    }
                }
                self.routing_table[l][d] = replacement;
            }
        }
    }

    /// The leaf-set member (possibly `self`) numerically closest to `key`,
    /// if `key` falls within the leaf set's numeric span.
    fn closest_leaf(&self, key: u64) -> Option<NodeId> {
        if self.leaf_set.is_empty() {
            return Some(self.id);
        }
        let min = *self.leaf_set.iter().min().unwrap();
        let max = *self.leaf_set.iter().max().unwrap();
        let lo = min.min(self.id);
        let hi = max.max(self.id);
        if key < lo || key > hi {
            return None;
        }
        let ring_size = self.ring_size();
        let mut best = self.id;
        let mut best_dist = circular_distance(key, self.id, ring_size);
        for &candidate in &self.leaf_set {
            let dist = circular_distance(key, candidate, ring_size);
            if dist < best_dist {
                best = candidate;
                best_dist = dist;
            }
        }
        Some(best)
    }

    /// One routing step toward `key`, without repair: `None` means this
    /// node is the terminal owner, `Some` names the next hop, which may be
    /// stale (spec §4.3, `__route`).
    fn route_next_hop(&self, fabric: &PastryNetwork, key: u64) -> Option<NodeId> {
        if let Some(closest) = self.closest_leaf(key) {
            return if closest == self.id { None } else { Some(closest) };
        }

        let l = common_prefix_len(self.id, key, self.num_digits).min(self.num_digits - 1);
        let d = hex_digit(key, l, self.num_digits);
        if let Some(candidate) = self.routing_table[l][d] {
            if candidate != self.id {
                return Some(candidate);
            }
        }

        // Rare case (spec §4.3): the table slot is empty. Fall back to a
        // linear scan for any known node at least as close in shared prefix
        // and strictly closer numerically.
        let ring_size = self.ring_size();
        let self_dist = circular_distance(key, self.id, ring_size);
        let mut best: Option<(NodeId, u64)> = None;
        let candidates = self
            .leaf_set
            .iter()
            .chain(self.neighborhood_set.iter())
            .chain(self.routing_table.iter().flat_map(|row| row.iter()).filter_map(|o| o.as_ref()));
        for &candidate in candidates {
            if candidate == self.id {
                continue;
            }
            let candidate_prefix = common_prefix_len(candidate, key, self.num_digits);
            let candidate_dist = circular_distance(key, candidate, ring_size);
            if candidate_prefix >= l && candidate_dist < self_dist {
                let better = match best {
                    Some((_, best_dist)) => candidate_dist < best_dist,
                    None => true,
                };
                if better {
                    best = Some((candidate, candidate_dist));
                }
            }
        }
        best.map(|(node, _)| node)
    }

    /// Public `route(k)` (spec §4.3): one step toward `key`, repairing in
    /// place if the chosen next hop has died, then retrying once.
    fn route(&mut self, fabric: &PastryNetwork, key: u64) -> Option<NodeId> {
        let next = self.route_next_hop(fabric, key)?;
        if fabric.is_alive(next) {
            return Some(next);
        }
        self.repair(fabric, next);
        self.route_next_hop(fabric, key)
    }

    /// Route to `key`'s owner. Returns the owner and the hop count spent
    /// getting there (spec §4.3, `search`: "hop count equals the number of
    /// route-calls made before termination").
    fn route_with_hops(&mut self, fabric: &PastryNetwork, key: u64) -> (NodeId, u32) {
        let mut current = self.id;
        let mut hops = 0u32;
        let hop_budget = self.num_digits as u32 * 2 + 8;
        loop {
            let next = if current == self.id {
                self.route(fabric, key)
            } else {
                match fabric.get_node(current) {
                    Some(cell) => cell.borrow_mut().route(fabric, key),
                    None => None,
                }
            };
            match next {
                None => return (current, hops),
                Some(n) if n == current => return (current, hops),
                Some(n) => {
                    current = n;
                    hops += 1;
                    if hops > hop_budget {
                        return (current, hops);
                    }
                }
            }
        }
    }

    /// Hashes `key` to a target id and runs the `node_arrival` routing walk,
    /// returning the id of the node it converges on and the hop count
    /// (spec §4.3, `search`). Pastry stores no values, so there is nothing
    /// to look up beyond "who owns this id".
    pub fn search(&mut self, fabric: &PastryNetwork, key: u64) -> (u32, Option<NodeId>) {
        let (owner, hops) = self.route_with_hops(fabric, key);
        (hops, Some(owner))
    }
}

/// Walk the join message from `start` toward `target`, collecting every
/// node visited along the way (spec §4.3, `node_arrival`).
fn node_arrival(fabric: &PastryNetwork, start: NodeId, target: u64, num_digits: usize) -> Vec<NodeId> {
    let mut visited = Vec::new();
    let mut current = start;
    loop {
        visited.push(current);
        let next = match fabric.get_node(current) {
            Some(cell) => cell.borrow().route_next_hop(fabric, target),
            None => break,
        };
        match next {
            Some(n) if n != current && !visited.contains(&n) => current = n,
            _ => break,
        }
        if visited.len() > num_digits + 4 {
            break;
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_has_empty_sets() {
        let node = PastryNode::new(10, 4, 8, 8);
        assert!(node.leaf_set.is_empty());
        assert!(node.neighborhood_set.is_empty());
        assert_eq!(node.routing_table.len(), 4);
    }

    #[test]
    fn common_prefix_counts_matching_hex_digits() {
        // 4-digit space: 0x1234 vs 0x1256 share the leading "12".
        assert_eq!(common_prefix_len(0x1234, 0x1256, 4), 2);
        assert_eq!(common_prefix_len(0x1234, 0x1234, 4), 4);
        assert_eq!(common_prefix_len(0x1234, 0x9234, 4), 0);
    }

    #[test]
    fn extreme_leaf_set_picks_farthest_on_each_side() {
        let mut node = PastryNode::new(100, 4, 8, 8);
        node.leaf_set = vec![80, 90, 95, 98, 101, 102, 110, 120];
        assert_eq!(node.extreme_leaf_set(LeafSide::Smaller, &[]), 80);
        assert_eq!(node.extreme_leaf_set(LeafSide::Larger, &[]), 120);
        assert_eq!(node.extreme_leaf_set(LeafSide::Smaller, &[80]), 90);
    }

    #[test]
    fn extreme_leaf_set_defaults_to_self_when_side_empty() {
        let mut node = PastryNode::new(100, 4, 8, 8);
        node.leaf_set = vec![101, 102];
        assert_eq!(node.extreme_leaf_set(LeafSide::Smaller, &[]), 100);
    }
}
