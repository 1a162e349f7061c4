//! The Chord node protocol (spec §4.2): finger-table construction,
//! successor/predecessor maintenance, key storage and lookup, voluntary
//! departure, lazy finger repair on stale pointers.
//!
//! Node methods take `&ChordNetwork` (a shared handle to the fabric) and
//! reach peers through `fabric.get_node(id)` + a `RefCell` borrow, per the
//! "direct peer method calls via fabric lookup" redesign in spec §9 — no
//! node stores a literal back-reference to its fabric, since that would
//! mean an `Rc` cycle between every node and the fabric that owns it for
//! no benefit. The free functions at the bottom of this module are the
//! entry points a driver uses; they own the `RefCell` borrow/drop
//! choreography so callers never have to reason about it.

mod node;

pub use node::{ChordNode, FingerEntry};

use crate::error::DhtError;
use crate::fabric::{Fabric, NodeId};

/// A Chord fabric: the network substrate plus the Chord nodes on it.
pub type ChordNetwork = Fabric<ChordNode>;

/// Run `id`'s `join()` against the current fabric state. The node must
/// already be registered (`fabric.add_node`) before calling this.
pub fn join(fabric: &ChordNetwork, id: NodeId) {
    if let Some(cell) = fabric.get_node(id) {
        cell.borrow_mut().join(fabric);
    }
}

/// Run `id`'s departure handshake (key handoff, predecessor/successor
/// relinking, finger refill) and then remove it from the fabric.
///
/// Splitting "prepare" from "remove" is the Rust-shaped version of spec
/// §4.2's single `depart_network()` call: the handoff needs concurrent
/// shared access to several peers (`&ChordNetwork`), while removing the
/// node from the fabric's node map needs exclusive access (`&mut
/// ChordNetwork`) — Rust's aliasing rules won't let one method do both at
/// once, so the exclusive step is hoisted out to this free function.
pub fn depart(fabric: &mut ChordNetwork, id: NodeId) -> bool {
    {
        let shared: &ChordNetwork = fabric;
        match shared.get_node(id) {
            Some(cell) => cell.borrow_mut().prepare_departure(shared),
            None => return false,
        }
    }
    fabric.remove_node(id)
}

/// Store `(key, value)` via routing from `from`. Returns the hop count.
pub fn store_key(
    fabric: &ChordNetwork,
    from: NodeId,
    key: u64,
    value: i64,
) -> Result<u32, DhtError> {
    let cell = fabric.get_node(from).expect("store_key: node not on fabric");
    cell.borrow_mut().store_key(fabric, key, value)
}

/// Search for `key` via routing from `from`. Returns `(hops, value)`.
pub fn search(fabric: &ChordNetwork, from: NodeId, key: u64) -> (u32, Option<i64>) {
    let cell = fabric.get_node(from).expect("search: node not on fabric");
    cell.borrow_mut().search(fabric, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_id;

    const M: u32 = 24;

    fn build_ring(num_nodes: usize, num_switches: usize, seed: u64) -> (ChordNetwork, Vec<NodeId>) {
        let mut fabric = ChordNetwork::generate(num_switches, seed);
        let mut ids = Vec::new();
        let mut ordinal = 0u64;
        while ids.len() < num_nodes {
            let id = hash_id(ordinal, (M / 4) as usize);
            ordinal += 1;
            if fabric.add_node(id, ChordNode::new(id, M)).is_ok() {
                join(&fabric, id);
                ids.push(id);
            }
        }
        (fabric, ids)
    }

    #[test]
    fn single_node_ring_points_to_self() {
        let (fabric, ids) = build_ring(1, 4, 1);
        let id = ids[0];
        let cell = fabric.get_node(id).unwrap();
        let node = cell.borrow();
        assert_eq!(node.successor(), id);
        assert_eq!(node.predecessor(), Some(id));
    }

    #[test]
    fn store_then_search_from_any_node_succeeds() {
        let (fabric, ids) = build_ring(50, 50, 11);
        for key in 0u64..100 {
            let from = ids[(key as usize) % ids.len()];
            let _ = store_key(&fabric, from, key, (key * 7) as i64);
        }
        for key in 0u64..100 {
            for &from in ids.iter().take(5) {
                let (hops, value) = search(&fabric, from, key);
                assert!(hops <= 12, "hops {hops} exceeded bound for key {key}");
                assert_eq!(value, Some((key * 7) as i64));
            }
        }
    }

    #[test]
    fn duplicate_key_store_is_rejected() {
        let (fabric, ids) = build_ring(10, 20, 2);
        let from = ids[0];
        assert!(store_key(&fabric, from, 1, 100).is_ok());
        assert_eq!(store_key(&fabric, from, 1, 200), Err(DhtError::DuplicateKey));
    }

    #[test]
    fn unknown_key_search_returns_none() {
        let (fabric, ids) = build_ring(10, 20, 3);
        let (_hops, value) = search(&fabric, ids[0], 99999);
        assert_eq!(value, None);
    }

    #[test]
    fn successor_closure_holds_after_join() {
        let (fabric, ids) = build_ring(30, 30, 5);
        for &id in &ids {
            let cell = fabric.get_node(id).unwrap();
            let node = cell.borrow();
            let succ = node.successor();
            assert!(fabric.is_alive(succ));
            let succ_cell = fabric.get_node(succ).unwrap();
            assert_eq!(succ_cell.borrow().predecessor(), Some(id));
        }
    }

    #[test]
    fn departure_preserves_ring_reachability_for_survivors() {
        let (mut fabric, mut ids) = build_ring(40, 40, 6);
        // Store keys, remember which survive.
        for key in 0u64..40 {
            let from = ids[key as usize % ids.len()];
            let _ = store_key(&fabric, from, key, key as i64);
        }
        // Depart a handful of nodes.
        for &victim in ids.clone().iter().take(10) {
            depart(&mut fabric, victim);
        }
        ids.retain(|id| fabric.is_alive(*id));

        // Walking successors from any survivor should visit every survivor
        // exactly once and return to the start.
        let start = ids[0];
        let mut visited = std::collections::HashSet::new();
        let mut cur = start;
        loop {
            assert!(visited.insert(cur), "cycle revisited {cur} early");
            let cell = fabric.get_node(cur).unwrap();
            let next = cell.borrow().successor();
            cur = next;
            if cur == start {
                break;
            }
            assert!(visited.len() <= ids.len());
        }
        assert_eq!(visited.len(), ids.len());
    }
}
