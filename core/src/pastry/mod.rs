//! The Pastry node protocol (spec §4.3): prefix-routing table, leaf set,
//! neighborhood set, expanding-ring join, and repair of stale pointers.
//!
//! Same shape as [`crate::chord`]: node methods take `&PastryNetwork` and
//! reach peers through `fabric.get_node(id)` + a `RefCell` borrow, and the
//! free functions here own the borrow/drop choreography for callers.

mod node;

pub use node::PastryNode;

use crate::fabric::{Fabric, NodeId};

/// A Pastry fabric: the network substrate plus the Pastry nodes on it.
pub type PastryNetwork = Fabric<PastryNode>;

/// Run `id`'s `join()` against the current fabric state. The node must
/// already be registered (`fabric.add_node`) before calling this.
pub fn join(fabric: &PastryNetwork, id: NodeId) {
    if let Some(cell) = fabric.get_node(id) {
        cell.borrow_mut().join(fabric);
    }
}

/// Remove `id` from the fabric. Pastry stores nothing beyond membership
/// (spec §1), so unlike Chord there is no key handoff to perform first —
/// peers discover the departure lazily the next time routing hits the now
/// dead id and calls `repair` (spec §4.3).
pub fn depart(fabric: &mut PastryNetwork, id: NodeId) -> bool {
    if fabric.get_node(id).is_none() {
        return false;
    }
    fabric.remove_node(id)
}

/// Hash `key` to a target id and route to whichever node it converges on,
/// returning the hop count alongside that node's id (spec §4.3, `search`).
pub fn search(fabric: &PastryNetwork, from: NodeId, key: u64) -> (u32, Option<NodeId>) {
    let cell = fabric.get_node(from).expect("search: node not on fabric");
    cell.borrow_mut().search(fabric, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_id;

    const NUM_DIGITS: usize = 4;
    const LEAF_SET_MAX: usize = 8;
    const NEIGHBORHOOD_SET_MAX: usize = 8;

    fn build_ring(num_nodes: usize, num_switches: usize, seed: u64) -> (PastryNetwork, Vec<NodeId>) {
        let mut fabric = PastryNetwork::generate(num_switches, seed);
        let mut ids = Vec::new();
        let mut ordinal = 0u64;
        while ids.len() < num_nodes {
            let id = hash_id(ordinal, NUM_DIGITS);
            ordinal += 1;
            let node = PastryNode::new(id, NUM_DIGITS, LEAF_SET_MAX, NEIGHBORHOOD_SET_MAX);
            if fabric.add_node(id, node).is_ok() {
                join(&fabric, id);
                ids.push(id);
            }
        }
        (fabric, ids)
    }

    #[test]
    fn single_node_ring_has_empty_leaf_set() {
        let (fabric, ids) = build_ring(1, 4, 1);
        let cell = fabric.get_node(ids[0]).unwrap();
        assert!(cell.borrow().leaf_set().is_empty());
    }

    #[test]
    fn leaf_sets_are_roughly_symmetric() {
        let (fabric, ids) = build_ring(30, 30, 9);
        for &id in &ids {
            let cell = fabric.get_node(id).unwrap();
            let leaves: Vec<NodeId> = cell.borrow().leaf_set().to_vec();
            for peer in leaves {
                let peer_cell = fabric.get_node(peer).unwrap();
                // Not a strict invariant under churn-free construction, but
                // every leaf set member should at least still be alive.
                assert!(fabric.is_alive(peer_cell.borrow().id()));
            }
        }
    }

    #[test]
    fn search_for_live_id_converges_on_that_node() {
        let (fabric, ids) = build_ring(50, 50, 13);
        for &target in &ids {
            for &from in ids.iter().take(5) {
                let (hops, found) = search(&fabric, from, target);
                assert!(hops <= 10, "hops {hops} exceeded bound for id {target}");
                assert_eq!(found, Some(target));
            }
        }
    }

    #[test]
    fn search_for_absent_id_does_not_claim_a_hit() {
        let (fabric, ids) = build_ring(50, 50, 13);
        let absent = 0xFFFF;
        assert!(!ids.contains(&absent));
        let (_, found) = search(&fabric, ids[0], absent);
        assert_ne!(found, Some(absent));
    }

    #[test]
    fn churn_leaves_remaining_ids_searchable() {
        let (mut fabric, mut ids) = build_ring(40, 40, 14);
        let original_survivor_count;
        {
            let departing: Vec<NodeId> = ids.iter().take(ids.len() / 2).copied().collect();
            for victim in departing {
                depart(&mut fabric, victim);
            }
            ids.retain(|id| fabric.is_alive(*id));
            original_survivor_count = ids.len();
        }
        assert!(original_survivor_count > 0);

        for &target in &ids {
            let (hops, found) = search(&fabric, ids[0], target);
            assert!(hops <= 10, "hops {hops} exceeded bound for id {target}");
            assert_eq!(found, Some(target));
        }
    }
}
