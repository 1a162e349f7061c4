use std::collections::HashMap;

use crate::fabric::NodeId;
use crate::ring::{between_left_inclusive, between_right_inclusive, circular_add, circular_sub};

use super::ChordNetwork;

/// One row of a Chord finger table: `start = (id + 2^i) mod ring_size`, and
/// the live successor of `start` as last observed (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub struct FingerEntry {
    pub start: u64,
    pub node: Option<NodeId>,
}

/// A Chord ring participant: an `m`-entry finger table, a predecessor
/// pointer, and the keys this node currently owns.
pub struct ChordNode {
    id: NodeId,
    m: u32,
    ring_size: u64,
    finger: Vec<FingerEntry>,
    predecessor: Option<NodeId>,
    store: HashMap<u64, i64>,
}

impl ChordNode {
    /// A freshly constructed node, alone on its own ring: every finger and
    /// the predecessor point at itself until `join` resolves otherwise.
    pub fn new(id: NodeId, m: u32) -> Self {
        let ring_size = 1u64 << m;
        let finger = (0..m)
            .map(|i| FingerEntry {
                start: circular_add(id, 1u64 << i, ring_size),
                node: Some(id),
            })
            .collect();
        Self {
            id,
            m,
            ring_size,
            finger,
            predecessor: Some(id),
            store: HashMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn m(&self) -> u32 {
        self.m
    }

    pub fn successor(&self) -> NodeId {
        self.finger[0].node.unwrap_or(self.id)
    }

    pub fn set_successor(&mut self, id: NodeId) {
        self.finger[0].node = Some(id);
    }

    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor
    }

    /// Join the ring through whichever peer the fabric's bootstrap
    /// primitive finds. A solitary node (no live peer reachable) stays a
    /// one-node ring pointing at itself.
    pub fn join(&mut self, fabric: &ChordNetwork) {
        match fabric.bootstrap_peer(self.id) {
            None => {
                for entry in &mut self.finger {
                    entry.node = Some(self.id);
                }
                self.predecessor = Some(self.id);
            }
            Some(bootstrap) => {
                self.init_finger_table(fabric, bootstrap);
                self.update_others(fabric);
                self.fetch_keys(fabric);
            }
        }
    }

    /// Resolve this node's own fingers via `bootstrap`, then splice it into
    /// the ring between its new successor and that successor's old
    /// predecessor (spec §4.2, `__init_finger_table`).
    fn init_finger_table(&mut self, fabric: &ChordNetwork, bootstrap: NodeId) {
        let start0 = self.finger[0].start;
        let succ0 = fabric
            .get_node(bootstrap)
            .expect("bootstrap peer vanished mid-join")
            .borrow()
            .find_successor(fabric, start0);
        self.finger[0].node = Some(succ0);

        if succ0 == self.id {
            // Only the bootstrap node was alive, and it's us — nothing to splice.
            self.predecessor = Some(self.id);
        } else {
            let old_pred = {
                let cell = fabric.get_node(succ0).expect("successor vanished mid-join");
                let mut succ_node = cell.borrow_mut();
                let old_pred = succ_node.predecessor;
                succ_node.predecessor = Some(self.id);
                old_pred
            };
            self.predecessor = old_pred;
        }

        for i in 0..self.finger.len().saturating_sub(1) {
            let start = self.finger[i + 1].start;
            let prev_node = self.finger[i].node.unwrap_or(self.id);
            if between_left_inclusive(self.id, start, prev_node) {
                self.finger[i + 1].node = Some(prev_node);
            } else {
                let resolved = fabric
                    .get_node(bootstrap)
                    .expect("bootstrap peer vanished mid-join")
                    .borrow()
                    .find_successor(fabric, start);
                self.finger[i + 1].node = Some(resolved);
            }
        }
    }

    /// Ask every node that should have us as an `i`-th finger to adopt us
    /// (spec §4.2, `__update_others`).
    fn update_others(&self, fabric: &ChordNetwork) {
        for i in 0..self.finger.len() {
            let offset = 1u64 << i;
            let target = circular_sub(self.id, offset, self.ring_size);
            let p = self.find_predecessor(fabric, target);
            if p == self.id {
                continue;
            }
            if let Some(cell) = fabric.get_node(p) {
                cell.borrow_mut().update_finger_table(fabric, self.id, i);
            }
        }
    }

    /// If `s` belongs in this node's `i`-th finger slot, adopt it and push
    /// the same update to our predecessor (spec §4.2, `update_finger_table`).
    fn update_finger_table(&mut self, fabric: &ChordNetwork, s: NodeId, i: usize) {
        if s == self.id {
            return;
        }
        let cur = self.finger[i].node.unwrap_or(self.id);
        // A finger still pointing at `self` is unset, not a real interval
        // endpoint (`between_left_inclusive` treats `a == b` as empty) — any
        // other live id is an improvement over "nothing found yet".
        if cur == self.id || between_left_inclusive(self.id, s, cur) {
            self.finger[i].node = Some(s);
            if let Some(pred) = self.predecessor {
                if pred != s && pred != self.id {
                    if let Some(cell) = fabric.get_node(pred) {
                        cell.borrow_mut().update_finger_table(fabric, s, i);
                    }
                }
            }
        }
    }

    /// Pull across any keys our successor was holding on our behalf, now
    /// that we've spliced into the ring ahead of it (spec §4.2,
    /// `fetch_keys`).
    fn fetch_keys(&mut self, fabric: &ChordNetwork) {
        let succ = self.successor();
        if succ == self.id {
            return;
        }
        let Some(cell) = fabric.get_node(succ) else {
            return;
        };
        let lower = self.predecessor.unwrap_or(self.id);
        let mut moved = Vec::new();
        {
            let succ_node = cell.borrow();
            for (&key, &value) in succ_node.store.iter() {
                if between_right_inclusive(lower, key, self.id) {
                    moved.push((key, value));
                }
            }
        }
        let mut succ_node = cell.borrow_mut();
        for (key, value) in moved {
            succ_node.store.remove(&key);
            self.store.insert(key, value);
        }
    }

    /// Voluntary departure (spec §4.2, `depart_network`): hand stored keys
    /// to the successor, relink predecessor and successor around the gap,
    /// and ask every other node to patch any finger still pointing at us.
    /// Removing this node from the fabric's own map is the caller's job —
    /// see [`super::depart`].
    pub fn prepare_departure(&mut self, fabric: &ChordNetwork) -> bool {
        let succ = self.successor();
        let pred = self.predecessor;

        if succ != self.id {
            if let Some(cell) = fabric.get_node(succ) {
                let mut succ_node = cell.borrow_mut();
                for (key, value) in self.store.drain() {
                    succ_node.store.insert(key, value);
                }
                succ_node.predecessor = pred;
            }
        }

        if let Some(pred_id) = pred {
            if pred_id != self.id {
                if let Some(cell) = fabric.get_node(pred_id) {
                    let mut pred_node = cell.borrow_mut();
                    if pred_node.successor() == self.id {
                        let replacement = if succ != self.id { succ } else { pred_id };
                        pred_node.set_successor(replacement);
                    }
                }
            }
        }

        let replacement = if succ != self.id { succ } else { pred.unwrap_or(self.id) };
        for other_id in fabric.node_ids() {
            if other_id == self.id {
                continue;
            }
            if let Some(cell) = fabric.get_node(other_id) {
                cell.borrow_mut().repair_fingers_pointing_at(self.id, replacement);
            }
        }

        true
    }

    fn repair_fingers_pointing_at(&mut self, departing: NodeId, replacement: NodeId) {
        for entry in &mut self.finger {
            if entry.node == Some(departing) {
                entry.node = Some(replacement);
            }
        }
        if self.predecessor == Some(departing) {
            self.predecessor = Some(replacement);
        }
    }

    /// The furthest finger that still precedes `id` on the ring, or `self`
    /// if none does (spec §4.2, `closest_preceding_finger`).
    fn closest_preceding_finger(&self, fabric: &ChordNetwork, id: u64) -> NodeId {
        for i in (0..self.finger.len()).rev() {
            if let Some(candidate) = self.finger[i].node {
                if candidate != self.id
                    && fabric.is_alive(candidate)
                    && crate::ring::between_open(self.id, candidate, id)
                {
                    return candidate;
                }
            }
        }
        self.id
    }

    /// `successor()` and `closest_preceding_finger()` of whichever node
    /// `current` names, fetched without re-entering `self`'s own `RefCell`
    /// when `current == self.id` (it's already borrowed by our caller).
    fn peek(&self, fabric: &ChordNetwork, current: NodeId, id: u64) -> Option<(NodeId, NodeId)> {
        if current == self.id {
            Some((self.successor(), self.closest_preceding_finger(fabric, id)))
        } else {
            fabric.get_node(current).map(|cell| {
                let node = cell.borrow();
                (node.successor(), node.closest_preceding_finger(fabric, id))
            })
        }
    }

    fn find_predecessor_with_hops(&self, fabric: &ChordNetwork, id: u64) -> (NodeId, u32) {
        let mut current = self.id;
        let mut hops = 0u32;
        loop {
            let Some((succ, closest)) = self.peek(fabric, current, id) else {
                return (current, hops);
            };
            if between_right_inclusive(current, id, succ) {
                return (current, hops);
            }
            if closest == current {
                return (current, hops);
            }
            current = closest;
            hops += 1;
            if hops as usize > self.finger.len() * 4 {
                return (current, hops);
            }
        }
    }

    fn find_predecessor(&self, fabric: &ChordNetwork, id: u64) -> NodeId {
        self.find_predecessor_with_hops(fabric, id).0
    }

    fn find_successor_with_hops(&self, fabric: &ChordNetwork, id: u64) -> (NodeId, u32) {
        if id == self.id {
            return (self.id, 0);
        }
        let (pred, hops) = self.find_predecessor_with_hops(fabric, id);
        let succ = if pred == self.id {
            self.successor()
        } else {
            match fabric.get_node(pred) {
                Some(cell) => cell.borrow().successor(),
                None => pred,
            }
        };
        (succ, hops + 1)
    }

    /// Who currently owns `id` on this ring (spec §4.2, `find_successor`).
    pub fn find_successor(&self, fabric: &ChordNetwork, id: u64) -> NodeId {
        self.find_successor_with_hops(fabric, id).0
    }

    /// Route to `key`'s owner and store `(key, value)` there. Fails if the
    /// owner already holds that key.
    pub fn store_key(
        &mut self,
        fabric: &ChordNetwork,
        key: u64,
        value: i64,
    ) -> Result<u32, crate::error::DhtError> {
        let (owner, hops) = self.find_successor_with_hops(fabric, key);
        if owner == self.id {
            if self.store.contains_key(&key) {
                return Err(crate::error::DhtError::DuplicateKey);
            }
            self.store.insert(key, value);
            return Ok(hops);
        }
        let cell = fabric
            .get_node(owner)
            .ok_or(crate::error::DhtError::NotInDht)?;
        let mut node = cell.borrow_mut();
        if node.store.contains_key(&key) {
            return Err(crate::error::DhtError::DuplicateKey);
        }
        node.store.insert(key, value);
        Ok(hops)
    }

    /// Route to `key`'s owner and look up its value, returning the hop
    /// count alongside whatever was found.
    pub fn search(&mut self, fabric: &ChordNetwork, key: u64) -> (u32, Option<i64>) {
        let (owner, hops) = self.find_successor_with_hops(fabric, key);
        let value = if owner == self.id {
            self.store.get(&key).copied()
        } else {
            fabric
                .get_node(owner)
                .and_then(|cell| cell.borrow().store.get(&key).copied())
        };
        (hops, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_self_loop() {
        let node = ChordNode::new(10, 8);
        assert_eq!(node.successor(), 10);
        assert_eq!(node.predecessor(), Some(10));
        assert_eq!(node.finger.len(), 8);
    }

    #[test]
    fn finger_starts_wrap_around_ring() {
        let node = ChordNode::new(250, 8); // ring_size = 256
        assert_eq!(node.finger[0].start, 251);
        assert_eq!(node.finger[7].start, (250 + 128) % 256);
    }

    #[test]
    fn find_successor_of_own_id_is_self_with_zero_hops() {
        let fabric = super::super::ChordNetwork::generate(4, 1);
        let id = 10;
        fabric.add_node(id, ChordNode::new(id, 8)).unwrap();
        super::super::join(&fabric, id);
        let cell = fabric.get_node(id).unwrap();
        let (hops, found) = cell.borrow().find_successor_with_hops(&fabric, id);
        assert_eq!(found, id);
        assert_eq!(hops, 0);
    }
}
