//! Priority-weighted scheduler (spec.md §4.5). Each node owns a weight, a
//! parent, a set of children, an active flag and an accumulated-cost
//! counter (`point`). Selection always descends from the synthetic root
//! (id 0) picking the active child with the lowest `point` at each level.

use std::collections::{HashMap, VecDeque};

/// Cost scale factor: `point += sent_len * K / (weight + 1)`.
const K: u64 = 256;

/// Tree depth is capped at `min(max_concurrent_streams, 256)`.
const MAX_DEPTH_CEILING: usize = 256;

const ANCESTRY_LOG_CAPACITY: usize = 64;

type NodeIndex = u32;
const ROOT: NodeIndex = 0;

#[derive(Debug, Clone)]
struct Node {
    stream_id: Option<u32>,
    weight: u16,
    parent: NodeIndex,
    children: Vec<NodeIndex>,
    active: bool,
    point: u64,
    /// True for a node inserted only to preserve a declared dependency
    /// before its stream existed, or after its stream closed.
    is_shadow: bool,
}

impl Node {
    fn root() -> Self {
        Node { stream_id: None, weight: 15, parent: ROOT, children: Vec::new(), active: false, point: 0, is_shadow: true }
    }
}

/// A remembered `(id, parent_id)` relationship kept so that a stream whose
/// ancestor just closed can still be re-attached to the right grandparent.
#[derive(Debug, Clone, Copy)]
struct AncestryRecord {
    id: u32,
    parent_id: u32,
}

pub struct DependencyTree {
    nodes: Vec<Node>,
    by_stream_id: HashMap<u32, NodeIndex>,
    max_depth: usize,
    ancestry_log: VecDeque<AncestryRecord>,
}

impl DependencyTree {
    pub fn new(max_concurrent_streams: u32) -> Self {
        Self {
            nodes: vec![Node::root()],
            by_stream_id: HashMap::new(),
            max_depth: (max_concurrent_streams as usize).clamp(1, MAX_DEPTH_CEILING),
            ancestry_log: VecDeque::with_capacity(ANCESTRY_LOG_CAPACITY),
        }
    }

    fn depth_of(&self, mut idx: NodeIndex) -> usize {
        let mut depth = 0;
        while idx != ROOT {
            idx = self.nodes[idx as usize].parent;
            depth += 1;
        }
        depth
    }

    fn find_or_insert_shadow(&mut self, stream_id: u32) -> NodeIndex {
        if let Some(&idx) = self.by_stream_id.get(&stream_id) {
            return idx;
        }
        let idx = self.nodes.len() as NodeIndex;
        self.nodes.push(Node { stream_id: Some(stream_id), weight: 15, parent: ROOT, children: Vec::new(), active: false, point: 0, is_shadow: true });
        self.nodes[ROOT as usize].children.push(idx);
        self.by_stream_id.insert(stream_id, idx);
        idx
    }

    /// Insert or update the node for `stream_id` with a declared dependency
    /// on `parent_stream_id` (0 meaning the root), `exclusive`, and `weight`
    /// (1..=256, stored as the wire value - 1 internally is not needed; we
    /// keep the raw 1..256 range the caller already normalized).
    pub fn set_priority(&mut self, stream_id: u32, parent_stream_id: u32, exclusive: bool, weight: u16) {
        if stream_id != 0 && stream_id == parent_stream_id {
            // A self-dependency would set `parent == idx`, sending `depth_of`
            // into an infinite loop. Callers must reject this before reaching
            // here (RFC 7540 §5.3.1 / I7); this is a last-ditch guard.
            return;
        }
        let parent_idx = if parent_stream_id == 0 {
            ROOT
        } else {
            self.find_or_insert_shadow(parent_stream_id)
        };

        let idx = self.find_or_insert_shadow(stream_id);
        self.nodes[idx as NodeIndex as usize].weight = weight;

        // Detach from current parent, if any.
        let old_parent = self.nodes[idx as usize].parent;
        self.nodes[old_parent as usize].children.retain(|&c| c != idx);

        if exclusive {
            // The new node becomes the sole child of parent_idx, adopting
            // all former siblings as its own children.
            let former_children: Vec<NodeIndex> =
                std::mem::take(&mut self.nodes[parent_idx as usize].children);
            for &child in &former_children {
                if child == idx {
                    continue;
                }
                self.nodes[child as usize].parent = idx;
                self.nodes[idx as usize].children.push(child);
            }
            self.nodes[parent_idx as usize].children.push(idx);
        } else {
            self.nodes[parent_idx as usize].children.push(idx);
        }
        self.nodes[idx as usize].parent = parent_idx;

        if self.depth_of(idx) > self.max_depth {
            self.reparent_to_root(idx);
        }
    }

    fn reparent_to_root(&mut self, idx: NodeIndex) {
        let old_parent = self.nodes[idx as usize].parent;
        self.nodes[old_parent as usize].children.retain(|&c| c != idx);
        self.nodes[ROOT as usize].children.push(idx);
        self.nodes[idx as usize].parent = ROOT;
    }

    /// Mark the node for `stream_id` real (not a shadow) and activate it;
    /// called when a HEADERS frame actually opens the stream.
    pub fn activate(&mut self, stream_id: u32) {
        let idx = self.find_or_insert_shadow(stream_id);
        let node = &mut self.nodes[idx as usize];
        node.is_shadow = false;
        node.active = true;
    }

    pub fn deactivate(&mut self, stream_id: u32) {
        if let Some(&idx) = self.by_stream_id.get(&stream_id) {
            self.nodes[idx as usize].active = false;
        }
    }

    /// A stream has closed. If it has live descendants, remember its
    /// `(id, parent_id)` in the ancestry log and convert it to a shadow node
    /// so descendants keep their place in the schedule; otherwise drop it.
    pub fn remove_stream(&mut self, stream_id: u32) {
        let Some(&idx) = self.by_stream_id.get(&stream_id) else { return };
        let node = &self.nodes[idx as usize];
        if node.children.is_empty() {
            let parent = node.parent;
            self.nodes[parent as usize].children.retain(|&c| c != idx);
            self.by_stream_id.remove(&stream_id);
            self.nodes[idx as usize].active = false;
        } else {
            let parent_stream_id = self.nodes[self.nodes[idx as usize].parent as usize]
                .stream_id
                .unwrap_or(0);
            self.push_ancestry(stream_id, parent_stream_id);
            let node = &mut self.nodes[idx as usize];
            node.is_shadow = true;
            node.active = false;
        }
    }

    fn push_ancestry(&mut self, id: u32, parent_id: u32) {
        if self.ancestry_log.len() == ANCESTRY_LOG_CAPACITY {
            self.ancestry_log.pop_front();
        }
        self.ancestry_log.push_back(AncestryRecord { id, parent_id });
    }

    /// Look up the remembered parent of a stream that has since closed.
    pub fn ancestry_lookup(&self, id: u32) -> Option<u32> {
        self.ancestry_log.iter().rev().find(|r| r.id == id).map(|r| r.parent_id)
    }

    /// Select the next stream id to transmit: from the root, at each level
    /// pick the active child with the lowest `point`; descend through
    /// inactive children to find an activated descendant.
    pub fn top(&self) -> Option<u32> {
        let mut idx = ROOT;
        loop {
            let node = &self.nodes[idx as usize];
            let mut candidates: Vec<NodeIndex> = node.children.clone();
            candidates.sort_by_key(|&c| self.nodes[c as usize].point);
            let mut next = None;
            for c in candidates {
                if self.nodes[c as usize].active {
                    next = Some(c);
                    break;
                }
                if let Some(found) = self.find_active_descendant(c) {
                    next = Some(found);
                    break;
                }
            }
            match next {
                Some(n) => {
                    if self.nodes[n as usize].active {
                        return self.nodes[n as usize].stream_id;
                    }
                    idx = n;
                }
                None => return None,
            }
        }
    }

    fn find_active_descendant(&self, idx: NodeIndex) -> Option<NodeIndex> {
        if self.nodes[idx as usize].active {
            return Some(idx);
        }
        let mut children: Vec<NodeIndex> = self.nodes[idx as usize].children.clone();
        children.sort_by_key(|&c| self.nodes[c as usize].point);
        for c in children {
            if let Some(found) = self.find_active_descendant(c) {
                return Some(found);
            }
        }
        None
    }

    /// Account for `len` bytes just sent on `stream_id`'s behalf, updating
    /// its cost and propagating toward the root.
    pub fn record_sent(&mut self, stream_id: u32, len: u64) {
        let Some(&idx) = self.by_stream_id.get(&stream_id) else { return };
        let cost = len * K / (self.nodes[idx as usize].weight as u64 + 1);
        let mut cur = idx;
        loop {
            self.nodes[cur as usize].point += cost;
            if cur == ROOT {
                break;
            }
            cur = self.nodes[cur as usize].parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_dependency_is_ignored_instead_of_hanging_depth_of() {
        let mut t = DependencyTree::new(100);
        t.set_priority(1, 1, false, 15);
        t.activate(1);
        // would infinite-loop in depth_of if the self-dependency had been applied.
        assert_eq!(t.top(), Some(1));
    }

    #[test]
    fn default_dependency_is_root_and_selectable() {
        let mut t = DependencyTree::new(100);
        t.set_priority(1, 0, false, 15);
        t.activate(1);
        assert_eq!(t.top(), Some(1));
    }

    #[test]
    fn lower_point_wins_among_siblings() {
        let mut t = DependencyTree::new(100);
        t.set_priority(1, 0, false, 15);
        t.set_priority(3, 0, false, 15);
        t.activate(1);
        t.activate(3);
        t.record_sent(1, 1000);
        assert_eq!(t.top(), Some(3));
    }

    #[test]
    fn exclusive_dependency_adopts_former_siblings() {
        let mut t = DependencyTree::new(100);
        t.set_priority(1, 0, false, 15);
        t.set_priority(3, 0, false, 15);
        t.set_priority(5, 0, true, 15);
        // 5 is now the sole child of root; 1 and 3 became children of 5.
        let root_children = &t.nodes[ROOT as usize].children;
        assert_eq!(root_children.len(), 1);
        let five_idx = t.by_stream_id[&5];
        assert_eq!(t.nodes[five_idx as usize].children.len(), 2);
    }

    #[test]
    fn inactive_parent_defers_to_active_descendant() {
        let mut t = DependencyTree::new(100);
        t.set_priority(1, 0, false, 15);
        t.set_priority(3, 1, false, 15);
        t.activate(3);
        assert_eq!(t.top(), Some(3));
    }

    #[test]
    fn closing_stream_with_descendants_preserves_ancestry() {
        let mut t = DependencyTree::new(100);
        t.set_priority(1, 0, false, 15);
        t.set_priority(3, 1, false, 15);
        t.activate(1);
        t.activate(3);
        t.remove_stream(1);
        assert_eq!(t.ancestry_lookup(1), Some(0));
        assert_eq!(t.top(), Some(3));
    }

    #[test]
    fn depth_exceeding_cap_reparents_to_root() {
        let mut t = DependencyTree::new(2);
        t.set_priority(1, 0, false, 15);
        t.set_priority(3, 1, false, 15);
        t.set_priority(5, 3, false, 15);
        let five_idx = t.by_stream_id[&5];
        assert_eq!(t.nodes[five_idx as usize].parent, ROOT);
    }
}
