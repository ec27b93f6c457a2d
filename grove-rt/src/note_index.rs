//! Loop-aware interval tree over score regions, keyed by `(pitch, span)`.
//!
//! Nodes live in a slab addressed by plain indices rather than a web of
//! shared pointers: a `Tree` is reference-counted *within the arena*, so
//! [`NoteIndexArena::clone_instance`] never touches node memory, and a write
//! clones the tree lazily the first time it would otherwise mutate shared
//! state.

use grove_score::{Cursor, MidiNote, Region};

const PACKET_CAPACITY: usize = 4;
/// Regions are not split further once they reach this size.
const MIN_SPLITTING_MEASURES: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipNote {
    pub span: Region,
    pub note: MidiNote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u32);

#[derive(Debug, Default, Clone)]
struct Packet {
    indices: [u32; PACKET_CAPACITY],
    len: u8,
    next: Option<u32>,
}

impl Packet {
    fn new() -> Self {
        Self {
            indices: [u32::MAX; PACKET_CAPACITY],
            len: 0,
            next: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    region: Region,
    left: Option<u32>,
    right: Option<u32>,
    packets_head: Option<u32>,
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    root: u32,
    grow_toggle_left: bool,
    ref_count: u32,
}

#[derive(Debug, Clone)]
struct Instance {
    tree: u32,
    parent: Option<InstanceId>,
}

/// Owns every slab this module needs: note data, index packets, and the
/// (possibly shared) node trees each instance points at.
///
/// Cloning an arena deep-copies every slab. The UI-facing note-clip system
/// uses this to keep independent edit/in-flight/render snapshots the same
/// way [`crate::params::AudioParameterSystem`] clones its parameter maps,
/// not [`clone_instance`](Self::clone_instance)'s cheap ref-counted share,
/// which only makes sense for two instances inside the *same* arena.
#[derive(Debug, Default, Clone)]
pub struct NoteIndexArena {
    data: Vec<Option<ClipNote>>,
    free_data: Vec<u32>,
    packets: Vec<Packet>,
    free_packets: Vec<u32>,
    trees: Vec<Option<Tree>>,
    free_trees: Vec<u32>,
    instances: Vec<Option<Instance>>,
    free_instances: Vec<u32>,
    beats_per_measure: f64,
}

impl NoteIndexArena {
    pub fn new(beats_per_measure: f64) -> Self {
        Self {
            beats_per_measure,
            ..Default::default()
        }
    }

    /// Allocates a head item with an empty tree (a single unsplit leaf
    /// covering `region`) and no parent. Nodes only appear once an
    /// `insert`'s span actually reaches them; see [`Self::split_node_if_needed`].
    pub fn create(&mut self, region: Region) -> InstanceId {
        let mut nodes = Vec::new();
        let root = Self::push_leaf(&mut nodes, region);
        let tree_idx = self.push_tree(Tree {
            nodes,
            root,
            grow_toggle_left: true,
            ref_count: 1,
        });
        self.push_instance(Instance {
            tree: tree_idx,
            parent: None,
        })
    }

    pub fn clone_instance(&mut self, src: InstanceId) -> InstanceId {
        let tree_idx = self.instance(src).tree;
        self.tree_mut(tree_idx).ref_count += 1;
        self.push_instance(Instance {
            tree: tree_idx,
            parent: Some(src),
        })
    }

    pub fn destroy(&mut self, id: InstanceId) {
        let idx = id.0 as usize;
        let Some(instance) = self.instances[idx].take() else {
            return;
        };
        self.free_instances.push(id.0);
        self.release_tree_ref(instance.tree);
    }

    pub fn insert(&mut self, id: InstanceId, note: ClipNote) {
        let tree_idx = self.make_exclusive(id);
        self.grow_to_cover(tree_idx, note.span);
        let slab_index = self.acquire_data(note);
        let root = self.tree(tree_idx).root;
        self.insert_into_intersecting(tree_idx, root, note.span, slab_index);
    }

    /// Find the first slab entry matching `predicate`, then clear it from
    /// every node that references it (a note's span can intersect more
    /// than one node) and return the slab index to the free list.
    pub fn remove(&mut self, id: InstanceId, predicate: impl Fn(&ClipNote) -> bool) -> bool {
        let tree_idx = self.make_exclusive(id);
        let Some(slab_index) = self
            .data
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|n| predicate(n)))
            .map(|i| i as u32)
        else {
            return false;
        };
        let span = self.data[slab_index as usize].unwrap().span;
        let root = self.tree(tree_idx).root;
        self.remove_from_intersecting(tree_idx, root, span, slab_index);
        self.data[slab_index as usize] = None;
        self.free_data.push(slab_index);
        true
    }

    pub fn collect_notes_starting_in_region(
        &self,
        id: InstanceId,
        region: Region,
        cap: usize,
    ) -> (Vec<ClipNote>, usize) {
        self.collect(id, region, cap, |note, region, bpm| {
            region.contains(note.span.begin, bpm)
        })
    }

    pub fn collect_notes_intersecting_region(
        &self,
        id: InstanceId,
        region: Region,
        cap: usize,
    ) -> (Vec<ClipNote>, usize) {
        self.collect(id, region, cap, |note, region, bpm| {
            note.span.intersects(region, bpm)
        })
    }

    fn collect(
        &self,
        id: InstanceId,
        region: Region,
        cap: usize,
        predicate: impl Fn(&ClipNote, &Region, f64) -> bool,
    ) -> (Vec<ClipNote>, usize) {
        let tree_idx = self.instance(id).tree;
        let mut visited = vec![false; self.data.len()];
        let mut out = Vec::new();
        let mut would_be_count = 0usize;
        let root = self.tree(tree_idx).root;
        self.visit_intersecting(tree_idx, root, &region, &mut |slab_index| {
            if visited[slab_index as usize] {
                return;
            }
            visited[slab_index as usize] = true;
            if let Some(note) = self.data[slab_index as usize] {
                if predicate(&note, &region, self.beats_per_measure) {
                    would_be_count += 1;
                    if out.len() < cap {
                        out.push(note);
                    }
                }
            }
        });
        (out, would_be_count)
    }

    // --- internals -------------------------------------------------------

    fn instance(&self, id: InstanceId) -> &Instance {
        self.instances[id.0 as usize].as_ref().expect("valid instance id")
    }

    fn tree(&self, idx: u32) -> &Tree {
        self.trees[idx as usize].as_ref().expect("valid tree id")
    }

    fn tree_mut(&mut self, idx: u32) -> &mut Tree {
        self.trees[idx as usize].as_mut().expect("valid tree id")
    }

    fn push_tree(&mut self, tree: Tree) -> u32 {
        if let Some(idx) = self.free_trees.pop() {
            self.trees[idx as usize] = Some(tree);
            idx
        } else {
            let idx = self.trees.len() as u32;
            self.trees.push(Some(tree));
            idx
        }
    }

    fn push_instance(&mut self, instance: Instance) -> InstanceId {
        if let Some(idx) = self.free_instances.pop() {
            self.instances[idx as usize] = Some(instance);
            InstanceId(idx)
        } else {
            let idx = self.instances.len() as u32;
            self.instances.push(Some(instance));
            InstanceId(idx)
        }
    }

    /// If `id`'s tree is shared (ref_count > 1), clone it into a fresh tree
    /// exclusively owned by `id`; otherwise a no-op. Returns the (now
    /// exclusive) tree index.
    fn make_exclusive(&mut self, id: InstanceId) -> u32 {
        let tree_idx = self.instance(id).tree;
        if self.tree(tree_idx).ref_count <= 1 {
            return tree_idx;
        }
        let raw: Vec<(Region, Option<u32>, Option<u32>, Option<u32>)> = self
            .tree(tree_idx)
            .nodes
            .iter()
            .map(|n| (n.region, n.left, n.right, n.packets_head))
            .collect();
        let mut cloned_nodes = Vec::with_capacity(raw.len());
        for (region, left, right, packets_head) in raw {
            let new_head = packets_head.map(|head| self.clone_packet_chain(head));
            cloned_nodes.push(Node {
                region,
                left,
                right,
                packets_head: new_head,
            });
        }
        let root = self.tree(tree_idx).root;
        let toggle = self.tree(tree_idx).grow_toggle_left;
        let new_tree = self.push_tree(Tree {
            nodes: cloned_nodes,
            root,
            grow_toggle_left: toggle,
            ref_count: 1,
        });
        self.release_tree_ref(tree_idx);
        self.instances[id.0 as usize].as_mut().unwrap().tree = new_tree;
        new_tree
    }

    fn clone_packet_chain(&mut self, head: u32) -> u32 {
        // Packets belong to a tree's own Vec<Node>, but the packet *slab* is
        // global; cloning a chain means allocating fresh packets with the
        // same contents so the two trees never share mutable packet state.
        let mut indices = Vec::new();
        let mut cur = Some(head);
        while let Some(p) = cur {
            let packet = &self.packets[p as usize];
            indices.extend_from_slice(&packet.indices[..packet.len as usize]);
            cur = packet.next;
        }
        let mut new_head: Option<u32> = None;
        let mut tail: Option<u32> = None;
        for chunk in indices.chunks(PACKET_CAPACITY) {
            let idx = self.acquire_packet();
            {
                let packet = &mut self.packets[idx as usize];
                for (i, v) in chunk.iter().enumerate() {
                    packet.indices[i] = *v;
                }
                packet.len = chunk.len() as u8;
            }
            if new_head.is_none() {
                new_head = Some(idx);
            }
            if let Some(t) = tail {
                self.packets[t as usize].next = Some(idx);
            }
            tail = Some(idx);
        }
        new_head.unwrap_or_else(|| self.acquire_packet())
    }

    fn release_tree_ref(&mut self, tree_idx: u32) {
        let should_free = {
            let tree = self.tree_mut(tree_idx);
            tree.ref_count -= 1;
            tree.ref_count == 0
        };
        if should_free {
            let nodes_len = self.tree(tree_idx).nodes.len();
            for i in 0..nodes_len {
                if let Some(head) = self.tree(tree_idx).nodes[i].packets_head {
                    self.free_packet_chain_and_data(head);
                }
            }
            self.trees[tree_idx as usize] = None;
            self.free_trees.push(tree_idx);
        }
    }

    fn free_packet_chain_and_data(&mut self, head: u32) {
        let mut cur = Some(head);
        while let Some(p) = cur {
            let (next, slab_indices): (Option<u32>, Vec<u32>) = {
                let packet = &self.packets[p as usize];
                (packet.next, packet.indices[..packet.len as usize].to_vec())
            };
            for slab_index in slab_indices {
                if self.data[slab_index as usize].is_some() {
                    self.data[slab_index as usize] = None;
                    self.free_data.push(slab_index);
                }
            }
            self.packets[p as usize] = Packet::new();
            self.free_packets.push(p);
            cur = next;
        }
    }

    fn acquire_data(&mut self, note: ClipNote) -> u32 {
        if let Some(idx) = self.free_data.pop() {
            self.data[idx as usize] = Some(note);
            idx
        } else {
            let idx = self.data.len() as u32;
            self.data.push(Some(note));
            idx
        }
    }

    fn acquire_packet(&mut self) -> u32 {
        if let Some(idx) = self.free_packets.pop() {
            self.packets[idx as usize] = Packet::new();
            idx
        } else {
            let idx = self.packets.len() as u32;
            self.packets.push(Packet::new());
            idx
        }
    }

    /// Pushes a single unsplit leaf covering `region` and returns its index.
    fn push_leaf(tree_nodes: &mut Vec<Node>, region: Region) -> u32 {
        let node_idx = tree_nodes.len() as u32;
        tree_nodes.push(Node {
            region,
            left: None,
            right: None,
            packets_head: None,
        });
        node_idx
    }

    fn can_split(region: &Region) -> bool {
        region.size.measure > MIN_SPLITTING_MEASURES
            || (region.size.measure == MIN_SPLITTING_MEASURES && region.size.beat > 0.0)
    }

    /// Splits `node_idx` into two half-size leaf children the first time an
    /// insert's span reaches it; a no-op on a node that's already split, or
    /// one too small to usefully split further.
    fn split_node_if_needed(&mut self, tree_idx: u32, node_idx: u32) {
        let bpm = self.beats_per_measure;
        let node = &self.tree(tree_idx).nodes[node_idx as usize];
        if node.left.is_some() || node.right.is_some() {
            return;
        }
        let region = node.region;
        if !Self::can_split(&region) {
            return;
        }
        let mut half = region.size;
        half.wrapped_scale(0.5, bpm);
        if half.measure < 1 && half.beat <= f64::EPSILON {
            return;
        }
        let left_region = Region {
            begin: region.begin,
            size: half,
        };
        let right_size = region.size.sub_cursor(half, bpm);
        let right_region = Region {
            begin: region.begin.add_cursor(half, bpm),
            size: right_size,
        };
        let nodes = &mut self.tree_mut(tree_idx).nodes;
        let left = Self::push_leaf(nodes, left_region);
        let right = Self::push_leaf(nodes, right_region);
        let node = &mut self.tree_mut(tree_idx).nodes[node_idx as usize];
        node.left = Some(left);
        node.right = Some(right);
    }

    /// Grow the root of `tree_idx` (doubling alternately left/right) until
    /// its region fully covers `span`.
    fn grow_to_cover(&mut self, tree_idx: u32, span: Region) {
        let bpm = self.beats_per_measure;
        loop {
            let root_idx = self.tree(tree_idx).root;
            let root_region = self.tree(tree_idx).nodes[root_idx as usize].region;
            let span_end = span.end(bpm);
            let root_end = root_region.end(bpm);
            let covers = !span.begin.score_lt(root_region.begin)
                && (span_end.score_lt(root_end) || span_end == root_end);
            if covers {
                return;
            }
            let grow_left = self.tree(tree_idx).grow_toggle_left;
            let new_region = if grow_left {
                Region {
                    begin: root_region.begin.sub_cursor(root_region.size, bpm),
                    size: Cursor {
                        measure: root_region.size.measure * 2,
                        beat: root_region.size.beat * 2.0,
                    },
                }
            } else {
                Region {
                    begin: root_region.begin,
                    size: Cursor {
                        measure: root_region.size.measure * 2,
                        beat: root_region.size.beat * 2.0,
                    },
                }
            };
            let sibling_region = if grow_left {
                Region {
                    begin: new_region.begin,
                    size: root_region.size,
                }
            } else {
                Region {
                    begin: root_region.end(bpm),
                    size: root_region.size,
                }
            };
            let sibling = Self::push_leaf(&mut self.tree_mut(tree_idx).nodes, sibling_region);
            let new_root_idx = self.tree(tree_idx).nodes.len() as u32;
            let (left, right) = if grow_left {
                (sibling, root_idx)
            } else {
                (root_idx, sibling)
            };
            self.tree_mut(tree_idx).nodes.push(Node {
                region: new_region,
                left: Some(left),
                right: Some(right),
                packets_head: None,
            });
            self.tree_mut(tree_idx).root = new_root_idx;
            self.tree_mut(tree_idx).grow_toggle_left = !grow_left;
        }
    }

    fn insert_into_intersecting(&mut self, tree_idx: u32, node_idx: u32, span: Region, slab_index: u32) {
        let bpm = self.beats_per_measure;
        let region = self.tree(tree_idx).nodes[node_idx as usize].region;
        if !region.intersects(&span, bpm) {
            return;
        }
        self.packet_list_insert(tree_idx, node_idx, slab_index);
        self.split_node_if_needed(tree_idx, node_idx);
        let (left, right) = {
            let node = &self.tree(tree_idx).nodes[node_idx as usize];
            (node.left, node.right)
        };
        if let Some(l) = left {
            self.insert_into_intersecting(tree_idx, l, span, slab_index);
        }
        if let Some(r) = right {
            self.insert_into_intersecting(tree_idx, r, span, slab_index);
        }
    }

    fn packet_list_insert(&mut self, tree_idx: u32, node_idx: u32, slab_index: u32) {
        let head = self.tree(tree_idx).nodes[node_idx as usize].packets_head;
        let mut cur = head;
        loop {
            match cur {
                Some(p) => {
                    if self.packets[p as usize].indices[..self.packets[p as usize].len as usize]
                        .contains(&slab_index)
                    {
                        return; // no duplicate indices in a node's packet list
                    }
                    if (self.packets[p as usize].len as usize) < PACKET_CAPACITY {
                        let len = self.packets[p as usize].len as usize;
                        self.packets[p as usize].indices[len] = slab_index;
                        self.packets[p as usize].len += 1;
                        return;
                    }
                    cur = self.packets[p as usize].next;
                    if cur.is_none() {
                        let new_packet = self.acquire_packet();
                        self.packets[new_packet as usize].indices[0] = slab_index;
                        self.packets[new_packet as usize].len = 1;
                        self.packets[p as usize].next = Some(new_packet);
                        return;
                    }
                }
                None => {
                    let new_packet = self.acquire_packet();
                    self.packets[new_packet as usize].indices[0] = slab_index;
                    self.packets[new_packet as usize].len = 1;
                    self.tree_mut(tree_idx).nodes[node_idx as usize].packets_head = Some(new_packet);
                    return;
                }
            }
        }
    }

    fn remove_from_intersecting(&mut self, tree_idx: u32, node_idx: u32, span: Region, slab_index: u32) {
        let bpm = self.beats_per_measure;
        let (region, left, right) = {
            let node = &self.tree(tree_idx).nodes[node_idx as usize];
            (node.region, node.left, node.right)
        };
        if !region.intersects(&span, bpm) {
            return;
        }
        self.packet_list_remove(tree_idx, node_idx, slab_index);
        if let Some(l) = left {
            self.remove_from_intersecting(tree_idx, l, span, slab_index);
        }
        if let Some(r) = right {
            self.remove_from_intersecting(tree_idx, r, span, slab_index);
        }
    }

    fn packet_list_remove(&mut self, tree_idx: u32, node_idx: u32, slab_index: u32) {
        let mut cur = self.tree(tree_idx).nodes[node_idx as usize].packets_head;
        while let Some(p) = cur {
            let len = self.packets[p as usize].len as usize;
            if let Some(pos) = self.packets[p as usize].indices[..len].iter().position(|v| *v == slab_index) {
                for i in pos..len - 1 {
                    self.packets[p as usize].indices[i] = self.packets[p as usize].indices[i + 1];
                }
                self.packets[p as usize].indices[len - 1] = u32::MAX;
                self.packets[p as usize].len -= 1;
                return;
            }
            cur = self.packets[p as usize].next;
        }
    }

    fn visit_intersecting(
        &self,
        tree_idx: u32,
        node_idx: u32,
        region: &Region,
        visit: &mut impl FnMut(u32),
    ) {
        let bpm = self.beats_per_measure;
        let node = &self.tree(tree_idx).nodes[node_idx as usize];
        if !node.region.intersects(region, bpm) {
            return;
        }
        let mut cur = node.packets_head;
        while let Some(p) = cur {
            let packet = &self.packets[p as usize];
            for &idx in &packet.indices[..packet.len as usize] {
                visit(idx);
            }
            cur = packet.next;
        }
        if let Some(l) = node.left {
            self.visit_intersecting(tree_idx, l, region, visit);
        }
        if let Some(r) = node.right {
            self.visit_intersecting(tree_idx, r, region, visit);
        }
    }
}
