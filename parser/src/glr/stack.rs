use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::syntax::ParentReq;
use super::table::StateId;
use super::tree::{TreeId, TreeStore};

/// StackId refers to a node in the graph-structured stack arena.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct StackId(u32);

impl StackId {
    fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// One link of the graph-structured stack. All links with the same
/// `(state, pos)` form a single GSS vertex, chained through `more`; each
/// link carries its own predecessor, forest node and requirement set, so
/// alternative derivations reaching the same vertex stay distinguishable.
#[derive(Debug, Clone)]
pub struct StackNode {
    pub state: StateId,
    pub pos: u32,
    pub prev: Option<StackId>,
    pub more: Option<StackId>,
    pub tree: TreeId,
    pub required: ParentReq,
}

impl StackNode {
    pub fn pos(&self) -> usize {
        self.pos as usize
    }
}

/// Arena of GSS nodes. Like the forest store, it is append-only and lives
/// for a single parse session.
pub struct StackStore {
    nodes: Vec<StackNode>,
}

impl StackStore {
    pub fn new() -> Self {
        StackStore { nodes: Vec::new() }
    }

    pub fn add(
        &mut self,
        state: StateId,
        pos: usize,
        prev: Option<StackId>,
        tree: TreeId,
        required: ParentReq,
    ) -> StackId {
        let id = StackId(self.nodes.len() as u32);
        self.nodes.push(StackNode {
            state,
            pos: pos as u32,
            prev,
            more: None,
            tree,
            required,
        });
        id
    }

    pub fn node(&self, id: StackId) -> &StackNode {
        &self.nodes[id.as_usize()]
    }

    pub fn node_mut(&mut self, id: StackId) -> &mut StackNode {
        &mut self.nodes[id.as_usize()]
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate the links of the vertex headed by `head`.
    pub fn links(&self, head: StackId) -> Links<'_> {
        Links {
            store: self,
            at: Some(head),
        }
    }

    /// Merge `add` into the vertex headed by `head`. Returns true when `add`
    /// became a new link of the vertex. When an equivalent link already
    /// exists the trees are packed instead: the existing forest node is kept
    /// unless the new one has a strictly better error score (first insertion
    /// wins between equals). `used_tree` is raised whenever `add`'s tree
    /// ended up referenced.
    pub fn insert(
        &mut self,
        store: &TreeStore,
        head: StackId,
        add: StackId,
        used_tree: &mut bool,
    ) -> bool {
        let mut at = Some(head);
        while let Some(a) = at {
            if a == add {
                return false;
            }
            at = self.node(a).more;
        }

        let add_prev = self.node(add).prev;
        let mut last = head;
        let mut at = Some(head);
        while let Some(a) = at {
            last = a;
            if self.node(a).prev == add_prev && self.node(a).required == self.node(add).required {
                let new_tree = self.node(add).tree;
                *used_tree |= self.update_tree(store, a, new_tree);
                return false;
            }
            at = self.node(a).more;
        }

        self.node_mut(last).more = Some(add);
        true
    }

    fn update_tree(&mut self, store: &TreeStore, link: StackId, new_tree: TreeId) -> bool {
        if new_tree.is_none() {
            return false;
        }
        let old = self.node(link).tree;
        if old.is_none() || store.at(new_tree).errors() < store.at(old).errors() {
            self.node_mut(link).tree = new_tree;
            true
        } else {
            false
        }
    }
}

impl Default for StackStore {
    fn default() -> Self {
        StackStore::new()
    }
}

pub struct Links<'a> {
    store: &'a StackStore,
    at: Option<StackId>,
}

impl<'a> Iterator for Links<'a> {
    type Item = StackId;

    fn next(&mut self) -> Option<StackId> {
        let id = self.at?;
        self.at = self.store.node(id).more;
        Some(id)
    }
}

struct Bucket {
    items: Vec<StackId>,
    by_state: FxHashMap<StateId, StackId>,
}

impl Bucket {
    fn new() -> Self {
        Bucket {
            items: Vec::new(),
            by_state: FxHashMap::default(),
        }
    }
}

/// The scheduler: buckets of GSS vertices indexed by their offset from the
/// current scan position. Offsets greater than zero arise when a terminal
/// match spans several characters; the shifted vertex then waits until the
/// scan reaches the match's end.
pub struct FutureStacks {
    buckets: VecDeque<Option<Bucket>>,
}

impl FutureStacks {
    pub fn new() -> Self {
        FutureStacks {
            buckets: VecDeque::new(),
        }
    }

    fn bucket_mut(&mut self, offset: usize) -> &mut Bucket {
        while self.buckets.len() <= offset {
            self.buckets.push_back(None);
        }
        self.buckets[offset].get_or_insert_with(Bucket::new)
    }

    /// Insert without merging: returns the id of the vertex already holding
    /// this node's state in the bucket, or `node` itself once inserted.
    pub fn put_raw(&mut self, offset: usize, gss: &StackStore, node: StackId) -> StackId {
        let state = gss.node(node).state;
        let bucket = self.bucket_mut(offset);
        match bucket.by_state.get(&state) {
            Some(&old) => old,
            None => {
                bucket.items.push(node);
                bucket.by_state.insert(state, node);
                node
            }
        }
    }

    /// Insert and merge with any existing vertex of the same state.
    pub fn put(
        &mut self,
        offset: usize,
        gss: &mut StackStore,
        store: &TreeStore,
        node: StackId,
    ) {
        let old = self.put_raw(offset, gss, node);
        if old != node {
            let mut used = false;
            gss.insert(store, old, node, &mut used);
        }
    }

    /// Number of vertices in the bucket at the current position.
    pub fn top_len(&self) -> usize {
        match self.buckets.front() {
            Some(Some(b)) => b.items.len(),
            _ => 0,
        }
    }

    pub fn top_at(&self, idx: usize) -> StackId {
        match self.buckets.front() {
            Some(Some(b)) => b.items[idx],
            _ => panic!("empty scheduler bucket"),
        }
    }

    pub fn top_items(&self) -> Vec<StackId> {
        match self.buckets.front() {
            Some(Some(b)) => b.items.clone(),
            _ => Vec::new(),
        }
    }

    /// Replace the current bucket, re-indexing by state. Used by error
    /// recovery to resume from a remembered frontier.
    pub fn set_top(&mut self, items: Vec<StackId>, gss: &StackStore) {
        let mut bucket = Bucket::new();
        for &id in &items {
            bucket.by_state.entry(gss.node(id).state).or_insert(id);
        }
        bucket.items = items;
        if self.buckets.is_empty() {
            self.buckets.push_back(Some(bucket));
        } else {
            self.buckets[0] = Some(bucket);
        }
    }

    /// Advance the current position by one, discarding the consumed bucket.
    pub fn pop(&mut self) {
        self.buckets.pop_front();
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

impl Default for FutureStacks {
    fn default() -> Self {
        FutureStacks::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glr::info::InfoErrors;

    fn state(n: u32) -> StateId {
        // Only used as a merge key here.
        StateId::mock(n)
    }

    #[test]
    fn merge_by_state_is_idempotent() {
        let mut gss = StackStore::new();
        let mut store = TreeStore::new();
        let mut stacks = FutureStacks::new();
        let s = state(0);
        let bottom = gss.add(s, 0, None, TreeId::NONE, ParentReq::default());
        let t1 = store.push_leaf(0, InfoErrors::success());
        let t2 = store.push_leaf(0, InfoErrors::success());
        let a = gss.add(s, 1, Some(bottom), t1, ParentReq::default());
        let b = gss.add(s, 1, Some(bottom), t2, ParentReq::default());
        stacks.put(0, &mut gss, &store, a);
        stacks.put(0, &mut gss, &store, b);
        // Same state: one vertex in the bucket.
        assert_eq!(stacks.top_len(), 1);
        // Same prev and requirements: packed, no extra link.
        assert_eq!(gss.links(a).count(), 1);
        // First insertion won.
        assert_eq!(gss.node(a).tree, t1);
    }

    #[test]
    fn distinct_predecessors_become_links() {
        let mut gss = StackStore::new();
        let store = TreeStore::new();
        let mut stacks = FutureStacks::new();
        let s = state(0);
        let p1 = gss.add(s, 0, None, TreeId::NONE, ParentReq::default());
        let p2 = gss.add(state(1), 0, None, TreeId::NONE, ParentReq::default());
        let a = gss.add(state(2), 1, Some(p1), TreeId::NONE, ParentReq::default());
        let b = gss.add(state(2), 1, Some(p2), TreeId::NONE, ParentReq::default());
        stacks.put(0, &mut gss, &store, a);
        stacks.put(0, &mut gss, &store, b);
        assert_eq!(stacks.top_len(), 1);
        assert_eq!(gss.links(a).count(), 2);
    }

    #[test]
    fn better_tree_replaces_on_pack() {
        let mut gss = StackStore::new();
        let mut store = TreeStore::new();
        let s = state(0);
        let bottom = gss.add(s, 0, None, TreeId::NONE, ParentReq::default());
        let worse = store.push_leaf(0, InfoErrors::shifts(2));
        let better = store.push_leaf(0, InfoErrors::success());
        let a = gss.add(s, 1, Some(bottom), worse, ParentReq::default());
        let b = gss.add(s, 1, Some(bottom), better, ParentReq::default());
        let mut used = false;
        assert!(!gss.insert(&store, a, b, &mut used));
        assert!(used, "better-scored tree must replace the packed one");
        assert_eq!(gss.node(a).tree, better);
    }

    #[test]
    fn buckets_wait_for_their_offset() {
        let mut gss = StackStore::new();
        let store = TreeStore::new();
        let mut stacks = FutureStacks::new();
        let a = gss.add(state(0), 3, None, TreeId::NONE, ParentReq::default());
        stacks.put(3, &mut gss, &store, a);
        assert_eq!(stacks.top_len(), 0);
        stacks.pop();
        stacks.pop();
        assert_eq!(stacks.top_len(), 0);
        stacks.pop();
        assert_eq!(stacks.top_len(), 1);
        assert_eq!(stacks.top_at(0), a);
    }
}
