use super::info::InfoErrors;
use super::syntax::ProdId;

/// TreeId refers to a node in the forest store. Id 0 means "no tree"; the
/// store keeps a placeholder there so ids map directly to slots.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TreeId(u32);

impl TreeId {
    pub const NONE: TreeId = TreeId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// One shared forest node. A leaf is a terminal match (or an empty match);
/// an interior node records the production reduced over its children.
/// Multiple derivations reference the same node by id, which is what keeps
/// ambiguous parses sub-exponential.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pos: u32,
    errors: InfoErrors,
    production: Option<ProdId>,
    children: Vec<TreeId>,
}

impl TreeNode {
    pub fn pos(&self) -> usize {
        self.pos as usize
    }

    pub fn errors(&self) -> InfoErrors {
        self.errors
    }

    pub fn leaf(&self) -> bool {
        self.production.is_none()
    }

    pub fn production(&self) -> Option<ProdId> {
        self.production
    }

    pub fn children(&self) -> &[TreeId] {
        &self.children
    }
}

/// Append-only arena of forest nodes. Nodes are only released through
/// `free`, and only when they turn out to be the most recent allocation; a
/// node that other nodes may already reference is never reclaimed.
pub struct TreeStore {
    nodes: Vec<TreeNode>,
}

impl TreeStore {
    pub fn new() -> Self {
        TreeStore {
            // Slot 0 backs TreeId::NONE.
            nodes: vec![TreeNode {
                pos: 0,
                errors: InfoErrors::success(),
                production: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn push_leaf(&mut self, pos: usize, errors: InfoErrors) -> TreeId {
        let id = TreeId(self.nodes.len() as u32);
        self.nodes.push(TreeNode {
            pos: pos as u32,
            errors,
            production: None,
            children: Vec::new(),
        });
        id
    }

    pub fn push_node(
        &mut self,
        pos: usize,
        production: ProdId,
        errors: InfoErrors,
        children: Vec<TreeId>,
    ) -> TreeId {
        let id = TreeId(self.nodes.len() as u32);
        self.nodes.push(TreeNode {
            pos: pos as u32,
            errors,
            production: Some(production),
            children,
        });
        id
    }

    pub fn at(&self, id: TreeId) -> &TreeNode {
        &self.nodes[id.as_usize()]
    }

    /// Release a node that ended up unused. Only the most recent allocation
    /// can actually be reclaimed; anything older stays (it may be shared).
    pub fn free(&mut self, id: TreeId) {
        if !id.is_none() && id.as_usize() == self.nodes.len() - 1 {
            self.nodes.pop();
        }
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Approximate memory footprint, for regression telemetry.
    pub fn byte_count(&self) -> usize {
        self.nodes.len() * std::mem::size_of::<TreeNode>()
            + self
                .nodes
                .iter()
                .map(|n| n.children.capacity() * std::mem::size_of::<TreeId>())
                .sum::<usize>()
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        TreeStore::new()
    }
}
