use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::block::{Block, BlockKind, Uid};

/// Rejections of a tree mutation. The document is left untouched whenever
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    #[error("no block with uid {0} in the document")]
    UnknownBlock(Uid),
    #[error("a {child} block cannot be placed under {parent}")]
    InvalidParent { parent: String, child: &'static str },
    #[error("a {kind} block cannot hold children")]
    NotAContainer { kind: &'static str },
    #[error("an {child} block must directly follow an if or elsif block")]
    BrokenChain { child: &'static str },
    #[error("index {index} is out of range for {len} children")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("uid {0} is already used in the document")]
    DuplicateUid(Uid),
    #[error("cannot turn a {from} block into a {to} block")]
    KindMismatch { from: &'static str, to: &'static str },
}

/// Where a block hangs: directly under the document root or under another block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parent {
    Root,
    Block(Uid),
}

impl Parent {
    pub fn uid(self) -> Option<Uid> {
        match self {
            Parent::Root => None,
            Parent::Block(uid) => Some(uid),
        }
    }
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parent::Root => write!(f, "the document root"),
            Parent::Block(uid) => write!(f, "block {}", uid.short()),
        }
    }
}

/// A block as stored in the document: its payload and its links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    kind: BlockKind,
    parent: Parent,
    children: Vec<Uid>,
}

impl Node {
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn parent(&self) -> Parent {
        self.parent
    }

    pub fn children(&self) -> &[Uid] {
        &self.children
    }
}

/// A subtree removed from the document, with the position it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    pub block: Block,
    pub parent: Parent,
    pub index: usize,
}

/// The editable block tree.
///
/// The root is not a block; it holds the ordered top-level blocks. Every
/// node is indexed by uid so lookups never walk the tree. Cloning a
/// document gives an independent snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    roots: Vec<Uid>,
    nodes: HashMap<Uid, Node>,
}

// ---------------------------------------------------------------------------
// Construction and queries
// ---------------------------------------------------------------------------

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    /// Rebuild a document from saved top-level blocks.
    ///
    /// Placement rules are not enforced here: a nested handler or an orphan
    /// `else` in a saved tree is kept and left to diagnostics. Duplicate uids
    /// and leaf blocks carrying children are rejected.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, StructureError> {
        let mut seen = HashSet::new();
        for block in &blocks {
            check_shape(block, &mut seen)?;
        }
        let mut doc = Document::new();
        for block in blocks {
            let uid = doc.insert_tree(block, Parent::Root);
            doc.roots.push(uid);
        }
        Ok(doc)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[Uid] {
        &self.roots
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.nodes.contains_key(&uid)
    }

    pub fn get(&self, uid: Uid) -> Option<&Node> {
        self.nodes.get(&uid)
    }

    pub fn kind(&self, uid: Uid) -> Option<&BlockKind> {
        self.nodes.get(&uid).map(Node::kind)
    }

    /// Ordered children of a parent; `None` when the parent is unknown.
    pub fn children_of(&self, parent: Parent) -> Option<&[Uid]> {
        match parent {
            Parent::Root => Some(&self.roots),
            Parent::Block(uid) => self.nodes.get(&uid).map(Node::children),
        }
    }

    pub fn index_of(&self, uid: Uid) -> Option<usize> {
        let node = self.nodes.get(&uid)?;
        self.children_of(node.parent)?
            .iter()
            .position(|&sibling| sibling == uid)
    }

    pub fn previous_sibling(&self, uid: Uid) -> Option<Uid> {
        let index = self.index_of(uid)?;
        let siblings = self.children_of(self.nodes.get(&uid)?.parent)?;
        index.checked_sub(1).map(|i| siblings[i])
    }

    pub fn next_sibling(&self, uid: Uid) -> Option<Uid> {
        let index = self.index_of(uid)?;
        let siblings = self.children_of(self.nodes.get(&uid)?.parent)?;
        siblings.get(index + 1).copied()
    }

    /// Ancestors of a block, nearest first. Empty for top-level blocks.
    pub fn ancestors(&self, uid: Uid) -> Vec<Uid> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&uid).map(Node::parent);
        while let Some(Parent::Block(parent)) = current {
            out.push(parent);
            current = self.nodes.get(&parent).map(Node::parent);
        }
        out
    }

    /// Nesting depth: 0 for top-level blocks.
    pub fn depth(&self, uid: Uid) -> usize {
        self.ancestors(uid).len()
    }

    /// The block and all of its descendants, pre-order.
    pub fn subtree(&self, uid: Uid) -> Vec<Uid> {
        let mut out = Vec::new();
        if self.contains(uid) {
            self.collect(uid, &mut out);
        }
        out
    }

    /// Every block in the document, pre-order.
    pub fn walk(&self) -> Vec<Uid> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            self.collect(root, &mut out);
        }
        out
    }

    fn collect(&self, uid: Uid, out: &mut Vec<Uid>) {
        let mut stack = vec![uid];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev());
            }
        }
    }

    /// Rebuild the value form of one subtree, uids preserved.
    pub fn to_block(&self, uid: Uid) -> Option<Block> {
        let node = self.nodes.get(&uid)?;
        let children = node
            .children
            .iter()
            .filter_map(|&child| self.to_block(child))
            .collect();
        Some(Block::from_parts(uid, node.kind.clone(), children))
    }

    /// The whole document as top-level blocks, uids preserved.
    pub fn to_blocks(&self) -> Vec<Block> {
        self.roots
            .iter()
            .filter_map(|&uid| self.to_block(uid))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

impl Document {
    /// Insert `block` (and its subtree) as child `index` of `parent`.
    ///
    /// The whole subtree is checked before anything is inserted, so a
    /// rejected attach leaves the document as it was.
    pub fn attach(
        &mut self,
        parent: Parent,
        block: Block,
        index: usize,
    ) -> Result<Uid, StructureError> {
        let siblings = self
            .children_of(parent)
            .ok_or_else(|| StructureError::UnknownBlock(parent.uid().unwrap_or_else(|| block.uid())))?;
        if index > siblings.len() {
            return Err(StructureError::IndexOutOfRange {
                index,
                len: siblings.len(),
            });
        }
        if let Parent::Block(uid) = parent {
            let parent_kind = &self.nodes[&uid].kind;
            if !parent_kind.is_container() {
                return Err(StructureError::NotAContainer {
                    kind: parent_kind.name(),
                });
            }
            if block.kind.is_handler() {
                return Err(StructureError::InvalidParent {
                    parent: format!("a {} block", parent_kind.name()),
                    child: block.kind.name(),
                });
            }
        }

        let previous = index
            .checked_sub(1)
            .map(|i| &self.nodes[&siblings[i]].kind);
        let next = siblings.get(index).map(|uid| &self.nodes[uid].kind);
        check_chain_position(&block.kind, previous, next)?;

        let mut seen = HashSet::new();
        check_subtree(&block, &mut seen)?;
        if let Some(dup) = seen.iter().find(|uid| self.nodes.contains_key(uid)) {
            return Err(StructureError::DuplicateUid(*dup));
        }

        Ok(self.splice_in(parent, block, index))
    }

    /// Append as the last child of `parent`.
    pub fn append(&mut self, parent: Parent, block: Block) -> Result<Uid, StructureError> {
        let len = self
            .children_of(parent)
            .map(<[Uid]>::len)
            .ok_or_else(|| StructureError::UnknownBlock(parent.uid().unwrap_or_else(|| block.uid())))?;
        self.attach(parent, block, len)
    }

    /// Put a detached subtree back exactly where it was.
    ///
    /// Only identity and position are checked; placement rules are not,
    /// because the subtree is returning to a position it already held.
    pub fn restore(&mut self, detached: Detached) -> Result<Uid, StructureError> {
        let Detached {
            block,
            parent,
            index,
        } = detached;
        let len = match self.children_of(parent) {
            Some(children) => children.len(),
            None => {
                return Err(StructureError::UnknownBlock(
                    parent.uid().unwrap_or_else(|| block.uid()),
                ));
            }
        };
        if index > len {
            return Err(StructureError::IndexOutOfRange { index, len });
        }
        let mut seen = HashSet::new();
        check_shape(&block, &mut seen)?;
        if let Some(dup) = seen.iter().find(|uid| self.nodes.contains_key(uid)) {
            return Err(StructureError::DuplicateUid(*dup));
        }
        Ok(self.splice_in(parent, block, index))
    }

    /// Remove a block and its subtree, returning it with its old position.
    pub fn detach(&mut self, uid: Uid) -> Result<Detached, StructureError> {
        let node = self
            .nodes
            .get(&uid)
            .ok_or(StructureError::UnknownBlock(uid))?;
        let parent = node.parent;
        let index = self
            .index_of(uid)
            .ok_or(StructureError::UnknownBlock(uid))?;
        let block = self
            .to_block(uid)
            .ok_or(StructureError::UnknownBlock(uid))?;

        match parent {
            Parent::Root => {
                self.roots.remove(index);
            }
            Parent::Block(p) => {
                if let Some(parent_node) = self.nodes.get_mut(&p) {
                    parent_node.children.remove(index);
                }
            }
        }
        for removed in block.uids() {
            self.nodes.remove(&removed);
        }
        Ok(Detached {
            block,
            parent,
            index,
        })
    }

    /// Deep copy of a subtree with a fresh uid on every node. The document
    /// is not modified.
    pub fn clone_subtree(&self, uid: Uid) -> Result<Block, StructureError> {
        let mut block = self
            .to_block(uid)
            .ok_or(StructureError::UnknownBlock(uid))?;
        block.refresh_uids();
        Ok(block)
    }

    /// Replace a block's payload with one of the same kind, returning the
    /// previous payload.
    pub fn replace_kind(&mut self, uid: Uid, kind: BlockKind) -> Result<BlockKind, StructureError> {
        let node = self
            .nodes
            .get_mut(&uid)
            .ok_or(StructureError::UnknownBlock(uid))?;
        if !node.kind.same_kind(&kind) {
            return Err(StructureError::KindMismatch {
                from: node.kind.name(),
                to: kind.name(),
            });
        }
        Ok(std::mem::replace(&mut node.kind, kind))
    }

    fn splice_in(&mut self, parent: Parent, block: Block, index: usize) -> Uid {
        let uid = self.insert_tree(block, parent);
        match parent {
            Parent::Root => self.roots.insert(index, uid),
            Parent::Block(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.children.insert(index, uid);
                }
            }
        }
        uid
    }

    /// Index a subtree under `parent` without linking it into the parent's
    /// child list.
    fn insert_tree(&mut self, block: Block, parent: Parent) -> Uid {
        let (uid, kind, children) = block.into_parts();
        let child_uids = children
            .into_iter()
            .map(|child| self.insert_tree(child, Parent::Block(uid)))
            .collect();
        self.nodes.insert(
            uid,
            Node {
                kind,
                parent,
                children: child_uids,
            },
        );
        uid
    }
}

// ---------------------------------------------------------------------------
// Placement rules
// ---------------------------------------------------------------------------

/// An `elsif`/`else` needs an `if`/`elsif` right before it, and nothing but
/// an `if`/`elsif` may be inserted in front of one.
fn check_chain_position(
    kind: &BlockKind,
    previous: Option<&BlockKind>,
    next: Option<&BlockKind>,
) -> Result<(), StructureError> {
    if kind.continues_chain() && !previous.is_some_and(BlockKind::opens_chain) {
        return Err(StructureError::BrokenChain { child: kind.name() });
    }
    if let Some(next) = next {
        if next.continues_chain() && !kind.opens_chain() {
            return Err(StructureError::BrokenChain { child: next.name() });
        }
    }
    Ok(())
}

/// Placement rules for everything below the root of an incoming subtree.
fn check_subtree(block: &Block, seen: &mut HashSet<Uid>) -> Result<(), StructureError> {
    if !seen.insert(block.uid()) {
        return Err(StructureError::DuplicateUid(block.uid()));
    }
    if !block.children.is_empty() && !block.kind.is_container() {
        return Err(StructureError::NotAContainer {
            kind: block.kind.name(),
        });
    }
    for (i, child) in block.children.iter().enumerate() {
        if child.kind.is_handler() {
            return Err(StructureError::InvalidParent {
                parent: format!("a {} block", block.kind.name()),
                child: child.kind.name(),
            });
        }
        let previous = i.checked_sub(1).map(|p| &block.children[p].kind);
        check_chain_position(&child.kind, previous, None)?;
        check_subtree(child, seen)?;
    }
    Ok(())
}

/// The rules every stored tree must satisfy, even a leniently loaded one.
fn check_shape(block: &Block, seen: &mut HashSet<Uid>) -> Result<(), StructureError> {
    if !seen.insert(block.uid()) {
        return Err(StructureError::DuplicateUid(block.uid()));
    }
    if !block.children.is_empty() && !block.kind.is_container() {
        return Err(StructureError::NotAContainer {
            kind: block.kind.name(),
        });
    }
    for child in &block.children {
        check_shape(child, seen)?;
    }
    Ok(())
}
