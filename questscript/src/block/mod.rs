pub mod kind;
pub mod uid;

use serde::{Deserialize, Serialize};

pub use kind::{
    Assignment, BlockKind, BucketAction, BucketOp, BucketScope, Comparison, Declarator, ForLoop,
    LoopControl, MethodCall, PluginInstance, Receiver, Step,
};
pub use uid::Uid;

/// A detached block tree: one typed node and the children it owns.
///
/// This is the value form handed in and out of a [`crate::document::Document`]
/// (attach, detach, clone, templates, saved files). The uid is fixed at
/// construction and can only be replaced wholesale through
/// [`Block::refresh_uids`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default = "Uid::fresh")]
    uid: Uid,
    #[serde(flatten)]
    pub kind: BlockKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

impl Block {
    /// A new childless block with a fresh uid.
    pub fn new(kind: BlockKind) -> Self {
        Block {
            uid: Uid::fresh(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Block>) -> Self {
        self.children.extend(children);
        self
    }

    pub(crate) fn from_parts(uid: Uid, kind: BlockKind, children: Vec<Block>) -> Self {
        Block {
            uid,
            kind,
            children,
        }
    }

    pub(crate) fn into_parts(self) -> (Uid, BlockKind, Vec<Block>) {
        (self.uid, self.kind, self.children)
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn push(&mut self, child: Block) {
        self.children.push(child);
    }

    /// Pre-order traversal of this block and every descendant.
    pub fn walk(&self) -> Vec<&Block> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(block) = stack.pop() {
            out.push(block);
            stack.extend(block.children.iter().rev());
        }
        out
    }

    pub fn uids(&self) -> Vec<Uid> {
        self.walk().into_iter().map(Block::uid).collect()
    }

    /// Number of blocks in this subtree, including itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Block::size).sum::<usize>()
    }

    /// Give this block and every descendant a newly issued uid.
    pub fn refresh_uids(&mut self) {
        self.uid = Uid::fresh();
        for child in &mut self.children {
            child.refresh_uids();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> Block {
        Block::new(BlockKind::EventHandler {
            name: "EVENT_SAY".into(),
        })
        .with_children([
            Block::new(BlockKind::If {
                condition: "$text=~/hail/i".into(),
            })
            .with_children([Block::new(BlockKind::MethodCall(MethodCall::quest(
                "say",
                "\"Hello.\"",
            )))]),
            Block::new(BlockKind::Comment { text: "done".into() }),
        ])
    }

    #[test]
    fn walk_is_preorder() {
        let block = handler();
        let names: Vec<&str> = block.walk().iter().map(|b| b.kind.name()).collect();
        assert_eq!(names, vec!["event handler", "if", "method call", "comment"]);
        assert_eq!(block.size(), 4);
    }

    #[test]
    fn refresh_replaces_every_uid() {
        let original = handler();
        let mut copy = original.clone();
        copy.refresh_uids();
        for (a, b) in original.uids().iter().zip(copy.uids().iter()) {
            assert_ne!(a, b);
        }
        assert_eq!(copy.kind, original.kind);
    }

    #[test]
    fn serialized_tree_keeps_uids() {
        let block = handler();
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn missing_uid_is_generated_on_load() {
        let json = r#"{"kind": "else"}"#;
        let block: Block = serde_json::from_str(json).unwrap();
        assert_eq!(block.kind, BlockKind::Else);
        assert!(block.children.is_empty());
    }
}
