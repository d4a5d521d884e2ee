use questscript::block::{Block, BlockKind, MethodCall, Uid};
use questscript::diagnostics::Edit;
use questscript::document::{Detached, Document, Parent, StructureError};
use questscript::stamp::TemplateRegistry;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Structure(#[from] StructureError),
    #[error("no block template with id `{0}`")]
    UnknownTemplate(String),
}

/// One reversible change. Applying an op returns the op that undoes it.
#[derive(Debug, Clone)]
enum Op {
    /// Remove the block that was inserted.
    Remove(Uid),
    /// Put a removed subtree back.
    Restore(Detached),
    /// Move a block back to a previous position.
    Move { uid: Uid, parent: Parent, index: usize },
    /// Swap a block's payload back.
    Replace { uid: Uid, kind: BlockKind },
}

/// A document with an undo history and a log of the edits diagnostics has
/// not seen yet.
///
/// Every public mutation is one undo step, however many tree operations it
/// takes. Undo and redo re-apply inverse operations, so restored blocks keep
/// their uids.
#[derive(Debug, Default)]
pub struct EditSession {
    document: Document,
    undo: Vec<Vec<Op>>,
    redo: Vec<Vec<Op>>,
    edits: Vec<Edit>,
    revision: u64,
}

impl EditSession {
    pub fn new(document: Document) -> Self {
        EditSession {
            document,
            ..EditSession::default()
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Bumped by every change, including undo and redo.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Edits made since the last call, oldest first.
    pub fn take_edits(&mut self) -> Vec<Edit> {
        std::mem::take(&mut self.edits)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn insert(&mut self, parent: Parent, index: usize, block: Block) -> Result<Uid, SessionError> {
        let uid = self.document.attach(parent, block, index)?;
        self.edits.push(Edit::Attached(uid));
        self.commit(vec![Op::Remove(uid)]);
        Ok(uid)
    }

    pub fn append(&mut self, parent: Parent, block: Block) -> Result<Uid, SessionError> {
        let index = self
            .document
            .children_of(parent)
            .map_or(0, <[Uid]>::len);
        self.insert(parent, index, block)
    }

    /// Remove a block and its subtree, returning a copy of what was removed.
    pub fn delete(&mut self, uid: Uid) -> Result<Block, SessionError> {
        let detached = self.detach(uid)?;
        let block = detached.block.clone();
        self.commit(vec![Op::Restore(detached)]);
        Ok(block)
    }

    /// Move a block under `parent` at `index`, counted after the block has
    /// left its old position. A rejected move leaves the tree unchanged.
    pub fn move_block(&mut self, uid: Uid, parent: Parent, index: usize) -> Result<(), SessionError> {
        let inverse = self.apply_move(uid, parent, index)?;
        self.commit(vec![inverse]);
        Ok(())
    }

    /// Replace a block's fields with a payload of the same kind.
    pub fn edit(&mut self, uid: Uid, kind: BlockKind) -> Result<(), SessionError> {
        let old = self.document.replace_kind(uid, kind)?;
        self.edits.push(Edit::Changed(uid));
        self.commit(vec![Op::Replace { uid, kind: old }]);
        Ok(())
    }

    /// Copy a subtree with fresh uids and place the copy after the original.
    /// An `if` is copied after the end of its chain.
    pub fn duplicate(&mut self, uid: Uid) -> Result<Uid, SessionError> {
        let copy = self.document.clone_subtree(uid)?;
        let parent = self
            .document
            .get(uid)
            .map(|node| node.parent())
            .ok_or(StructureError::UnknownBlock(uid))?;
        let siblings = self.document.children_of(parent).unwrap_or_default();
        let mut index = self.document.index_of(uid).map_or(siblings.len(), |i| i + 1);
        while siblings
            .get(index)
            .and_then(|&s| self.document.kind(s))
            .is_some_and(BlockKind::continues_chain)
        {
            index += 1;
        }
        self.insert(parent, index, copy)
    }

    /// Insert a fresh copy of a stored template.
    pub fn stamp(
        &mut self,
        templates: &TemplateRegistry,
        id: &str,
        parent: Parent,
        index: usize,
    ) -> Result<Uid, SessionError> {
        let block = templates
            .stamp(id)
            .ok_or_else(|| SessionError::UnknownTemplate(id.to_string()))?;
        self.insert(parent, index, block)
    }

    /// Make sure a top-level `EVENT_TIMER` handler checks for `name`,
    /// creating the handler and a `$timer eq "name"` branch that stops the
    /// timer as needed. Returns the branch that handles the timer.
    pub fn ensure_timer_handler(&mut self, name: &str) -> Result<Uid, SessionError> {
        let condition = format!("$timer eq \"{}\"", name);
        let handler = self.document.roots().iter().copied().find(|&uid| {
            matches!(
                self.document.kind(uid),
                Some(BlockKind::EventHandler { name: event }) if event == "EVENT_TIMER"
            )
        });

        let mut ops = Vec::new();
        let handler = match handler {
            Some(uid) => {
                let existing = self.document.subtree(uid).into_iter().find(|&b| {
                    self.document
                        .kind(b)
                        .and_then(BlockKind::condition)
                        .is_some_and(|c| c.contains(condition.as_str()))
                });
                if let Some(branch) = existing {
                    return Ok(branch);
                }
                uid
            }
            None => {
                let block = Block::new(BlockKind::EventHandler {
                    name: "EVENT_TIMER".to_string(),
                });
                let index = self.document.roots().len();
                let uid = self.document.attach(Parent::Root, block, index)?;
                self.edits.push(Edit::Attached(uid));
                ops.push(Op::Remove(uid));
                uid
            }
        };

        let branch = Block::new(BlockKind::If { condition }).with_children([Block::new(
            BlockKind::MethodCall(MethodCall::quest("stoptimer", format!("\"{}\"", name))),
        )]);
        let parent = Parent::Block(handler);
        let index = self.document.children_of(parent).map_or(0, <[Uid]>::len);
        let uid = match self.document.attach(parent, branch, index) {
            Ok(uid) => uid,
            Err(err) => {
                // Drop the handler created above.
                self.rollback(ops);
                return Err(err.into());
            }
        };
        self.edits.push(Edit::Attached(uid));
        ops.push(Op::Remove(uid));
        self.commit(ops);
        Ok(uid)
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Undo the most recent step. Returns false when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        let Some(step) = self.undo.pop() else {
            return Ok(false);
        };
        let inverse = self.replay(step)?;
        self.redo.push(inverse);
        self.revision += 1;
        debug!(revision = self.revision, "undo");
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool, SessionError> {
        let Some(step) = self.redo.pop() else {
            return Ok(false);
        };
        let inverse = self.replay(step)?;
        self.undo.push(inverse);
        self.revision += 1;
        debug!(revision = self.revision, "redo");
        Ok(true)
    }

    fn commit(&mut self, ops: Vec<Op>) {
        self.undo.push(ops);
        self.redo.clear();
        self.revision += 1;
    }

    /// Apply a step's ops newest first, returning the step that reverses it.
    fn replay(&mut self, step: Vec<Op>) -> Result<Vec<Op>, SessionError> {
        let mut inverse = Vec::with_capacity(step.len());
        for op in step.into_iter().rev() {
            inverse.push(self.apply(op)?);
        }
        Ok(inverse)
    }

    fn rollback(&mut self, ops: Vec<Op>) {
        for op in ops.into_iter().rev() {
            if let Err(err) = self.apply(op) {
                debug!(%err, "rollback step failed");
            }
        }
    }

    fn apply(&mut self, op: Op) -> Result<Op, SessionError> {
        match op {
            Op::Remove(uid) => Ok(Op::Restore(self.detach(uid)?)),
            Op::Restore(detached) => {
                let uid = self.document.restore(detached)?;
                self.edits.push(Edit::Attached(uid));
                Ok(Op::Remove(uid))
            }
            Op::Move { uid, parent, index } => self.apply_move(uid, parent, index),
            Op::Replace { uid, kind } => {
                let old = self.document.replace_kind(uid, kind)?;
                self.edits.push(Edit::Changed(uid));
                Ok(Op::Replace { uid, kind: old })
            }
        }
    }

    fn detach(&mut self, uid: Uid) -> Result<Detached, SessionError> {
        let detached = self.document.detach(uid)?;
        self.edits.push(Edit::Detached {
            parent: detached.parent,
            index: detached.index,
            removed: detached.block.uids(),
        });
        Ok(detached)
    }

    fn apply_move(&mut self, uid: Uid, parent: Parent, index: usize) -> Result<Op, SessionError> {
        if parent.uid().is_some_and(|p| p == uid || self.document.ancestors(p).contains(&uid)) {
            return Err(StructureError::InvalidParent {
                parent: "its own subtree".to_string(),
                child: self.document.kind(uid).map_or("block", BlockKind::name),
            }
            .into());
        }
        let detached = self.document.detach(uid)?;
        let (from_parent, from_index) = (detached.parent, detached.index);
        let removed = detached.block.uids();
        let block = detached.block.clone();
        match self.document.attach(parent, block, index) {
            Ok(_) => {
                self.edits.push(Edit::Detached {
                    parent: from_parent,
                    index: from_index,
                    removed,
                });
                self.edits.push(Edit::Attached(uid));
                Ok(Op::Move {
                    uid,
                    parent: from_parent,
                    index: from_index,
                })
            }
            Err(err) => {
                self.document.restore(detached)?;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(name: &str) -> Block {
        Block::new(BlockKind::EventHandler { name: name.into() })
    }

    fn say(text: &str) -> Block {
        Block::new(BlockKind::MethodCall(MethodCall::quest("say", format!("\"{}\"", text))))
    }

    fn session() -> (EditSession, Uid) {
        let doc = Document::from_blocks(vec![handler("EVENT_SAY")]).unwrap();
        let root = doc.roots()[0];
        (EditSession::new(doc), root)
    }

    #[test]
    fn undo_and_redo_keep_uids() {
        let (mut s, root) = session();
        let a = s.append(Parent::Block(root), say("a")).unwrap();
        let b = s.append(Parent::Block(root), say("b")).unwrap();
        s.delete(a).unwrap();
        assert_eq!(s.document().children_of(Parent::Block(root)).unwrap(), &[b]);

        assert!(s.undo().unwrap());
        assert_eq!(s.document().children_of(Parent::Block(root)).unwrap(), &[a, b]);
        assert!(s.redo().unwrap());
        assert_eq!(s.document().children_of(Parent::Block(root)).unwrap(), &[b]);
        assert!(s.undo().unwrap());
        assert!(s.undo().unwrap());
        assert!(s.undo().unwrap());
        assert!(s.document().children_of(Parent::Block(root)).unwrap().is_empty());
        assert!(!s.undo().unwrap());
    }

    #[test]
    fn edit_is_undoable() {
        let (mut s, root) = session();
        let a = s.append(Parent::Block(root), say("a")).unwrap();
        s.edit(a, BlockKind::MethodCall(MethodCall::quest("say", "\"z\"")))
            .unwrap();
        s.undo().unwrap();
        assert_eq!(
            s.document().kind(a),
            Some(&BlockKind::MethodCall(MethodCall::quest("say", "\"a\"")))
        );
    }

    #[test]
    fn rejected_move_changes_nothing() {
        let (mut s, root) = session();
        let a = s.append(Parent::Block(root), say("a")).unwrap();
        let before = s.document().clone();
        let revision = s.revision();
        let err = s.move_block(a, Parent::Block(a), 0).unwrap_err();
        assert!(matches!(err, SessionError::Structure(StructureError::InvalidParent { .. })));
        let err = s.move_block(root, Parent::Block(root), 0).unwrap_err();
        assert!(matches!(err, SessionError::Structure(_)));
        assert_eq!(s.document(), &before);
        assert_eq!(s.revision(), revision);
    }

    #[test]
    fn move_then_undo() {
        let (mut s, root) = session();
        let a = s.append(Parent::Block(root), say("a")).unwrap();
        let b = s.append(Parent::Block(root), say("b")).unwrap();
        s.move_block(a, Parent::Block(root), 1).unwrap();
        assert_eq!(s.document().children_of(Parent::Block(root)).unwrap(), &[b, a]);
        s.undo().unwrap();
        assert_eq!(s.document().children_of(Parent::Block(root)).unwrap(), &[a, b]);
    }

    #[test]
    fn duplicate_skips_past_the_chain() {
        let (mut s, root) = session();
        let parent = Parent::Block(root);
        let head = s
            .append(parent, Block::new(BlockKind::If { condition: "$a".into() }))
            .unwrap();
        let tail = s.append(parent, Block::new(BlockKind::Else)).unwrap();
        let copy = s.duplicate(head).unwrap();
        assert_eq!(s.document().children_of(parent).unwrap(), &[head, tail, copy]);
    }

    #[test]
    fn timer_handler_is_created_once() {
        let (mut s, _) = session();
        let branch = s.ensure_timer_handler("greet").unwrap();
        assert_eq!(s.document().roots().len(), 2);
        assert_eq!(s.ensure_timer_handler("greet").unwrap(), branch);

        let other = s.ensure_timer_handler("leave").unwrap();
        assert_ne!(other, branch);
        assert_eq!(s.document().roots().len(), 2);

        // The first call created handler and branch as one step.
        s.undo().unwrap();
        s.undo().unwrap();
        assert_eq!(s.document().roots().len(), 1);
    }

    #[test]
    fn edits_are_logged_for_diagnostics() {
        let (mut s, root) = session();
        let a = s.append(Parent::Block(root), say("a")).unwrap();
        s.delete(a).unwrap();
        let edits = s.take_edits();
        assert_eq!(edits[0], Edit::Attached(a));
        assert!(matches!(&edits[1], Edit::Detached { removed, .. } if removed == &vec![a]));
        assert!(s.take_edits().is_empty());
    }

    #[test]
    fn stamping_unknown_template_fails() {
        let (mut s, root) = session();
        let err = s
            .stamp(&TemplateRegistry::new(), "nope", Parent::Block(root), 0)
            .unwrap_err();
        assert_eq!(err, SessionError::UnknownTemplate("nope".into()));
    }
}
