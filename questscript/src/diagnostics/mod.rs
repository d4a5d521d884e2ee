//! Structural validation of a block document.
//!
//! Issues are split by what they depend on. Block-local issues (nesting,
//! chain position, loop safety, lint, plugin parameters) depend on the block,
//! its ancestors, its previous sibling and its subtree, and are cached per
//! uid. Handler duplication and timer consistency span the document and are
//! rebuilt on every pass from the roots and the cached per-block timer facts.
//! [`Diagnostics::revalidate`] uses the edits since the last report to decide
//! which uids to recompute; the result is always equal to a full
//! [`Diagnostics::validate`].

mod issue;
mod lint;
mod loops;
mod passes;
mod timers;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::block::Uid;
use crate::config::DiagnosticsConfig;
use crate::document::{Document, Parent};
use crate::plugin::PluginRegistry;

pub use issue::{Category, Severity, Subject, ValidationIssue};

use passes::Context;

/// A change made to the document since a report was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// A block's fields changed in place.
    Changed(Uid),
    /// A block (with its subtree) was inserted.
    Attached(Uid),
    /// A subtree was removed from `parent` at `index`.
    Detached {
        parent: Parent,
        index: usize,
        removed: Vec<Uid>,
    },
}

/// Per-block facts the timer pass needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TimerFacts {
    handled: BTreeMap<Uid, Vec<String>>,
    started: BTreeMap<Uid, String>,
}

impl TimerFacts {
    fn remove(&mut self, uid: Uid) {
        self.handled.remove(&uid);
        self.started.remove(&uid);
    }

    fn record(&mut self, uid: Uid, doc: &Document) {
        self.remove(uid);
        let Some(kind) = doc.kind(uid) else {
            return;
        };
        let handled = timers::handled_timers(kind);
        if !handled.is_empty() {
            self.handled.insert(uid, handled);
        }
        if let Some(name) = timers::started_timer(kind) {
            self.started.insert(uid, name);
        }
    }
}

/// The outcome of one validation pass. Issue lists are shared, so an
/// incremental pass reuses the lists of every block it did not revisit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    document: Arc<[ValidationIssue]>,
    local: BTreeMap<Uid, Arc<[ValidationIssue]>>,
    timers: Arc<[ValidationIssue]>,
    facts: TimerFacts,
}

impl Report {
    /// Every issue: document-level first, then per block in uid order, then
    /// timer consistency.
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.document
            .iter()
            .chain(self.local.values().flat_map(|issues| issues.iter()))
            .chain(self.timers.iter())
    }

    /// Every issue ordered by where its first cited block sits in `doc`.
    /// Document-level issues come first.
    pub fn in_document_order(&self, doc: &Document) -> Vec<&ValidationIssue> {
        let position: BTreeMap<Uid, usize> =
            doc.walk().into_iter().enumerate().map(|(i, uid)| (uid, i)).collect();
        let mut issues: Vec<&ValidationIssue> = self.issues().collect();
        issues.sort_by_key(|issue| {
            issue
                .uids()
                .first()
                .map_or(0, |uid| position.get(uid).map_or(usize::MAX, |&p| p + 1))
        });
        issues
    }

    /// Issues that cite `uid`, wherever they were raised.
    pub fn for_block(&self, uid: Uid) -> Vec<&ValidationIssue> {
        self.issues().filter(|issue| issue.concerns(uid)).collect()
    }

    /// The issue list a block owns, shared with the report.
    pub fn local(&self, uid: Uid) -> Option<&Arc<[ValidationIssue]>> {
        self.local.get(&uid)
    }

    pub fn len(&self) -> usize {
        self.issues().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues().filter(|i| i.severity() == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }
}

/// Runs the validation passes with one configuration and plugin set.
pub struct Diagnostics<'a> {
    cx: Context<'a>,
}

impl<'a> Diagnostics<'a> {
    pub fn new(config: &'a DiagnosticsConfig, plugins: &'a PluginRegistry) -> Self {
        Diagnostics {
            cx: Context { config, plugins },
        }
    }

    /// Validate every block.
    pub fn validate(&self, doc: &Document) -> Report {
        let mut local = BTreeMap::new();
        let mut facts = TimerFacts::default();
        for uid in doc.walk() {
            self.visit(doc, uid, &mut local, &mut facts);
        }
        let report = self.finish(doc, local, facts);
        debug!(blocks = doc.len(), issues = report.len(), "validated document");
        report
    }

    /// Rebuild `previous` after `edits`, revisiting only the blocks whose
    /// local issues can have changed.
    pub fn revalidate(&self, doc: &Document, previous: &Report, edits: &[Edit]) -> Report {
        let mut local = previous.local.clone();
        let mut facts = previous.facts.clone();
        let mut affected = BTreeSet::new();

        for edit in edits {
            match edit {
                Edit::Changed(uid) => {
                    affected.insert(*uid);
                    affected.extend(doc.ancestors(*uid));
                }
                Edit::Attached(uid) => {
                    affected.extend(doc.subtree(*uid));
                    affected.extend(doc.ancestors(*uid));
                    affected.extend(doc.next_sibling(*uid));
                }
                Edit::Detached {
                    parent, removed, ..
                } => {
                    for uid in removed {
                        local.remove(uid);
                        facts.remove(*uid);
                    }
                    if let Parent::Block(uid) = parent {
                        affected.insert(*uid);
                        affected.extend(doc.ancestors(*uid));
                    }
                    // Any later sibling may have lost the chain head it followed.
                    if let Some(children) = doc.children_of(*parent) {
                        affected.extend(children.iter().copied());
                    }
                }
            }
        }

        for &uid in &affected {
            if doc.contains(uid) {
                self.visit(doc, uid, &mut local, &mut facts);
            } else {
                local.remove(&uid);
                facts.remove(uid);
            }
        }
        let report = self.finish(doc, local, facts);
        debug!(
            edits = edits.len(),
            revisited = affected.len(),
            issues = report.len(),
            "revalidated document"
        );
        report
    }

    fn visit(
        &self,
        doc: &Document,
        uid: Uid,
        local: &mut BTreeMap<Uid, Arc<[ValidationIssue]>>,
        facts: &mut TimerFacts,
    ) {
        let issues = passes::block_issues(&self.cx, doc, uid);
        if issues.is_empty() {
            local.remove(&uid);
        } else {
            local.insert(uid, issues.into());
        }
        facts.record(uid, doc);
    }

    fn finish(
        &self,
        doc: &Document,
        local: BTreeMap<Uid, Arc<[ValidationIssue]>>,
        facts: TimerFacts,
    ) -> Report {
        Report {
            document: passes::document_issues(doc).into(),
            timers: timers::unhandled_timers(doc, &facts.handled, &facts.started).into(),
            local,
            facts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockKind, MethodCall};

    fn handler(name: &str) -> Block {
        Block::new(BlockKind::EventHandler { name: name.into() })
    }

    fn if_block(text: &str) -> Block {
        Block::new(BlockKind::If {
            condition: text.to_string(),
        })
    }

    fn say(text: &str) -> Block {
        Block::new(BlockKind::MethodCall(MethodCall::quest("say", format!("\"{}\"", text))))
    }

    fn settimer(name: &str) -> Block {
        Block::new(BlockKind::Timer {
            name: name.into(),
            seconds: 5,
        })
    }

    fn categories(report: &Report) -> Vec<Category> {
        report.issues().map(ValidationIssue::category).collect()
    }

    fn validate(doc: &Document) -> Report {
        let config = DiagnosticsConfig::default();
        let plugins = PluginRegistry::new();
        Diagnostics::new(&config, &plugins).validate(doc)
    }

    fn revalidate(doc: &Document, previous: &Report, edits: &[Edit]) -> Report {
        let config = DiagnosticsConfig::default();
        let plugins = PluginRegistry::new();
        Diagnostics::new(&config, &plugins).revalidate(doc, previous, edits)
    }

    #[test]
    fn empty_document_misses_a_handler() {
        let report = validate(&Document::new());
        assert_eq!(categories(&report), vec![Category::MissingHandler]);
        assert!(!report.has_errors());
    }

    #[test]
    fn duplicate_handlers_cite_every_copy() {
        let doc = Document::from_blocks(vec![
            handler("EVENT_SAY"),
            handler("EVENT_SPAWN"),
            handler("EVENT_SAY"),
        ])
        .unwrap();
        let report = validate(&doc);
        let issues: Vec<_> = report.issues().collect();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category(), Category::DuplicateHandler);
        assert_eq!(issues[0].uids(), &[doc.roots()[0], doc.roots()[2]]);
    }

    #[test]
    fn nested_handler_is_an_error() {
        let doc = Document::from_blocks(vec![
            handler("EVENT_SAY").with_children([handler("EVENT_SPAWN")]),
        ])
        .unwrap();
        let report = validate(&doc);
        assert_eq!(categories(&report), vec![Category::NestedHandler]);
    }

    #[test]
    fn dangling_else_and_empty_condition() {
        let doc = Document::from_blocks(vec![handler("EVENT_SAY").with_children([
            say("hi"),
            Block::new(BlockKind::Else),
            if_block("  "),
        ])])
        .unwrap();
        let report = validate(&doc);
        let mut found = categories(&report);
        found.sort_by_key(|c| format!("{:?}", c));
        assert_eq!(found, vec![Category::DanglingBranch, Category::EmptyCondition]);
    }

    #[test]
    fn unhandled_timer_clears_once_handled() {
        let mut doc = Document::from_blocks(vec![
            handler("EVENT_SPAWN").with_children([settimer("greet")]),
        ])
        .unwrap();
        let report = validate(&doc);
        assert_eq!(categories(&report), vec![Category::TimerWithoutHandler]);

        let timer = doc
            .append(Parent::Root, handler("EVENT_TIMER").with_children([if_block("$timer eq \"greet\"")]))
            .unwrap();
        let next = revalidate(&doc, &report, &[Edit::Attached(timer)]);
        assert!(next.is_empty());
        assert_eq!(next, validate(&doc));
    }

    #[test]
    fn timer_check_in_another_event_leaves_timer_unhandled() {
        let doc = Document::from_blocks(vec![
            handler("EVENT_SPAWN").with_children([settimer("greet")]),
            handler("EVENT_SAY").with_children([if_block("$timer eq \"greet\"")]),
        ])
        .unwrap();
        let report = validate(&doc);
        assert_eq!(categories(&report), vec![Category::TimerWithoutHandler]);
    }

    #[test]
    fn untouched_blocks_share_their_issue_lists() {
        let mut doc = Document::from_blocks(vec![
            handler("EVENT_SAY").with_children([if_block("($a")]),
            handler("EVENT_SPAWN").with_children([if_block("($b")]),
        ])
        .unwrap();
        let report = validate(&doc);
        let second_if = doc.children_of(Parent::Block(doc.roots()[1])).unwrap()[0];
        let first_if = doc.children_of(Parent::Block(doc.roots()[0])).unwrap()[0];

        doc.replace_kind(first_if, BlockKind::If { condition: "$a".into() })
            .unwrap();
        let next = revalidate(&doc, &report, &[Edit::Changed(first_if)]);

        assert!(next.for_block(first_if).is_empty());
        let before = report.local(second_if).unwrap();
        let after = next.local(second_if).unwrap();
        assert!(Arc::ptr_eq(before, after));
        assert_eq!(next, validate(&doc));
    }

    #[test]
    fn detaching_a_chain_head_flags_the_follower() {
        let mut doc = Document::from_blocks(vec![handler("EVENT_SAY").with_children([
            if_block("$x"),
            Block::new(BlockKind::Else),
        ])])
        .unwrap();
        let report = validate(&doc);
        assert!(report.is_empty());

        let parent = Parent::Block(doc.roots()[0]);
        let head = doc.children_of(parent).unwrap()[0];
        let detached = doc.detach(head).unwrap();
        let removed = detached.block.uids();
        let next = revalidate(
            &doc,
            &report,
            &[Edit::Detached {
                parent,
                index: 0,
                removed,
            }],
        );
        assert_eq!(categories(&next), vec![Category::DanglingBranch]);
        assert_eq!(next, validate(&doc));
    }

    #[test]
    fn document_order() {
        let doc = Document::from_blocks(vec![
            handler("EVENT_SAY").with_children([if_block("")]),
            handler("EVENT_SAY"),
        ])
        .unwrap();
        let report = validate(&doc);
        let ordered = report.in_document_order(&doc);
        assert_eq!(ordered[0].category(), Category::DuplicateHandler);
        assert_eq!(ordered[1].category(), Category::EmptyCondition);
    }
}
