use std::collections::{BTreeMap, BTreeSet};

use crate::block::{BlockKind, Receiver, Uid};
use crate::diagnostics::{Category, ValidationIssue};
use crate::document::Document;
use crate::importer::scan::split_top_level;

/// Timer names a block's condition handles: `$timer eq "name"`.
pub(crate) fn handled_timers(kind: &BlockKind) -> Vec<String> {
    match kind {
        BlockKind::If { condition } | BlockKind::Elsif { condition } => {
            timer_comparisons(condition)
                .into_iter()
                .filter_map(|c| match c {
                    TimerComparison::Named(name) => Some(name.to_string()),
                    _ => None,
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

/// The literal timer name a block starts, if any.
pub(crate) fn started_timer(kind: &BlockKind) -> Option<String> {
    match kind {
        BlockKind::Timer { name, .. } => Some(name.clone()),
        BlockKind::MethodCall(call) => {
            let is_quest = matches!(&call.receiver, Receiver::Namespace(ns) if ns == "quest");
            if !is_quest || !matches!(call.method.as_str(), "settimer" | "settimerMS") {
                return None;
            }
            let first = split_top_level(&call.args, ',').into_iter().next()?.trim();
            quoted(first).map(str::to_string)
        }
        _ => None,
    }
}

/// Whether `uid` sits inside an `EVENT_TIMER` handler, the only place a
/// `$timer` comparison can fire.
fn in_timer_handler(doc: &Document, uid: Uid) -> bool {
    doc.ancestors(uid).into_iter().any(|a| {
        matches!(doc.kind(a), Some(BlockKind::EventHandler { name }) if name == "EVENT_TIMER")
    })
}

/// Every started timer no `EVENT_TIMER` condition handles, one warning per
/// starting block.
pub(crate) fn unhandled_timers(
    doc: &Document,
    handled: &BTreeMap<Uid, Vec<String>>,
    started: &BTreeMap<Uid, String>,
) -> Vec<ValidationIssue> {
    let names: BTreeSet<&str> = handled
        .iter()
        .filter(|&(&uid, _)| in_timer_handler(doc, uid))
        .flat_map(|(_, names)| names.iter().map(String::as_str))
        .collect();
    started
        .iter()
        .filter(|(_, name)| !name.is_empty() && !names.contains(name.as_str()))
        .map(|(&uid, name)| {
            ValidationIssue::warning(
                Category::TimerWithoutHandler,
                uid,
                format!(
                    "timer \"{}\" is started but no EVENT_TIMER condition checks `$timer eq \"{}\"`",
                    name, name
                ),
            )
        })
        .collect()
}

fn quoted(text: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|q| {
        let inner = text.strip_prefix(q)?.strip_suffix(q)?;
        (!inner.contains(q)).then_some(inner)
    })
}

/// How one `$timer` mention in a condition is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TimerComparison<'t> {
    /// `$timer eq "name"`
    Named(&'t str),
    /// `$timer eq name`
    Bareword(&'t str),
    /// `$timer == ...`
    Numeric,
    /// `$timer eq "name` with no closing quote.
    Unterminated,
    /// `$timer eq $other` or anything else not worth a look.
    Other,
}

pub(crate) fn timer_comparisons(text: &str) -> Vec<TimerComparison<'_>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(at) = rest.find("$timer") {
        let after = &rest[at + "$timer".len()..];
        rest = after;
        if after.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }
        let op_text = after.trim_start();
        let (op, operand) = if let Some(r) = op_text.strip_prefix("eq") {
            ("eq", r)
        } else if let Some(r) = op_text.strip_prefix("ne") {
            ("ne", r)
        } else if let Some(r) = op_text.strip_prefix("==") {
            ("==", r)
        } else if let Some(r) = op_text.strip_prefix("!=") {
            ("!=", r)
        } else {
            continue;
        };
        if op == "==" || op == "!=" {
            out.push(TimerComparison::Numeric);
            continue;
        }
        let operand = operand.trim_start();
        let comparison = match operand.chars().next() {
            Some(q @ ('"' | '\'')) => match operand[1..].find(q) {
                Some(end) => TimerComparison::Named(&operand[1..1 + end]),
                None => TimerComparison::Unterminated,
            },
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let end = operand
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(operand.len());
                TimerComparison::Bareword(&operand[..end])
            }
            _ => TimerComparison::Other,
        };
        out.push(comparison);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, MethodCall};

    #[test]
    fn comparisons() {
        let found = timer_comparisons(
            "$timer eq \"greet\" || $timer eq 'leave' || $timer == 3 || $timer eq depart || $timer eq \"x",
        );
        assert_eq!(
            found,
            vec![
                TimerComparison::Named("greet"),
                TimerComparison::Named("leave"),
                TimerComparison::Numeric,
                TimerComparison::Bareword("depart"),
                TimerComparison::Unterminated,
            ]
        );
        assert!(timer_comparisons("$timers eq 'x'").is_empty());
    }

    #[test]
    fn started_by_call_or_block() {
        let call = BlockKind::MethodCall(MethodCall::quest("settimer", "\"greet\", 10"));
        assert_eq!(started_timer(&call), Some("greet".to_string()));
        let dynamic = BlockKind::MethodCall(MethodCall::quest("settimer", "$name, 10"));
        assert_eq!(started_timer(&dynamic), None);
        let block = BlockKind::Timer {
            name: "wave".into(),
            seconds: 5,
        };
        assert_eq!(started_timer(&block), Some("wave".to_string()));
    }

    fn timer_handler(name: &str, condition: &str) -> Block {
        Block::new(BlockKind::EventHandler { name: name.into() }).with_children([Block::new(
            BlockKind::If {
                condition: condition.into(),
            },
        )])
    }

    fn facts(doc: &Document) -> (BTreeMap<Uid, Vec<String>>, BTreeMap<Uid, String>) {
        let mut handled = BTreeMap::new();
        let mut started = BTreeMap::new();
        for uid in doc.walk() {
            let Some(kind) = doc.kind(uid) else { continue };
            let names = handled_timers(kind);
            if !names.is_empty() {
                handled.insert(uid, names);
            }
            if let Some(name) = started_timer(kind) {
                started.insert(uid, name);
            }
        }
        (handled, started)
    }

    #[test]
    fn unhandled_only() {
        let doc = Document::from_blocks(vec![
            Block::new(BlockKind::EventHandler {
                name: "EVENT_SPAWN".into(),
            })
            .with_children([
                Block::new(BlockKind::Timer {
                    name: "greet".into(),
                    seconds: 5,
                }),
                Block::new(BlockKind::Timer {
                    name: "leave".into(),
                    seconds: 5,
                }),
            ]),
            timer_handler("EVENT_TIMER", "$timer eq \"greet\""),
        ])
        .unwrap();
        let (handled, started) = facts(&doc);
        let issues = unhandled_timers(&doc, &handled, &started);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message().contains("\"leave\""));
    }

    #[test]
    fn comparisons_outside_timer_handlers_do_not_count() {
        let doc = Document::from_blocks(vec![
            Block::new(BlockKind::EventHandler {
                name: "EVENT_SPAWN".into(),
            })
            .with_children([Block::new(BlockKind::Timer {
                name: "greet".into(),
                seconds: 5,
            })]),
            timer_handler("EVENT_SAY", "$timer eq \"greet\""),
        ])
        .unwrap();
        let (handled, started) = facts(&doc);
        assert_eq!(handled.len(), 1);
        let issues = unhandled_timers(&doc, &handled, &started);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category(), Category::TimerWithoutHandler);
    }
}
