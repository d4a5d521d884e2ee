//! Loop-safety heuristics: does a loop body visibly move toward an exit?
//!
//! The scan is bounded by `loop_lookahead`. When the bound runs out before an
//! exit is found nothing is reported.

use std::collections::BTreeSet;

use crate::block::{BlockKind, BucketAction, LoopControl, Uid};
use crate::config::DiagnosticsConfig;
use crate::diagnostics::{Category, ValidationIssue};
use crate::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Exit,
    NoExit,
    Inconclusive,
}

pub(crate) fn loop_issues(
    config: &DiagnosticsConfig,
    doc: &Document,
    uid: Uid,
    kind: &BlockKind,
    out: &mut Vec<ValidationIssue>,
) {
    match kind {
        BlockKind::While { condition } => {
            if condition.trim().is_empty() {
                return;
            }
            let vars = variables(condition);
            let scan = if calls_out(condition) {
                Scan::Exit
            } else {
                scan_body(doc, uid, config.loop_lookahead, &vars)
            };
            if scan == Scan::NoExit {
                let names: Vec<String> = vars.iter().map(|v| format!("${}", v)).collect();
                let detail = if names.is_empty() {
                    String::new()
                } else {
                    format!(" or update to {}", names.join(", "))
                };
                out.push(ValidationIssue::warning(
                    Category::LoopExit,
                    uid,
                    format!("while loop has no visible exit: no return, last{}", detail),
                ));
            }
            if !condition.contains(config.guard_token.as_str()) && !compares_with_integer(condition) {
                out.push(ValidationIssue::info(
                    Category::LoopGuard,
                    uid,
                    format!(
                        "while loop has no iteration cap; compare against a fixed limit or count with {}",
                        config.guard_token
                    ),
                ));
            }
        }
        BlockKind::For(f) => {
            if f.step.counts_up() == f.comparison.counts_up() {
                return;
            }
            let vars: BTreeSet<String> = base_name(&f.variable).into_iter().collect();
            if scan_body(doc, uid, config.loop_lookahead, &vars) == Scan::NoExit {
                out.push(ValidationIssue::warning(
                    Category::LoopExit,
                    uid,
                    format!(
                        "for loop steps {} away from its limit `{} {}` and the body never leaves the loop",
                        f.variable, f.comparison.symbol(), f.limit
                    ),
                ));
            }
        }
        _ => {}
    }
}

/// Pre-order walk of the loop body. `last` only counts when it is not
/// inside a nested loop, unless it names a label.
fn scan_body(doc: &Document, loop_uid: Uid, lookahead: usize, vars: &BTreeSet<String>) -> Scan {
    let Some(node) = doc.get(loop_uid) else {
        return Scan::Inconclusive;
    };
    let mut stack: Vec<(Uid, usize)> = node.children().iter().rev().map(|&c| (c, 0)).collect();
    let mut seen = 0;
    while let Some((uid, nesting)) = stack.pop() {
        seen += 1;
        if seen > lookahead {
            return Scan::Inconclusive;
        }
        let Some(node) = doc.get(uid) else {
            continue;
        };
        let kind = node.kind();
        if exits(kind, nesting) || touches(kind, vars) {
            return Scan::Exit;
        }
        let inner = match kind {
            BlockKind::While { .. } | BlockKind::For(_) | BlockKind::Foreach { .. } => nesting + 1,
            _ => nesting,
        };
        stack.extend(node.children().iter().rev().map(|&c| (c, inner)));
    }
    Scan::NoExit
}

fn exits(kind: &BlockKind, nesting: usize) -> bool {
    match kind {
        BlockKind::Return { .. } => true,
        BlockKind::Next {
            control: LoopControl::Last,
            modifier,
        } => nesting == 0 || modifier.as_deref().is_some_and(names_label),
        // Opaque to the scan; assume the author knows.
        BlockKind::RawPassthrough { .. } | BlockKind::PluginInstance(_) => true,
        _ => false,
    }
}

/// `last OUTER` rather than `last if ...`.
fn names_label(modifier: &str) -> bool {
    let word = modifier.split_whitespace().next().unwrap_or("");
    !word.is_empty()
        && !matches!(word, "if" | "unless")
        && word.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Whether a body block writes one of the loop's variables.
fn touches(kind: &BlockKind, vars: &BTreeSet<String>) -> bool {
    if vars.is_empty() {
        return false;
    }
    match kind {
        BlockKind::ScalarAssign(a) | BlockKind::ArrayAssign(a) | BlockKind::HashAssign(a) => {
            base_name(&a.target).is_some_and(|name| vars.contains(&name))
                || a.value.as_deref().is_some_and(|v| mutates(v, vars))
        }
        BlockKind::BucketOp(op) => match &op.action {
            BucketAction::Get { variable, .. } => {
                base_name(variable).is_some_and(|name| vars.contains(&name))
            }
            _ => false,
        },
        BlockKind::MethodCall(call) => variables(&call.args).iter().any(|v| vars.contains(v)),
        BlockKind::Foreach { variable, .. } => {
            base_name(variable).is_some_and(|name| vars.contains(&name))
        }
        _ => false,
    }
}

/// `shift(@queue)` or `pop @list` on a loop variable.
fn mutates(text: &str, vars: &BTreeSet<String>) -> bool {
    (has_word(text, "shift") || has_word(text, "pop") || has_word(text, "splice"))
        && variables(text).iter().any(|v| vars.contains(v))
}

/// Conditions whose value can change without the body's help.
fn calls_out(condition: &str) -> bool {
    condition.contains("->")
        || condition.contains("::")
        || ["shift", "pop", "each", "keys"]
            .iter()
            .any(|w| has_word(condition, w))
}

fn has_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + word.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Variable names mentioned in `text`, without sigils: `$i`, `@list`,
/// `$h{x}` all contribute their base name.
pub(crate) fn variables(text: &str) -> BTreeSet<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = BTreeSet::new();
    let mut i = 0;
    while i < chars.len() {
        if matches!(chars[i], '$' | '@' | '%') {
            let mut j = i + 1;
            while j < chars.len() && is_ident(chars[j]) {
                j += 1;
            }
            if j > i + 1 && !chars[i + 1].is_ascii_digit() {
                out.insert(chars[i + 1..j].iter().collect());
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }
    out
}

fn base_name(target: &str) -> Option<String> {
    let rest = target.trim().strip_prefix(['$', '@', '%'])?;
    let end = rest.find(|c: char| !is_ident(c)).unwrap_or(rest.len());
    (end > 0).then(|| rest[..end].to_string())
}

/// A relational comparison with an integer literal on either side.
fn compares_with_integer(condition: &str) -> bool {
    let chars: Vec<char> = condition.chars().collect();
    let n = chars.len();
    let mut i = 0;
    while i < n {
        let c = chars[i];
        if c != '<' && c != '>' {
            i += 1;
            continue;
        }
        let prev = i.checked_sub(1).map(|p| chars[p]);
        let mut end = i + 1;
        if chars.get(end) == Some(&'=') {
            end += 1;
        }
        let arrow = matches!(prev, Some('-' | '=' | '<' | '>'));
        let shift_or_spaceship = matches!(chars.get(end), Some('<' | '>' | '='))
            || matches!(chars.get(i + 1), Some('<' | '>'));
        if !arrow && !shift_or_spaceship {
            let left: String = chars[..i].iter().collect();
            let right: String = chars[end..].iter().collect();
            if ends_with_integer(&left) || starts_with_integer(&right) {
                return true;
            }
        }
        i = end;
    }
    false
}

fn starts_with_integer(text: &str) -> bool {
    let text = text.trim_start();
    let digits = text.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && !text[digits..].starts_with(is_ident)
}

fn ends_with_integer(text: &str) -> bool {
    let text = text.trim_end();
    let digits = text.chars().rev().take_while(char::is_ascii_digit).count();
    digits > 0 && !text[..text.len() - digits].ends_with(|c: char| is_ident(c) || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Assignment, Block, Comparison, ForLoop, MethodCall, Step};
    use crate::diagnostics::Severity;
    use crate::document::Parent;

    fn issues_for(block: Block) -> Vec<(Severity, Category)> {
        issues_with(&DiagnosticsConfig::default(), block)
    }

    fn issues_with(config: &DiagnosticsConfig, block: Block) -> Vec<(Severity, Category)> {
        let mut doc = Document::new();
        let uid = doc.append(Parent::Root, block).unwrap();
        let kind = doc.kind(uid).unwrap().clone();
        let mut out = Vec::new();
        loop_issues(config, &doc, uid, &kind, &mut out);
        out.iter().map(|i| (i.severity(), i.category())).collect()
    }

    fn while_loop(condition: &str) -> Block {
        Block::new(BlockKind::While {
            condition: condition.to_string(),
        })
    }

    fn say() -> Block {
        Block::new(BlockKind::MethodCall(MethodCall::quest("say", "\"hi\"")))
    }

    fn bump(target: &str) -> Block {
        Block::new(BlockKind::ScalarAssign(Assignment {
            declarator: None,
            target: target.to_string(),
            value: Some(format!("{} + 1", target)),
        }))
    }

    #[test]
    fn while_without_exit_warns() {
        let found = issues_for(while_loop("$i < 10").with_children([say()]));
        assert_eq!(found, vec![(Severity::Warning, Category::LoopExit)]);
    }

    #[test]
    fn assignment_to_condition_variable_is_an_exit() {
        let found = issues_for(while_loop("$i < 10").with_children([say(), bump("$i")]));
        assert!(found.is_empty());
    }

    #[test]
    fn last_in_nested_loop_does_not_count() {
        let inner = Block::new(BlockKind::Foreach {
            variable: "$x".into(),
            list: "@items".into(),
        })
        .with_children([Block::new(BlockKind::Next {
            control: LoopControl::Last,
            modifier: None,
        })]);
        let found = issues_for(while_loop("$i < 10").with_children([inner]));
        assert_eq!(found, vec![(Severity::Warning, Category::LoopExit)]);
    }

    #[test]
    fn unguarded_while_gets_info() {
        let found = issues_for(while_loop("$running").with_children([Block::new(BlockKind::Return {
            value: None,
        })]));
        assert_eq!(found, vec![(Severity::Info, Category::LoopGuard)]);
        let guarded = issues_for(
            while_loop("$running && $guard++ < $max")
                .with_children([Block::new(BlockKind::Return { value: None })]),
        );
        assert!(guarded.is_empty());
    }

    #[test]
    fn lookahead_exhaustion_stays_quiet() {
        let config = DiagnosticsConfig {
            loop_lookahead: 2,
            ..DiagnosticsConfig::default()
        };
        let body = [say(), say(), say(), bump("$i")];
        let found = issues_with(&config, while_loop("$i < 10").with_children(body));
        assert!(found.is_empty());
    }

    #[test]
    fn for_stepping_away_from_limit() {
        let looping = |step: Step| {
            Block::new(BlockKind::For(ForLoop {
                variable: "$i".into(),
                start: "0".into(),
                comparison: Comparison::Less,
                limit: "10".into(),
                step,
            }))
            .with_children([say()])
        };
        assert!(issues_for(looping(Step::Increment)).is_empty());
        assert_eq!(
            issues_for(looping(Step::Decrement)),
            vec![(Severity::Warning, Category::LoopExit)]
        );
    }

    #[test]
    fn integer_comparisons() {
        assert!(compares_with_integer("$i < 10"));
        assert!(compares_with_integer("5 >= $n"));
        assert!(!compares_with_integer("$i < $max"));
        assert!(!compares_with_integer("$x2 > $y"));
        assert!(!compares_with_integer("$npc->GetHP() <=> 3"));
        assert!(!compares_with_integer("$client->GetLevel"));
    }

    #[test]
    fn variable_names() {
        let found = variables("$h{key} && @list > $#list && $1");
        let names: Vec<&str> = found.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["h", "list"]);
    }
}
