//! Token-level checks on the expression text a block carries. Raw
//! passthrough and comments are never looked at.

use crate::block::{BlockKind, Uid};
use crate::diagnostics::timers::{TimerComparison, timer_comparisons};
use crate::diagnostics::{Category, ValidationIssue};
use crate::importer::scan::{LexState, scan_line};

pub(crate) fn lint(uid: Uid, kind: &BlockKind, out: &mut Vec<ValidationIssue>) {
    for (field, text) in kind.expressions() {
        lint_expression(uid, field, text, out);
    }
}

fn lint_expression(uid: Uid, field: &str, text: &str, out: &mut Vec<ValidationIssue>) {
    let scan = scan_line(text, LexState::Code);
    let warn = |message: String| ValidationIssue::warning(Category::SuspiciousToken, uid, message);

    match scan.end {
        LexState::Code => {}
        LexState::Quoted('/') => out.push(warn(format!("unterminated pattern in {}", field))),
        LexState::Quoted(_) => out.push(warn(format!("unbalanced quotes in {}", field))),
    }
    if scan.comment_at.is_some() {
        out.push(warn(format!("`#` in {} starts a comment and hides the rest", field)));
    }
    if scan.parens != 0 || scan.paren_floor < 0 {
        out.push(warn(format!("unbalanced parentheses in {}", field)));
    }
    if scan.brace_delta() != 0 || scan.brace_floor() < 0 {
        out.push(warn(format!("unbalanced braces in {}", field)));
    }
    if text.contains(";;") {
        out.push(ValidationIssue::info(
            Category::SuspiciousToken,
            uid,
            format!("doubled `;;` in {}", field),
        ));
    }
    if text.trim_end().ends_with('\\') {
        out.push(ValidationIssue::info(
            Category::SuspiciousToken,
            uid,
            format!("{} ends with a stray backslash", field),
        ));
    }

    for comparison in timer_comparisons(text) {
        let message = match comparison {
            TimerComparison::Named(_) | TimerComparison::Other => continue,
            TimerComparison::Bareword(word) => {
                format!("timer name `{}` should be quoted: `$timer eq \"{}\"`", word, word)
            }
            TimerComparison::Numeric => {
                "`$timer` holds a name; compare it with `eq`, not `==`".to_string()
            }
            TimerComparison::Unterminated => "timer name is missing its closing quote".to_string(),
        };
        out.push(warn(message));
    }
}
