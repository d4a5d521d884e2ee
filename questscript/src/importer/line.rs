//! Recognizers for single source lines: block openers and one-line
//! statements. Each takes the trimmed line and returns `None` for anything
//! it is not sure about.

use crate::block::{
    Assignment, BlockKind, BucketAction, BucketOp, BucketScope, Comparison, Declarator, ForLoop,
    LoopControl, MethodCall, Receiver, Step,
};
use crate::config::ImportConfig;
use crate::importer::scan::{LexState, scan_line, split_top_level};

/// A line that opens a brace-delimited construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Opener {
    Sub(String),
    Block(BlockKind),
}

pub(crate) fn parse_opener(trimmed: &str) -> Option<Opener> {
    let head = trimmed.strip_suffix('{')?.trim_end();
    if let Some(rest) = keyword(head, "sub") {
        let name = rest.trim();
        return is_identifier(name).then(|| Opener::Sub(name.to_string()));
    }
    if let Some(rest) = keyword(head, "if") {
        let condition = parenthesized(rest)?;
        return Some(Opener::Block(BlockKind::If { condition }));
    }
    if let Some(rest) = keyword(head, "elsif") {
        let condition = parenthesized(rest)?;
        return Some(Opener::Block(BlockKind::Elsif { condition }));
    }
    if let Some(rest) = keyword(head, "else") {
        return rest.trim().is_empty().then_some(Opener::Block(BlockKind::Else));
    }
    if let Some(rest) = keyword(head, "while") {
        let condition = parenthesized(rest)?;
        return Some(Opener::Block(BlockKind::While { condition }));
    }
    if let Some(rest) = keyword(head, "foreach") {
        let rest = keyword(rest.trim_start(), "my")?.trim_start();
        let (variable, rest) = scalar_prefix(rest)?;
        let list = parenthesized(rest)?;
        return Some(Opener::Block(BlockKind::Foreach {
            variable: variable.to_string(),
            list,
        }));
    }
    if let Some(rest) = keyword(head, "for") {
        let inner = parenthesized(rest)?;
        return parse_counted_loop(&inner).map(|f| Opener::Block(BlockKind::For(f)));
    }
    None
}

/// `my $i = 0; $i < 10; $i++`
fn parse_counted_loop(inner: &str) -> Option<ForLoop> {
    let parts = split_top_level(inner, ';');
    let [init, test, step] = parts.as_slice() else {
        return None;
    };

    let init = keyword(init.trim(), "my")?.trim_start();
    let (variable, rest) = scalar_prefix(init)?;
    let start = rest.trim_start().strip_prefix('=')?.trim();
    if start.is_empty() || start.starts_with('=') {
        return None;
    }

    let rest = after_variable(test.trim(), variable)?;
    let (comparison, limit) = ["<=", ">=", "<", ">"].iter().find_map(|op| {
        let limit = rest.strip_prefix(op)?;
        Some((Comparison::from_symbol(op)?, limit.trim()))
    })?;
    if limit.is_empty() || limit.starts_with('=') {
        return None;
    }

    let rest = after_variable(step.trim(), variable)?;
    let step = if rest == "++" {
        Step::Increment
    } else if rest == "--" {
        Step::Decrement
    } else if let Some(n) = rest.strip_prefix("+=") {
        Step::Add(non_empty(n.trim())?.to_string())
    } else if let Some(n) = rest.strip_prefix("-=") {
        Step::Subtract(non_empty(n.trim())?.to_string())
    } else {
        return None;
    };

    Some(ForLoop {
        variable: variable.to_string(),
        start: start.to_string(),
        comparison,
        limit: limit.to_string(),
        step,
    })
}

/// `text` with `variable` stripped from the front, requiring a word
/// boundary, then trimmed.
fn after_variable<'t>(text: &'t str, variable: &str) -> Option<&'t str> {
    let rest = text.strip_prefix(variable)?;
    if rest.starts_with(is_ident_char) {
        return None;
    }
    Some(rest.trim_start())
}

/// `(...)` spanning all of `text` with balanced contents; returns the
/// trimmed contents.
fn parenthesized(text: &str) -> Option<String> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    balanced(inner).then(|| inner.trim().to_string())
}

fn balanced(text: &str) -> bool {
    let scan = scan_line(text, LexState::Code);
    scan.parens == 0
        && scan.paren_floor == 0
        && scan.brackets == 0
        && scan.brace_delta() == 0
        && scan.brace_floor() == 0
        && scan.comment_at.is_none()
        && scan.end == LexState::Code
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// Recognize a complete one-line statement ending in `;`.
pub(crate) fn parse_statement(trimmed: &str, config: &ImportConfig) -> Option<BlockKind> {
    let body = trimmed.strip_suffix(';')?.trim_end();
    if split_top_level(body, ';').len() > 1 {
        return None;
    }

    for (kw, control) in [("next", LoopControl::Next), ("last", LoopControl::Last)] {
        if let Some(rest) = keyword(body, kw) {
            let rest = rest.trim();
            if rest.starts_with('=') {
                return None;
            }
            return Some(BlockKind::Next {
                control,
                modifier: non_empty(rest).map(str::to_string),
            });
        }
    }

    if let Some(rest) = keyword(body, "return") {
        let value = rest.trim();
        return Some(BlockKind::Return {
            value: non_empty(value).map(str::to_string),
        });
    }

    if let Some(call) = parse_call(body, config) {
        return Some(classify_call(call));
    }

    parse_assignment(body, config)
}

fn classify_call(call: MethodCall) -> BlockKind {
    let args: Vec<String> = split_top_level(&call.args, ',')
        .into_iter()
        .map(|a| a.trim().to_string())
        .collect();
    let scope = match &call.receiver {
        Receiver::Namespace(ns) if ns == "quest" => Some(BucketScope::Global),
        Receiver::Object(obj) => Some(BucketScope::Entity(obj.clone())),
        Receiver::Namespace(_) => None,
    };

    if let Some(scope) = scope {
        let global = scope == BucketScope::Global;
        let action = match (call.method.as_str(), args.as_slice()) {
            ("settimer", [name, seconds]) if global => {
                if let (Some(name), Ok(parsed)) = (timer_literal(name), seconds.parse::<u32>()) {
                    if parsed.to_string() == *seconds {
                        return BlockKind::Timer {
                            name: name.to_string(),
                            seconds: parsed,
                        };
                    }
                }
                None
            }
            ("set_data", [key, value]) if global => Some(BucketAction::Set {
                key: key.clone(),
                value: value.clone(),
            }),
            ("delete_data", [key]) if global => Some(BucketAction::Delete { key: key.clone() }),
            ("SetBucket", [key, value]) if !global => Some(BucketAction::Set {
                key: key.clone(),
                value: value.clone(),
            }),
            ("DeleteBucket", [key]) if !global => Some(BucketAction::Delete { key: key.clone() }),
            _ => None,
        };
        if let Some(action) = action.filter(|a| bucket_fields_present(a)) {
            return BlockKind::BucketOp(BucketOp { scope, action });
        }
    }
    BlockKind::MethodCall(call)
}

fn bucket_fields_present(action: &BucketAction) -> bool {
    match action {
        BucketAction::Set { key, value } => !key.is_empty() && !value.is_empty(),
        BucketAction::Delete { key } | BucketAction::Get { key, .. } => !key.is_empty(),
    }
}

/// `"name"` with nothing interpolated or escaped inside.
fn timer_literal(arg: &str) -> Option<&str> {
    let name = arg.strip_prefix('"')?.strip_suffix('"')?;
    (!name.contains(['"', '\\', '$', '@'])).then_some(name)
}

/// `ns::method(args)` or `$obj->method(args)`, the call being the whole text.
fn parse_call(text: &str, config: &ImportConfig) -> Option<MethodCall> {
    let open = text.find('(')?;
    let head = &text[..open];
    let args = text[open + 1..].strip_suffix(')')?;
    if !balanced(args) {
        return None;
    }
    let receiver_and_method = if let Some((obj, method)) = head.split_once("->") {
        let (variable, rest) = scalar_prefix(obj)?;
        if !rest.is_empty() {
            return None;
        }
        (Receiver::Object(variable.to_string()), method)
    } else {
        let (ns, method) = head.split_once("::")?;
        if !config.namespaces.iter().any(|n| n == ns) {
            return None;
        }
        (Receiver::Namespace(ns.to_string()), method)
    };
    let (receiver, method) = receiver_and_method;
    if !is_identifier(method) {
        return None;
    }
    Some(MethodCall {
        receiver,
        method: method.to_string(),
        args: args.to_string(),
    })
}

fn parse_assignment(body: &str, config: &ImportConfig) -> Option<BlockKind> {
    let (lhs, rhs) = match standalone_equals(body) {
        Some(pos) => (body[..pos].trim(), Some(non_empty(body[pos + 1..].trim())?)),
        None => (body, None),
    };

    let (declarator, target) = if let Some(rest) = keyword(lhs, "my") {
        (Some(Declarator::My), rest.trim())
    } else if let Some(rest) = keyword(lhs, "our") {
        (Some(Declarator::Our), rest.trim())
    } else {
        (None, lhs)
    };
    if declarator.is_none() && rhs.is_none() {
        return None;
    }

    let shape = target_shape(target)?;
    if declarator.is_some() && shape.subscripted {
        return None;
    }

    if let (Some(value), TargetKind::Scalar, false) = (rhs, shape.kind, shape.subscripted) {
        if let Some(call) = parse_call(value, config) {
            let args: Vec<&str> = split_top_level(&call.args, ',');
            let scope = match (&call.receiver, call.method.as_str()) {
                (Receiver::Namespace(ns), "get_data") if ns == "quest" => Some(BucketScope::Global),
                (Receiver::Object(obj), "GetBucket") => Some(BucketScope::Entity(obj.clone())),
                _ => None,
            };
            if let (Some(scope), [key]) = (scope, args.as_slice()) {
                let key = key.trim();
                if !key.is_empty() {
                    return Some(BlockKind::BucketOp(BucketOp {
                        scope,
                        action: BucketAction::Get {
                            declarator,
                            variable: target.to_string(),
                            key: key.to_string(),
                        },
                    }));
                }
            }
        }
    }

    let assignment = Assignment {
        declarator,
        target: target.to_string(),
        value: rhs.map(str::to_string),
    };
    Some(match shape.kind {
        TargetKind::Scalar => BlockKind::ScalarAssign(assignment),
        TargetKind::Array => BlockKind::ArrayAssign(assignment),
        TargetKind::Hash => BlockKind::HashAssign(assignment),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    Scalar,
    Array,
    Hash,
}

struct TargetShape {
    kind: TargetKind,
    subscripted: bool,
}

/// `$x`, `@x`, `%x`, `$x[...]` or `$x{...}`.
fn target_shape(target: &str) -> Option<TargetShape> {
    let mut chars = target.chars();
    let sigil = chars.next()?;
    let rest = chars.as_str();
    let name_len = rest
        .char_indices()
        .find(|&(_, c)| !is_ident_char(c))
        .map_or(rest.len(), |(i, _)| i);
    let name = &rest[..name_len];
    if !is_identifier(name) {
        return None;
    }
    let subscript = &rest[name_len..];
    let whole = |kind| {
        Some(TargetShape {
            kind,
            subscripted: false,
        })
    };
    match (sigil, subscript.chars().next()) {
        ('$', None) => whole(TargetKind::Scalar),
        ('@', None) => whole(TargetKind::Array),
        ('%', None) => whole(TargetKind::Hash),
        ('$', Some('[')) => {
            let inner = subscript.strip_prefix('[')?.strip_suffix(']')?;
            balanced(inner).then_some(TargetShape {
                kind: TargetKind::Array,
                subscripted: true,
            })
        }
        ('$', Some('{')) => {
            let inner = subscript.strip_prefix('{')?.strip_suffix('}')?;
            balanced(inner).then_some(TargetShape {
                kind: TargetKind::Hash,
                subscripted: true,
            })
        }
        _ => None,
    }
}

/// Byte offset of the first top-level `=` that is an assignment, not part
/// of `==`, `=~`, `=>`, `<=`, `!=`, `+=` and friends.
fn standalone_equals(text: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, &(pos, c)) in chars.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| chars[p].1);
                let next = chars.get(i + 1).map(|&(_, n)| n);
                let compound = prev.is_some_and(|p| "=!<>+-*/.%&|^~".contains(p));
                let operator = next.is_some_and(|n| "=~>".contains(n));
                if !compound && !operator {
                    return Some(pos);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Lexical helpers
// ---------------------------------------------------------------------------

/// `text` starts with the word `kw`; returns what follows it.
fn keyword<'t>(text: &'t str, kw: &str) -> Option<&'t str> {
    let rest = text.strip_prefix(kw)?;
    if rest.starts_with(is_ident_char) {
        return None;
    }
    Some(rest)
}

/// A leading `$name`; returns it and the remaining text.
fn scalar_prefix(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('$')?;
    let len = rest
        .char_indices()
        .find(|&(_, c)| !is_ident_char(c))
        .map_or(rest.len(), |(i, _)| i);
    if !is_identifier(&rest[..len]) {
        return None;
    }
    Some((&text[..len + 1], &text[len + 1..]))
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(is_ident_char)
}

fn non_empty(text: &str) -> Option<&str> {
    (!text.is_empty()).then_some(text)
}
