use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The closed set of block kinds, each with its own payload.
///
/// Every consumer (generator, importer, diagnostics) matches on this enum
/// exhaustively, so adding a kind is a compile error until each of them
/// handles it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    /// `sub EVENT_SAY { ... }`, only valid directly under the document root.
    EventHandler { name: String },
    If { condition: String },
    /// Continues the chain started by a preceding `If`/`Elsif` sibling.
    Elsif { condition: String },
    Else,
    While { condition: String },
    For(ForLoop),
    Foreach { variable: String, list: String },
    /// `next;`, `last;`, optionally with a statement modifier (`next if $x;`).
    Next {
        control: LoopControl,
        modifier: Option<String>,
    },
    Return { value: Option<String> },
    ScalarAssign(Assignment),
    ArrayAssign(Assignment),
    HashAssign(Assignment),
    MethodCall(MethodCall),
    /// `quest::settimer("name", seconds);`
    Timer { name: String, seconds: u32 },
    BucketOp(BucketOp),
    PluginInstance(PluginInstance),
    /// Verbatim source text. Never re-parsed or linted.
    RawPassthrough { text: String },
    Comment { text: String },
}

impl BlockKind {
    /// Kinds that own child blocks.
    pub fn is_container(&self) -> bool {
        match self {
            BlockKind::EventHandler { .. }
            | BlockKind::If { .. }
            | BlockKind::Elsif { .. }
            | BlockKind::Else
            | BlockKind::While { .. }
            | BlockKind::For(_)
            | BlockKind::Foreach { .. } => true,
            BlockKind::Next { .. }
            | BlockKind::Return { .. }
            | BlockKind::ScalarAssign(_)
            | BlockKind::ArrayAssign(_)
            | BlockKind::HashAssign(_)
            | BlockKind::MethodCall(_)
            | BlockKind::Timer { .. }
            | BlockKind::BucketOp(_)
            | BlockKind::PluginInstance(_)
            | BlockKind::RawPassthrough { .. }
            | BlockKind::Comment { .. } => false,
        }
    }

    /// Stable lowercase name of the kind, used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            BlockKind::EventHandler { .. } => "event handler",
            BlockKind::If { .. } => "if",
            BlockKind::Elsif { .. } => "elsif",
            BlockKind::Else => "else",
            BlockKind::While { .. } => "while",
            BlockKind::For(_) => "for",
            BlockKind::Foreach { .. } => "foreach",
            BlockKind::Next { control, .. } => control.keyword(),
            BlockKind::Return { .. } => "return",
            BlockKind::ScalarAssign(_) => "scalar assignment",
            BlockKind::ArrayAssign(_) => "array assignment",
            BlockKind::HashAssign(_) => "hash assignment",
            BlockKind::MethodCall(_) => "method call",
            BlockKind::Timer { .. } => "timer",
            BlockKind::BucketOp(_) => "bucket operation",
            BlockKind::PluginInstance(_) => "plugin",
            BlockKind::RawPassthrough { .. } => "raw passthrough",
            BlockKind::Comment { .. } => "comment",
        }
    }

    pub fn same_kind(&self, other: &BlockKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn is_handler(&self) -> bool {
        matches!(self, BlockKind::EventHandler { .. })
    }

    /// `If` or `Elsif`: a block an `Elsif`/`Else` may follow.
    pub fn opens_chain(&self) -> bool {
        matches!(self, BlockKind::If { .. } | BlockKind::Elsif { .. })
    }

    /// `Elsif` or `Else`: a block that must follow an `If`/`Elsif`.
    pub fn continues_chain(&self) -> bool {
        matches!(self, BlockKind::Elsif { .. } | BlockKind::Else)
    }

    pub fn condition(&self) -> Option<&str> {
        match self {
            BlockKind::If { condition }
            | BlockKind::Elsif { condition }
            | BlockKind::While { condition } => Some(condition),
            _ => None,
        }
    }

    /// Block-local expression text, labelled by field, for lint passes.
    /// Raw passthrough and comments contribute nothing.
    pub fn expressions(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        match self {
            BlockKind::EventHandler { .. }
            | BlockKind::Else
            | BlockKind::Timer { .. }
            | BlockKind::PluginInstance(_)
            | BlockKind::RawPassthrough { .. }
            | BlockKind::Comment { .. } => {}
            BlockKind::If { condition }
            | BlockKind::Elsif { condition }
            | BlockKind::While { condition } => out.push(("condition", condition.as_str())),
            BlockKind::For(f) => {
                out.push(("start", f.start.as_str()));
                out.push(("limit", f.limit.as_str()));
                if let Step::Add(n) | Step::Subtract(n) = &f.step {
                    out.push(("step", n.as_str()));
                }
            }
            BlockKind::Foreach { list, .. } => out.push(("list", list.as_str())),
            BlockKind::Next { modifier, .. } => {
                if let Some(m) = modifier {
                    out.push(("modifier", m.as_str()));
                }
            }
            BlockKind::Return { value } => {
                if let Some(v) = value {
                    out.push(("value", v.as_str()));
                }
            }
            BlockKind::ScalarAssign(a) | BlockKind::ArrayAssign(a) | BlockKind::HashAssign(a) => {
                out.push(("target", a.target.as_str()));
                if let Some(v) = &a.value {
                    out.push(("value", v.as_str()));
                }
            }
            BlockKind::MethodCall(call) => out.push(("arguments", call.args.as_str())),
            BlockKind::BucketOp(op) => match &op.action {
                BucketAction::Get { key, .. } | BucketAction::Delete { key } => {
                    out.push(("key", key.as_str()))
                }
                BucketAction::Set { key, value } => {
                    out.push(("key", key.as_str()));
                    out.push(("value", value.as_str()));
                }
            },
        }
        out
    }
}

/// `my` or `our`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Declarator {
    My,
    Our,
}

impl Declarator {
    pub fn keyword(self) -> &'static str {
        match self {
            Declarator::My => "my",
            Declarator::Our => "our",
        }
    }
}

/// Left-hand side, optional declarator and optional right-hand side of an
/// assignment statement. The target keeps its sigil (`$x`, `@list`,
/// `$map{key}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(default)]
    pub declarator: Option<Declarator>,
    pub target: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessEq,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterEq,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Less => "<",
            Comparison::LessEq => "<=",
            Comparison::Greater => ">",
            Comparison::GreaterEq => ">=",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Comparison::Less),
            "<=" => Some(Comparison::LessEq),
            ">" => Some(Comparison::Greater),
            ">=" => Some(Comparison::GreaterEq),
            _ => None,
        }
    }

    /// True when the loop keeps running while the variable stays below the limit.
    pub fn counts_up(self) -> bool {
        matches!(self, Comparison::Less | Comparison::LessEq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Increment,
    Decrement,
    Add(String),
    Subtract(String),
}

impl Step {
    /// Step as it follows the loop variable: `++`, `--`, ` += 2`, ` -= 2`.
    pub fn render(&self) -> String {
        match self {
            Step::Increment => "++".to_string(),
            Step::Decrement => "--".to_string(),
            Step::Add(n) => format!(" += {}", n),
            Step::Subtract(n) => format!(" -= {}", n),
        }
    }

    pub fn counts_up(&self) -> bool {
        matches!(self, Step::Increment | Step::Add(_))
    }
}

/// C-style counted loop: `for (my $i = 0; $i < 10; $i++)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForLoop {
    pub variable: String,
    pub start: String,
    pub comparison: Comparison,
    pub limit: String,
    pub step: Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopControl {
    Next,
    Last,
}

impl LoopControl {
    pub fn keyword(self) -> &'static str {
        match self {
            LoopControl::Next => "next",
            LoopControl::Last => "last",
        }
    }
}

/// What a method call is invoked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Receiver {
    /// `quest::say(...)`
    Namespace(String),
    /// `$client->Message(...)`
    Object(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    pub receiver: Receiver,
    pub method: String,
    #[serde(default)]
    pub args: String,
}

impl MethodCall {
    pub fn quest(method: impl Into<String>, args: impl Into<String>) -> Self {
        MethodCall {
            receiver: Receiver::Namespace("quest".to_string()),
            method: method.into(),
            args: args.into(),
        }
    }
}

/// Where a bucket lives: the global data store (`quest::get_data`) or an
/// entity's own buckets (`$npc->GetBucket`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketScope {
    Global,
    Entity(String),
}

/// Keys and values are expression text, quotes included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketAction {
    Get {
        #[serde(default)]
        declarator: Option<Declarator>,
        variable: String,
        key: String,
    },
    Set {
        key: String,
        value: String,
    },
    Delete {
        key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOp {
    pub scope: BucketScope,
    pub action: BucketAction,
}

/// A reference to a plugin definition plus the values supplied for its
/// parameters. Parameters left out fall back to the definition's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginInstance {
    pub plugin_id: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_kinds() {
        assert!(BlockKind::Else.is_container());
        assert!(BlockKind::EventHandler { name: "EVENT_SAY".into() }.is_container());
        assert!(!BlockKind::Comment { text: String::new() }.is_container());
        assert!(!BlockKind::RawPassthrough { text: "x".into() }.is_container());
    }

    #[test]
    fn raw_text_is_not_an_expression() {
        let raw = BlockKind::RawPassthrough { text: "if (;;".into() };
        assert!(raw.expressions().is_empty());
        let cond = BlockKind::While { condition: "$i < 3".into() };
        assert_eq!(cond.expressions(), vec![("condition", "$i < 3")]);
    }

    #[test]
    fn kind_serializes_with_tag() {
        let kind = BlockKind::Timer { name: "greet".into(), seconds: 5 };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "timer");
        assert_eq!(json["seconds"], 5);
        let back: BlockKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn step_rendering() {
        assert_eq!(Step::Increment.render(), "++");
        assert_eq!(Step::Add("2".into()).render(), " += 2");
        assert!(Step::Add("2".into()).counts_up());
        assert!(!Step::Decrement.counts_up());
    }
}
