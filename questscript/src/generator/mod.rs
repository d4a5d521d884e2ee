use crate::block::{
    Assignment, BlockKind, BucketAction, BucketOp, BucketScope, ForLoop, MethodCall, Receiver, Uid,
};
use crate::diagnostics::{Category, ValidationIssue};
use crate::document::{Document, Parent};
use crate::plugin::PluginRegistry;

const INDENT: &str = "    ";

/// Output of one generation: the script text and any per-block render
/// failures met on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub text: String,
    pub issues: Vec<ValidationIssue>,
}

/// Tree → script text. Pure: the same document always yields the same bytes.
pub struct Generator<'r> {
    plugins: &'r PluginRegistry,
}

impl<'r> Generator<'r> {
    pub fn new(plugins: &'r PluginRegistry) -> Self {
        Generator { plugins }
    }

    pub fn generate(&self, doc: &Document) -> Generated {
        let mut emitter = Emitter {
            doc,
            plugins: self.plugins,
            out: String::new(),
            issues: Vec::new(),
        };
        emitter.children(doc.roots(), 0);
        Generated {
            text: emitter.out,
            issues: emitter.issues,
        }
    }
}

struct Emitter<'a> {
    doc: &'a Document,
    plugins: &'a PluginRegistry,
    out: String,
    issues: Vec<ValidationIssue>,
}

impl Emitter<'_> {
    fn line(&mut self, depth: usize, text: &str) {
        if !text.is_empty() {
            for _ in 0..depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    fn children(&mut self, siblings: &[Uid], depth: usize) {
        let mut i = 0;
        while i < siblings.len() {
            let uid = siblings[i];
            i += 1;
            let Some(kind) = self.doc.kind(uid) else {
                continue;
            };
            if let BlockKind::If { condition } = kind {
                self.line(depth, &format!("if ({}) {{", condition));
                self.body(uid, depth);
                // Absorb the elsif/else siblings that continue this chain.
                while let Some(&next) = siblings.get(i) {
                    match self.doc.kind(next) {
                        Some(BlockKind::Elsif { condition }) => {
                            let opener = format!("}} elsif ({}) {{", condition);
                            self.line(depth, &opener);
                            self.body(next, depth);
                            i += 1;
                        }
                        Some(BlockKind::Else) => {
                            self.line(depth, "} else {");
                            self.body(next, depth);
                            i += 1;
                            break;
                        }
                        _ => break,
                    }
                }
                self.line(depth, "}");
            } else {
                self.block(uid, depth);
            }
        }
    }

    fn body(&mut self, uid: Uid, depth: usize) {
        let children = self
            .doc
            .children_of(Parent::Block(uid))
            .map(<[Uid]>::to_vec)
            .unwrap_or_default();
        self.children(&children, depth + 1);
    }

    fn container(&mut self, uid: Uid, depth: usize, opener: &str) {
        self.line(depth, opener);
        self.body(uid, depth);
        self.line(depth, "}");
    }

    fn block(&mut self, uid: Uid, depth: usize) {
        let Some(kind) = self.doc.kind(uid) else {
            return;
        };
        match kind {
            BlockKind::EventHandler { name } => {
                self.container(uid, depth, &format!("sub {} {{", name));
                self.line(0, "");
            }
            BlockKind::If { condition } => {
                self.container(uid, depth, &format!("if ({}) {{", condition))
            }
            // Only reached when the chain is broken; rendered on its own.
            BlockKind::Elsif { condition } => {
                self.container(uid, depth, &format!("elsif ({}) {{", condition))
            }
            BlockKind::Else => self.container(uid, depth, "else {"),
            BlockKind::While { condition } => {
                self.container(uid, depth, &format!("while ({}) {{", condition))
            }
            BlockKind::For(f) => self.container(uid, depth, &for_opener(f)),
            BlockKind::Foreach { variable, list } => {
                self.container(uid, depth, &format!("foreach my {} ({}) {{", variable, list))
            }
            BlockKind::Next { control, modifier } => {
                let text = match modifier {
                    Some(m) => format!("{} {};", control.keyword(), m),
                    None => format!("{};", control.keyword()),
                };
                self.line(depth, &text);
            }
            BlockKind::Return { value } => {
                let text = match value {
                    Some(v) => format!("return {};", v),
                    None => "return;".to_string(),
                };
                self.line(depth, &text);
            }
            BlockKind::ScalarAssign(a) | BlockKind::ArrayAssign(a) | BlockKind::HashAssign(a) => {
                self.line(depth, &assignment(a))
            }
            BlockKind::MethodCall(call) => self.line(depth, &method_call(call)),
            BlockKind::Timer { name, seconds } => {
                self.line(depth, &format!("quest::settimer(\"{}\", {});", name, seconds))
            }
            BlockKind::BucketOp(op) => self.line(depth, &bucket(op)),
            BlockKind::PluginInstance(instance) => {
                let rendered = if instance.plugin_id.is_empty() {
                    Err("no plugin selected".to_string())
                } else {
                    self.plugins.render(instance).map_err(|e| e.to_string())
                };
                match rendered {
                    Ok(text) => {
                        for line in text.lines() {
                            self.line(depth, line);
                        }
                    }
                    Err(message) => {
                        self.line(depth, &format!("# [plugin error] {}", message));
                        self.issues
                            .push(ValidationIssue::error(Category::Plugin, uid, message));
                    }
                }
            }
            BlockKind::RawPassthrough { text } => {
                self.out.push_str(text);
                self.out.push('\n');
            }
            BlockKind::Comment { text } => {
                for line in text.split('\n') {
                    if line.is_empty() {
                        self.line(depth, "#");
                    } else {
                        self.line(depth, &format!("# {}", line));
                    }
                }
            }
        }
    }
}

fn for_opener(f: &ForLoop) -> String {
    format!(
        "for (my {v} = {start}; {v} {cmp} {limit}; {v}{step}) {{",
        v = f.variable,
        start = f.start,
        cmp = f.comparison.symbol(),
        limit = f.limit,
        step = f.step.render(),
    )
}

fn assignment(a: &Assignment) -> String {
    let mut text = String::new();
    if let Some(d) = a.declarator {
        text.push_str(d.keyword());
        text.push(' ');
    }
    text.push_str(&a.target);
    if let Some(value) = &a.value {
        text.push_str(" = ");
        text.push_str(value);
    }
    text.push(';');
    text
}

fn method_call(call: &MethodCall) -> String {
    match &call.receiver {
        Receiver::Namespace(ns) => format!("{}::{}({});", ns, call.method, call.args),
        Receiver::Object(obj) => format!("{}->{}({});", obj, call.method, call.args),
    }
}

fn bucket(op: &BucketOp) -> String {
    match (&op.scope, &op.action) {
        (BucketScope::Global, BucketAction::Set { key, value }) => {
            format!("quest::set_data({}, {});", key, value)
        }
        (BucketScope::Global, BucketAction::Delete { key }) => {
            format!("quest::delete_data({});", key)
        }
        (BucketScope::Entity(who), BucketAction::Set { key, value }) => {
            format!("{}->SetBucket({}, {});", who, key, value)
        }
        (BucketScope::Entity(who), BucketAction::Delete { key }) => {
            format!("{}->DeleteBucket({});", who, key)
        }
        (scope, BucketAction::Get { declarator, variable, key }) => {
            let call = match scope {
                BucketScope::Global => format!("quest::get_data({})", key),
                BucketScope::Entity(who) => format!("{}->GetBucket({})", who, key),
            };
            match declarator {
                Some(d) => format!("{} {} = {};", d.keyword(), variable, call),
                None => format!("{} = {};", variable, call),
            }
        }
    }
}
