use crate::block::{BlockKind, PluginInstance, Uid};
use crate::config::DiagnosticsConfig;
use crate::diagnostics::{Category, Severity, Subject, ValidationIssue, lint, loops};
use crate::document::Document;
use crate::plugin::PluginRegistry;

// ---------------------------------------------------------------------------
// Document-wide passes
// ---------------------------------------------------------------------------

/// Issues that depend on the set of top-level blocks rather than on any
/// one block: duplicate and missing handlers.
pub(crate) fn document_issues(doc: &Document) -> Vec<ValidationIssue> {
    let mut groups: Vec<(&str, Vec<Uid>)> = Vec::new();
    for &uid in doc.roots() {
        if let Some(BlockKind::EventHandler { name }) = doc.kind(uid) {
            match groups.iter_mut().find(|(n, _)| *n == name.as_str()) {
                Some((_, uids)) => uids.push(uid),
                None => groups.push((name.as_str(), vec![uid])),
            }
        }
    }

    let mut out = Vec::new();
    if groups.is_empty() {
        out.push(ValidationIssue::new(
            Severity::Warning,
            Category::MissingHandler,
            Subject::Document,
            "script has no event handler, so nothing in it will run",
        ));
    }
    for (name, uids) in groups {
        if uids.len() > 1 {
            let message = format!("handler {} is defined {} times", name, uids.len());
            out.push(ValidationIssue::new(
                Severity::Error,
                Category::DuplicateHandler,
                Subject::Blocks(uids),
                message,
            ));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Per-block passes
// ---------------------------------------------------------------------------

/// Everything a single block's issues depend on besides the document.
pub(crate) struct Context<'a> {
    pub config: &'a DiagnosticsConfig,
    pub plugins: &'a PluginRegistry,
}

/// Issues owned by one block. They depend only on the block itself, its
/// ancestors, its previous sibling and its subtree.
pub(crate) fn block_issues(cx: &Context<'_>, doc: &Document, uid: Uid) -> Vec<ValidationIssue> {
    let Some(kind) = doc.kind(uid) else {
        return Vec::new();
    };
    let mut out = Vec::new();

    match kind {
        BlockKind::EventHandler { name } => {
            let ancestors = doc.ancestors(uid);
            let in_handler = ancestors
                .iter()
                .any(|&a| doc.kind(a).is_some_and(BlockKind::is_handler));
            if in_handler {
                out.push(ValidationIssue::error(
                    Category::NestedHandler,
                    uid,
                    format!("handler {} is nested inside another handler", name),
                ));
            } else if !ancestors.is_empty() {
                out.push(ValidationIssue::error(
                    Category::NestedHandler,
                    uid,
                    format!("handler {} must sit at the top level of the script", name),
                ));
            }
        }
        BlockKind::Timer { name, .. } if name.trim().is_empty() => {
            out.push(ValidationIssue::error(Category::TimerName, uid, "timer has no name"));
        }
        BlockKind::PluginInstance(instance) => plugin_issues(cx.plugins, uid, instance, &mut out),
        _ => {}
    }

    if let Some(condition) = kind.condition() {
        if condition.trim().is_empty() {
            out.push(ValidationIssue::error(
                Category::EmptyCondition,
                uid,
                format!("{} has an empty condition", kind.name()),
            ));
        }
    }

    if kind.continues_chain() {
        let follows = doc
            .previous_sibling(uid)
            .and_then(|prev| doc.kind(prev))
            .is_some_and(BlockKind::opens_chain);
        if !follows {
            out.push(ValidationIssue::error(
                Category::DanglingBranch,
                uid,
                format!("{} does not follow an if or elsif", kind.name()),
            ));
        }
    }

    loops::loop_issues(cx.config, doc, uid, kind, &mut out);
    lint::lint(uid, kind, &mut out);
    out
}

fn plugin_issues(
    plugins: &PluginRegistry,
    uid: Uid,
    instance: &PluginInstance,
    out: &mut Vec<ValidationIssue>,
) {
    if instance.plugin_id.trim().is_empty() {
        out.push(ValidationIssue::error(
            Category::Plugin,
            uid,
            "plugin block has no plugin selected",
        ));
        return;
    }
    let Some(definition) = plugins.get(&instance.plugin_id) else {
        out.push(ValidationIssue::error(
            Category::Plugin,
            uid,
            format!("unknown plugin `{}`", instance.plugin_id),
        ));
        return;
    };
    if let Err(err) = definition.render(&instance.params) {
        out.push(ValidationIssue::error(Category::Plugin, uid, err.to_string()));
    }
    for (param, value) in definition.non_integer_params(&instance.params) {
        out.push(ValidationIssue::warning(
            Category::Plugin,
            uid,
            format!(
                "parameter `{}` of plugin `{}` expects an integer, got `{}`",
                param, instance.plugin_id, value
            ),
        ));
    }
}
