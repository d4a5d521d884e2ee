use std::collections::BTreeMap;

use questscript::block::{MethodCall, PluginInstance};
use questscript::config::{DiagnosticsConfig, ImportConfig};
use questscript::diagnostics::Category;
use questscript::importer::RawReason;
use questscript::{
    Block, BlockKind, Diagnostics, Document, Edit, Generator, Importer, Parent, PluginRegistry,
    Report,
};

const SCRIPT: &str = "\
# Greets players and remembers them.
sub EVENT_SAY {
    if ($text =~ /hail/i) {
        quest::say(\"Hail, $name.\");
        my $seen = quest::get_data(\"seen_$name\");
        quest::set_data(\"seen_$name\", 1);
    } elsif ($text =~ /leave/i) {
        $client->Message(15, \"Farewell.\");
        return;
    } else {
        quest::settimer(\"greet\", 10);
    }
}

sub EVENT_TIMER {
    if ($timer eq \"greet\") {
        quest::stoptimer(\"greet\");
        for (my $i = 0; $i < 3; $i++) {
            next if $i == 1;
            quest::emote(\"waves.\");
        }
        foreach my $item (@items) {
            last;
        }
    }
}

";

const PLUGINS: &str = r#"{
    "plugins": [
        {
            "plugin_id": "level_gate",
            "name": "Level Gate",
            "category": "Flow",
            "perl_template": "if ($client->GetLevel() >= {level}) {\n    quest::say(\"{message}\");\n}",
            "params": [
                {"name": "level", "label": "Minimum level", "type": "int", "default": 10},
                {"name": "message", "label": "Message", "type": "str"}
            ]
        }
    ]
}"#;

fn import_with(text: &str, plugins: &PluginRegistry) -> questscript::Imported {
    let config = ImportConfig::default();
    Importer::new(&config, plugins).import(text)
}

fn generate_with(doc: &Document, plugins: &PluginRegistry) -> String {
    let generated = Generator::new(plugins).generate(doc);
    assert!(generated.issues.is_empty(), "{:?}", generated.issues);
    generated.text
}

fn validate(doc: &Document, plugins: &PluginRegistry) -> Report {
    let config = DiagnosticsConfig::default();
    Diagnostics::new(&config, plugins).validate(doc)
}

fn revalidate(doc: &Document, plugins: &PluginRegistry, previous: &Report, edits: &[Edit]) -> Report {
    let config = DiagnosticsConfig::default();
    Diagnostics::new(&config, plugins).revalidate(doc, previous, edits)
}

fn categories(report: &Report) -> Vec<Category> {
    report.issues().map(|i| i.category()).collect()
}

// ---------------------------------------------------------------------------
// Import and generation
// ---------------------------------------------------------------------------

#[test]
fn canonical_script_round_trips() {
    let plugins = PluginRegistry::new();
    let imported = import_with(SCRIPT, &plugins);
    assert_eq!(imported.report.raw_lines, 0);
    assert!(imported.report.raw_blocks.is_empty());
    assert_eq!(generate_with(&imported.document, &plugins), SCRIPT);
}

#[test]
fn canonical_script_validates_clean() {
    let plugins = PluginRegistry::new();
    let imported = import_with(SCRIPT, &plugins);
    let report = validate(&imported.document, &plugins);
    assert!(report.is_empty(), "{:?}", report.issues().collect::<Vec<_>>());
}

#[test]
fn generated_tree_round_trips() {
    let plugins = PluginRegistry::new();
    let doc = Document::from_blocks(vec![
        Block::new(BlockKind::EventHandler {
            name: "EVENT_SPAWN".into(),
        })
        .with_children([
            Block::new(BlockKind::Comment {
                text: "Wander a little.".into(),
            }),
            Block::new(BlockKind::While {
                condition: "$steps < 5".into(),
            })
            .with_children([Block::new(BlockKind::MethodCall(MethodCall::quest(
                "moveto",
                "$x + $steps, $y, $z",
            )))]),
            Block::new(BlockKind::Timer {
                name: "wander".into(),
                seconds: 30,
            }),
        ]),
    ])
    .unwrap();

    let first = generate_with(&doc, &plugins);
    let imported = import_with(&first, &plugins);
    assert_eq!(generate_with(&imported.document, &plugins), first);
    assert_eq!(imported.document.len(), doc.len());
}

#[test]
fn unrecognized_text_survives_verbatim() {
    let text = "\
sub EVENT_SAY {
    my ($a, $b) = @_;
    $x += 1;
    if ($a) {
        quest::say(\"a\");
    }
}

sub helper {
    return 1;
}
";
    let plugins = PluginRegistry::new();
    let imported = import_with(text, &plugins);
    let reasons: Vec<RawReason> = imported
        .report
        .raw_blocks
        .iter()
        .map(|r| r.reason)
        .collect();
    assert_eq!(reasons, vec![RawReason::Unrecognized, RawReason::ForeignSub]);
    assert_eq!(imported.report.raw_lines, 5);
    assert_eq!(generate_with(&imported.document, &plugins), text);
}

#[test]
fn unclosed_handler_stays_raw() {
    let text = "sub EVENT_SAY {\n    quest::say(1);\n";
    let plugins = PluginRegistry::new();
    let imported = import_with(text, &plugins);
    assert_eq!(imported.document.len(), 1);
    assert_eq!(imported.report.raw_blocks[0].reason, RawReason::Unmatched);
    assert_eq!(generate_with(&imported.document, &plugins), text);
}

#[test]
fn multi_line_plugin_is_recognized() {
    let plugins = PluginRegistry::from_json(PLUGINS).unwrap();
    let params: BTreeMap<String, String> = [
        ("level".to_string(), "20".to_string()),
        ("message".to_string(), "Welcome back".to_string()),
    ]
    .into();
    let doc = Document::from_blocks(vec![
        Block::new(BlockKind::EventHandler {
            name: "EVENT_SAY".into(),
        })
        .with_children([Block::new(BlockKind::PluginInstance(PluginInstance {
            plugin_id: "level_gate".into(),
            params: params.clone(),
        }))]),
    ])
    .unwrap();

    let text = generate_with(&doc, &plugins);
    assert_eq!(
        text,
        "sub EVENT_SAY {\n    if ($client->GetLevel() >= 20) {\n        quest::say(\"Welcome back\");\n    }\n}\n\n"
    );

    let imported = import_with(&text, &plugins);
    let handler = imported.document.roots()[0];
    let child = imported.document.children_of(Parent::Block(handler)).unwrap()[0];
    assert_eq!(
        imported.document.kind(child),
        Some(&BlockKind::PluginInstance(PluginInstance {
            plugin_id: "level_gate".into(),
            params,
        }))
    );
    assert_eq!(generate_with(&imported.document, &plugins), text);
}

#[test]
fn uids_survive_edits_and_saving() {
    let plugins = PluginRegistry::new();
    let mut doc = import_with(SCRIPT, &plugins).document;
    let before = doc.walk();

    let say = before
        .iter()
        .copied()
        .find(|&uid| matches!(doc.kind(uid), Some(BlockKind::MethodCall(c)) if c.method == "say"))
        .unwrap();
    doc.replace_kind(
        say,
        BlockKind::MethodCall(MethodCall::quest("say", "\"Well met.\"")),
    )
    .unwrap();
    assert_eq!(doc.walk(), before);

    let saved = serde_json::to_string(&doc.to_blocks()).unwrap();
    let blocks: Vec<Block> = serde_json::from_str(&saved).unwrap();
    let reloaded = Document::from_blocks(blocks).unwrap();
    assert_eq!(reloaded, doc);
    assert!(generate_with(&reloaded, &plugins).contains("quest::say(\"Well met.\");"));
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

const SPAWN_ONLY: &str = "\
sub EVENT_SPAWN {
    quest::settimer(\"depart\", 60);
}

sub EVENT_SAY {
    while ($busy) {
        quest::say(\"Busy.\");
    }
}

";

#[test]
fn adding_a_timer_handler_clears_only_the_timer_warning() {
    let plugins = PluginRegistry::new();
    let mut doc = import_with(SPAWN_ONLY, &plugins).document;
    let report = validate(&doc, &plugins);
    let mut found = categories(&report);
    found.sort_by_key(|c| format!("{:?}", c));
    assert_eq!(
        found,
        vec![Category::LoopExit, Category::LoopGuard, Category::TimerWithoutHandler]
    );

    let say_handler = doc.roots()[1];
    let while_loop = doc.children_of(Parent::Block(say_handler)).unwrap()[0];
    let loop_issues = report.local(while_loop).unwrap().clone();

    let handler = Block::new(BlockKind::EventHandler {
        name: "EVENT_TIMER".into(),
    })
    .with_children([Block::new(BlockKind::If {
        condition: "$timer eq \"depart\"".into(),
    })
    .with_children([Block::new(BlockKind::MethodCall(MethodCall::quest(
        "stoptimer",
        "\"depart\"",
    )))])]);
    let uid = doc.append(Parent::Root, handler).unwrap();
    let next = revalidate(&doc, &plugins, &report, &[Edit::Attached(uid)]);

    let mut found = categories(&next);
    found.sort_by_key(|c| format!("{:?}", c));
    assert_eq!(found, vec![Category::LoopExit, Category::LoopGuard]);
    assert!(std::sync::Arc::ptr_eq(&loop_issues, next.local(while_loop).unwrap()));
    assert_eq!(next, validate(&doc, &plugins));
}

#[test]
fn incremental_matches_full_after_a_series_of_edits() {
    let plugins = PluginRegistry::new();
    let mut doc = import_with(SCRIPT, &plugins).document;
    let mut report = validate(&doc, &plugins);

    // Duplicate a handler, then break an if chain, then empty a condition.
    let say = doc
        .roots()
        .iter()
        .copied()
        .find(|&uid| doc.kind(uid).is_some_and(BlockKind::is_handler))
        .unwrap();
    let copy = doc.clone_subtree(say).unwrap();
    let copy_uid = doc.append(Parent::Root, copy).unwrap();
    report = revalidate(&doc, &plugins, &report, &[Edit::Attached(copy_uid)]);
    assert_eq!(report, validate(&doc, &plugins));
    assert!(categories(&report).contains(&Category::DuplicateHandler));

    let chain_head = doc.children_of(Parent::Block(copy_uid)).unwrap()[0];
    let detached = doc.detach(chain_head).unwrap();
    report = revalidate(
        &doc,
        &plugins,
        &report,
        &[Edit::Detached {
            parent: detached.parent,
            index: detached.index,
            removed: detached.block.uids(),
        }],
    );
    assert_eq!(report, validate(&doc, &plugins));
    assert!(categories(&report).contains(&Category::DanglingBranch));

    let elsif = doc.children_of(Parent::Block(copy_uid)).unwrap()[0];
    doc.replace_kind(elsif, BlockKind::Elsif { condition: String::new() })
        .unwrap();
    report = revalidate(&doc, &plugins, &report, &[Edit::Changed(elsif)]);
    assert_eq!(report, validate(&doc, &plugins));
    assert!(categories(&report).contains(&Category::EmptyCondition));
}

#[test]
fn issues_map_to_source_spans() {
    let text = "sub EVENT_SAY {\n}\n\nsub EVENT_SAY {\n}\n\n";
    let plugins = PluginRegistry::new();
    let imported = import_with(text, &plugins);
    let report = validate(&imported.document, &plugins);
    let issue = report.issues().next().unwrap();
    assert_eq!(issue.category(), Category::DuplicateHandler);

    let diagnostic = issue.to_diagnostic(0, &imported.spans);
    let ranges: Vec<_> = diagnostic.labels.iter().map(|l| l.range.clone()).collect();
    assert_eq!(ranges, vec![0..17, 19..36]);
}
