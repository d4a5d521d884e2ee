use std::time::{Duration, Instant};

use questscript::diagnostics::Category;
use questscript::importer;
use questscript::{Block, BlockKind, Document, Parent};
use workbench::{Services, SyntaxChecker, Workbench, WorkbenchConfig};

const TIMEOUT: Duration = Duration::from_secs(10);

const SCRIPT: &str = "\
sub EVENT_SPAWN {
    quest::settimer(\"depart\", 60);
}

";

fn open(text: &str) -> Workbench {
    open_with(text, Services::default())
}

fn open_with(text: &str, services: Services) -> Workbench {
    let document = importer::import(text).document;
    Workbench::open(document, services, &WorkbenchConfig::default()).unwrap()
}

fn categories(bench: &Workbench) -> Vec<Category> {
    bench
        .report()
        .expect("no report yet")
        .issues()
        .map(|i| i.category())
        .collect()
}

fn window() -> Duration {
    WorkbenchConfig::default().quiescence()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn opening_validates_the_whole_document() {
    let mut bench = open(SCRIPT);
    assert!(bench.report().is_none());
    assert!(bench.settle(Instant::now(), TIMEOUT));
    assert_eq!(categories(&bench), vec![Category::TimerWithoutHandler]);
    // Nothing was edited, so nothing was generated.
    assert!(bench.generated().is_none());
}

#[test]
fn edits_are_revalidated_on_the_next_tick() {
    let mut bench = open(SCRIPT);
    let start = Instant::now();
    assert!(bench.settle(start, TIMEOUT));

    bench
        .edit(start, |session| session.ensure_timer_handler("depart"))
        .unwrap();
    assert!(bench.settle(start, TIMEOUT));
    assert!(categories(&bench).is_empty());

    bench.edit(start, |session| session.undo()).unwrap();
    assert!(bench.settle(start, TIMEOUT));
    assert_eq!(categories(&bench), vec![Category::TimerWithoutHandler]);
}

#[test]
fn failed_edits_schedule_nothing() {
    let mut bench = open(SCRIPT);
    let start = Instant::now();
    assert!(bench.settle(start, TIMEOUT));
    let before = bench.report().cloned();

    let missing = questscript::Uid::fresh();
    assert!(bench.edit(start, |session| session.delete(missing)).is_err());
    assert!(bench.settle(start + window() * 2, TIMEOUT));
    assert_eq!(bench.report().cloned(), before);
    assert!(bench.generated().is_none());
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[test]
fn generation_waits_for_the_quiescence_window() {
    let mut bench = open(SCRIPT);
    let start = Instant::now();
    let handler = bench.document().roots()[0];
    bench
        .edit(start, |session| {
            session.append(
                Parent::Block(handler),
                Block::new(BlockKind::Comment {
                    text: "Leave after a minute.".into(),
                }),
            )
        })
        .unwrap();

    assert!(bench.settle(start + window() / 2, TIMEOUT));
    assert!(bench.generated().is_none());

    assert!(bench.settle(start + window(), TIMEOUT));
    let generated = bench.generated().expect("text was generated");
    assert_eq!(
        generated.text,
        "\
sub EVENT_SPAWN {
    quest::settimer(\"depart\", 60);
    # Leave after a minute.
}

"
    );
}

#[test]
fn later_edits_push_generation_back() {
    let mut bench = open(SCRIPT);
    let start = Instant::now();
    let handler = bench.document().roots()[0];
    let comment = |text: &str| {
        Block::new(BlockKind::Comment {
            text: text.to_string(),
        })
    };

    bench
        .edit(start, |s| s.append(Parent::Block(handler), comment("one")))
        .unwrap();
    let later = start + window() / 2;
    bench
        .edit(later, |s| s.append(Parent::Block(handler), comment("two")))
        .unwrap();

    assert!(bench.settle(start + window(), TIMEOUT));
    assert!(bench.generated().is_none());
    assert!(bench.settle(later + window(), TIMEOUT));
    assert!(bench.generated().unwrap().text.contains("# two"));
}

#[test]
fn explicit_regeneration_skips_the_window() {
    let mut bench = open(SCRIPT);
    let now = Instant::now();
    bench.regenerate(now);
    assert!(bench.settle(now, TIMEOUT));
    assert_eq!(bench.generated().unwrap().text, SCRIPT);
}

#[test]
fn generation_reflects_the_document_at_dispatch() {
    let mut bench = open(SCRIPT);
    let now = Instant::now();
    bench.regenerate(now);
    bench.tick(now);
    // Edited after dispatch; the pending result still shows the old tree.
    let handler = bench.document().roots()[0];
    bench.edit(now, |s| s.delete(handler)).unwrap();
    assert!(bench.settle(now, TIMEOUT));
    assert_eq!(bench.generated().unwrap().text, SCRIPT);
    assert!(bench.document().is_empty());

    assert!(bench.settle(now + window(), TIMEOUT));
    assert_eq!(bench.generated().unwrap().text, "");
}

// ---------------------------------------------------------------------------
// Syntax checking
// ---------------------------------------------------------------------------

#[test]
fn missing_checker_is_reported_as_unavailable() {
    let services = Services {
        checker: Some(SyntaxChecker::new("questscript-no-such-checker")),
        ..Services::default()
    };
    let mut bench = open_with(SCRIPT, services);
    let now = Instant::now();
    bench.regenerate(now);
    assert!(bench.settle(now, TIMEOUT));
    assert!(bench.generated().is_some());
    assert!(matches!(
        bench.check_result(),
        Some(Err(workbench::CheckError::Unavailable { .. }))
    ));
}

#[cfg(unix)]
#[test]
fn checker_runs_after_generation() {
    let services = Services {
        checker: Some(SyntaxChecker::new("true")),
        ..Services::default()
    };
    let mut bench = open_with(SCRIPT, services);
    let now = Instant::now();
    assert!(bench.settle(now, TIMEOUT));
    assert!(bench.check_result().is_none());

    bench.regenerate(now);
    assert!(bench.settle(now, TIMEOUT));
    let outcome = bench.check_result().unwrap().as_ref().unwrap();
    assert!(outcome.passed);
}

#[test]
fn empty_document_opens_clean() {
    let mut bench = Workbench::open(
        Document::new(),
        Services::default(),
        &WorkbenchConfig::default(),
    )
    .unwrap();
    assert!(bench.settle(Instant::now(), TIMEOUT));
    assert_eq!(categories(&bench), vec![Category::MissingHandler]);
}
