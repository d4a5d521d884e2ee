mod settings;
mod test_runner;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use questscript::importer::RawReason;
use questscript::{
    Block, Diagnostics, Document, Generator, Imported, Importer, PluginRegistry, ValidationIssue,
};
use workbench::{CheckError, SyntaxChecker};

use settings::Settings;

#[derive(Parser)]
#[command(name = "questscript", version, about = "Quest script block tools")]
struct Cli {
    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Settings file (defaults to ./questscript.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log library activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a script and print its block tree as JSON
    Import(ImportArgs),

    /// Generate a script from a block tree JSON file
    Generate(GenerateArgs),

    /// Import a script and report structural issues
    Lint(LintArgs),

    /// Import, regenerate, and run the external syntax checker
    Check(CheckArgs),

    /// Check that a script survives import and regeneration unchanged
    Roundtrip(RoundtripArgs),

    /// Print the script a block template expands to
    Stamp(StampArgs),

    /// Run .qtest fixture files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct ImportArgs {
    /// Script to import
    file: PathBuf,

    /// Write the tree here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
struct GenerateArgs {
    /// Block tree JSON, as written by `import`
    file: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(clap::Args)]
struct LintArgs {
    /// Script to lint
    file: PathBuf,

    #[arg(long, value_enum, default_value = "text")]
    format: Format,

    /// Also list regions kept as raw text
    #[arg(long)]
    raw: bool,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Script to check
    file: PathBuf,

    /// Checker to run as `<tool> -c <file>` (overrides settings)
    #[arg(long)]
    tool: Option<String>,
}

#[derive(clap::Args)]
struct RoundtripArgs {
    /// Script to round-trip
    file: PathBuf,
}

#[derive(clap::Args)]
struct StampArgs {
    /// Template id from the configured templates file
    id: String,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .qtest file or directory containing them
    path: PathBuf,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            process::exit(1);
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "questscript=debug,workbench=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    let color_choice = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    let config = cli.config.as_deref();
    match cli.command {
        Command::Test(args) => {
            if args.list_categories {
                test_runner::list_categories(&args.path);
                return Ok(0);
            }
            Ok(test_runner::run_tests(&args.path, cli.no_color, &args.category))
        }
        Command::Import(args) => {
            let (settings, plugins) = load_settings(config)?;
            do_import(args, &settings, &plugins, color_choice)
        }
        Command::Generate(args) => {
            let (_, plugins) = load_settings(config)?;
            do_generate(args, &plugins)
        }
        Command::Lint(args) => {
            let (settings, plugins) = load_settings(config)?;
            do_lint(args, &settings, &plugins, color_choice)
        }
        Command::Check(args) => {
            let (settings, plugins) = load_settings(config)?;
            do_check(args, &settings, &plugins)
        }
        Command::Roundtrip(args) => {
            let (settings, plugins) = load_settings(config)?;
            do_roundtrip(args, &settings, &plugins)
        }
        Command::Stamp(args) => {
            let (settings, plugins) = load_settings(config)?;
            do_stamp(args, &settings, &plugins)
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<(Settings, PluginRegistry)> {
    let settings = Settings::load(path)?;
    let plugins = settings.plugins()?;
    Ok((settings, plugins))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn do_import(
    args: ImportArgs,
    settings: &Settings,
    plugins: &PluginRegistry,
    color_choice: ColorChoice,
) -> Result<i32> {
    let source = read_source(&args.file)?;
    let imported = Importer::new(&settings.import, plugins).import(&source);

    let json = serde_json::to_string_pretty(&imported.document.to_blocks())?;
    match &args.output {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("cannot write '{}'", path.display()))?,
        None => println!("{}", json),
    }

    let mut reporter = Reporter::new(color_choice);
    let file_id = reporter.add(&args.file, source);
    reporter.raw_regions(file_id, &imported);
    eprintln!(
        "imported {} blocks; {} of {} lines kept as raw text",
        imported.document.len(),
        imported.report.raw_lines,
        imported.report.total_lines
    );
    Ok(0)
}

fn do_generate(args: GenerateArgs, plugins: &PluginRegistry) -> Result<i32> {
    let json = read_source(&args.file)?;
    let blocks: Vec<Block> = serde_json::from_str(&json)
        .with_context(|| format!("'{}' is not a block tree", args.file.display()))?;
    let document = Document::from_blocks(blocks)?;
    let generated = Generator::new(plugins).generate(&document);
    print!("{}", generated.text);
    for issue in &generated.issues {
        eprintln!("{}", issue);
    }
    Ok(if generated.issues.is_empty() { 0 } else { 1 })
}

fn do_lint(
    args: LintArgs,
    settings: &Settings,
    plugins: &PluginRegistry,
    color_choice: ColorChoice,
) -> Result<i32> {
    let source = read_source(&args.file)?;
    let imported = Importer::new(&settings.import, plugins).import(&source);
    let report = Diagnostics::new(&settings.diagnostics, plugins).validate(&imported.document);
    let issues = report.in_document_order(&imported.document);

    match args.format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&issues)?);
        }
        Format::Text => {
            let mut reporter = Reporter::new(color_choice);
            let file_id = reporter.add(&args.file, source);
            if args.raw {
                reporter.raw_regions(file_id, &imported);
            }
            for issue in &issues {
                reporter.issue(file_id, issue, &imported);
            }
            if issues.is_empty() {
                eprintln!("ok: {} has no issues", args.file.display());
            }
        }
    }
    Ok(if report.has_errors() { 1 } else { 0 })
}

fn do_check(args: CheckArgs, settings: &Settings, plugins: &PluginRegistry) -> Result<i32> {
    let source = read_source(&args.file)?;
    let imported = Importer::new(&settings.import, plugins).import(&source);
    let generated = Generator::new(plugins).generate(&imported.document);

    let tool = args
        .tool
        .or_else(|| settings.workbench.checker.clone())
        .unwrap_or_else(|| "perl".to_string());
    match SyntaxChecker::new(tool).check(&generated.text) {
        Ok(outcome) => {
            for line in &outcome.lines {
                println!("{}", line);
            }
            if outcome.passed {
                eprintln!("ok: {} passed the syntax check", args.file.display());
                Ok(0)
            } else {
                eprintln!("failed: {} did not pass the syntax check", args.file.display());
                Ok(1)
            }
        }
        Err(err @ CheckError::Unavailable { .. }) => {
            eprintln!("error: {}", err);
            Ok(2)
        }
        Err(err) => Err(err.into()),
    }
}

fn do_roundtrip(args: RoundtripArgs, settings: &Settings, plugins: &PluginRegistry) -> Result<i32> {
    let source = read_source(&args.file)?;
    let importer = Importer::new(&settings.import, plugins);
    let generator = Generator::new(plugins);

    let first = generator.generate(&importer.import(&source).document).text;
    let second = generator.generate(&importer.import(&first).document).text;
    if first != second {
        report_difference("regenerated text is not stable", &first, &second);
        return Ok(1);
    }
    if first != source {
        report_difference("source is not in canonical layout", &source, &first);
        return Ok(1);
    }
    eprintln!("ok: {} round-trips unchanged", args.file.display());
    Ok(0)
}

fn do_stamp(args: StampArgs, settings: &Settings, plugins: &PluginRegistry) -> Result<i32> {
    let templates = settings.templates()?;
    let Some(block) = templates.stamp(&args.id) else {
        bail!("no block template with id `{}`", args.id);
    };
    let document = Document::from_blocks(vec![block])?;
    print!("{}", Generator::new(plugins).generate(&document).text);
    Ok(0)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read '{}'", path.display()))
}

fn report_difference(what: &str, expected: &str, actual: &str) {
    let line = expected
        .lines()
        .zip(actual.lines())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| expected.lines().count().min(actual.lines().count()));
    eprintln!("failed: {} (first difference on line {})", what, line + 1);
    eprintln!("  expected: {}", expected.lines().nth(line).unwrap_or("<end of text>"));
    eprintln!("  actual:   {}", actual.lines().nth(line).unwrap_or("<end of text>"));
}

struct Reporter {
    writer: StandardStream,
    config: term::Config,
    files: SimpleFiles<String, String>,
}

impl Reporter {
    fn new(color_choice: ColorChoice) -> Self {
        Reporter {
            writer: StandardStream::stderr(color_choice),
            config: term::Config::default(),
            files: SimpleFiles::new(),
        }
    }

    fn add(&mut self, path: &Path, source: String) -> usize {
        self.files.add(path.display().to_string(), source)
    }

    fn emit(&self, diagnostic: &Diagnostic<usize>) {
        let _ = term::emit_to_write_style(
            &mut self.writer.lock(),
            &self.config,
            &self.files,
            diagnostic,
        );
    }

    fn issue(&self, file_id: usize, issue: &ValidationIssue, imported: &Imported) {
        let diagnostic = issue
            .to_diagnostic(file_id, &imported.spans)
            .with_code(format!("{:?}", issue.category()));
        self.emit(&diagnostic);
    }

    fn raw_regions(&self, file_id: usize, imported: &Imported) {
        for region in &imported.report.raw_blocks {
            if region.reason == RawReason::Layout {
                continue;
            }
            let mut diagnostic = Diagnostic::note()
                .with_message(format!("kept as raw text: {}", region.reason));
            if let Some(span) = imported.spans.get(&region.uid) {
                diagnostic = diagnostic.with_labels(vec![Label::primary(file_id, span.clone())]);
            }
            self.emit(&diagnostic);
        }
    }
}
