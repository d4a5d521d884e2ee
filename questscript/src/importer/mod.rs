mod line;
pub(crate) mod scan;

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use tracing::{debug, warn};

use crate::block::{Block, BlockKind, PluginInstance, Uid};
use crate::config::ImportConfig;
use crate::document::Document;
use crate::plugin::PluginRegistry;

use self::line::{Opener, parse_opener, parse_statement};
use self::scan::{LexState, LineScan, scan_line};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Why a region of source was kept as raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawReason {
    /// Blank lines with nothing else around them.
    Layout,
    /// Lines that match no known form.
    Unrecognized,
    /// An opening brace whose close was never found.
    Unmatched,
    /// A close was found but not laid out the way a block closes.
    Ambiguous,
    /// A `sub` that is not an event handler.
    ForeignSub,
    /// A `sub` declared inside another construct.
    NestedSub,
}

impl fmt::Display for RawReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RawReason::Layout => "blank lines",
            RawReason::Unrecognized => "unrecognized statement",
            RawReason::Unmatched => "unmatched opening brace",
            RawReason::Ambiguous => "closing brace in an unexpected position",
            RawReason::ForeignSub => "subroutine that is not an event handler",
            RawReason::NestedSub => "subroutine nested inside a block",
        })
    }
}

/// One raw passthrough block and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProvenance {
    pub uid: Uid,
    /// Zero-based source lines, end exclusive.
    pub lines: Range<usize>,
    pub reason: RawReason,
}

/// Informational summary of how much of the source stayed raw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub raw_blocks: Vec<RawProvenance>,
    /// Source lines inside raw blocks, not counting pure layout.
    pub raw_lines: usize,
    pub total_lines: usize,
}

/// Result of an import: a fresh document plus where each block came from.
#[derive(Debug, Clone)]
pub struct Imported {
    pub document: Document,
    /// Byte range of each block in the imported text.
    pub spans: HashMap<Uid, Range<usize>>,
    pub report: ImportReport,
}

/// Source text → block tree.
///
/// Conservative: anything not recognized with confidence is kept verbatim
/// as raw passthrough, so importing never fails and never loses text.
pub struct Importer<'a> {
    config: &'a ImportConfig,
    plugins: &'a PluginRegistry,
}

impl<'a> Importer<'a> {
    pub fn new(config: &'a ImportConfig, plugins: &'a PluginRegistry) -> Self {
        Importer { config, plugins }
    }

    pub fn import(&self, text: &str) -> Imported {
        let mut pass = Pass::new(self, text);
        let blocks = pass.body(0, pass.lines.len(), true);

        let mut raw_blocks: Vec<RawProvenance> = pass
            .raw
            .into_iter()
            .map(|(uid, (lines, reason))| RawProvenance { uid, lines, reason })
            .collect();
        raw_blocks.sort_by_key(|p| p.lines.start);
        let raw_lines = raw_blocks
            .iter()
            .filter(|p| p.reason != RawReason::Layout)
            .map(|p| p.lines.len())
            .sum();
        let report = ImportReport {
            raw_blocks,
            raw_lines,
            total_lines: pass.lines.len(),
        };

        let document = match Document::from_blocks(blocks) {
            Ok(document) => document,
            Err(err) => {
                warn!(%err, "imported tree rejected, keeping the whole text raw");
                let block = Block::new(BlockKind::RawPassthrough {
                    text: text.strip_suffix('\n').unwrap_or(text).to_string(),
                });
                Document::from_blocks(vec![block]).unwrap_or_default()
            }
        };
        debug!(
            blocks = document.len(),
            raw_lines = report.raw_lines,
            total_lines = report.total_lines,
            "import finished"
        );
        Imported {
            document,
            spans: pass.spans,
            report,
        }
    }
}

/// Import with default settings and no plugin definitions.
pub fn import(text: &str) -> Imported {
    let config = ImportConfig::default();
    let plugins = PluginRegistry::new();
    Importer::new(&config, &plugins).import(text)
}

// ---------------------------------------------------------------------------
// Import pass
// ---------------------------------------------------------------------------

struct SourceLine<'t> {
    /// The line as written, any `\r` included.
    raw: &'t str,
    /// The line without a trailing `\r`.
    text: &'t str,
    start: usize,
    state_in: LexState,
    scan: LineScan,
}

impl SourceLine<'_> {
    fn trimmed(&self) -> &str {
        self.text.trim()
    }

    /// Opens exactly one brace, as its last character, with everything else
    /// on the line balanced.
    fn is_opener(&self) -> bool {
        let last_open = self.scan.braces.last().copied();
        let expected = self.text.trim_end().len().checked_sub(1);
        self.state_in == LexState::Code
            && self.scan.end == LexState::Code
            && self.scan.comment_at.is_none()
            && self.scan.parens == 0
            && self.scan.paren_floor == 0
            && self.scan.brackets == 0
            && self.scan.brace_delta() == 1
            && self.scan.brace_floor() == 0
            && matches!((last_open, expected), (Some((pos, 1)), Some(end)) if pos == end)
    }

    /// A one-line statement: balanced, uncommented and without trailing
    /// whitespace.
    fn is_statement(&self) -> bool {
        self.state_in == LexState::Code
            && self.scan.is_balanced()
            && self.scan.comment_at.is_none()
            && self.text == self.text.trim_end()
            && self.text.ends_with(';')
    }

    fn is_comment(&self) -> bool {
        let trimmed = self.trimmed();
        self.state_in == LexState::Code && trimmed.starts_with('#') && !trimmed.starts_with("#!")
    }
}

/// Blocks being collected for one body.
#[derive(Default)]
struct Body {
    blocks: Vec<Block>,
    /// The last block is raw text that following raw lines may join.
    open_raw: bool,
}

impl Body {
    fn push(&mut self, block: Block) {
        self.blocks.push(block);
        self.open_raw = false;
    }
}

/// One step of an if/elsif/else chain or a single construct.
struct Segment {
    kind: BlockKind,
    open: usize,
    close: usize,
}

struct Pass<'a, 't> {
    importer: &'a Importer<'a>,
    lines: Vec<SourceLine<'t>>,
    template_heights: Vec<usize>,
    spans: HashMap<Uid, Range<usize>>,
    raw: HashMap<Uid, (Range<usize>, RawReason)>,
}

impl<'a, 't> Pass<'a, 't> {
    fn new(importer: &'a Importer<'a>, text: &'t str) -> Self {
        let mut lines = Vec::new();
        if !text.is_empty() {
            let body = text.strip_suffix('\n').unwrap_or(text);
            let mut start = 0;
            let mut state = LexState::Code;
            for raw in body.split('\n') {
                let line = raw.strip_suffix('\r').unwrap_or(raw);
                let scan = scan_line(line, state);
                let state_in = state;
                state = scan.end;
                lines.push(SourceLine {
                    raw,
                    text: line,
                    start,
                    state_in,
                    scan,
                });
                start += raw.len() + 1;
            }
        }
        Pass {
            importer,
            lines,
            template_heights: importer.plugins.template_heights(),
            spans: HashMap::new(),
            raw: HashMap::new(),
        }
    }

    fn span(&self, first: usize, last: usize) -> Range<usize> {
        let end = &self.lines[last];
        self.lines[first].start..end.start + end.raw.len()
    }

    fn record(&mut self, block: &Block, first: usize, last: usize) {
        let span = self.span(first, last);
        self.spans.insert(block.uid(), span);
    }

    /// Parse lines `lo..hi` into sibling blocks.
    fn body(&mut self, lo: usize, hi: usize, top: bool) -> Vec<Block> {
        let mut out = Body::default();
        let mut i = lo;
        let mut after_handler = false;

        while i < hi {
            let line = &self.lines[i];
            if line.trimmed().is_empty() && line.state_in == LexState::Code {
                // One blank line after a handler is the generator's own layout.
                if !(top && after_handler) {
                    self.raw_lines(&mut out, i, i, RawReason::Layout, true);
                }
                after_handler = false;
                i += 1;
                continue;
            }
            after_handler = false;

            if let Some(next) = self.plugin(&mut out, i, hi) {
                i = next;
                continue;
            }
            let line = &self.lines[i];
            if line.is_comment() {
                i = self.comment_run(&mut out, i, hi);
                continue;
            }
            if line.is_opener() {
                match parse_opener(line.trimmed()) {
                    Some(Opener::Sub(name)) => {
                        if !top {
                            i = self.ambiguous(&mut out, i, hi, RawReason::NestedSub);
                        } else if name.starts_with(&self.importer.config.handler_prefix) {
                            let (next, typed) = self.handler(&mut out, i, hi, name);
                            after_handler = typed;
                            i = next;
                        } else {
                            i = self.ambiguous(&mut out, i, hi, RawReason::ForeignSub);
                        }
                        continue;
                    }
                    Some(Opener::Block(kind)) if !kind.continues_chain() => {
                        i = self.construct(&mut out, i, hi, kind);
                        continue;
                    }
                    _ => {}
                }
            }
            if line.is_statement() {
                if let Some(kind) = parse_statement(line.trimmed(), self.importer.config) {
                    let block = Block::new(kind);
                    self.record(&block, i, i);
                    out.push(block);
                    i += 1;
                    continue;
                }
            }
            i = self.unrecognized(&mut out, i, hi);
        }
        out.blocks
    }

    /// `sub EVENT_X {` ... `}`. Returns the next line and whether a typed
    /// handler was produced.
    fn handler(&mut self, out: &mut Body, i: usize, hi: usize, name: String) -> (usize, bool) {
        let Some((close, pos)) = self.find_close(i, hi) else {
            return (self.ambiguous(out, i, hi, RawReason::Unmatched), false);
        };
        if close == i || self.lines[close].trimmed() != "}" || !self.close_leads(close, pos) {
            return (self.ambiguous(out, i, hi, RawReason::Ambiguous), false);
        }
        let children = self.body(i + 1, close, false);
        let block = Block::new(BlockKind::EventHandler { name }).with_children(children);
        self.record(&block, i, close);
        out.push(block);
        (close + 1, true)
    }

    /// A flow-control construct, including any elsif/else continuation.
    fn construct(&mut self, out: &mut Body, i: usize, hi: usize, kind: BlockKind) -> usize {
        let mut segments: Vec<Segment> = Vec::new();
        let mut kind = kind;
        let mut open = i;
        let mut open_at = self.last_brace(i);

        loop {
            let Some((close, pos)) = self.find_close_from(open, open_at, hi) else {
                return self.ambiguous(out, i, hi, RawReason::Unmatched);
            };
            if close == open || !self.close_leads(close, pos) {
                return self.ambiguous(out, i, hi, RawReason::Ambiguous);
            }
            let chains = kind.opens_chain();
            segments.push(Segment { kind, open, close });

            let close_line = &self.lines[close];
            let rest = close_line.text[pos + 1..].trim();
            if !rest.is_empty() {
                // `} elsif (c) {` or `} else {` on the closing line.
                let continuation = match parse_opener(rest) {
                    Some(Opener::Block(next)) if chains && next.continues_chain() => next,
                    _ => return self.ambiguous(out, i, hi, RawReason::Ambiguous),
                };
                if !self.continues_after(close, pos) {
                    return self.ambiguous(out, i, hi, RawReason::Ambiguous);
                }
                kind = continuation;
                open = close;
                open_at = self.last_brace(close);
                continue;
            }

            // `elsif (c) {` or `else {` alone on the following line.
            if chains && close + 1 < hi && self.lines[close + 1].is_opener() {
                if let Some(Opener::Block(next)) = parse_opener(self.lines[close + 1].trimmed()) {
                    if next.continues_chain() {
                        kind = next;
                        open = close + 1;
                        open_at = self.last_brace(open);
                        continue;
                    }
                }
            }
            break;
        }

        let next = segments.last().map_or(i + 1, |s| s.close + 1);
        for segment in segments {
            let children = self.body(segment.open + 1, segment.close, false);
            let block = Block::new(segment.kind).with_children(children);
            self.record(&block, segment.open, segment.close);
            out.push(block);
        }
        next
    }

    fn last_brace(&self, line: usize) -> usize {
        self.lines[line]
            .scan
            .braces
            .last()
            .map_or(0, |&(pos, _)| pos)
    }

    fn find_close(&self, open: usize, hi: usize) -> Option<(usize, usize)> {
        self.find_close_from(open, self.last_brace(open), hi)
    }

    /// The `}` matching the `{` at byte `open_at` of line `open`, searching
    /// no further than line `hi`.
    fn find_close_from(&self, open: usize, open_at: usize, hi: usize) -> Option<(usize, usize)> {
        let mut depth = 1;
        for (offset, line) in self.lines[open..hi].iter().enumerate() {
            let index = open + offset;
            for &(pos, delta) in &line.scan.braces {
                if index == open && pos <= open_at {
                    continue;
                }
                depth += delta;
                if depth == 0 {
                    return Some((index, pos));
                }
            }
        }
        None
    }

    /// The closing brace is the first thing on its line.
    fn close_leads(&self, close: usize, pos: usize) -> bool {
        let line = &self.lines[close];
        line.state_in == LexState::Code && line.text[..pos].trim().is_empty()
    }

    /// After the `}` at `pos`, the line opens exactly one new brace as its
    /// last character and is otherwise clean.
    fn continues_after(&self, close: usize, pos: usize) -> bool {
        let line = &self.lines[close];
        let after: Vec<(usize, i32)> = line
            .scan
            .braces
            .iter()
            .copied()
            .filter(|&(p, _)| p > pos)
            .collect();
        let expected = line.text.trim_end().len().saturating_sub(1);
        line.scan.end == LexState::Code
            && line.scan.comment_at.is_none()
            && line.scan.parens == 0
            && line.scan.paren_floor == 0
            && line.scan.brackets == 0
            && after == [(expected, 1)]
    }

    /// Last line of the smallest region starting at `i` that leaves every
    /// delimiter balanced and no string open, or `hi - 1` if there is none.
    fn balanced_end(&self, i: usize, hi: usize) -> usize {
        let (mut braces, mut parens, mut brackets) = (0, 0, 0);
        for j in i..hi {
            let scan = &self.lines[j].scan;
            braces += scan.brace_delta();
            parens += scan.parens;
            brackets += scan.brackets;
            if braces <= 0 && parens <= 0 && brackets <= 0 && scan.end == LexState::Code {
                return j;
            }
        }
        hi.saturating_sub(1).max(i)
    }

    /// A region that opened something it could not close cleanly. Kept as
    /// its own raw block, never merged with neighbours.
    fn ambiguous(&mut self, out: &mut Body, i: usize, hi: usize, reason: RawReason) -> usize {
        let end = self.balanced_end(i, hi);
        debug!(line = i + 1, end = end + 1, %reason, "keeping region as raw passthrough");
        self.raw_lines(out, i, end, reason, false);
        end + 1
    }

    fn unrecognized(&mut self, out: &mut Body, i: usize, hi: usize) -> usize {
        let end = self.balanced_end(i, hi);
        debug!(line = i + 1, end = end + 1, "unrecognized lines kept raw");
        self.raw_lines(out, i, end, RawReason::Unrecognized, true);
        end + 1
    }

    /// Add lines `first..=last` as raw text, joining the previous raw block
    /// when both allow it.
    fn raw_lines(&mut self, out: &mut Body, first: usize, last: usize, reason: RawReason, mergeable: bool) {
        let text = self.lines[first..=last]
            .iter()
            .map(|l| l.raw)
            .collect::<Vec<_>>()
            .join("\n");

        if mergeable && out.open_raw {
            if let Some(block) = out.blocks.last_mut() {
                if let BlockKind::RawPassthrough { text: existing } = &mut block.kind {
                    existing.push('\n');
                    existing.push_str(&text);
                    let uid = block.uid();
                    let new_end = self.lines[last].start + self.lines[last].raw.len();
                    if let Some(span) = self.spans.get_mut(&uid) {
                        span.end = new_end;
                    }
                    if let Some((lines, kept)) = self.raw.get_mut(&uid) {
                        lines.end = last + 1;
                        if *kept == RawReason::Layout {
                            *kept = reason;
                        }
                    }
                    return;
                }
            }
        }

        let block = Block::new(BlockKind::RawPassthrough { text });
        self.record(&block, first, last);
        self.raw.insert(block.uid(), (first..last + 1, reason));
        out.blocks.push(block);
        out.open_raw = mergeable;
    }

    fn comment_run(&mut self, out: &mut Body, i: usize, hi: usize) -> usize {
        let mut end = i;
        let mut texts = Vec::new();
        while end < hi && self.lines[end].is_comment() {
            let body = self.lines[end].trimmed().trim_start_matches('#');
            let body = body.strip_prefix(' ').unwrap_or(body);
            texts.push(body.trim_end().to_string());
            end += 1;
        }
        let block = Block::new(BlockKind::Comment {
            text: texts.join("\n"),
        });
        self.record(&block, i, end - 1);
        out.push(block);
        end
    }

    /// Try every plugin template height at line `i`. Lines after the first
    /// must repeat the first line's indentation.
    fn plugin(&mut self, out: &mut Body, i: usize, hi: usize) -> Option<usize> {
        if self.importer.plugins.is_empty() || self.lines[i].state_in != LexState::Code {
            return None;
        }
        let first = self.lines[i].text;
        let indent = &first[..first.len() - first.trim_start().len()];

        let found = self.template_heights.iter().find_map(|&height| {
            let last = i + height - 1;
            if last >= hi || !self.region_balanced(i, last) {
                return None;
            }
            let mut text = String::new();
            for (k, line) in self.lines[i..=last].iter().enumerate() {
                if k > 0 {
                    text.push('\n');
                }
                if line.text.trim().is_empty() {
                    continue;
                }
                text.push_str(line.text.strip_prefix(indent)?);
            }
            let instance: PluginInstance = self.importer.plugins.recognize(&text)?;
            Some((instance, last))
        });

        let (instance, last) = found?;
        let block = Block::new(BlockKind::PluginInstance(instance));
        self.record(&block, i, last);
        out.push(block);
        Some(last + 1)
    }

    fn region_balanced(&self, first: usize, last: usize) -> bool {
        let (mut braces, mut parens, mut brackets) = (0, 0, 0);
        for line in &self.lines[first..=last] {
            if braces + line.scan.brace_floor() < 0 || line.scan.comment_at.is_some() {
                return false;
            }
            braces += line.scan.brace_delta();
            parens += line.scan.parens;
            brackets += line.scan.brackets;
        }
        braces == 0 && parens == 0 && brackets == 0 && self.lines[last].scan.end == LexState::Code
    }
}
