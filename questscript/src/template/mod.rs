//! `{name}` placeholder templates.
//!
//! A template is parsed once into literal and placeholder segments. The same
//! parse drives rendering (fill the placeholders) and matching (recover the
//! placeholder values from rendered text).

use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// A well-formed `{identifier}`. Whether it is substituted depends on
    /// the set of known names at render time.
    Placeholder(String),
}

/// What a lookup knows about a placeholder name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'v> {
    Value(&'v str),
    /// Known name with nothing to substitute: the render fails.
    Missing,
    /// Not a parameter at all: the placeholder is kept verbatim.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match placeholder_name(after) {
                Some(name) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                    rest = &after[name.len() + 1..];
                }
                None => {
                    literal.push('{');
                    rest = after;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Template { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) if seen.insert(name.as_str()) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Render with `lookup` deciding each placeholder. Fails with the first
    /// name that resolves to [`Lookup::Missing`]; nothing partial is returned.
    pub fn render_with<'v, F>(&self, mut lookup: F) -> Result<String, String>
    where
        F: FnMut(&str) -> Lookup<'v>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name) {
                    Lookup::Value(value) => out.push_str(value),
                    Lookup::Unknown => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                    Lookup::Missing => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }

    /// Recover placeholder values from `text`.
    ///
    /// Only placeholders named in `known` capture; any other placeholder
    /// must appear literally. A capture never spans a line break, and a
    /// name used twice must capture the same text both times.
    pub fn match_text(&self, text: &str, known: &HashSet<&str>) -> Option<BTreeMap<String, String>> {
        let pieces: Vec<Piece<'_>> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(t) => Piece::Literal(t.as_str()),
                Segment::Placeholder(name) if known.contains(name.as_str()) => {
                    Piece::Capture(name.as_str())
                }
                Segment::Placeholder(name) => Piece::Braced(name.as_str()),
            })
            .collect();
        let captures = match_pieces(&pieces, text)?;
        Some(
            captures
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Render against a plain name → value map: supplied names are substituted,
/// every other `{...}` is kept as written.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> String {
    let rendered = Template::parse(template).render_with(|name| match values.get(name) {
        Some(value) => Lookup::Value(value.as_str()),
        None => Lookup::Unknown,
    });
    // Unknown never fails a render.
    rendered.unwrap_or_default()
}

fn placeholder_name(after_brace: &str) -> Option<&str> {
    let end = after_brace.find('}')?;
    let name = &after_brace[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Some(name)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

enum Piece<'t> {
    Literal(&'t str),
    Capture(&'t str),
    /// Placeholder with no parameter behind it: matches `{name}` literally.
    Braced(&'t str),
}

struct Matcher<'p, 't, 'x> {
    pieces: &'p [Piece<'t>],
    text: &'x str,
    captures: BTreeMap<&'t str, &'x str>,
    /// `(piece, offset)` states known not to match. Only kept when no name
    /// captures twice, so a state's outcome never depends on earlier captures.
    failed: Option<HashSet<(usize, usize)>>,
}

fn match_pieces<'t, 'x>(pieces: &[Piece<'t>], text: &'x str) -> Option<BTreeMap<&'t str, &'x str>> {
    let mut names = HashSet::new();
    let unique = pieces
        .iter()
        .all(|p| !matches!(p, Piece::Capture(name) if !names.insert(*name)));
    let mut matcher = Matcher {
        pieces,
        text,
        captures: BTreeMap::new(),
        failed: unique.then(HashSet::new),
    };
    matcher.run(0, 0).then_some(matcher.captures)
}

impl<'t, 'x> Matcher<'_, 't, 'x> {
    fn run(&mut self, piece: usize, at: usize) -> bool {
        if self.failed.as_ref().is_some_and(|f| f.contains(&(piece, at))) {
            return false;
        }
        let matched = self.step(piece, at);
        if !matched {
            if let Some(failed) = &mut self.failed {
                failed.insert((piece, at));
            }
        }
        matched
    }

    fn step(&mut self, piece: usize, at: usize) -> bool {
        let (pieces, text) = (self.pieces, self.text);
        let rest = &text[at..];
        let Some(first) = pieces.get(piece) else {
            return rest.is_empty();
        };
        match first {
            Piece::Literal(lit) => rest.starts_with(*lit) && self.run(piece + 1, at + lit.len()),
            Piece::Braced(name) => {
                let Some(remaining) = rest
                    .strip_prefix('{')
                    .and_then(|t| t.strip_prefix(*name))
                    .and_then(|t| t.strip_prefix('}'))
                else {
                    return false;
                };
                self.run(piece + 1, text.len() - remaining.len())
            }
            Piece::Capture(name) => {
                if let Some(previous) = self.captures.get(name).copied() {
                    return rest.starts_with(previous) && self.run(piece + 1, at + previous.len());
                }
                for end in self.capture_ends(piece, rest) {
                    self.captures.insert(*name, &rest[..end]);
                    if self.run(piece + 1, at + end) {
                        return true;
                    }
                    self.captures.remove(*name);
                }
                false
            }
        }
    }

    /// Candidate lengths for the capture at `piece`, shortest first. A
    /// capture stays on its line, and when text follows it the capture can
    /// only end where that text starts.
    fn capture_ends(&self, piece: usize, rest: &str) -> Vec<usize> {
        let line_end = rest.find('\n').unwrap_or(rest.len());
        let needle = match self.pieces.get(piece + 1) {
            None => {
                return if line_end == rest.len() { vec![line_end] } else { Vec::new() };
            }
            Some(Piece::Literal(lit)) if !lit.is_empty() => lit.to_string(),
            Some(Piece::Braced(name)) => format!("{{{}}}", name),
            Some(_) => {
                let mut ends: Vec<usize> = rest[..line_end].char_indices().map(|(i, _)| i).collect();
                ends.push(line_end);
                return ends;
            }
        };
        occurrences(rest, &needle, line_end)
    }
}

/// Start offsets of `needle` in `hay` up to `limit`, overlaps included.
fn occurrences(hay: &str, needle: &str, limit: usize) -> Vec<usize> {
    let mut found = Vec::new();
    let mut from = 0;
    while from <= limit {
        let Some(i) = hay[from..].find(needle) else {
            break;
        };
        let at = from + i;
        if at > limit {
            break;
        }
        found.push(at);
        from = at + hay[at..].chars().next().map_or(1, char::len_utf8);
    }
    found
}
