//! Delimiter tracking that knows enough about the script language to skip
//! string literals, comments and match-operator patterns.

/// Lexical state carried from one line to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum LexState {
    #[default]
    Code,
    /// Inside a string or pattern closed by this delimiter.
    Quoted(char),
}

/// What one line contributes to delimiter balance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct LineScan {
    /// Byte offsets of `{` (+1) and `}` (-1) in code position.
    pub braces: Vec<(usize, i32)>,
    pub parens: i32,
    /// Lowest running paren depth seen on the line.
    pub paren_floor: i32,
    pub brackets: i32,
    /// Byte offset where a `#` comment starts.
    pub comment_at: Option<usize>,
    pub end: LexState,
}

impl LineScan {
    pub fn brace_delta(&self) -> i32 {
        self.braces.iter().map(|&(_, d)| d).sum()
    }

    /// Lowest running brace depth on the line, relative to its start.
    pub fn brace_floor(&self) -> i32 {
        let mut depth = 0;
        let mut floor = 0;
        for &(_, d) in &self.braces {
            depth += d;
            floor = floor.min(depth);
        }
        floor
    }

    /// Balanced on its own: nothing opened or closed across the line
    /// boundary and no string left open.
    pub fn is_balanced(&self) -> bool {
        self.brace_delta() == 0
            && self.brace_floor() == 0
            && self.parens == 0
            && self.paren_floor == 0
            && self.brackets == 0
            && self.end == LexState::Code
    }
}

pub(crate) fn scan_line(line: &str, start: LexState) -> LineScan {
    let mut scan = LineScan::default();
    let bytes: Vec<(usize, char)> = line.char_indices().collect();
    let mut state = start;
    let mut i = 0;
    // Whether a `/` here would start a pattern rather than divide.
    let mut expect_pattern = false;

    while i < bytes.len() {
        let (pos, c) = bytes[i];
        if let LexState::Quoted(close) = state {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == close {
                state = LexState::Code;
            }
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' | '`' => {
                state = LexState::Quoted(c);
                expect_pattern = false;
            }
            '#' => {
                let sigil_before = i > 0 && bytes[i - 1].1 == '$';
                if !sigil_before {
                    scan.comment_at = Some(pos);
                    break;
                }
            }
            '=' | '!' if next_char(&bytes, i) == Some('~') => {
                i += 2;
                i = skip_whitespace(&bytes, i);
                if bytes.get(i).map(|&(_, ch)| ch) == Some('m')
                    && next_char(&bytes, i) == Some('/')
                {
                    i += 1;
                }
                expect_pattern = true;
                continue;
            }
            '/' if expect_pattern => {
                state = LexState::Quoted('/');
                expect_pattern = false;
            }
            '{' => scan.braces.push((pos, 1)),
            '}' => scan.braces.push((pos, -1)),
            '(' => scan.parens += 1,
            ')' => {
                scan.parens -= 1;
                scan.paren_floor = scan.paren_floor.min(scan.parens);
            }
            '[' => scan.brackets += 1,
            ']' => scan.brackets -= 1,
            _ => {}
        }
        if !c.is_whitespace() && c != '/' {
            expect_pattern = false;
        }
        i += 1;
    }
    scan.end = state;
    scan
}

fn next_char(chars: &[(usize, char)], i: usize) -> Option<char> {
    chars.get(i + 1).map(|&(_, c)| c)
}

fn skip_whitespace(chars: &[(usize, char)], mut i: usize) -> usize {
    while chars.get(i).is_some_and(|&(_, c)| c.is_whitespace()) {
        i += 1;
    }
    i
}

/// Split `text` at occurrences of `sep` that are not nested in delimiters
/// or quoted.
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut last = 0;
    for (pos, c) in text.char_indices() {
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
            _ if c == sep && depth == 0 => {
                parts.push(&text[last..pos]);
                last = pos + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[last..]);
    parts
}
