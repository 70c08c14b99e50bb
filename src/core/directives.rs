//! Purpose: Extract the directive prologue (leading string-literal statements) from module source.
//! Exports: `Directive`, `module_directives`, `remove_directive`.
//! Role: Pure scanner used by the boundary splitter and the `scan` command.
//! Invariants: Only the contiguous leading run counts; scanning stops at the first non-directive.
//! Invariants: A comment after a literal on its own line is whitespace; a comment between statements stops the scan.
//! Invariants: Spans are byte offsets; `end` covers a trailing `;` but never trailing whitespace.
use serde::Serialize;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Directive {
    pub value: String,
    pub start: usize,
    pub end: usize,
}

pub fn module_directives(source: &str) -> Vec<Directive> {
    let bytes = source.as_bytes();
    let mut directives = Vec::new();
    let bom = if source.starts_with('\u{feff}') { '\u{feff}'.len_utf8() } else { 0 };
    let mut pos = skip_whitespace(bytes, bom);

    while pos < bytes.len() {
        let quote = bytes[pos];
        if quote != b'"' && quote != b'\'' {
            break;
        }
        let Some(literal_end) = string_literal_end(bytes, pos) else {
            break;
        };
        let Some(end) = statement_end(bytes, literal_end) else {
            break;
        };
        directives.push(Directive {
            value: source[pos + 1..literal_end - 1].to_string(),
            start: pos,
            end,
        });
        pos = skip_whitespace(bytes, end);
    }

    directives
}

pub fn remove_directive(source: &str, directive: &Directive) -> String {
    let mut out = String::with_capacity(source.len());
    out.push_str(&source[..directive.start]);
    out.push_str(&source[directive.end..]);
    out
}

// Returns the offset just past the closing quote.
fn string_literal_end(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' | b'\r' => return None,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

// Decides whether the literal ending at `literal_end` is a complete statement.
// Comments between the literal and its terminator count as whitespace; a block
// comment spanning lines counts as a line break.
fn statement_end(bytes: &[u8], literal_end: usize) -> Option<usize> {
    let mut i = literal_end;
    let mut crossed_line = false;
    loop {
        while i < bytes.len() && matches!(bytes[i], b' ' | b'\t') {
            i += 1;
        }
        let rest = &bytes[i..];
        if rest.starts_with(b"//") {
            while i < bytes.len() && !matches!(bytes[i], b'\n' | b'\r') {
                i += 1;
            }
        } else if rest.starts_with(b"/*") {
            let body = &rest[2..];
            let close = body.windows(2).position(|pair| pair == b"*/")?;
            crossed_line |= body[..close].iter().any(|b| matches!(*b, b'\n' | b'\r'));
            i += close + 4;
        } else {
            break;
        }
    }
    match bytes.get(i) {
        None => Some(literal_end),
        Some(b';') => Some(i + 1),
        Some(b'\n' | b'\r') => ends_at_line_break(bytes, i, literal_end),
        Some(_) if crossed_line => ends_at_line_break(bytes, i, literal_end),
        Some(_) => None,
    }
}

fn ends_at_line_break(bytes: &[u8], i: usize, literal_end: usize) -> Option<usize> {
    let next = skip_whitespace(bytes, i);
    match bytes.get(next) {
        Some(b) if continues_expression(*b, &bytes[next..]) => None,
        _ => Some(literal_end),
    }
}

// A line break does not end the statement when the next token extends the expression.
fn continues_expression(first: u8, rest: &[u8]) -> bool {
    if rest.starts_with(b"//") || rest.starts_with(b"/*") {
        return false;
    }
    if matches!(
        first,
        b'.' | b'[' | b'(' | b'+' | b'-' | b'*' | b'/' | b'%' | b'?' | b',' | b'=' | b'<'
            | b'>' | b'&' | b'|' | b'^' | b'`'
    ) {
        return true;
    }
    keyword_at(rest, b"instanceof") || keyword_at(rest, b"in")
}

fn keyword_at(rest: &[u8], keyword: &[u8]) -> bool {
    rest.starts_with(keyword)
        && rest
            .get(keyword.len())
            .is_none_or(|b| !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$'))
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}
