//! In-place edit of one scalar inside a block-style `processes` list.
//!
//! The entry is located by its `type` and `id` in the source text and only
//! the byte range of the target field's value is replaced, so comments,
//! quoting, indentation and line endings elsewhere are untouched.
//!
//! Layouts outside the supported subset (flow collections, block scalars,
//! anchors, multi-line values) yield `None`; the caller decides what to do
//! then. The result is not self-validated here either: callers re-parse it.

use serde_yaml::Value;

/// Which entry and which field to edit.
pub(crate) struct EntryKey<'a> {
    pub process_type: &'a str,
    pub process_id: &'a str,
    pub field: &'a str,
}

/// Replace `key.field` of the unique matching entry with `new_value`.
///
/// A field the entry does not have yet is added as a new line directly
/// after the entry's `id`.
pub(crate) fn replace_entry_field(src: &str, key: &EntryKey<'_>, new_value: &str) -> Option<String> {
    let lines = split_lines(src);
    let entries = process_entries(&lines)?;

    let mut matching = entries.iter().filter(|e| {
        e.scalar("type").as_deref() == Some(key.process_type)
            && e.scalar("id").as_deref() == Some(key.process_id)
    });
    let entry = matching.next()?;
    if matching.next().is_some() {
        return None;
    }

    match entry.field(key.field) {
        Some(FieldValue::Scalar(scalar)) => {
            let rendered = render(new_value, scalar.style);
            let mut out = String::with_capacity(src.len() + rendered.len());
            out.push_str(&src[..scalar.start]);
            out.push_str(&rendered);
            out.push_str(&src[scalar.end..]);
            Some(out)
        }
        Some(FieldValue::Empty | FieldValue::Unsupported) => None,
        None => {
            let anchor = entry.pairs.iter().find(|p| p.key == "id")?.line;
            let newline = if src[anchor.start..anchor.next].ends_with("\r\n") {
                "\r\n"
            } else {
                "\n"
            };
            let mut insert = String::new();
            if anchor.next == anchor.start + anchor.text.len() {
                // The id line is the last line and has no terminator.
                insert.push_str(newline);
            }
            insert.push_str(&" ".repeat(entry.key_col));
            insert.push_str(key.field);
            insert.push_str(": ");
            insert.push_str(&render(new_value, Style::Plain));
            insert.push_str(newline);

            let mut out = String::with_capacity(src.len() + insert.len());
            out.push_str(&src[..anchor.next]);
            out.push_str(&insert);
            out.push_str(&src[anchor.next..]);
            Some(out)
        }
    }
}

// ── Lines ───────────────────────────────────────────────────────────

struct Line<'a> {
    /// Byte offset of the first character.
    start: usize,
    /// Content without the line terminator.
    text: &'a str,
    /// Byte offset of the following line.
    next: usize,
}

fn split_lines(src: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for chunk in src.split_inclusive('\n') {
        let next = start + chunk.len();
        let text = chunk.strip_suffix('\n').unwrap_or(chunk);
        let text = text.strip_suffix('\r').unwrap_or(text);
        lines.push(Line { start, text, next });
        start = next;
    }
    lines
}

fn indent(text: &str) -> usize {
    text.len() - text.trim_start_matches(' ').len()
}

fn is_filler(text: &str) -> bool {
    let t = text.trim();
    t.is_empty() || t.starts_with('#')
}

fn is_item(text: &str, col: usize) -> bool {
    if indent(text) != col {
        return false;
    }
    let rest = &text[col..];
    rest == "-" || rest.starts_with("- ")
}

// ── Entries ─────────────────────────────────────────────────────────

struct Entry<'a> {
    key_col: usize,
    pairs: Vec<Pair<'a>>,
}

impl Entry<'_> {
    fn field(&self, name: &str) -> Option<FieldValue> {
        self.pairs
            .iter()
            .find(|p| p.key == name)
            .map(|p| p.value.clone())
    }

    fn scalar(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            FieldValue::Scalar(s) => Some(s.decoded),
            _ => None,
        }
    }
}

struct Pair<'a> {
    key: String,
    value: FieldValue,
    line: &'a Line<'a>,
}

/// Entries of the top-level `processes` block sequence.
fn process_entries<'a>(lines: &'a [Line<'a>]) -> Option<Vec<Entry<'a>>> {
    let head = lines.iter().position(|l| {
        indent(l.text) == 0
            && matches!(parse_pair(l, 0), Some((k, FieldValue::Empty)) if k == "processes")
    })?;
    let body = &lines[head + 1..];
    let first = body.iter().position(|l| !is_filler(l.text))?;
    let dash_col = indent(body[first].text);
    if !is_item(body[first].text, dash_col) {
        return None;
    }

    let mut items: Vec<Vec<&Line<'_>>> = Vec::new();
    for line in &body[first..] {
        if is_filler(line.text) {
            continue;
        }
        if is_item(line.text, dash_col) {
            items.push(vec![line]);
            continue;
        }
        if indent(line.text) <= dash_col {
            break;
        }
        items.last_mut()?.push(line);
    }

    items.into_iter().map(|item| parse_entry(&item, dash_col)).collect()
}

fn parse_entry<'a>(item: &[&'a Line<'a>], dash_col: usize) -> Option<Entry<'a>> {
    let head = item.first()?;
    let after_dash = &head.text[dash_col + 1..];
    let gap = after_dash.len() - after_dash.trim_start_matches(' ').len();
    let inline = !is_filler(after_dash);

    let key_col = if inline {
        dash_col + 1 + gap
    } else {
        indent(item.get(1)?.text)
    };
    if key_col <= dash_col {
        return None;
    }

    let mut pairs = Vec::new();
    for (i, line) in item.iter().enumerate() {
        let own = i == 0;
        if own && !inline {
            continue;
        }
        if !own {
            let ind = indent(line.text);
            if ind > key_col {
                continue;
            }
            if ind < key_col {
                return None;
            }
            if line.text[key_col..].starts_with('-') {
                // Block sequence nested under the previous key.
                continue;
            }
        }
        let (key, value) = parse_pair(line, key_col)?;
        pairs.push(Pair { key, value, line });
    }
    Some(Entry { key_col, pairs })
}

// ── Scalars ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Plain,
    Single,
    Double,
}

#[derive(Debug, Clone)]
struct Scalar {
    /// Absolute byte range of the value token, quotes included.
    start: usize,
    end: usize,
    style: Style,
    decoded: String,
}

#[derive(Debug, Clone)]
enum FieldValue {
    Scalar(Scalar),
    /// Nothing after the colon: null or a nested block.
    Empty,
    Unsupported,
}

/// Parse `key: value` starting at column `col` of `line`.
fn parse_pair(line: &Line<'_>, col: usize) -> Option<(String, FieldValue)> {
    let text = line.text.get(col..)?;

    let (key, after_key) = match text.chars().next()? {
        q @ ('"' | '\'') => {
            let close = text[1..].find(q)? + 1;
            (text[1..close].to_string(), &text[close + 1..])
        }
        _ => {
            let colon = text
                .char_indices()
                .find(|&(i, c)| c == ':' && matches!(text[i + 1..].chars().next(), None | Some(' ')))
                .map(|(i, _)| i)?;
            (text[..colon].trim_end().to_string(), &text[colon..])
        }
    };
    let after_colon = after_key.trim_start_matches(' ').strip_prefix(':')?;

    let value_text = after_colon.trim_start_matches(' ');
    if value_text.is_empty() || value_text.starts_with('#') {
        return Some((key, FieldValue::Empty));
    }
    let offset = line.start + (line.text.len() - value_text.len());
    Some((key, scan_scalar(value_text, offset)))
}

fn scan_scalar(text: &str, offset: usize) -> FieldValue {
    let (len, style, decoded) = match text.chars().next() {
        Some('"') => match scan_double(text) {
            Some((len, decoded)) => (len, Style::Double, decoded),
            None => return FieldValue::Unsupported,
        },
        Some('\'') => match scan_single(text) {
            Some((len, decoded)) => (len, Style::Single, decoded),
            None => return FieldValue::Unsupported,
        },
        Some('|' | '>' | '&' | '*' | '!' | '{' | '[' | '%' | '@' | '`') | None => {
            return FieldValue::Unsupported;
        }
        Some(_) => {
            let end = text.find(" #").unwrap_or(text.len());
            let value = text[..end].trim_end();
            (value.len(), Style::Plain, value.to_string())
        }
    };

    let rest = text[len..].trim_start_matches(' ');
    if !(rest.is_empty() || rest.starts_with('#')) {
        return FieldValue::Unsupported;
    }
    FieldValue::Scalar(Scalar {
        start: offset,
        end: offset + len,
        style,
        decoded,
    })
}

/// Returns the token length (quotes included) and the decoded value.
fn scan_double(text: &str) -> Option<(usize, String)> {
    let mut decoded = String::new();
    let mut chars = text.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((i + 1, decoded)),
            '\\' => {
                let (_, esc) = chars.next()?;
                decoded.push(match esc {
                    '"' => '"',
                    '\\' => '\\',
                    '/' => '/',
                    't' => '\t',
                    'n' => '\n',
                    _ => return None,
                });
            }
            _ => decoded.push(c),
        }
    }
    None
}

fn scan_single(text: &str) -> Option<(usize, String)> {
    let mut decoded = String::new();
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            if matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                decoded.push('\'');
                continue;
            }
            return Some((i + 1, decoded));
        }
        decoded.push(c);
    }
    None
}

/// Render `value` in the existing quoting style where that style can
/// represent it unchanged; double quotes otherwise.
fn render(value: &str, style: Style) -> String {
    match style {
        Style::Plain if plain_round_trips(value) => value.to_string(),
        Style::Single if !value.contains(['\n', '\r']) => format!("'{}'", value.replace('\'', "''")),
        _ => {
            let mut out = String::from("\"");
            for c in value.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
                    c => out.push(c),
                }
            }
            out.push('"');
            out
        }
    }
}

fn plain_round_trips(value: &str) -> bool {
    !value.contains(['\n', '\r'])
        && serde_yaml::from_str::<Value>(value).ok() == Some(Value::String(value.to_string()))
}
