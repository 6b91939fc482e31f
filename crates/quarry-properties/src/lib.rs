//! A small reader/writer for Java-style `.properties` files.
//!
//! Quarry uses this format for the remote index descriptor
//! (`quarry-index.properties`) and for the persisted registry
//! (`indexes.properties`). Parsing follows the usual rules (comments, line
//! continuations, `=`/`:`/whitespace separators, `\uXXXX` escapes); rendering
//! escapes whatever is needed for the output to parse back to the same map.

use std::collections::BTreeMap;
use std::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyEntry {
    pub key: String,
    pub value: String,
    /// Byte range of the key in the source text.
    pub key_range: Range<usize>,
    /// Byte range of the value in the source text.
    pub value_range: Range<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertiesFile {
    pub entries: Vec<PropertyEntry>,
}

impl PropertiesFile {
    #[must_use]
    pub fn by_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a PropertyEntry> + 'a {
        self.entries.iter().filter(move |e| e.key == key)
    }
}

/// An ordered key/value map with `.properties` parsing and rendering.
///
/// Later duplicates win, matching `java.util.Properties#load`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut values = BTreeMap::new();
        for entry in parse(text).entries {
            values.insert(entry.key, entry.value);
        }
        Self { values }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.values
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Renders the map, one `key=value` line per entry, preceded by `comment`
    /// lines (if any).
    #[must_use]
    pub fn render(&self, comment: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(comment) = comment {
            for line in comment.lines() {
                out.push_str("# ");
                out.push_str(line);
                out.push('\n');
            }
        }
        for (key, value) in &self.values {
            escape_into(&mut out, key, true);
            out.push('=');
            escape_into(&mut out, value, false);
            out.push('\n');
        }
        out
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug)]
struct LogicalLine {
    bytes: Vec<u8>,
    /// `bytes[i]` originated from `original_offsets[i]` in the input.
    original_offsets: Vec<usize>,
}

/// Parse a `.properties` file into key/value entries, in source order.
#[must_use]
pub fn parse(text: &str) -> PropertiesFile {
    let bytes = text.as_bytes();
    let mut offset = 0usize;
    let mut entries = Vec::new();

    while offset < bytes.len() {
        let line_start = offset;
        let logical = read_logical_line(bytes, &mut offset);
        if let Some(entry) = parse_logical_line(&logical) {
            entries.push(entry);
        }

        // Ensure we always make progress even on pathological inputs.
        if offset == line_start {
            offset += 1;
        }
    }

    PropertiesFile { entries }
}

fn read_logical_line(bytes: &[u8], offset: &mut usize) -> LogicalLine {
    let mut out = Vec::new();
    let mut mapping = Vec::new();
    let mut first_segment = true;

    loop {
        let segment_start = *offset;
        let mut line_end = segment_start;
        while line_end < bytes.len() && bytes[line_end] != b'\n' {
            line_end += 1;
        }

        let mut content_end = line_end;
        if content_end > segment_start && bytes[content_end - 1] == b'\r' {
            content_end -= 1;
        }

        // Comment lines never continue, even when they end with `\`.
        let is_comment = first_segment && is_comment_line(&bytes[segment_start..content_end]);
        let continues =
            !is_comment && ends_with_unescaped_backslash(&bytes[segment_start..content_end]);
        let copy_end = if continues {
            content_end.saturating_sub(1)
        } else {
            content_end
        };

        for idx in segment_start..copy_end {
            out.push(bytes[idx]);
            mapping.push(idx);
        }

        *offset = if line_end < bytes.len() {
            line_end + 1
        } else {
            line_end
        };

        if !continues {
            break;
        }
        first_segment = false;

        // Continuation: skip leading whitespace on the next physical line.
        while *offset < bytes.len() && is_whitespace(bytes[*offset]) {
            *offset += 1;
        }
    }

    LogicalLine {
        bytes: out,
        original_offsets: mapping,
    }
}

fn is_comment_line(line: &[u8]) -> bool {
    line.iter()
        .find(|b| !is_whitespace(**b))
        .is_some_and(|b| *b == b'#' || *b == b'!')
}

fn ends_with_unescaped_backslash(line: &[u8]) -> bool {
    let mut i = line.len();
    let mut backslashes = 0usize;
    while i > 0 && line[i - 1] == b'\\' {
        backslashes += 1;
        i -= 1;
    }
    backslashes % 2 == 1
}

fn parse_logical_line(line: &LogicalLine) -> Option<PropertyEntry> {
    let bytes = &line.bytes;
    let mut i = 0usize;
    while i < bytes.len() && is_whitespace(bytes[i]) {
        i += 1;
    }

    if i >= bytes.len() || bytes[i] == b'#' || bytes[i] == b'!' {
        return None;
    }

    let key_start = i;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'=' | b':' => break,
            b if is_whitespace(b) => break,
            _ => i += 1,
        }
    }
    let key_end = i.min(bytes.len());
    i = key_end;

    while i < bytes.len() && is_whitespace(bytes[i]) {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'=' || bytes[i] == b':') {
        i += 1;
    }
    while i < bytes.len() && is_whitespace(bytes[i]) {
        i += 1;
    }

    let value_start = i;
    let value_end = bytes.len();

    Some(PropertyEntry {
        key: unescape(&bytes[key_start..key_end]),
        value: unescape(&bytes[value_start..value_end]),
        key_range: source_range(line, key_start, key_end),
        value_range: source_range(line, value_start, value_end),
    })
}

fn source_range(line: &LogicalLine, logical_start: usize, logical_end: usize) -> Range<usize> {
    if logical_start >= logical_end || logical_start >= line.original_offsets.len() {
        let at = line
            .original_offsets
            .get(logical_start)
            .or_else(|| line.original_offsets.last())
            .copied()
            .unwrap_or(0);
        return at..at;
    }

    let start = line.original_offsets[logical_start];
    let last = (logical_end - 1).min(line.original_offsets.len() - 1);
    start..line.original_offsets[last] + 1
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\x0C')
}

fn unescape(bytes: &[u8]) -> String {
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }

        i += 1;
        let Some(&escaped) = bytes.get(i) else {
            break;
        };

        match escaped {
            b't' => out.push(b'\t'),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b'f' => out.push(b'\x0C'),
            b'u' => match decode_unicode_escape(bytes.get(i + 1..i + 5)) {
                Some(ch) => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                    i += 4;
                }
                None => out.push(b'u'),
            },
            other => out.push(other),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn decode_unicode_escape(digits: Option<&[u8]>) -> Option<char> {
    let digits = digits?;
    let mut value = 0u32;
    for b in digits {
        value = (value << 4) | char::from(*b).to_digit(16)?;
    }
    char::from_u32(value)
}

fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (idx, ch) in text.chars().enumerate() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0C' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            c if (c as u32) < 0x20 || (c as u32) > 0x7e => {
                // Non-ASCII is written as UTF-16 code units.
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            }
            c => out.push(c),
        }
    }
}
