//! Shared pieces of the line-oriented description files.
//!
//! Every file starts with `<TAG> <KIND> VERSION <n>` where TAG is `PMDSIM` or
//! `PMDSIMTAP`. Blank lines and lines starting with `#` carry no content.

use std::sync::OnceLock;

use regex::Regex;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:PMDSIM|PMDSIMTAP) ([A-Z]+) VERSION (\d+)\s*$").expect("valid regex")
    })
}

fn key_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s+(.*?)\s*$").expect("valid regex"))
}

/// Version number from a header line, if it names `kind` (e.g. `ANIMATION`).
pub fn header_version(line: Option<&str>, kind: &str) -> Option<u32> {
    let caps = header_re().captures(line?.trim_end())?;
    if &caps[1] != kind {
        return None;
    }
    caps[2].parse().ok()
}

/// Content lines after the header as `(line_number, trimmed_line)`; line
/// numbers are 1-based and count the header.
pub fn content_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .skip(1)
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

/// Split `key value` where the value runs to the end of the line.
pub fn key_value(line: &str) -> Option<(&str, &str)> {
    let caps = key_value_re().captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2)?.as_str();
    Some((key, value))
}

/// Contents of a `'...'` quoted value.
pub fn quoted(value: &str) -> Option<&str> {
    let start = value.find('\'')?;
    let end = value.rfind('\'')?;
    (end > start).then(|| &value[start + 1..end])
}

/// Parse `value` into `slot`; `false` leaves the slot alone.
pub fn set<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

/// Render `PMDSIM <KIND> VERSION <n>` followed by one `key value` line per entry.
pub fn render(kind: &str, version: u32, entries: &[(&str, String)]) -> String {
    let mut s = format!("PMDSIM {} VERSION {}\n", kind, version);
    for (key, value) in entries {
        s.push_str(key);
        s.push(' ');
        s.push_str(value);
        s.push('\n');
    }
    s
}
