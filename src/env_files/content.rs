use std::collections::BTreeSet;

use super::parser::{env_key_pattern, parse_env, EnvMap};

/// What ends up in a generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedContent {
    /// Key/value pairs rendered one per line.
    Structured(EnvMap),
    /// A user template with merged overrides, written verbatim.
    RawTemplate(String),
}

impl ResolvedContent {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Structured(map) => map.is_empty(),
            Self::RawTemplate(text) => text.trim().is_empty(),
        }
    }

    /// File body, newline-terminated. Empty content renders to "".
    pub fn render(&self) -> String {
        let body = match self {
            Self::Structured(map) => map
                .iter()
                .map(|(key, value)| format_line(key, value))
                .collect::<Vec<_>>()
                .join("\n"),
            Self::RawTemplate(text) => text.trim_end_matches('\n').to_string(),
        };
        if body.is_empty() {
            body
        } else {
            body + "\n"
        }
    }

    /// Best-effort key/value view, for previews.
    pub fn entries(&self) -> EnvMap {
        match self {
            Self::Structured(map) => map.clone(),
            Self::RawTemplate(text) => parse_env(text),
        }
    }
}

impl From<EnvMap> for ResolvedContent {
    fn from(map: EnvMap) -> Self {
        Self::Structured(map)
    }
}

/// `KEY=value`, quoting any value that would not read back unchanged.
pub fn format_line(key: &str, value: &str) -> String {
    if !needs_quotes(value) {
        return format!("{}={}", key, value);
    }
    let quote = ['"', '\'']
        .into_iter()
        .find(|quote| closes_only_at_end(value, *quote))
        .unwrap_or('"');
    format!("{key}={quote}{value}{quote}")
}

fn needs_quotes(value: &str) -> bool {
    value.contains('\n')
        || value != value.trim()
        || value.ends_with(',')
        || value.starts_with(['"', '\''])
        || value.ends_with(['"', '\''])
        || env_key_pattern().is_match(value)
}

// A quote followed by whitespace or a comma would end the value early.
fn closes_only_at_end(value: &str, quote: char) -> bool {
    !value
        .chars()
        .zip(value.chars().skip(1))
        .any(|(c, next)| c == quote && (next.is_whitespace() || next == ','))
}

/// Apply overrides to a raw env template.
///
/// Assignment lines whose key is overridden are replaced in place; comments,
/// blank lines and every other line are kept. Overrides not present in the
/// template are appended after a blank separator.
pub fn merge_raw_env(base: &str, overrides: &EnvMap) -> String {
    if base.trim().is_empty() {
        return overrides
            .iter()
            .map(|(key, value)| format_line(key, value))
            .collect::<Vec<_>>()
            .join("\n");
    }

    let mut lines: Vec<String> = Vec::new();
    let mut replaced = BTreeSet::new();

    for line in base.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            lines.push(line.to_string());
            continue;
        }
        if let Some((key, _)) = stripped.split_once('=') {
            let key = key.trim();
            if let Some(value) = overrides.get(key) {
                lines.push(format_line(key, value));
                replaced.insert(key);
                continue;
            }
        }
        lines.push(line.to_string());
    }

    let mut pending = overrides
        .iter()
        .filter(|(key, _)| !replaced.contains(key.as_str()))
        .peekable();
    if pending.peek().is_some() {
        if lines.last().is_some_and(|last| !last.trim().is_empty()) {
            lines.push(String::new());
        }
        lines.extend(pending.map(|(key, value)| format_line(key, value)));
    }

    lines.join("\n")
}
