use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

/// Flat key/value mapping in deterministic key order.
pub type EnvMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BlobFormat {
    #[default]
    Auto,
    Json,
    Yaml,
    Env,
}

impl FromStr for BlobFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "env" | "dotenv" => Ok(Self::Env),
            other => Err(format!(
                "invalid value '{}'. Supported: auto, json, yaml, env",
                other
            )),
        }
    }
}

/// Formats tried, in order, when the format is `auto`.
pub const AUTO_DETECT_ORDER: [BlobFormat; 3] = [BlobFormat::Json, BlobFormat::Yaml, BlobFormat::Env];

/// Paths longer than this are never probed on disk.
const MAX_PATH_PROBE: usize = 4096;

/// Parse a secret blob into a flat mapping.
///
/// Never fails: unrecognised or malformed input degrades through the format
/// chain and ends as an empty map. If `content` names a local file, the file
/// is parsed instead.
pub fn parse_blob(content: &str, format: BlobFormat) -> EnvMap {
    let content = content.trim();
    if content.is_empty() {
        return EnvMap::new();
    }

    let source = read_if_path(content);
    let raw = source.trim();
    let normalized = raw.replace("\\n", "\n");

    match format {
        BlobFormat::Auto => AUTO_DETECT_ORDER
            .iter()
            .find_map(|candidate| attempt(*candidate, raw, &normalized, true))
            .unwrap_or_default(),
        explicit => attempt(explicit, raw, &normalized, false)
            .or_else(|| attempt(BlobFormat::Env, raw, &normalized, false))
            .unwrap_or_default(),
    }
}

/// `None` means "not this format", letting the caller fall through.
fn attempt(format: BlobFormat, raw: &str, normalized: &str, sniff: bool) -> Option<EnvMap> {
    match format {
        BlobFormat::Json => {
            if sniff && !(normalized.starts_with('{') && normalized.ends_with('}')) {
                return None;
            }
            parse_json(normalized)
        }
        BlobFormat::Yaml => {
            if sniff && !normalized.contains(':') {
                return None;
            }
            let map = parse_yaml(normalized)?;
            if sniff && map.len() <= 1 && !has_yaml_key_line(normalized) {
                return None;
            }
            Some(map)
        }
        BlobFormat::Env => {
            if sniff && !raw.contains('=') {
                return None;
            }
            Some(parse_env(raw))
        }
        BlobFormat::Auto => None,
    }
}

fn read_if_path(content: &str) -> Cow<'_, str> {
    if content.contains('\n') || content.len() > MAX_PATH_PROBE {
        return Cow::Borrowed(content);
    }

    let path = Path::new(content);
    if !path.is_file() {
        return Cow::Borrowed(content);
    }

    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!("Reading secret blob from file {}", path.display());
            Cow::Owned(text)
        }
        Err(e) => {
            debug!("Treating blob as literal, {} unreadable: {}", path.display(), e);
            Cow::Borrowed(content)
        }
    }
}

fn parse_json(content: &str) -> Option<EnvMap> {
    let value: serde_json::Value = serde_json::from_str(content).ok()?;
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .map(|(k, v)| (k.clone(), json_to_string(v)))
            .collect(),
    )
}

fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_yaml(content: &str) -> Option<EnvMap> {
    let value: serde_yaml::Value = serde_yaml::from_str(content).ok()?;
    let mapping = value.as_mapping()?;
    Some(
        mapping
            .iter()
            .map(|(k, v)| (yaml_to_string(k), yaml_to_string(v)))
            .collect(),
    )
}

fn yaml_to_string(value: &serde_yaml::Value) -> String {
    use serde_yaml::Value;
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        Value::Tagged(tagged) => yaml_to_string(&tagged.value),
        nested => serde_json::to_string(nested).unwrap_or_default(),
    }
}

/// A line shaped like `key: value` or `key:`.
fn has_yaml_key_line(content: &str) -> bool {
    static KEY_LINE: OnceLock<Regex> = OnceLock::new();
    let re = KEY_LINE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*["']?[A-Za-z0-9_.\-]+["']?\s*:(\s|$)"#).expect("valid regex")
    });
    re.is_match(content)
}

pub(crate) fn env_key_pattern() -> &'static Regex {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| Regex::new(r"(?:^|[\s,])([A-Z0-9_]+)=").expect("valid regex"))
}

/// `KEY=VALUE` text. A value runs until the next key, so one line may hold
/// several pairs (`A=1,B=2 C=3`) and a quoted value may span lines.
pub fn parse_env(content: &str) -> EnvMap {
    let clean = content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");

    // key-like text inside a quoted value belongs to that value
    let mut keys: Vec<(usize, usize, &str)> = Vec::new();
    let mut quoted_until = 0;
    for caps in env_key_pattern().captures_iter(&clean) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if key.start() < quoted_until {
            continue;
        }
        keys.push((whole.start(), whole.end(), key.as_str()));
        quoted_until = closing_quote(&clean, whole.end()).unwrap_or(0);
    }

    let mut map = EnvMap::new();
    for (i, (_, value_start, key)) in keys.iter().enumerate() {
        let value_end = keys
            .get(i + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(clean.len());

        let value = clean[*value_start..value_end]
            .trim()
            .trim_end_matches([' ', ',']);

        map.insert(key.to_string(), unquote(value).to_string());
    }
    map
}

/// End of a quoted value starting at `start`: the first matching quote that
/// is followed by whitespace, a comma or the end of the text.
fn closing_quote(text: &str, start: usize) -> Option<usize> {
    let rest = &text[start..];
    let body = rest.trim_start_matches([' ', '\t']);
    let offset = start + rest.len() - body.len();
    let quote = body.chars().next().filter(|c| *c == '"' || *c == '\'')?;

    let mut chars = body.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        if c != quote {
            continue;
        }
        match chars.peek() {
            None => return Some(offset + i + 1),
            Some((_, next)) if next.is_whitespace() || *next == ',' => {
                return Some(offset + i + 1)
            }
            _ => {}
        }
    }
    None
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
