use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

use super::layout::Structure;
use crate::config::{EnvFilesConfig, VarSet};

/// Raw template for the combined `.env` file.
pub const TEMPLATE_VAR: &str = "ENV";
pub const VAR_PREFIX: &str = "ENV_";
/// Configuration keys for the generator itself, never file content.
pub const INTERNAL_PREFIX: &str = "ENV_FILES_";
/// Checked after the active environment, in this order.
pub const FALLBACK_ENVIRONMENTS: [&str; 5] = ["PROD", "STAGING", "DEV", "TEST", "PRODUCTION"];
pub const DEFAULT_COMPONENT: &str = "app";

/// A logical output file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pattern {
    /// The combined `.env` file.
    Root,
    /// A per-component `.env.<name>` file.
    Component(String),
}

impl Pattern {
    /// Accepts `.env`, `.env.<name>` or a bare component name.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw == ".env" {
            return Some(Self::Root);
        }
        let name = raw.strip_prefix(".env.").unwrap_or(raw);
        if name.is_empty() {
            None
        } else {
            Some(Self::Component(name.to_lowercase()))
        }
    }

    pub fn file_name(&self) -> String {
        match self {
            Self::Root => ".env".to_string(),
            Self::Component(name) => format!(".env.{}", name),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Where a variable belongs relative to the active environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    /// `ENV`, the raw root template.
    Template,
    /// `ENV_FILES_*`.
    Internal,
    /// No `ENV_` prefix, e.g. a plain key unpacked from a bundle.
    Unprefixed,
    /// `ENV_<suffix>`.
    Global(&'a str),
    /// `ENV_<ACTIVE>_<suffix>`, or `ENV_<ACTIVE>` with an empty suffix.
    Active(&'a str),
    /// Scoped to an environment other than the active one.
    OtherEnvironment,
}

pub fn classify<'a>(name: &'a str, environment: &str) -> Scope<'a> {
    if name == TEMPLATE_VAR {
        return Scope::Template;
    }
    if name.starts_with(INTERNAL_PREFIX) {
        return Scope::Internal;
    }
    let Some(rest) = name.strip_prefix(VAR_PREFIX) else {
        return Scope::Unprefixed;
    };

    let active = environment.trim().to_uppercase();
    let candidates = std::iter::once(active.as_str())
        .chain(FALLBACK_ENVIRONMENTS)
        .filter(|candidate| !candidate.is_empty());

    for candidate in candidates {
        let scoped = match rest.strip_prefix(candidate) {
            Some("") => Some(""),
            Some(tail) => tail.strip_prefix('_'),
            None => None,
        };
        if let Some(suffix) = scoped {
            if candidate == active {
                return Scope::Active(suffix.trim_start_matches('_'));
            }
            return Scope::OtherEnvironment;
        }
    }

    Scope::Global(rest.trim_start_matches('_'))
}

/// First underscore-delimited token, lower-cased.
pub fn component_of(suffix: &str) -> Option<String> {
    let head = suffix.split('_').next().unwrap_or_default();
    if head.is_empty() {
        None
    } else {
        Some(head.to_lowercase())
    }
}

fn is_captured(name: &str) -> bool {
    (name == TEMPLATE_VAR || name.starts_with(VAR_PREFIX)) && !name.starts_with(INTERNAL_PREFIX)
}

/// Variables the generator works from.
///
/// Keeps `ENV` and `ENV_*` (minus `ENV_FILES_*`). A variable holding a JSON
/// object with reserved keys (a CI dump of all secrets) is unpacked in place
/// of itself; explicitly set variables win over unpacked ones.
pub fn working_vars(source: &VarSet) -> VarSet {
    let mut unpacked = VarSet::new();
    let mut explicit = VarSet::new();

    for (name, value) in source.iter().filter(|(name, _)| is_captured(name)) {
        match unpack_bundle(value) {
            Some(entries) => {
                debug!("Unpacking {} bundled variables from {}", entries.len(), name);
                unpacked.extend(entries);
            }
            None => {
                explicit.insert(name.clone(), value.clone());
            }
        }
    }

    unpacked.extend(explicit);
    unpacked
}

fn unpack_bundle(value: &str) -> Option<VarSet> {
    let trimmed = value.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let parsed: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let object = parsed.as_object()?;
    if !object.keys().any(|key| is_captured(key)) {
        return None;
    }

    Some(
        object
            .iter()
            .filter(|(key, _)| !key.starts_with(INTERNAL_PREFIX))
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

/// Component names inferred from variable names, sorted and deduplicated.
pub fn detect_file_patterns(vars: &VarSet, structure: Structure, environment: &str) -> Vec<Pattern> {
    if structure == Structure::Single {
        return vec![Pattern::Root];
    }

    let mut components = BTreeSet::new();
    for name in vars.keys() {
        let suffix = match classify(name, environment) {
            Scope::Global(suffix) | Scope::Active(suffix) => suffix,
            _ => continue,
        };
        if let Some(component) = component_of(suffix) {
            components.insert(component);
        }
    }

    if components.is_empty() {
        return vec![Pattern::Component(DEFAULT_COMPONENT.to_string())];
    }
    components.into_iter().map(Pattern::Component).collect()
}

/// Detected patterns, replaced by the explicit list when one is configured
/// and the structure is not `auto`.
pub fn resolve_patterns(vars: &VarSet, config: &EnvFilesConfig, environment: &str) -> Vec<Pattern> {
    let detected = detect_file_patterns(vars, config.structure, environment);
    if config.structure == Structure::Single || config.patterns.is_empty() {
        return detected;
    }

    if config.structure == Structure::Auto {
        warn!("ENV_FILES_PATTERNS is ignored with ENV_FILES_STRUCTURE=auto");
        return detected;
    }

    let explicit: BTreeSet<Pattern> = config.patterns.iter().filter_map(|p| Pattern::parse(p)).collect();
    if explicit.is_empty() {
        detected
    } else {
        explicit.into_iter().collect()
    }
}

/// True when any variable is scoped to the active environment.
pub fn has_active_scope(vars: &VarSet, environment: &str) -> bool {
    vars.keys()
        .any(|name| matches!(classify(name, environment), Scope::Active(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> VarSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn component(name: &str) -> Pattern {
        Pattern::Component(name.to_string())
    }

    #[test]
    fn classifies_scopes() {
        assert_eq!(classify("ENV", "prod"), Scope::Template);
        assert_eq!(classify("ENV_FILES_STRUCTURE", "prod"), Scope::Internal);
        assert_eq!(classify("DATABASE_URL", "prod"), Scope::Unprefixed);
        assert_eq!(classify("ENV_APP_PORT", "prod"), Scope::Global("APP_PORT"));
        assert_eq!(classify("ENV_PROD_APP_PORT", "prod"), Scope::Active("APP_PORT"));
        assert_eq!(classify("ENV_PROD_APP", "prod"), Scope::Active("APP"));
        assert_eq!(classify("ENV_PROD", "prod"), Scope::Active(""));
        assert_eq!(classify("ENV_STAGING_APP", "prod"), Scope::OtherEnvironment);
        assert_eq!(classify("ENV_PRODUCTION_APP", "prod"), Scope::OtherEnvironment);
        assert_eq!(classify("ENV_QA_APP", "qa"), Scope::Active("APP"));
        assert_eq!(classify("ENV_QA_APP", "prod"), Scope::Global("QA_APP"));
    }

    #[test]
    fn environment_prefix_needs_a_word_boundary() {
        assert_eq!(classify("ENV_DEVICE_ID", "dev"), Scope::Global("DEVICE_ID"));
        assert_eq!(classify("ENV_TESTER_NAME", "prod"), Scope::Global("TESTER_NAME"));
    }

    #[test]
    fn empty_input_defaults_to_app() {
        assert_eq!(
            detect_file_patterns(&VarSet::new(), Structure::Auto, "prod"),
            vec![component("app")]
        );
        assert_eq!(
            detect_file_patterns(&vars(&[("ENV_FILES_STRUCTURE", "auto")]), Structure::Auto, "prod"),
            vec![component("app")]
        );
    }

    #[test]
    fn detects_components_from_names() {
        let found = detect_file_patterns(
            &vars(&[
                ("ENV_APP_DEBUG", "false"),
                ("ENV_APP_SECRET", "abc123"),
                ("ENV_DATABASE_HOST", "localhost"),
                ("ENV_REDIS_URL", "redis://localhost:6379"),
                ("ENV_PROD_APP_OVERRIDE", "true"),
                ("ENV_SOME_OTHER_VAR", "value"),
            ]),
            Structure::Auto,
            "",
        );
        assert_eq!(
            found,
            vec![component("app"), component("database"), component("redis"), component("some")]
        );
    }

    #[test]
    fn nested_detection_includes_database() {
        let found = detect_file_patterns(&vars(&[("ENV_DATABASE_HOST", "x")]), Structure::Nested, "prod");
        assert!(found.contains(&component("database")));
    }

    #[test]
    fn scoped_blobs_and_other_environments() {
        let found = detect_file_patterns(
            &vars(&[
                ("ENV_APP", "COMMON=1"),
                ("ENV_PROD_DATABASE", "DB_HOST=localhost"),
                ("ENV_STAGING_CACHE", "URL=x"),
                ("ENV_REDIS", "redis"),
                ("ENV_PROD", "GLOBAL=1"),
                ("PLAIN_KEY", "from-bundle"),
            ]),
            Structure::Auto,
            "prod",
        );
        assert_eq!(found, vec![component("app"), component("database"), component("redis")]);
    }

    #[test]
    fn single_structure_is_one_root_pattern() {
        let found = detect_file_patterns(&vars(&[("ENV_APP_PORT", "1")]), Structure::Single, "prod");
        assert_eq!(found, vec![Pattern::Root]);
    }

    #[test]
    fn explicit_patterns_replace_detection() {
        let source = vars(&[("ENV_APP_PORT", "1"), ("ENV_REDIS_URL", "x")]);
        let mut config = EnvFilesConfig {
            structure: Structure::Flat,
            patterns: vec![".env.worker".to_string(), "api".to_string()],
            ..EnvFilesConfig::default()
        };
        assert_eq!(
            resolve_patterns(&source, &config, "prod"),
            vec![component("api"), component("worker")]
        );

        config.structure = Structure::Auto;
        assert_eq!(
            resolve_patterns(&source, &config, "prod"),
            vec![component("app"), component("redis")]
        );
    }

    #[test]
    fn captures_only_reserved_names() {
        let working = working_vars(&vars(&[
            ("ENV", "A=1"),
            ("ENV_APP_PORT", "80"),
            ("ENV_FILES_GENERATE", "true"),
            ("ENVIRONMENT", "prod"),
            ("PATH", "/usr/bin"),
        ]));
        assert_eq!(
            working.keys().cloned().collect::<Vec<_>>(),
            vec!["ENV".to_string(), "ENV_APP_PORT".to_string()]
        );
    }

    #[test]
    fn unpacks_secret_bundles() {
        let bundle = serde_json::json!({
            "ENV": "A=1\nB=2",
            "ENV_APP": "C=3",
            "ENV_FILES_STRUCTURE": "flat",
            "OTHER_UNRELATED": "ignored",
        })
        .to_string();

        let working = working_vars(&vars(&[("ENV_BLOB", bundle.as_str()), ("ENV_APP", "C=4")]));

        assert!(!working.contains_key("ENV_BLOB"));
        assert!(!working.contains_key("ENV_FILES_STRUCTURE"));
        assert_eq!(working["ENV"], "A=1\nB=2");
        assert_eq!(working["ENV_APP"], "C=4");
        assert_eq!(working["OTHER_UNRELATED"], "ignored");
    }

    #[test]
    fn plain_json_component_blob_is_not_a_bundle() {
        let working = working_vars(&vars(&[("ENV_DATABASE", r#"{"HOST": "db"}"#)]));
        assert_eq!(working["ENV_DATABASE"], r#"{"HOST": "db"}"#);
    }

    #[test]
    fn active_scope_detection() {
        assert!(has_active_scope(&vars(&[("ENV_PROD_APP_PORT", "1")]), "prod"));
        assert!(!has_active_scope(&vars(&[("ENV_STAGING_APP_PORT", "1")]), "prod"));
        assert!(!has_active_scope(&vars(&[("ENV_APP_PORT", "1")]), "prod"));
    }

    #[test]
    fn pattern_parsing() {
        assert_eq!(Pattern::parse(".env"), Some(Pattern::Root));
        assert_eq!(Pattern::parse(".env.Redis"), Some(component("redis")));
        assert_eq!(Pattern::parse(" api "), Some(component("api")));
        assert_eq!(Pattern::parse(""), None);
        assert_eq!(component("db").to_string(), ".env.db");
    }
}
