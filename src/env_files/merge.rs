use super::classify::{classify, Pattern, Scope, TEMPLATE_VAR, VAR_PREFIX};
use super::content::{merge_raw_env, ResolvedContent};
use super::parser::{parse_blob, BlobFormat, EnvMap};
use crate::config::VarSet;

/// Content for one output file.
///
/// The root file starts from the `ENV` template when there is one. A
/// component file starts from its `ENV_<C>` text blob, so the blob's comments
/// and line order survive; JSON blobs are never used as templates.
pub fn resolve_content(
    vars: &VarSet,
    environment: &str,
    pattern: &Pattern,
    format: BlobFormat,
) -> ResolvedContent {
    let merged = merge_env_vars_by_priority(vars, environment, pattern, format);
    match template(vars, pattern) {
        Some(template) => ResolvedContent::RawTemplate(merge_raw_env(template, &merged)),
        None => ResolvedContent::Structured(merged),
    }
}

fn template<'a>(vars: &'a VarSet, pattern: &Pattern) -> Option<&'a str> {
    let value = match pattern {
        Pattern::Root => vars.get(TEMPLATE_VAR)?,
        Pattern::Component(name) => {
            let blob = vars.get(&format!("{}{}", VAR_PREFIX, name.to_uppercase()))?;
            if blob.trim_start().starts_with('{') {
                return None;
            }
            blob
        }
    };
    Some(value.as_str()).filter(|value| !value.trim().is_empty())
}

/// Merged key/value pairs for one output file; later sources win.
pub fn merge_env_vars_by_priority(
    vars: &VarSet,
    environment: &str,
    pattern: &Pattern,
    format: BlobFormat,
) -> EnvMap {
    match pattern {
        Pattern::Root => merge_root(vars, environment, format),
        Pattern::Component(name) => merge_component(vars, environment, name, format),
    }
}

/// Every variable of the active environment, flattened into one file.
///
/// Unscoped variables are applied first and scoped ones second, so an
/// environment-specific value wins a collision.
fn merge_root(vars: &VarSet, environment: &str, format: BlobFormat) -> EnvMap {
    let mut merged = EnvMap::new();

    for (name, value) in vars {
        if let Scope::Global(key) = classify(name, environment) {
            absorb_root(&mut merged, key, value, format);
        }
    }
    for (name, value) in vars {
        if let Scope::Active(key) = classify(name, environment) {
            absorb_root(&mut merged, key, value, format);
        }
    }

    merged
}

fn absorb_root(merged: &mut EnvMap, key: &str, value: &str, format: BlobFormat) {
    // ENV_<ACTIVE> itself: its keys land unprefixed
    if key.is_empty() {
        merged.extend(parse_blob(value, format));
        return;
    }

    // multi-word names are single values even if they happen to parse
    if key.contains('_') {
        merged.insert(key.to_string(), value.to_string());
        return;
    }

    let parsed = parse_blob(value, format);
    if parsed.is_empty() {
        merged.insert(key.to_string(), value.to_string());
        return;
    }

    let prefix = format!("{}_", key.to_uppercase());
    for (sub_key, sub_value) in parsed {
        let name = if sub_key.to_uppercase().starts_with(&prefix) {
            sub_key
        } else {
            format!("{}_{}", key, sub_key)
        };
        merged.insert(name, sub_value);
    }
}

/// Four sources, lowest priority first: `ENV_<C>_*` singles, the `ENV_<C>`
/// blob, `ENV_<E>_<C>_*` singles and the `ENV_<E>_<C>` blob.
fn merge_component(vars: &VarSet, environment: &str, component: &str, format: BlobFormat) -> EnvMap {
    let component = component.to_uppercase();
    let mut merged = EnvMap::new();

    let base = format!("{}{}", VAR_PREFIX, component);
    absorb_singles(&mut merged, vars, &base);
    absorb_component_blob(&mut merged, vars.get(&base), &component, format);

    let environment = environment.trim().to_uppercase();
    if !environment.is_empty() {
        let scoped = format!("{}{}_{}", VAR_PREFIX, environment, component);
        absorb_singles(&mut merged, vars, &scoped);
        absorb_component_blob(&mut merged, vars.get(&scoped), &component, format);
    }

    merged
}

fn absorb_singles(merged: &mut EnvMap, vars: &VarSet, name: &str) {
    let prefix = format!("{}_", name);
    for (var, value) in vars {
        if let Some(key) = var.strip_prefix(&prefix).filter(|key| !key.is_empty()) {
            merged.insert(key.to_string(), value.clone());
        }
    }
}

fn absorb_component_blob(
    merged: &mut EnvMap,
    value: Option<&String>,
    component: &str,
    format: BlobFormat,
) {
    let Some(value) = value else {
        return;
    };

    let parsed = parse_blob(value, format);
    if parsed.is_empty() {
        if !value.trim().is_empty() {
            merged.insert(component.to_string(), value.clone());
        }
        return;
    }

    let prefix = format!("{}_", component);
    for (sub_key, sub_value) in parsed {
        let key = match sub_key.strip_prefix(&prefix) {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => sub_key,
        };
        merged.insert(key, sub_value);
    }
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

    fn merge(source: &[(&str, &str)], environment: &str, pattern: &Pattern) -> EnvMap {
        merge_env_vars_by_priority(&vars(source), environment, pattern, BlobFormat::Auto)
    }

    #[test]
    fn scoped_single_beats_base_single() {
        let merged = merge(
            &[("ENV_APP_PORT", "8000"), ("ENV_PROD_APP_PORT", "9000")],
            "prod",
            &component("app"),
        );
        assert_eq!(merged["PORT"], "9000");
    }

    #[test]
    fn scoped_blob_beats_base_blob() {
        let merged = merge(
            &[("ENV_APP", "PORT=8000"), ("ENV_PROD_APP", "PORT=9000\nSECRET=x")],
            "prod",
            &component("app"),
        );
        assert_eq!(merged["PORT"], "9000");
        assert_eq!(merged["SECRET"], "x");
    }

    #[test]
    fn blob_beats_singles_and_strips_component_prefix() {
        let merged = merge(
            &[
                ("ENV_DATABASE_HOST", "single"),
                ("ENV_DATABASE", r#"{"DATABASE_HOST": "blob", "PORT": 5432}"#),
            ],
            "prod",
            &component("database"),
        );
        assert_eq!(merged["HOST"], "blob");
        assert_eq!(merged["PORT"], "5432");
        assert!(!merged.contains_key("DATABASE_HOST"));
    }

    #[test]
    fn other_environments_do_not_leak_into_components() {
        let merged = merge(
            &[("ENV_APP_PORT", "8000"), ("ENV_STAGING_APP_PORT", "7000")],
            "prod",
            &component("app"),
        );
        assert_eq!(merged["PORT"], "8000");
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn blank_environment_skips_scoped_stages() {
        let merged = merge(&[("ENV_APP_PORT", "8000"), ("ENV__APP_PORT", "1")], "", &component("app"));
        assert_eq!(merged["PORT"], "8000");
    }

    #[test]
    fn unparseable_component_blob_is_kept_whole() {
        let merged = merge(&[("ENV_DATABASE", "not valid json {")], "prod", &component("database"));
        assert_eq!(merged["DATABASE"], "not valid json {");
    }

    #[test]
    fn root_merges_all_components_with_prefixes() {
        let merged = merge(
            &[
                ("ENV_APP", "DEBUG=false\nAPP_NAME=shop"),
                ("ENV_DATABASE_HOST", "localhost"),
                ("ENV_PROD_APP", "DEBUG=true"),
                ("ENV_STAGING_APP", "DEBUG=staging"),
                ("ENV_TOKEN", "plain-secret"),
            ],
            "prod",
            &Pattern::Root,
        );
        assert_eq!(merged["APP_DEBUG"], "true");
        assert_eq!(merged["APP_NAME"], "shop");
        assert_eq!(merged["DATABASE_HOST"], "localhost");
        assert_eq!(merged["TOKEN"], "plain-secret");
        assert!(!merged.values().any(|v| v == "staging"));
    }

    #[test]
    fn root_absorbs_environment_blob_unprefixed() {
        let merged = merge(&[("ENV_PROD", "GLOBAL=1\nREGION=eu")], "prod", &Pattern::Root);
        assert_eq!(merged["GLOBAL"], "1");
        assert_eq!(merged["REGION"], "eu");
    }

    #[test]
    fn root_keeps_multi_word_values_literal() {
        let merged = merge(&[("ENV_DB_URL", "A=1")], "prod", &Pattern::Root);
        assert_eq!(merged["DB_URL"], "A=1");
    }

    #[test]
    fn root_uses_template_when_present() {
        let source = vars(&[("ENV", "# shared\nA=1\nB=2"), ("ENV_APP", "C=3")]);
        let content = resolve_content(&source, "prod", &Pattern::Root, BlobFormat::Auto);
        assert_eq!(content.render(), "# shared\nA=1\nB=2\n\nAPP_C=3\n");

        let content = resolve_content(&source, "prod", &component("app"), BlobFormat::Auto);
        assert_eq!(content.render(), "C=3\n");
    }

    #[test]
    fn component_text_blob_keeps_comments_and_order() {
        let source = vars(&[
            ("ENV_APP", "# app settings\nPORT=8000\nDEBUG=false"),
            ("ENV_PROD_APP_PORT", "9000"),
            ("ENV_APP_WORKERS", "4"),
        ]);
        let content = resolve_content(&source, "prod", &component("app"), BlobFormat::Auto);
        assert_eq!(
            content.render(),
            "# app settings\nPORT=9000\nDEBUG=false\n\nWORKERS=4\n"
        );
    }

    #[test]
    fn component_json_blob_stays_structured() {
        let source = vars(&[("ENV_APP", r#"{"PORT": "8000", "DEBUG": "false"}"#)]);
        let content = resolve_content(&source, "prod", &component("app"), BlobFormat::Auto);
        assert_eq!(
            content,
            ResolvedContent::Structured(
                [("DEBUG", "false"), ("PORT", "8000")]
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            )
        );
    }
}
