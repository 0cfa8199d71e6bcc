use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use super::classify::Pattern;
use crate::remote::join_path;

/// Directory holding per-environment folders for the nested layout.
pub const ENVS_DIR: &str = ".envs";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Structure {
    /// Nested when there is more than one component or any scoped variable,
    /// flat otherwise.
    #[default]
    Auto,
    /// One `.env` at the repository root.
    Single,
    /// `.env.<component>` files side by side.
    Flat,
    /// `.envs/<environment>/.env.<component>`.
    Nested,
    /// `.env.<component>` files under `ENV_FILES_PATH`.
    Custom,
}

impl Structure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Single => "single",
            Self::Flat => "flat",
            Self::Nested => "nested",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Structure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "single" => Ok(Self::Single),
            "flat" => Ok(Self::Flat),
            "nested" => Ok(Self::Nested),
            "custom" => Ok(Self::Custom),
            other => Err(format!(
                "unknown env file structure '{}' (expected auto, single, flat, nested or custom)",
                other
            )),
        }
    }
}

/// The concrete layout chosen for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Never `Auto`.
    pub structure: Structure,
    pub paths: BTreeMap<Pattern, String>,
}

pub fn resolve_structure(requested: Structure, pattern_count: usize, env_scoped: bool) -> Structure {
    match requested {
        Structure::Auto if pattern_count > 1 || env_scoped => Structure::Nested,
        Structure::Auto => Structure::Flat,
        other => other,
    }
}

/// Map each pattern to an absolute remote path.
///
/// A relative `custom_path` is taken from `base_path`; an absolute one
/// replaces it.
pub fn determine_file_structure(
    requested: Structure,
    patterns: &[Pattern],
    environment: &str,
    base_path: &str,
    custom_path: Option<&str>,
    env_scoped: bool,
) -> Placement {
    let mut structure = resolve_structure(requested, patterns.len(), env_scoped);
    let custom_dir = custom_path
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(|path| join_path(base_path, path));

    if structure == Structure::Custom && custom_dir.is_none() {
        warn!("ENV_FILES_STRUCTURE=custom without ENV_FILES_PATH, using the flat layout");
        structure = Structure::Flat;
    }

    let dir_base = custom_dir.clone().unwrap_or_else(|| base_path.to_string());
    let paths = match structure {
        Structure::Single => {
            BTreeMap::from([(Pattern::Root, join_path(&dir_base, &Pattern::Root.file_name()))])
        }
        Structure::Nested => {
            let env_dir = match &custom_dir {
                Some(dir) => join_path(dir, environment),
                None => join_path(&join_path(base_path, ENVS_DIR), environment),
            };
            place_in(&env_dir, patterns)
        }
        Structure::Flat | Structure::Custom | Structure::Auto => place_in(&dir_base, patterns),
    };

    Placement { structure, paths }
}

fn place_in(dir: &str, patterns: &[Pattern]) -> BTreeMap<Pattern, String> {
    patterns
        .iter()
        .map(|pattern| (pattern.clone(), join_path(dir, &pattern.file_name())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(names: &[&str]) -> Vec<Pattern> {
        names
            .iter()
            .map(|name| Pattern::Component(name.to_string()))
            .collect()
    }

    fn path_of(placement: &Placement, name: &str) -> String {
        placement.paths[&Pattern::Component(name.to_string())].clone()
    }

    #[test]
    fn nested_layout() {
        let placement =
            determine_file_structure(Structure::Nested, &components(&["app"]), "prod", "/srv", None, false);
        assert_eq!(placement.structure, Structure::Nested);
        assert_eq!(path_of(&placement, "app"), "/srv/.envs/prod/.env.app");
    }

    #[test]
    fn flat_layout() {
        let placement = determine_file_structure(
            Structure::Flat,
            &components(&["app", "db"]),
            "prod",
            "/srv",
            None,
            false,
        );
        assert_eq!(path_of(&placement, "app"), "/srv/.env.app");
        assert_eq!(path_of(&placement, "db"), "/srv/.env.db");
    }

    #[test]
    fn single_layout_is_one_root_file() {
        let placement =
            determine_file_structure(Structure::Single, &[Pattern::Root], "prod", "/srv/app", None, false);
        assert_eq!(placement.paths.len(), 1);
        assert_eq!(placement.paths[&Pattern::Root], "/srv/app/.env");
    }

    #[test]
    fn auto_picks_nested_for_many_components_or_scoped_vars() {
        assert_eq!(resolve_structure(Structure::Auto, 2, false), Structure::Nested);
        assert_eq!(resolve_structure(Structure::Auto, 1, true), Structure::Nested);
        assert_eq!(resolve_structure(Structure::Auto, 1, false), Structure::Flat);
        assert_eq!(resolve_structure(Structure::Single, 5, true), Structure::Single);
    }

    #[test]
    fn custom_paths_relative_and_absolute() {
        let relative = determine_file_structure(
            Structure::Custom,
            &components(&["app"]),
            "prod",
            "/srv/app",
            Some("config/env"),
            false,
        );
        assert_eq!(path_of(&relative, "app"), "/srv/app/config/env/.env.app");

        let absolute = determine_file_structure(
            Structure::Custom,
            &components(&["app"]),
            "prod",
            "/srv/app",
            Some("/etc/shop"),
            false,
        );
        assert_eq!(path_of(&absolute, "app"), "/etc/shop/.env.app");
    }

    #[test]
    fn custom_without_path_falls_back_to_flat() {
        let placement =
            determine_file_structure(Structure::Custom, &components(&["app"]), "prod", "/srv", None, false);
        assert_eq!(placement.structure, Structure::Flat);
        assert_eq!(path_of(&placement, "app"), "/srv/.env.app");
    }

    #[test]
    fn nested_under_custom_path() {
        let placement = determine_file_structure(
            Structure::Nested,
            &components(&["app"]),
            "staging",
            "/srv",
            Some("envs"),
            false,
        );
        assert_eq!(path_of(&placement, "app"), "/srv/envs/staging/.env.app");
    }

    #[test]
    fn structure_names() {
        assert_eq!("Nested".parse::<Structure>(), Ok(Structure::Nested));
        assert_eq!("".parse::<Structure>(), Ok(Structure::Auto));
        assert!("tree".parse::<Structure>().is_err());
    }
}
