//! Config file discovery, layered merging, and environment variable overlay.

use crate::{ConfigError, MeeboConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/meebo/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("meebo/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("meebo.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read one config file as a raw table, checking that it deserializes on its own.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    // Type errors should name the file that caused them, not the merged result.
    toml::Value::Table(table.clone())
        .try_into::<MeeboConfig>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(table)
}

/// Merge `overlay` into `base`. Nested tables merge key by key; anything else replaces.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a config, expanding `~/` and `$VAR/` in paths.
pub fn finish(table: toml::Table) -> Result<MeeboConfig, ConfigError> {
    let mut config: MeeboConfig = toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Merge(e.to_string()))?;

    let paths = &mut config.infra.paths;
    paths.state_dir = expand_path(&paths.state_dir.to_string_lossy());
    paths.media_dir = expand_path(&paths.media_dir.to_string_lossy());
    paths.script = expand_path(&paths.script.to_string_lossy());
    config.infra.snapshots.dir = expand_path(&config.infra.snapshots.dir.to_string_lossy());

    Ok(config)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides from the process environment.
pub fn apply_env_overrides(config: &mut MeeboConfig, sources: &mut ConfigSources) {
    apply_env_overrides_from(config, sources, |name| env::var(name).ok());
}

/// Apply environment overrides from an arbitrary lookup.
pub fn apply_env_overrides_from<F>(config: &mut MeeboConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |name: &str| {
        let value = lookup(name)?;
        sources.env_overrides.push(name.to_string());
        Some(value)
    };

    // Paths
    if let Some(v) = take("MEEBO_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
    }
    if let Some(v) = take("MEEBO_MEDIA_DIR") {
        config.infra.paths.media_dir = expand_path(&v);
    }
    if let Some(v) = take("MEEBO_SCRIPT") {
        config.infra.paths.script = expand_path(&v);
    }

    // Broker and identity
    if let Some(v) = take("MEEBO_BROKER") {
        config.infra.broker.endpoint = v;
    }
    if let Some(v) = take("MEEBO_BROKER_BIND") {
        config.infra.broker.bind = v;
    }
    if let Some(v) = take("MEEBO_USERNAME") {
        config.infra.broker.username = v;
    }
    if let Some(v) = take("MEEBO_PASSWORD") {
        config.infra.broker.password = v;
    }
    if let Some(v) = take("MEEBO_CLIENT_NAME") {
        config.infra.client.name = v;
    }
    if let Some(v) = take("MEEBO_LISTEN") {
        config.infra.client.listen = v;
    }
    if let Some(v) = take("MEEBO_REPLY_TO") {
        config.infra.client.reply_to = v;
    }

    // Telemetry, RUST_LOG wins over our own variable
    if let Some(v) = take("MEEBO_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
    }
    if let Some(v) = take("RUST_LOG") {
        config.infra.telemetry.log_level = v;
    }

    // Modes
    if let Some(v) = take("MEEBO_SECURE_MODE").and_then(|v| parse_flag(&v)) {
        config.bootstrap.modes.secure_mode = v;
    }
    if let Some(v) = take("MEEBO_FRIEND_MODE").and_then(|v| parse_flag(&v)) {
        config.bootstrap.modes.friend_mode = v;
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[client]
name = "FrontDoor"
"#;
        let table = parse_table(toml, Path::new("test.toml")).unwrap();
        let config = finish(table).unwrap();
        assert_eq!(config.infra.client.name, "FrontDoor");
        // Everything else falls back to defaults
        assert_eq!(config.infra.client.reply_to, "tcp://127.0.0.1:5671");
        assert_eq!(config.bootstrap.timing.motion_cooldown_secs, 60);
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let toml = r#"
[bootstrap.timing]
motion_cooldown_secs = "soon"
"#;
        let err = parse_table(toml, Path::new("bad.toml")).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, PathBuf::from("bad.toml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_keeps_sibling_keys() {
        let mut base = parse_table(
            r#"
[broker]
endpoint = "tcp://brain:5670"
brain_name = "Attic"
"#,
            Path::new("system.toml"),
        )
        .unwrap();
        let overlay = parse_table(
            r#"
[broker]
endpoint = "tcp://10.0.0.2:5670"
"#,
            Path::new("local.toml"),
        )
        .unwrap();

        merge_tables(&mut base, overlay);
        let config = finish(base).unwrap();
        assert_eq!(config.infra.broker.endpoint, "tcp://10.0.0.2:5670");
        assert_eq!(config.infra.broker.brain_name, "Attic");
    }

    #[test]
    fn test_env_overrides_are_recorded() {
        let vars: HashMap<&str, &str> = [
            ("MEEBO_CLIENT_NAME", "Porch"),
            ("MEEBO_SECURE_MODE", "yes"),
            ("MEEBO_FRIEND_MODE", "maybe"),
            ("RUST_LOG", "meebo=debug"),
        ]
        .into_iter()
        .collect();

        let mut config = MeeboConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides_from(&mut config, &mut sources, |name| {
            vars.get(name).map(|v| v.to_string())
        });

        assert_eq!(config.infra.client.name, "Porch");
        assert!(config.bootstrap.modes.secure_mode);
        // Unparseable flags leave the default alone
        assert!(config.bootstrap.modes.friend_mode);
        assert_eq!(config.infra.telemetry.log_level, "meebo=debug");
        assert!(sources.env_overrides.contains(&"MEEBO_CLIENT_NAME".to_string()));
    }
}
