use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::WabridgeConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "wabridge.toml",
    "wabridge.yaml",
    "wabridge.yml",
    "wabridge.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<WabridgeConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./wabridge.{toml,yaml,yml,json}` (project-local)
/// 2. `<user config dir>/wabridge.{toml,yaml,yml,json}`
///
/// Returns `WabridgeConfig::default()` if no config file is found.
pub fn discover_and_load() -> WabridgeConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    WabridgeConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/wabridge/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "wabridge").map(|d| d.config_dir().to_path_buf())
}

/// Platform data directory, or `./.wabridge` when none can be determined.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "wabridge")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".wabridge"))
}

/// Apply `WABRIDGE_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: WabridgeConfig) -> WabridgeConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: WabridgeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> WabridgeConfig {
    if let Some(bind) = lookup("WABRIDGE_BIND") {
        config.server.bind = bind;
    }
    if let Some(port) = lookup("WABRIDGE_PORT") {
        match port.parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid WABRIDGE_PORT"),
        }
    }
    if let Some(url) = lookup("WABRIDGE_SIDECAR_URL") {
        config.sidecar.url = url;
    }
    if let Some(dir) = lookup("WABRIDGE_DATA_DIR") {
        config.data_dir = Some(PathBuf::from(dir));
    }
    config
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<WabridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("wabridge.toml");
        std::fs::write(&toml_path, "[server]\nport = 9001\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().server.port, 9001);

        let yaml_path = dir.path().join("wabridge.yaml");
        std::fs::write(&yaml_path, "webhook:\n  max_attempts: 3\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().webhook.max_attempts, 3);

        let json_path = dir.path().join("wabridge.json");
        std::fs::write(&json_path, r#"{"sidecar": {"url": "ws://10.0.0.2:7000"}}"#).unwrap();
        assert_eq!(
            load_config(&json_path).unwrap().sidecar.url,
            "ws://10.0.0.2:7000"
        );
    }

    #[test]
    fn unsupported_extension_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wabridge.ini");
        std::fs::write(&path, "").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config format"));
    }

    #[test]
    fn substitutes_env_defaults_before_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wabridge.toml");
        std::fs::write(
            &path,
            "[server]\nport = ${WABRIDGE_LOADER_TEST_UNSET_PORT:-7070}\n",
        )
        .unwrap();
        assert_eq!(load_config(&path).unwrap().server.port, 7070);
    }

    #[test]
    fn env_overrides_win() {
        let cfg = apply_env_overrides_with(WabridgeConfig::default(), |name| match name {
            "WABRIDGE_BIND" => Some("0.0.0.0".into()),
            "WABRIDGE_PORT" => Some("9999".into()),
            "WABRIDGE_SIDECAR_URL" => Some("ws://sidecar:1".into()),
            "WABRIDGE_DATA_DIR" => Some("/data".into()),
            _ => None,
        });
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.sidecar.url, "ws://sidecar:1");
        assert_eq!(cfg.database_path(), PathBuf::from("/data/wabridge.db"));
    }

    #[test]
    fn invalid_port_override_ignored() {
        let cfg = apply_env_overrides_with(WabridgeConfig::default(), |name| {
            (name == "WABRIDGE_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(cfg.server.port, 8080);
    }
}
