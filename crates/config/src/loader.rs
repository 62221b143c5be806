use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::BridgeConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "wabridge.toml",
    "wabridge.yaml",
    "wabridge.yml",
    "wabridge.json",
];

const SESSION_STORE_FILENAME: &str = "bot.db";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Load the explicitly requested file, or discover one when no path is given.
///
/// An explicit path that cannot be loaded is an error; a discovered file that
/// fails to parse falls back to defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(path)
        },
        None => Ok(discover_and_load()),
    }
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./wabridge.{toml,yaml,yml,json}`
/// 2. `<user config dir>/wabridge.{toml,yaml,yml,json}`
///
/// Returns `BridgeConfig::default()` if no config file is found.
pub fn discover_and_load() -> BridgeConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return BridgeConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    load_config(&path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
        BridgeConfig::default()
    })
}

/// Apply `BOT_NAME` and `WABRIDGE_SESSION_STORE` on top of file values.
pub fn apply_env_overrides(config: &mut BridgeConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut BridgeConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(name) = non_empty("BOT_NAME") {
        config.identity.display_name = name;
    }
    if let Some(store) = non_empty("WABRIDGE_SESSION_STORE") {
        config.session.store_path = Some(PathBuf::from(store));
    }
}

impl BridgeConfig {
    /// Session store path, falling back to `bot.db` in the data directory.
    #[must_use]
    pub fn session_store_path(&self) -> PathBuf {
        if let Some(path) = &self.session.store_path {
            return path.clone();
        }
        data_dir()
            .map(|dir| dir.join(SESSION_STORE_FILENAME))
            .unwrap_or_else(|| PathBuf::from(SESSION_STORE_FILENAME))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "wabridge")
}

/// User-global config directory.
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// User-global data directory (session store, sidecar state).
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.data_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> Result<BridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        other => Err(Error::UnsupportedFormat(other.to_owned())),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, wabridge_protocol::Routing};

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[rstest]
    #[case("wabridge.toml", "[output]\nrouting = \"split\"\n[tasks]\nmax_concurrent = 4\n")]
    #[case("wabridge.yaml", "output:\n  routing: split\ntasks:\n  max_concurrent: 4\n")]
    #[case("wabridge.yml", "output:\n  routing: split\ntasks:\n  max_concurrent: 4\n")]
    #[case("wabridge.json", r#"{"output":{"routing":"split"},"tasks":{"max_concurrent":4}}"#)]
    fn loads_every_format(#[case] name: &str, #[case] body: &str) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&write(&dir, name, body)).unwrap();
        assert_eq!(cfg.output.routing, Routing::Split);
        assert_eq!(cfg.tasks.max_concurrent, 4);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&write(&dir, "wabridge.ini", "x=1")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ref ext) if ext == "ini"));
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&write(&dir, "wabridge.toml", "[output\n")).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_or_default(Some(Path::new("/nonexistent/wabridge.toml"))).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut cfg = BridgeConfig::default();
        apply_env_overrides_with(&mut cfg, |name| match name {
            "BOT_NAME" => Some("Kirin".into()),
            "WABRIDGE_SESSION_STORE" => Some("/var/lib/wabridge/session.db".into()),
            _ => None,
        });
        assert_eq!(cfg.identity.display_name, "Kirin");
        assert_eq!(
            cfg.session_store_path(),
            PathBuf::from("/var/lib/wabridge/session.db")
        );
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = BridgeConfig::default();
        apply_env_overrides_with(&mut cfg, |_| Some("   ".into()));
        assert_eq!(cfg.identity.display_name, "Awara");
        assert!(cfg.session.store_path.is_none());
    }
}
