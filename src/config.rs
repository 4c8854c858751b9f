use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::state_manager::StateTtls;

/// 2 GiB.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 2_147_483_648;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Where job records are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StateBackend {
    /// Process-local; records vanish with the process.
    #[default]
    Memory,
    /// Shared SQLite file.
    Sqlite { path: PathBuf },
}

/// Settings for the download manager, usually loaded from `fetchd.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Each target's files live under `<targets_root>/<target_id>/`.
    pub targets_root: PathBuf,
    /// Temp files for in-flight downloads. Keep it on the same filesystem as
    /// `targets_root` so finalizing is a rename.
    pub scratch_dir: PathBuf,
    pub max_size_bytes: u64,
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Lifetime of a downloading record without further progress.
    pub active_ttl_secs: u64,
    /// How long a failed job stays visible to pollers.
    pub error_ttl_secs: u64,
    pub user_agent: String,
    pub state: StateBackend,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            targets_root: PathBuf::from("targets"),
            scratch_dir: PathBuf::from("targets/.downloads"),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            probe_timeout_secs: 10,
            connect_timeout_secs: 30,
            active_ttl_secs: 3600,
            error_ttl_secs: 600,
            user_agent: concat!("fetchd/", env!("CARGO_PKG_VERSION")).to_string(),
            state: StateBackend::Memory,
        }
    }
}

impl FetchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path` if given and present, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                tracing::info!("no config at {}, using defaults", p.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ttls(&self) -> StateTtls {
        StateTtls {
            active: Duration::from_secs(self.active_ttl_secs),
            error: Duration::from_secs(self.error_ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = FetchConfig::default();
        assert_eq!(cfg.max_size_bytes, 2_147_483_648);
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.ttls().active, Duration::from_secs(3600));
        assert_eq!(cfg.ttls().error, Duration::from_secs(600));
        assert_eq!(cfg.state, StateBackend::Memory);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml = r#"
            targets_root = "/srv/daemon-data"
            max_size_bytes = 1_000_000
        "#;
        let cfg: FetchConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.targets_root, PathBuf::from("/srv/daemon-data"));
        assert_eq!(cfg.max_size_bytes, 1_000_000);
        assert_eq!(cfg.error_ttl_secs, 600);
    }

    #[test]
    fn sqlite_backend_section() {
        let toml = r#"
            [state]
            backend = "sqlite"
            path = "/var/lib/fetchd/state.db"
        "#;
        let cfg: FetchConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            cfg.state,
            StateBackend::Sqlite {
                path: PathBuf::from("/var/lib/fetchd/state.db")
            }
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = FetchConfig::load_or_default(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(cfg.active_ttl_secs, 3600);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetchd.toml");
        fs::write(&path, "max_size_bytes = \"big\"").unwrap();
        let err = FetchConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
