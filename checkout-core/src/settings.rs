use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing;

/// Environment variable naming an alternate settings file.
pub const SETTINGS_ENV: &str = "CHECKOUT_SETTINGS";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub status_log: StatusLogSettings,
}

impl Settings {
    /// Load `checkout.toml` from `root`, or the file named by `CHECKOUT_SETTINGS`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = std::env::var_os(SETTINGS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("checkout.toml"));
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading settings file {}", path.display()))?;
            toml::from_str::<Settings>(&text)
                .with_context(|| format!("parsing settings file {}", path.display()))?
        } else {
            tracing::info!(
                "No settings file found at {}. Using Settings::default().",
                path.display()
            );
            Settings::default()
        };
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        settings.resolve_paths(base);
        Ok(settings)
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.status_log.path = absolutize(root, &self.status_log.path);
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            sampling: SamplingSettings::default(),
            status_log: StatusLogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSettings {
    /// Connect/read window for comparisons without their own `timeout`.
    #[serde(default = "ConnectionSettings::default_timeout_secs")]
    pub timeout_secs: f64,
}

impl ConnectionSettings {
    fn default_timeout_secs() -> f64 {
        1.0
    }

    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingSettings {
    #[serde(default = "SamplingSettings::default_interval_ms")]
    pub interval_ms: u64,
}

impl SamplingSettings {
    fn default_interval_ms() -> u64 {
        100
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusLogSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "StatusLogSettings::default_path")]
    pub path: PathBuf,
}

impl StatusLogSettings {
    fn default_path() -> PathBuf {
        PathBuf::from("checkout-status.jsonl")
    }
}

impl Default for StatusLogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: Self::default_path(),
        }
    }
}

/// Negative, NaN and overflowing inputs collapse to zero.
pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings.connection.timeout_secs, 1.0);
        assert_eq!(settings.sampling.interval_ms, 100);
        assert!(!settings.status_log.enabled);
        assert_eq!(
            settings.status_log.path,
            dir.path().join("checkout-status.jsonl")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkout.toml");
        fs::write(
            &path,
            "[connection]\ntimeout_secs = 0.25\n\n[status_log]\nenabled = true\npath = \"logs/status.jsonl\"\n",
        )
        .unwrap();
        let settings = Settings::load_file(&path).unwrap();
        assert_eq!(settings.connection.timeout(), Duration::from_millis(250));
        assert_eq!(settings.sampling.interval_ms, 100);
        assert!(settings.status_log.enabled);
        assert_eq!(settings.status_log.path, dir.path().join("logs/status.jsonl"));
    }

    #[test]
    fn bad_toml_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkout.toml");
        fs::write(&path, "[connection\n").unwrap();
        let err = Settings::load_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("checkout.toml"));
    }

    // Only test touching CHECKOUT_SETTINGS.
    #[test]
    fn load_reads_root_file_unless_env_overrides() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join("checkout.toml"),
            "[sampling]\ninterval_ms = 20\n",
        )
        .unwrap();
        let other = tempfile::tempdir().unwrap();
        let override_path = other.path().join("site.toml");
        fs::write(
            &override_path,
            "[connection]\ntimeout_secs = 3.0\n\n[status_log]\npath = \"status.jsonl\"\n",
        )
        .unwrap();

        unsafe {
            std::env::remove_var(SETTINGS_ENV);
        }
        let from_root = Settings::load(root.path()).unwrap();
        assert_eq!(from_root.sampling.interval(), Duration::from_millis(20));
        assert_eq!(from_root.connection.timeout_secs, 1.0);

        unsafe {
            std::env::set_var(SETTINGS_ENV, &override_path);
        }
        let overridden = Settings::load(root.path());
        unsafe {
            std::env::remove_var(SETTINGS_ENV);
        }
        let overridden = overridden.unwrap();
        assert_eq!(overridden.connection.timeout(), Duration::from_secs(3));
        assert_eq!(overridden.sampling.interval_ms, 100);
        assert_eq!(overridden.status_log.path, other.path().join("status.jsonl"));
    }

    #[test]
    fn negative_timeout_is_zero() {
        assert_eq!(secs_to_duration(-1.0), Duration::ZERO);
        assert_eq!(secs_to_duration(f64::NAN), Duration::ZERO);
    }
}
