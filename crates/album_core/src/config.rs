//! Client configuration

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration, one TOML table per component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub preload: PreloadConfig,
    pub lazy: LazyConfig,
    pub masonry: MasonryConfig,
    pub justified: JustifiedConfig,
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Rolling log files older than this are removed at startup
    pub log_retention_days: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { log_retention_days: 7 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    /// Bound on a whole-asset load (streamed originals are not bounded)
    pub load_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            connect_timeout_secs: 10,
            load_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

/// Background preload scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    pub enabled: bool,
    /// Pause between two background fetches
    pub cooldown_ms: u64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: 100,
        }
    }
}

impl PreloadConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Viewport-gated lazy loading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyConfig {
    /// Images start loading once within this many pixels of the viewport
    pub root_margin_px: f32,
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self { root_margin_px: 1000.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasonryConfig {
    pub column_width: f32,
    pub gap: f32,
    /// Width/height assumed before the real ratio is known
    pub default_aspect: f64,
}

impl Default for MasonryConfig {
    fn default() -> Self {
        Self {
            column_width: 160.0,
            gap: 8.0,
            default_aspect: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JustifiedConfig {
    pub target_row_height: f32,
    pub default_aspect: f64,
    pub min_item_width: f32,
}

impl Default for JustifiedConfig {
    fn default() -> Self {
        Self {
            target_row_height: 300.0,
            default_aspect: 1.33,
            min_item_width: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Warm thumb and display tiers of the next/previous photo
    pub preload_adjacent: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { preload_adjacent: true }
    }
}

impl AppConfig {
    /// Load from the platform config file, defaults when it does not exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            tracing::info!("Configuration loaded from {:?}", path);
            Ok(config)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    /// Reject sizes the layout engines cannot work with
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} must be a positive number, got {}", name, value))
            }
        };

        positive("masonry.column_width", f64::from(self.masonry.column_width))?;
        positive("masonry.default_aspect", self.masonry.default_aspect)?;
        positive("justified.target_row_height", f64::from(self.justified.target_row_height))?;
        positive("justified.default_aspect", self.justified.default_aspect)?;
        if !self.masonry.gap.is_finite() || self.masonry.gap < 0.0 {
            anyhow::bail!("masonry.gap must not be negative, got {}", self.masonry.gap);
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "PhotoAlbum", "album_warm")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.preload.cooldown(), Duration::from_millis(100));
        assert_eq!(config.lazy.root_margin_px, 1000.0);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[preload]\ncooldown_ms = 250\n\n[masonry]\ngap = 4.0\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.preload.cooldown_ms, 250);
        assert!(config.preload.enabled);
        assert_eq!(config.masonry.gap, 4.0);
        assert_eq!(config.masonry.column_width, 160.0);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.server.base_url = "https://photos.example.com".into();
        config.viewer.preload_adjacent = false;

        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_degenerate_sizes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[masonry]\ncolumn_width = 0.0\ngap = 0.0\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("masonry.column_width"));

        std::fs::write(&path, "[justified]\ndefault_aspect = -1.0\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());

        std::fs::write(&path, "[masonry]\ngap = -4.0\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[preload\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
