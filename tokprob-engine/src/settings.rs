//! Settings configuration
//!
//! Default values are defined in `config/default.toml` and embedded at
//! build time. A user file only needs the keys it changes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::ModelOptions;
use crate::probe::{Normalization, TokenProbe};

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub model: ModelSettings,
    pub probe: ProbeSettings,
    pub server: ServerSettings,
}

/// Which model to load and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Registry variant id, used when `gguf` is unset
    pub variant: String,
    /// Local GGUF file (overrides `variant`)
    #[serde(default)]
    pub gguf: Option<PathBuf>,
    /// External tokenizer.json for a local GGUF
    #[serde(default)]
    pub tokenizer_json: Option<PathBuf>,
    /// Context window in tokens (0 = training context)
    pub n_ctx: u32,
    /// Layers offloaded to the GPU
    pub n_gpu_layers: u32,
    /// Inference threads (0 = llama.cpp default)
    pub n_threads: u32,
}

/// Query pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    pub add_bos: bool,
    #[serde(default)]
    pub normalization: Normalization,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Worker threads, one model context each
    pub workers: usize,
    pub queue_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

impl ModelSettings {
    pub fn options(&self) -> ModelOptions {
        ModelOptions {
            n_ctx: self.n_ctx,
            n_gpu_layers: self.n_gpu_layers,
            n_threads: self.n_threads,
        }
    }
}

impl ProbeSettings {
    pub fn probe(&self) -> TokenProbe {
        TokenProbe {
            add_bos: self.add_bos,
            normalization: self.normalization,
        }
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, _) => {
            *base = overlay.clone();
        }
    }
}

/// Parse user TOML content merged on top of default.toml.
fn parse_with_defaults(user_content: &str) -> Result<Settings> {
    let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
    let user: toml::Value = toml::from_str(user_content)?;
    merge_toml(&mut base, &user);
    let settings: Settings = base.try_into()?;
    Ok(settings)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "tokprob", "tokprob")
}

impl Settings {
    /// Get the configuration file path (`<config dir>/tokprob/config.toml`)
    pub fn config_file() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load settings from the default configuration file.
    /// Falls back to embedded default.toml if the config file does not exist.
    pub fn load() -> Result<Self> {
        let Some(config_file) = Self::config_file() else {
            warn!("Could not determine config directory, using defaults");
            return Ok(Self::default());
        };

        if !config_file.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        debug!("Loading config from {:?}", config_file);
        let content = fs::read_to_string(&config_file)?;
        parse_with_defaults(&content)
    }

    /// Load settings from a specific file, merged on top of defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        parse_with_defaults(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.model.variant, "qwen2.5-0.5b-instruct-q4");
        assert!(settings.model.gguf.is_none());
        assert_eq!(settings.model.n_ctx, 512);
        assert!(settings.probe.add_bos);
        assert_eq!(settings.probe.normalization, Normalization::Stable);
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.server.workers, 1);
    }

    #[test]
    fn test_default_variant_is_registered() {
        let settings = Settings::default();
        assert!(
            crate::model::registry()
                .find_variant(&settings.model.variant)
                .is_some()
        );
    }

    #[test]
    fn test_serialize_deserialize() {
        let settings = Settings::default();
        let toml_str = toml::to_string(&settings).unwrap();
        let loaded: Settings = toml::from_str(&toml_str).unwrap();
        assert_eq!(loaded.model.n_ctx, settings.model.n_ctx);
        assert_eq!(loaded.probe.normalization, settings.probe.normalization);
    }

    #[test]
    fn test_partial_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[model]
gguf = "/models/llama-2-7b.Q4_K_M.gguf"
n_ctx = 2048

[probe]
normalization = "naive"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(
            settings.model.gguf.as_deref(),
            Some(Path::new("/models/llama-2-7b.Q4_K_M.gguf"))
        );
        assert_eq!(settings.model.n_ctx, 2048);
        assert_eq!(settings.probe.normalization, Normalization::Naive);
        // Unspecified values keep their defaults
        assert!(settings.probe.add_bos);
        assert_eq!(settings.model.n_gpu_layers, 0);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn test_invalid_normalization_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[probe]\nnormalization = \"fast\"").unwrap();
        assert!(Settings::load_from(file.path()).is_err());
    }

    #[test]
    fn test_probe_from_settings() {
        let mut settings = Settings::default();
        settings.probe.add_bos = false;
        let probe = settings.probe.probe();
        assert!(!probe.add_bos);
        assert_eq!(probe.normalization, Normalization::Stable);
    }

    #[test]
    fn test_model_options_from_settings() {
        let mut settings = Settings::default();
        settings.model.n_gpu_layers = 99;
        let options = settings.model.options();
        assert_eq!(options.n_ctx, 512);
        assert_eq!(options.n_gpu_layers, 99);
    }

    #[test]
    fn test_config_file_name() {
        if let Some(path) = Settings::config_file() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
