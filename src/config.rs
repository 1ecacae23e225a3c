use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub features: FeatureConfig,
    /// Per-behavior settings, keyed by behavior name
    #[serde(default)]
    pub behaviors: BTreeMap<String, BehaviorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeatureConfig {
    /// Window sizes offered for classifiers
    #[serde(default = "default_window_sizes")]
    pub window_sizes: Vec<usize>,
    /// Scale distances by the pose file's cm_per_pixel when present
    #[serde(default = "default_true")]
    pub use_cm_distances: bool,
    /// Half angle of the field of view used by the closest-identity features
    #[serde(default = "default_half_fov_deg")]
    pub half_fov_deg: f64,
    /// Feature cache directory; no caching when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BehaviorConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_true")]
    pub social_features: bool,
}

fn default_window_sizes() -> Vec<usize> { vec![crate::features::DEFAULT_WINDOW_SIZE] }
fn default_window_size() -> usize { crate::features::DEFAULT_WINDOW_SIZE }
fn default_half_fov_deg() -> f64 { crate::features::social::DEFAULT_HALF_FOV_DEG }
fn default_true() -> bool { true }

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_sizes: default_window_sizes(),
            use_cm_distances: default_true(),
            half_fov_deg: default_half_fov_deg(),
            cache_dir: None,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            social_features: default_true(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Defaults when `path` does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Settings for `behavior`, defaults if it has no entry
    pub fn behavior(&self, behavior: &str) -> BehaviorConfig {
        self.behaviors.get(behavior).cloned().unwrap_or_default()
    }
}
