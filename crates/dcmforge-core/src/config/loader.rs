//! Loads and validates the eight detector YAML files plus the
//! `semantic-token-map` (§6). Defaults are embedded at compile time so the
//! crate works out of the box; callers may point at an on-disk override
//! directory to customize rules without a rebuild.

use std::path::Path;

use thiserror::Error;

use super::types::DetectorConfig;
use crate::text::NormalizerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

macro_rules! embedded_default {
    ($name:ident, $file:literal) => {
        const $name: &str = include_str!(concat!("../../resources/", $file));
    };
}

embedded_default!(PROVENANCE_YAML, "provenance-detection.yaml");
embedded_default!(TECHNIQUE_YAML, "technique-detection.yaml");
embedded_default!(MODIFIER_YAML, "modifier-detection.yaml");
embedded_default!(BASE_YAML, "base-detection.yaml");
embedded_default!(CONSTRUCT_YAML, "construct-detection.yaml");
embedded_default!(ACCELERATION_YAML, "acceleration-detection.yaml");
embedded_default!(CONTRAST_YAML, "contrast-detection.yaml");
embedded_default!(BODY_PART_YAML, "body_part-detection.yaml");
embedded_default!(SEMANTIC_TOKEN_MAP_YAML, "semantic-token-map.yaml");

/// Every detector's typed config plus the normalizer config, all resolved
/// at construction time (§6: "may load and validate at detector
/// construction; hot-reload is not required").
#[derive(Debug, Clone)]
pub struct ClassificationConfig {
    pub provenance: DetectorConfig,
    pub technique: DetectorConfig,
    pub modifier: DetectorConfig,
    pub base: DetectorConfig,
    pub construct: DetectorConfig,
    pub acceleration: DetectorConfig,
    pub contrast: DetectorConfig,
    pub body_part: DetectorConfig,
    pub normalizer: NormalizerConfig,
}

impl ClassificationConfig {
    /// The configuration baked into the binary. Use this unless an
    /// operator has supplied a config directory to override it.
    pub fn embedded() -> Result<Self, ConfigError> {
        Ok(Self {
            provenance: parse_str(PROVENANCE_YAML, "provenance-detection.yaml")?,
            technique: parse_str(TECHNIQUE_YAML, "technique-detection.yaml")?,
            modifier: parse_str(MODIFIER_YAML, "modifier-detection.yaml")?,
            base: parse_str(BASE_YAML, "base-detection.yaml")?,
            construct: parse_str(CONSTRUCT_YAML, "construct-detection.yaml")?,
            acceleration: parse_str(ACCELERATION_YAML, "acceleration-detection.yaml")?,
            contrast: parse_str(CONTRAST_YAML, "contrast-detection.yaml")?,
            body_part: parse_str(BODY_PART_YAML, "body_part-detection.yaml")?,
            normalizer: parse_str(SEMANTIC_TOKEN_MAP_YAML, "semantic-token-map.yaml")?,
        })
    }

    /// Load from a directory containing the nine YAML files, named exactly
    /// as in §6, falling back to embedded defaults for any file absent.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        let defaults = Self::embedded()?;
        Ok(Self {
            provenance: load_or(dir, "provenance-detection.yaml", defaults.provenance)?,
            technique: load_or(dir, "technique-detection.yaml", defaults.technique)?,
            modifier: load_or(dir, "modifier-detection.yaml", defaults.modifier)?,
            base: load_or(dir, "base-detection.yaml", defaults.base)?,
            construct: load_or(dir, "construct-detection.yaml", defaults.construct)?,
            acceleration: load_or(dir, "acceleration-detection.yaml", defaults.acceleration)?,
            contrast: load_or(dir, "contrast-detection.yaml", defaults.contrast)?,
            body_part: load_or(dir, "body_part-detection.yaml", defaults.body_part)?,
            normalizer: load_or(dir, "semantic-token-map.yaml", defaults.normalizer)?,
        })
    }
}

fn parse_str<T: serde::de::DeserializeOwned>(raw: &str, name: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: name.to_string(),
        source,
    })
}

fn load_or<T: serde::de::DeserializeOwned>(dir: &Path, filename: &str, default: T) -> Result<T, ConfigError> {
    let path = dir.join(filename);
    if !path.exists() {
        return Ok(default);
    }
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_str(&raw, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_config_parses() {
        let config = ClassificationConfig::embedded().expect("embedded config must parse");
        assert!(!config.technique.classes.is_empty());
        assert!(!config.provenance.classes.is_empty());
    }
}
