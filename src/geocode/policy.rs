//! Per-entity-type geocoding configuration.
//!
//! Loaded once at setup from `<config dir>/geocoder/policy.json`; missing
//! keys fall back to the defaults below.

use super::types::AccuracyLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Distance unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    Km,
    Miles,
}

impl Unit {
    /// Mean Earth radius in this unit.
    pub fn earth_radius(&self) -> f64 {
        match self {
            Self::Km => 6371.04,
            Self::Miles => 3958.75,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Km => write!(f, "km"),
            Self::Miles => write!(f, "miles"),
        }
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "km" | "kilometers" | "kilometres" => Ok(Self::Km),
            "mi" | "mile" | "miles" => Ok(Self::Miles),
            other => Err(format!("Unknown unit '{}'. Use 'km' or 'miles'.", other)),
        }
    }
}

/// Entity field names that receive the geocoding result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapping {
    pub lat: String,
    pub lng: String,
    pub formatted_address: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            lat: "lat".into(),
            lng: "lng".into(),
            formatted_address: "formatted_address".into(),
        }
    }
}

/// Acceptance thresholds and address assembly rules for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingPolicy {
    pub min_accuracy: AccuracyLevel,
    pub allow_inconclusive: bool,
    /// Component tags every accepted match must carry (e.g. "postal_code").
    pub expected_components: BTreeSet<String>,
    pub unit: Unit,
    /// Entity fields joined, in order, into the address query.
    pub source_fields: Vec<String>,
    /// Re-geocode entities that already hold coordinates.
    pub overwrite: bool,
    pub fields: FieldMapping,
}

impl Default for GeocodingPolicy {
    fn default() -> Self {
        Self {
            min_accuracy: AccuracyLevel::SubLocality,
            allow_inconclusive: false,
            expected_components: BTreeSet::new(),
            unit: Unit::Km,
            source_fields: vec!["street".into(), "zip".into(), "city".into()],
            overwrite: false,
            fields: FieldMapping::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl GeocodingPolicy {
    /// Load from the default location, or defaults if no file exists there.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if !path.exists() {
            log::debug!("no policy file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load from a specific JSON file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let policy = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("loaded geocoding policy from {}", path.display());
        Ok(policy)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("geocoder")
            .join("policy.json")
    }

    pub fn expect(mut self, component: impl Into<String>) -> Self {
        self.expected_components.insert(component.into());
        self
    }
}
