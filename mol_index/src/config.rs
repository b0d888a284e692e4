use std::fs::File;
use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Persisted next to the index files as `config.yaml`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IndexConfig {
    pub directory: String,
    /// size of the folded path feature space
    pub fingerprint_bits: usize,
    /// longest path, in bonds, hashed into a feature
    pub path_length: usize,
    pub num_workers: usize,
    pub match_timeout_ms: Option<u64>,
    pub version: u64,
    pub num_records: Option<usize>,
}

impl Default for IndexConfig {

    fn default() -> Self {
        Self {
            directory: "/tmp/mol_index".to_string(),
            fingerprint_bits: 1024,
            path_length: 5,
            num_workers: 4,
            match_timeout_ms: Some(1000),
            version: 0,
            num_records: None,
        }
    }
}

impl IndexConfig {

    pub fn from_file(filename: &str) -> Result<Self> {

        let serialized = std::fs::read_to_string(filename)?;
        let deserialized: Self = serde_yaml::from_str(&serialized)?;

        Ok(deserialized)
    }

    pub fn to_file(&self, filename: &str) -> Result<()> {

        let serialized = serde_yaml::to_string(&self)?;
        let mut file = File::create(filename)?;

        file.write_all(serialized.as_bytes())?;
        Ok(())
    }

    pub fn match_timeout(&self) -> Option<Duration> {
        self.match_timeout_ms.map(Duration::from_millis)
    }

    pub fn get_config_filename(&self) -> String {

        return self.directory.clone() + "/config.yaml";
    }

    pub fn get_store_filename(&self) -> String {

        return self.directory.clone() + "/molecules";
    }

    pub fn get_index_filename(&self) -> String {

        return self.directory.clone() + "/index";
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Substructure,
    /// Whole-graph isomorphism: same atom and bond counts, induced correspondence.
    Exact,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChargeMode {
    Ignore,
    DefaultAsUncharged,
    /// A query atom without charge matches any charge.
    #[default]
    DefaultAsAny,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsotopeMode {
    Ignore,
    DefaultAsStandard,
    #[default]
    DefaultAsAny,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StereoMode {
    #[default]
    Ignore,
    Strict,
}

/// Per-request search settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub charge_mode: ChargeMode,
    pub isotope_mode: IsotopeMode,
    pub stereo_mode: StereoMode,
    /// per-match wall clock budget in milliseconds, falls back to the index config
    pub match_timeout: Option<u64>,
    pub limit: Option<usize>,
}

impl SearchOptions {

    pub fn exact() -> Self {
        Self { mode: SearchMode::Exact, ..Self::default() }
    }

    pub fn match_timeout(&self, config: &IndexConfig) -> Option<Duration> {
        self.match_timeout.map(Duration::from_millis).or_else(|| config.match_timeout())
    }
}
