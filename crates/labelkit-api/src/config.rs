//! Application settings loaded from TOML.
//!
//! Resolution order: explicit path, `LABELKIT_CONFIG`, `./labelkit.toml`,
//! built-in defaults. A missing file at a candidate location falls through to
//! the next one; a file that exists but does not parse is an error.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use labelkit_core::attestation::{DEFAULT_BODY, DEFAULT_SUBJECT};
use labelkit_core::{parse_validator_names, NameSplitter, Reconciler, Ruleset, SplitterConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const CONFIG_ENV_VAR: &str = "LABELKIT_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "labelkit.toml";
pub const DEFAULT_EXPIRATION: &str = "31/12/2026";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    /// Expiration used when the operator does not pick one.
    pub default_expiration: String,
    /// Free-text allowlist of validator first names (`;`, `,` or `/` separated).
    pub validators: String,
    pub ruleset: Ruleset,
    pub validation_export_dir: PathBuf,
    pub preregistration_dir: PathBuf,
    pub last_import_dir: PathBuf,
    pub last_import_metadata: PathBuf,
    /// Name-only import picked up on startup when present.
    pub auto_import_file: PathBuf,
    /// Banner rows that precede the header of roster spreadsheets.
    pub header_scan_rows: usize,
    pub splitter: SplitterConfig,
    pub attestation_subject: String,
    pub attestation_body: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/app.db"),
            default_expiration: DEFAULT_EXPIRATION.to_string(),
            validators: String::new(),
            ruleset: Ruleset::default(),
            validation_export_dir: PathBuf::from("data/Validation"),
            preregistration_dir: PathBuf::from("data/Preinscriptions"),
            last_import_dir: PathBuf::from("data/last_import"),
            last_import_metadata: PathBuf::from("data/last_import.json"),
            auto_import_file: PathBuf::from("deja_imprimes.csv"),
            header_scan_rows: 6,
            splitter: SplitterConfig::default(),
            attestation_subject: DEFAULT_SUBJECT.to_string(),
            attestation_body: DEFAULT_BODY.to_string(),
        }
    }
}

impl AppConfig {
    /// Resolve and load the configuration.
    ///
    /// # Errors
    /// Returns an error when a candidate file exists but cannot be read or parsed,
    /// or when an explicit path does not exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Some(value) = env::var_os(CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            return Self::from_file(Path::new(&value));
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(local);
        }

        Ok(Self::default())
    }

    /// Parse one TOML file; absent keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&body)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// # Errors
    /// Returns an error when `body` is not valid TOML for this shape.
    pub fn from_toml(body: &str) -> Result<Self> {
        toml::from_str(body).context("invalid labelkit configuration")
    }

    #[must_use]
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.ruleset, &self.default_expiration, parse_validator_names(&self.validators))
    }

    #[must_use]
    pub fn name_splitter(&self) -> NameSplitter {
        NameSplitter::new(&self.splitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() -> Result<()> {
        let config = AppConfig::from_toml(
            r#"
default_expiration = "2027-12-31"
validators = "Yann; Éric"
ruleset = "validator_aware"
"#,
        )?;
        assert_eq!(config.ruleset, Ruleset::ValidatorAware);
        assert_eq!(config.database_path, PathBuf::from("data/app.db"));
        assert_eq!(config.auto_import_file, PathBuf::from("deja_imprimes.csv"));
        assert_eq!(config.reconciler().configured_expiration(), "31/12/2027");
        Ok(())
    }

    #[test]
    fn splitter_lists_are_overridable() -> Result<()> {
        let config = AppConfig::from_toml(
            r#"
[splitter]
particles = ["DE", "VAN"]
common_first_names = ["PIETER"]
"#,
        )?;
        let splitter = config.name_splitter();
        assert!(splitter.is_particle("van"));
        assert!(!splitter.is_particle("LE"));
        Ok(())
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let missing = env::temp_dir().join(format!("labelkit-missing-{}.toml", ulid::Ulid::new()));
        assert!(AppConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn invalid_toml_is_reported() {
        assert!(AppConfig::from_toml("ruleset = 3").is_err());
    }
}
