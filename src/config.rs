//! Configuration for the analysis pipeline.
//!
//! Everything the run needs is explicit configuration: survey export
//! identity, device-cloud credentials, the variable list, output locations,
//! and the per-participant collection-end overrides. Credentials are read
//! from the config file or the environment, never compiled in.

use crate::core::align::MissingPolicy;
use crate::core::stats::DEFAULT_PM25_THRESHOLD;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Export formats the survey collaborator can produce.
pub const SUPPORTED_EXPORT_FORMATS: &[&str] = &["csv", "tsv", "spss"];

/// Required prefix for survey identifiers.
pub const SURVEY_ID_PREFIX: &str = "SV_";

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub survey: SurveyConfig,
    pub device: DeviceConfig,
    pub study: StudyConfig,
}

impl Config {
    /// Load configuration from the default location, then apply environment
    /// overrides for credentials.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            serde_json::from_str::<Config>(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("aire-pipeline")
            .join("config.json")
    }

    /// Ensure the output directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.study.output_dir)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Validate configuration-level inputs. Violations abort the run before
    /// any network call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_EXPORT_FORMATS.contains(&self.survey.export_format.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "export format must be one of {SUPPORTED_EXPORT_FORMATS:?}, got '{}'",
                self.survey.export_format
            )));
        }
        if !self.survey.survey_id.starts_with(SURVEY_ID_PREFIX) {
            return Err(ConfigError::Invalid(format!(
                "survey id must match ^{SURVEY_ID_PREFIX}.*, got '{}'",
                self.survey.survey_id
            )));
        }
        if self.survey.api_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "survey API token is not set (config file or AIRE_SURVEY_TOKEN)".to_string(),
            ));
        }
        if self.survey.data_center.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "survey data center is not set".to_string(),
            ));
        }
        if self.study.variables.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one environmental variable must be configured".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("AIRE_SURVEY_TOKEN") {
            self.survey.api_token = token;
        }
        if let Ok(id) = std::env::var("AIRE_DEVICE_CLIENT_ID") {
            self.device.client_id = id;
        }
        if let Ok(secret) = std::env::var("AIRE_DEVICE_CLIENT_SECRET") {
            self.device.client_secret = secret;
        }
    }
}

/// Survey-export collaborator settings and column contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    /// API token for the survey account
    pub api_token: String,
    /// Data-center identifier of the survey organization
    pub data_center: String,
    /// Survey identifier (must start with `SV_`)
    pub survey_id: String,
    /// Requested export format
    pub export_format: String,
    /// Column names in the export table
    pub columns: SurveyColumns,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            data_center: String::new(),
            survey_id: String::from(SURVEY_ID_PREFIX),
            export_format: "csv".to_string(),
            columns: SurveyColumns::default(),
        }
    }
}

/// Names of the relevant columns in the survey export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyColumns {
    pub participant_id: String,
    pub visit: String,
    pub visit_date: String,
    pub visit_time: String,
    pub cohort_code: String,
    pub device_id: String,
}

impl Default for SurveyColumns {
    fn default() -> Self {
        Self {
            participant_id: "Q2".to_string(),
            visit: "Q4".to_string(),
            visit_date: "Q1".to_string(),
            visit_time: "Q1.1".to_string(),
            cohort_code: "V1.2".to_string(),
            device_id: "V1.4a".to_string(),
        }
    }
}

/// Device-cloud collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Token endpoint
    pub token_url: String,
    /// Base URL for data requests
    pub api_base: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: "https://accounts-api.airthings.com/v1/token".to_string(),
            api_base: "https://ext-api.airthings.com/v1".to_string(),
        }
    }
}

/// Study-level analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Environmental variables to analyze
    pub variables: Vec<String>,
    /// Directory for CSV artifacts
    pub output_dir: PathBuf,
    /// Exceedance threshold for pm25
    pub pm25_threshold: f64,
    /// Missing-value handling for cleaned series
    pub missing_policy: MissingPolicy,
    /// Recorded end-of-collection timestamps for participants who stopped
    /// using their device early, keyed by participant id
    pub end_overrides: BTreeMap<String, NaiveDateTime>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            variables: vec![
                "co2".to_string(),
                "humidity".to_string(),
                "light".to_string(),
                "pressure".to_string(),
                "sla".to_string(),
                "temp".to_string(),
                "voc".to_string(),
                "pm25".to_string(),
            ],
            output_dir: PathBuf::from("outputs"),
            pm25_threshold: DEFAULT_PM25_THRESHOLD,
            missing_policy: MissingPolicy::default(),
            end_overrides: BTreeMap::new(),
        }
    }
}

/// Configuration errors. These are the only fatal errors in the pipeline.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
