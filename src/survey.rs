//! Survey-export client.
//!
//! The survey collaborator produces the study data log: one row per survey
//! response with the participant id, visit label, visit date/time, and the
//! sparse cohort-code and device-id fields. Retrieval follows the export
//! API's three-step dance (create export, poll progress, download file); the
//! downloaded table is parsed into [`SurveyRow`]s here.

use crate::config::{SurveyColumns, SurveyConfig};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Poll interval while an export is being prepared.
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum number of progress polls before giving up on an export.
const EXPORT_POLL_LIMIT: u32 = 240;

/// One row of the survey export, reduced to the column contract the
/// pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyRow {
    pub participant_id: String,
    /// Visit label ("1".."4")
    pub visit: String,
    /// Visit date string, as recorded
    pub date: String,
    /// Visit time string, as recorded
    pub time: String,
    /// Raw cohort code; present only on rows where it was recorded
    pub cohort_code: Option<String>,
    /// Device identifier; present only on rows where it was recorded
    pub device_id: Option<String>,
}

/// Source of survey rows. The HTTP client implements this; tests substitute
/// in-memory fixtures.
pub trait SurveySource {
    fn fetch_rows(&self, survey_id: &str) -> Result<Vec<SurveyRow>, SurveyError>;
}

/// Survey client error types.
#[derive(Debug)]
pub enum SurveyError {
    /// Network/HTTP error
    Network(String),
    /// Server returned a non-success status
    Api { status: u16, message: String },
    /// The export job reported failure or never completed
    ExportFailed(String),
    /// The downloaded table could not be parsed
    Parse(String),
}

impl std::fmt::Display for SurveyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurveyError::Network(msg) => write!(f, "Survey network error: {msg}"),
            SurveyError::Api { status, message } => {
                write!(f, "Survey API error ({status}): {message}")
            }
            SurveyError::ExportFailed(msg) => write!(f, "Survey export failed: {msg}"),
            SurveyError::Parse(msg) => write!(f, "Survey export parse error: {msg}"),
        }
    }
}

impl std::error::Error for SurveyError {}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    result: ExportResult,
}

#[derive(Debug, Deserialize)]
struct ExportResult {
    #[serde(rename = "progressId")]
    progress_id: Option<String>,
    #[serde(rename = "percentComplete")]
    percent_complete: Option<f64>,
    status: Option<String>,
    #[serde(rename = "fileId")]
    file_id: Option<String>,
}

/// Async survey-export client.
pub struct SurveyClient {
    config: SurveyConfig,
    client: reqwest::Client,
}

impl SurveyClient {
    /// Create a new survey client.
    pub fn new(config: SurveyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    /// Base URL of the export API for the given survey.
    pub fn export_url(&self, survey_id: &str) -> String {
        format!(
            "https://{}.qualtrics.com/API/v3/surveys/{}/export-responses/",
            self.config.data_center, survey_id
        )
    }

    /// Run the full export flow and parse the resulting table.
    pub async fn fetch_rows(&self, survey_id: &str) -> Result<Vec<SurveyRow>, SurveyError> {
        let base_url = self.export_url(survey_id);

        // Step 1: create the export job.
        let body = serde_json::json!({ "format": self.config.export_format });
        let response = self
            .client
            .post(&base_url)
            .header("x-api-token", &self.config.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SurveyError::Network(e.to_string()))?;
        let created: ExportResponse = Self::decode(response).await?;
        let progress_id = created
            .result
            .progress_id
            .ok_or_else(|| SurveyError::ExportFailed("no progress id in response".to_string()))?;

        // Step 2: poll until the export is ready.
        let file_id = self.poll_export(&base_url, &progress_id).await?;

        // Step 3: download the file.
        let download_url = format!("{base_url}{file_id}/file");
        let response = self
            .client
            .get(&download_url)
            .header("x-api-token", &self.config.api_token)
            .send()
            .await
            .map_err(|e| SurveyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SurveyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let content = response
            .text()
            .await
            .map_err(|e| SurveyError::Network(e.to_string()))?;

        let rows = parse_export_csv(&content, &self.config.columns)?;
        info!(survey_id, rows = rows.len(), "survey export downloaded");
        Ok(rows)
    }

    async fn poll_export(&self, base_url: &str, progress_id: &str) -> Result<String, SurveyError> {
        let check_url = format!("{base_url}{progress_id}");

        for _ in 0..EXPORT_POLL_LIMIT {
            let response = self
                .client
                .get(&check_url)
                .header("x-api-token", &self.config.api_token)
                .send()
                .await
                .map_err(|e| SurveyError::Network(e.to_string()))?;
            let checked: ExportResponse = Self::decode(response).await?;

            let status = checked.result.status.unwrap_or_default();
            debug!(
                status,
                percent = checked.result.percent_complete.unwrap_or(0.0),
                "survey export progress"
            );

            match status.as_str() {
                "complete" => {
                    return checked.result.file_id.ok_or_else(|| {
                        SurveyError::ExportFailed("no file id in completed export".to_string())
                    });
                }
                "failed" => {
                    return Err(SurveyError::ExportFailed(
                        "export job reported failure".to_string(),
                    ));
                }
                _ => tokio::time::sleep(EXPORT_POLL_INTERVAL).await,
            }
        }

        Err(SurveyError::ExportFailed(
            "export did not complete in time".to_string(),
        ))
    }

    async fn decode(response: reqwest::Response) -> Result<ExportResponse, SurveyError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SurveyError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| SurveyError::Parse(e.to_string()))
    }
}

/// Blocking survey client for the sequential pipeline.
pub struct BlockingSurveyClient {
    inner: SurveyClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingSurveyClient {
    /// Create a new blocking survey client.
    pub fn new(config: SurveyConfig) -> Result<Self, SurveyError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SurveyError::Network(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: SurveyClient::new(config),
            runtime,
        })
    }
}

impl SurveySource for BlockingSurveyClient {
    fn fetch_rows(&self, survey_id: &str) -> Result<Vec<SurveyRow>, SurveyError> {
        self.runtime.block_on(self.inner.fetch_rows(survey_id))
    }
}

/// Parse a downloaded export table into survey rows.
///
/// The export carries two metadata rows under the header (question labels
/// and an ImportId marker); both are dropped, along with any row that has no
/// participant id.
pub fn parse_export_csv(content: &str, columns: &SurveyColumns) -> Result<Vec<SurveyRow>, SurveyError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| SurveyError::Parse(e.to_string()))?
        .clone();

    let index_of = |name: &str| headers.iter().position(|h| h == name);

    let participant_idx = index_of(&columns.participant_id).ok_or_else(|| {
        SurveyError::Parse(format!("missing column '{}'", columns.participant_id))
    })?;
    let visit_idx = index_of(&columns.visit)
        .ok_or_else(|| SurveyError::Parse(format!("missing column '{}'", columns.visit)))?;
    let date_idx = index_of(&columns.visit_date)
        .ok_or_else(|| SurveyError::Parse(format!("missing column '{}'", columns.visit_date)))?;
    let time_idx = index_of(&columns.visit_time)
        .ok_or_else(|| SurveyError::Parse(format!("missing column '{}'", columns.visit_time)))?;
    let cohort_idx = index_of(&columns.cohort_code);
    let device_idx = index_of(&columns.device_id);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SurveyError::Parse(e.to_string()))?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim().to_string();

        let participant_id = field(participant_idx);
        if !is_participant_id(&participant_id) {
            continue;
        }

        let optional = |idx: Option<usize>| {
            idx.map(field)
                .filter(|value| !value.is_empty())
        };

        rows.push(SurveyRow {
            participant_id,
            visit: field(visit_idx),
            date: field(date_idx),
            time: field(time_idx),
            cohort_code: optional(cohort_idx),
            device_id: optional(device_idx),
        });
    }

    Ok(rows)
}

/// Distinguish real participant ids from the export's metadata rows
/// (repeated question text and the ImportId marker).
fn is_participant_id(value: &str) -> bool {
    !value.is_empty() && !value.starts_with('{') && !value.contains("Participant ID")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_export() -> String {
        [
            "Q2,Q4,Q1,Q1.1,V1.2,V1.4a",
            "Participant ID# (ex: A014),Visit,Date,Time,Group,Device",
            "\"{\"\"ImportId\"\":\"\"QID2_TEXT\"\"}\",meta,meta,meta,meta,meta",
            "A001,1,03-23-2023,14:45,1,A01",
            "A001,2,04-07-2023,10:10,,",
            "A002,1,03-27-2023,15:00,2,A02",
        ]
        .join("\n")
    }

    #[test]
    fn test_parse_skips_metadata_rows() {
        let rows = parse_export_csv(&sample_export(), &SurveyColumns::default()).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.participant_id.starts_with('A')));
    }

    #[test]
    fn test_parse_sparse_fields() {
        let rows = parse_export_csv(&sample_export(), &SurveyColumns::default()).unwrap();
        assert_eq!(rows[0].cohort_code.as_deref(), Some("1"));
        assert_eq!(rows[0].device_id.as_deref(), Some("A01"));
        assert_eq!(rows[1].cohort_code, None);
        assert_eq!(rows[1].device_id, None);
    }

    #[test]
    fn test_parse_missing_required_column() {
        let content = "Q2,Q4,Q1\nA001,1,03-23-2023";
        let err = parse_export_csv(content, &SurveyColumns::default()).unwrap_err();
        assert!(matches!(err, SurveyError::Parse(_)));
    }

    #[test]
    fn test_export_url() {
        let mut config = SurveyConfig::default();
        config.data_center = "sjc1".to_string();
        let client = SurveyClient::new(config);
        assert_eq!(
            client.export_url("SV_abc"),
            "https://sjc1.qualtrics.com/API/v3/surveys/SV_abc/export-responses/"
        );
    }
}
