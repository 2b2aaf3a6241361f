//! Device-cloud client.
//!
//! The device collaborator holds every sensor on the study account. Three
//! calls matter here: the OAuth client-credentials token request, the device
//! directory (used to map recorded device ids to serial numbers), and the
//! historical samples request for one serial over an epoch range.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Device-type tag of the sensors eligible as serial-number sources. Hubs
/// and other device types on the account are ignored.
pub const ELIGIBLE_DEVICE_TYPE: &str = "VIEW_PLUS_BUSINESS";

/// Retry attempts for transient network failures.
const RETRY_ATTEMPTS: u32 = 3;

/// Initial backoff delay; doubles per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Sample resolution accepted by the samples endpoint. The pipeline always
/// requests hourly data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Hour,
    FourHours,
    Day,
    ThreeDays,
    Week,
}

impl Resolution {
    /// Wire value for the resolution query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Hour => "HOUR",
            Resolution::FourHours => "FOUR_HOURS",
            Resolution::Day => "DAY",
            Resolution::ThreeDays => "THREE_DAYS",
            Resolution::Week => "WEEK",
        }
    }
}

/// One device from the account directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Serial number
    pub id: String,
    /// Device-type tag
    pub device_type: String,
    /// Human-readable name, as assigned on the account
    pub name: String,
}

/// Name-to-serial lookup over the eligible devices on the account.
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    serials: BTreeMap<String, String>,
}

impl DeviceDirectory {
    /// Build the directory from a device listing, keeping only the eligible
    /// device type.
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let serials = devices
            .into_iter()
            .filter(|device| device.device_type == ELIGIBLE_DEVICE_TYPE)
            .map(|device| (device.name, device.id))
            .collect();
        Self { serials }
    }

    /// Resolve a recorded device id to its serial number.
    ///
    /// An unknown id is a recoverable per-participant failure; the error
    /// carries the valid options for the log message.
    pub fn resolve(&self, device_id: &str) -> Result<&str, DeviceError> {
        self.serials
            .get(device_id)
            .map(String::as_str)
            .ok_or_else(|| DeviceError::UnknownDevice {
                device_id: device_id.to_string(),
                valid: self.device_ids().into_iter().map(String::from).collect(),
            })
    }

    /// All known device ids, sorted.
    pub fn device_ids(&self) -> Vec<&str> {
        self.serials.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.serials.len()
    }
}

/// Column-oriented raw samples for one device, exactly as retrieved: a
/// shared timestamp column plus one value column per variable, in retrieval
/// order. Values may be non-numeric; cleaning happens in the aligner.
#[derive(Debug, Clone, Default)]
pub struct RawSampleSet {
    /// Epoch seconds per sample
    pub time: Vec<i64>,
    /// (variable name, raw cells), in retrieval order
    pub columns: Vec<(String, Vec<serde_json::Value>)>,
}

/// Source of device data. The HTTP client implements this; tests substitute
/// in-memory fixtures.
pub trait SampleSource {
    fn device_directory(&self) -> Result<DeviceDirectory, DeviceError>;

    fn fetch_samples(
        &self,
        serial: &str,
        start_epoch: i64,
        end_epoch: i64,
        resolution: Resolution,
    ) -> Result<RawSampleSet, DeviceError>;
}

/// Device client error types.
#[derive(Debug)]
pub enum DeviceError {
    /// Network/HTTP error (after retries)
    Network(String),
    /// Server returned a non-success status
    Api { status: u16, message: String },
    /// Token request failed or returned no token
    Auth(String),
    /// Response body could not be interpreted
    Parse(String),
    /// Recorded device id has no serial in the directory
    UnknownDevice { device_id: String, valid: Vec<String> },
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Network(msg) => write!(f, "Device network error: {msg}"),
            DeviceError::Api { status, message } => {
                write!(f, "Device API error ({status}): {message}")
            }
            DeviceError::Auth(msg) => write!(f, "Device auth error: {msg}"),
            DeviceError::Parse(msg) => write!(f, "Device response parse error: {msg}"),
            DeviceError::UnknownDevice { device_id, valid } => {
                write!(
                    f,
                    "device id '{device_id}' is not valid; valid options are: {valid:?}"
                )
            }
        }
    }
}

impl std::error::Error for DeviceError {}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    devices: Vec<DeviceRecord>,
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    id: String,
    #[serde(rename = "deviceType")]
    device_type: String,
    segment: SegmentRecord,
}

#[derive(Debug, Deserialize)]
struct SegmentRecord {
    name: String,
}

/// Async device-cloud client with a cached bearer token.
pub struct DeviceClient {
    config: crate::config::DeviceConfig,
    client: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl DeviceClient {
    /// Create a new device client.
    pub fn new(config: crate::config::DeviceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            client,
            token: Mutex::new(None),
        }
    }

    /// Cached token, if one was stored. A poisoned lock only means a
    /// panicked reader; the cached value itself is still valid.
    fn cached_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_token(&self, token: &str) {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.to_string());
    }

    /// Fetch (or reuse) the access token.
    async fn access_token(&self) -> Result<String, DeviceError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let payload = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", "read:device"),
        ];

        let response = send_with_retry(|| {
            self.client
                .post(&self.config.token_url)
                .form(&payload)
                .send()
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeviceError::Auth(format!(
                "token request failed with status {status}: {message}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeviceError::Parse(e.to_string()))?;
        let token = token_response
            .access_token
            .ok_or_else(|| DeviceError::Auth("no access token in response".to_string()))?;

        self.store_token(&token);
        Ok(token)
    }

    /// Fetch the account's device directory.
    pub async fn device_directory(&self) -> Result<DeviceDirectory, DeviceError> {
        let token = self.access_token().await?;
        let url = format!("{}/devices", self.config.api_base);

        let response = send_with_retry(|| {
            self.client
                .get(&url)
                .header("Authorization", format!("Bearer {token}"))
                .send()
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeviceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let listing: DevicesResponse = response
            .json()
            .await
            .map_err(|e| DeviceError::Parse(e.to_string()))?;

        let directory = DeviceDirectory::from_devices(listing.devices.into_iter().map(|record| {
            Device {
                id: record.id,
                device_type: record.device_type,
                name: record.segment.name,
            }
        }));
        debug!(devices = directory.len(), "device directory loaded");
        Ok(directory)
    }

    /// Fetch historical samples for one serial over a closed epoch range.
    pub async fn fetch_samples(
        &self,
        serial: &str,
        start_epoch: i64,
        end_epoch: i64,
        resolution: Resolution,
    ) -> Result<RawSampleSet, DeviceError> {
        let token = self.access_token().await?;
        let url = format!("{}/devices/{serial}/samples", self.config.api_base);
        let params = [
            ("start", start_epoch.to_string()),
            ("end", end_epoch.to_string()),
            ("resolution", resolution.as_str().to_string()),
        ];

        let response = send_with_retry(|| {
            self.client
                .get(&url)
                .header("Authorization", format!("Bearer {token}"))
                .query(&params)
                .send()
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeviceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;
        parse_samples_body(&body)
    }
}

/// Send a request with bounded retry and exponential backoff on transport
/// failures. Non-success statuses are not retried.
async fn send_with_retry<F, Fut>(mut request: F) -> Result<reqwest::Response, DeviceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut last_error = String::new();

    for attempt in 1..=RETRY_ATTEMPTS {
        match request().await {
            Ok(response) => return Ok(response),
            Err(e) => {
                last_error = e.to_string();
                if attempt < RETRY_ATTEMPTS {
                    warn!(attempt, error = %last_error, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(DeviceError::Network(last_error))
}

/// Parse a samples response body into a [`RawSampleSet`].
///
/// The endpoint returns column-oriented data: a `time` array of epoch
/// seconds alongside one array per variable. Column order is preserved as
/// retrieved.
pub fn parse_samples_body(body: &str) -> Result<RawSampleSet, DeviceError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| DeviceError::Parse(e.to_string()))?;

    let data = value
        .get("data")
        .and_then(|d| d.as_object())
        .ok_or_else(|| DeviceError::Parse("missing 'data' object in response".to_string()))?;

    let mut set = RawSampleSet::default();
    for (name, cells) in data {
        let cells = cells
            .as_array()
            .ok_or_else(|| DeviceError::Parse(format!("column '{name}' is not an array")))?;

        if name == "time" {
            set.time = cells
                .iter()
                .map(|cell| {
                    cell.as_i64()
                        .or_else(|| cell.as_f64().map(|v| v as i64))
                        .ok_or_else(|| {
                            DeviceError::Parse(format!("non-numeric timestamp: {cell}"))
                        })
                })
                .collect::<Result<Vec<i64>, DeviceError>>()?;
        } else {
            set.columns.push((name.clone(), cells.clone()));
        }
    }

    if set.time.is_empty() && !set.columns.is_empty() {
        return Err(DeviceError::Parse(
            "samples response has no time column".to_string(),
        ));
    }

    Ok(set)
}

/// Blocking device client for the sequential pipeline.
pub struct BlockingDeviceClient {
    inner: DeviceClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingDeviceClient {
    /// Create a new blocking device client.
    pub fn new(config: crate::config::DeviceConfig) -> Result<Self, DeviceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DeviceError::Network(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: DeviceClient::new(config),
            runtime,
        })
    }
}

impl SampleSource for BlockingDeviceClient {
    fn device_directory(&self) -> Result<DeviceDirectory, DeviceError> {
        self.runtime.block_on(self.inner.device_directory())
    }

    fn fetch_samples(
        &self,
        serial: &str,
        start_epoch: i64,
        end_epoch: i64,
        resolution: Resolution,
    ) -> Result<RawSampleSet, DeviceError> {
        self.runtime
            .block_on(self.inner.fetch_samples(serial, start_epoch, end_epoch, resolution))
    }
}
