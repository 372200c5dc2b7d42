//! Upload pipeline: a single delivery attempt per candidate file.
//!
//! Policy, in order:
//! 1. both delivery modes set: error, file untouched until config is fixed
//! 2. device not valid/reachable: skip, file untouched
//! 3. one mode set: POST the file's lines, then mark processed whatever the
//!    HTTP outcome (no automatic retries)
//! 4. no mode set: skip and mark processed so the scanner moves on
//!
//! The processed rename only happens after the request has resolved, and
//! there is no await point between the two.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::probe::ConnectivityState;
use super::scanner;
use crate::config::{DeliveryMode, DeviceSettings};
use crate::error::{DeliveryError, UploadError};

const UPLOAD_ACTION: &str = "upload_file";

/// Longest response body kept in a failure message
const MAX_ERROR_BODY: usize = 200;

/// Body of a control-plane `ad_hoc` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdHocRequest {
    pub action: String,
    pub params: AdHocParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdHocParams {
    pub lines: Vec<String>,
}

impl AdHocRequest {
    pub fn upload_file(lines: Vec<String>) -> Self {
        Self {
            action: UPLOAD_ACTION.to_string(),
            params: AdHocParams { lines },
        }
    }
}

/// Transport to the device control plane.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Ok only for an HTTP 200 answer.
    async fn post_ad_hoc(&self, url: &str, request: &AdHocRequest) -> Result<(), DeliveryError>;
}

pub struct HttpDeviceClient {
    client: reqwest::Client,
}

impl HttpDeviceClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn post_ad_hoc(&self, url: &str, request: &AdHocRequest) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }

        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotReachable,
    NoModeConfigured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Delivered {
        file: PathBuf,
        processed: PathBuf,
        mode: DeliveryMode,
    },
    DeliveryFailed {
        file: PathBuf,
        processed: PathBuf,
        mode: DeliveryMode,
        error: DeliveryError,
    },
    Skipped {
        file: PathBuf,
        reason: SkipReason,
        /// Set when the skip still consumed the file
        processed: Option<PathBuf>,
    },
}

pub struct UploadPipeline {
    client: Arc<dyn DeviceClient>,
    marker: String,
    timeout: Duration,
}

impl UploadPipeline {
    pub fn new(client: Arc<dyn DeviceClient>, marker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            marker: marker.into(),
            timeout,
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub async fn attempt(
        &self,
        settings: &DeviceSettings,
        connectivity: ConnectivityState,
        candidate: &Path,
    ) -> Result<UploadOutcome, UploadError> {
        // A conflicting mode pair is reported whether or not the device is up
        let mode = settings
            .delivery_mode()
            .map_err(|_| UploadError::MultipleModesActive)?;

        if !connectivity.is_ready() {
            debug!(file = %candidate.display(), "Device not reachable, upload skipped");
            return Ok(UploadOutcome::Skipped {
                file: candidate.to_path_buf(),
                reason: SkipReason::NotReachable,
                processed: None,
            });
        }

        let mode = match mode {
            Some(mode) => mode,
            None => {
                let processed = self.mark(candidate, false)?;
                info!(file = %candidate.display(), "No delivery mode configured, file set aside");
                return Ok(UploadOutcome::Skipped {
                    file: candidate.to_path_buf(),
                    reason: SkipReason::NoModeConfigured,
                    processed: Some(processed),
                });
            }
        };

        let lines = read_lines(candidate).await?;
        let request = AdHocRequest::upload_file(lines);
        let url = settings.upload_url();

        let span = info_span!(
            "upload_attempt",
            attempt_id = %Uuid::now_v7(),
            file = %candidate.display(),
            mode = mode.as_str(),
        );

        let result = async {
            debug!(url = %url, lines = request.params.lines.len(), "Posting file to device");
            match tokio::time::timeout(self.timeout, self.client.post_ad_hoc(&url, &request)).await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Transport(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                ))),
            }
        }
        .instrument(span.clone())
        .await;

        span.in_scope(|| match result {
            Ok(()) => {
                let processed = self.mark(candidate, true)?;
                info!("File delivered");
                Ok(UploadOutcome::Delivered {
                    file: candidate.to_path_buf(),
                    processed,
                    mode,
                })
            }
            Err(error) => {
                let processed = self.mark(candidate, false)?;
                warn!(error = %error, "Delivery failed, file will not be retried");
                Ok(UploadOutcome::DeliveryFailed {
                    file: candidate.to_path_buf(),
                    processed,
                    mode,
                    error,
                })
            }
        })
    }

    fn mark(&self, candidate: &Path, delivered: bool) -> Result<PathBuf, UploadError> {
        scanner::mark_processed(candidate, &self.marker).map_err(|source| {
            UploadError::MarkProcessed {
                path: candidate.to_path_buf(),
                delivered,
                source,
            }
        })
    }
}

async fn read_lines(path: &Path) -> Result<Vec<String>, UploadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| UploadError::ReadCandidate {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    const MARKER: &str = "processed";

    struct RecordingClient {
        requests: Mutex<Vec<(String, AdHocRequest)>>,
        response: Result<(), DeliveryError>,
        delay: Duration,
    }

    impl RecordingClient {
        fn answering(response: Result<(), DeliveryError>) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                response,
                delay: Duration::ZERO,
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DeviceClient for RecordingClient {
        async fn post_ad_hoc(
            &self,
            url: &str,
            request: &AdHocRequest,
        ) -> Result<(), DeliveryError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), request.clone()));
            tokio::time::sleep(self.delay).await;
            self.response.clone()
        }
    }

    fn settings(alfadriver: bool, cr: bool) -> DeviceSettings {
        DeviceSettings {
            ip: "10.0.0.5".to_string(),
            folder_path: "/unused".to_string(),
            api_endpoint: "api".to_string(),
            api_port: 8080,
            alfadriver,
            cr,
        }
    }

    const READY: ConnectivityState = ConnectivityState {
        address_valid: true,
        reachable: true,
    };

    fn pipeline(client: Arc<RecordingClient>) -> UploadPipeline {
        UploadPipeline::new(client, MARKER, Duration::from_secs(3))
    }

    #[tokio::test]
    async fn unreachable_device_makes_no_request() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, "line").unwrap();
        let client = RecordingClient::answering(Ok(()));

        for connectivity in [
            ConnectivityState::default(),
            ConnectivityState {
                address_valid: true,
                reachable: false,
            },
        ] {
            let outcome = pipeline(client.clone())
                .attempt(&settings(true, false), connectivity, &file)
                .await
                .unwrap();
            assert!(matches!(
                outcome,
                UploadOutcome::Skipped {
                    reason: SkipReason::NotReachable,
                    processed: None,
                    ..
                }
            ));
        }

        assert_eq!(client.calls(), 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn both_modes_is_an_error_and_keeps_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, "line").unwrap();
        let client = RecordingClient::answering(Ok(()));

        let err = pipeline(client.clone())
            .attempt(&settings(true, true), READY, &file)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::MultipleModesActive));
        assert_eq!(client.calls(), 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn both_modes_is_reported_while_device_is_down() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, "line").unwrap();
        let client = RecordingClient::answering(Ok(()));
        let down = ConnectivityState {
            address_valid: true,
            reachable: false,
        };

        let err = pipeline(client.clone())
            .attempt(&settings(true, true), down, &file)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::MultipleModesActive));
        assert_eq!(client.calls(), 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn no_mode_marks_file_without_request() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, "line").unwrap();
        let client = RecordingClient::answering(Ok(()));

        let outcome = pipeline(client.clone())
            .attempt(&settings(false, false), READY, &file)
            .await
            .unwrap();

        match outcome {
            UploadOutcome::Skipped {
                reason: SkipReason::NoModeConfigured,
                processed: Some(processed),
                ..
            } => assert_eq!(processed, temp.path().join("a.txt.processed")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(client.calls(), 0);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn delivered_sends_lines_and_marks_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("recipe.txt");
        fs::write(&file, "first\r\nsecond\nthird").unwrap();
        let client = RecordingClient::answering(Ok(()));

        let outcome = pipeline(client.clone())
            .attempt(&settings(false, true), READY, &file)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            UploadOutcome::Delivered {
                mode: DeliveryMode::Cr,
                ..
            }
        ));
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (url, request) = &requests[0];
        assert_eq!(url, "http://10.0.0.5:8080/api/ad_hoc");
        assert_eq!(request.action, "upload_file");
        assert_eq!(request.params.lines, vec!["first", "second", "third"]);
        assert!(temp.path().join("recipe.txt.processed").exists());
    }

    #[tokio::test]
    async fn failed_delivery_still_marks_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, "x").unwrap();
        let client = RecordingClient::answering(Err(DeliveryError::Status {
            status: 503,
            body: "busy".to_string(),
        }));

        let outcome = pipeline(client.clone())
            .attempt(&settings(true, false), READY, &file)
            .await
            .unwrap();

        match outcome {
            UploadOutcome::DeliveryFailed {
                error, processed, ..
            } => {
                assert_eq!(
                    error,
                    DeliveryError::Status {
                        status: 503,
                        body: "busy".to_string()
                    }
                );
                assert!(processed.exists());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn slow_device_times_out_as_failure() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.txt");
        fs::write(&file, "x").unwrap();
        let client = Arc::new(RecordingClient {
            requests: Mutex::new(Vec::new()),
            response: Ok(()),
            delay: Duration::from_secs(10),
        });

        let pipeline = UploadPipeline::new(client.clone(), MARKER, Duration::from_millis(50));
        let outcome = pipeline
            .attempt(&settings(true, false), READY, &file)
            .await
            .unwrap();

        match outcome {
            UploadOutcome::DeliveryFailed { error, .. } => {
                assert!(error.to_string().contains("timed out"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_candidate_is_left_for_next_tick() {
        let temp = tempdir().unwrap();
        let client = RecordingClient::answering(Ok(()));

        let err = pipeline(client.clone())
            .attempt(&settings(true, false), READY, &temp.path().join("gone.txt"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ReadCandidate { .. }));
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn request_serializes_to_wire_shape() {
        let request = AdHocRequest::upload_file(vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "upload_file", "params": {"lines": ["a", "b"]}})
        );
    }
}
