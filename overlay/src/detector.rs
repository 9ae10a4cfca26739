use std::future::Future;
use std::time::Duration;

use live_overlay_common::config::DetectorConfig;
use live_overlay_common::detection::{Detection, Prediction};
use live_overlay_common::frame::Frame;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use crate::error::{DetectionError, SetupError};
use crate::readiness::ReadySignal;

/// Object detection capability.
///
/// Implementations classify one frame per call and are used by a single
/// frame loop, which never has more than one call in flight.
pub trait Detector: Send + Sync {
    fn detect(
        &self,
        frame: &Frame,
    ) -> impl Future<Output = Result<Vec<Detection>, DetectionError>> + Send;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Detector backed by an HTTP inference service that speaks the COCO-SSD
/// prediction format.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    /// Wait for the service to report a loaded model.
    ///
    /// Polls the health endpoint up to `load_attempts` times; a service that
    /// never becomes healthy means detection is unavailable.
    pub async fn load(config: &DetectorConfig) -> Result<Self, SetupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SetupError::CapabilityUnavailable(e.to_string()))?;
        let retry = Duration::from_secs(config.load_retry_secs);

        for attempt in 1..=config.load_attempts {
            match client.get(&config.health_url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(url = config.url, attempt, "detection model ready");
                    return Ok(Self {
                        client,
                        url: config.url.clone(),
                    });
                }
                Ok(resp) => {
                    debug!(status = %resp.status(), attempt, "detection model still loading");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "detector health check failed");
                }
            }
            if attempt < config.load_attempts {
                tokio::time::sleep(retry).await;
            }
        }

        Err(SetupError::CapabilityUnavailable(format!(
            "detector at {} not ready after {} attempts",
            config.health_url, config.load_attempts
        )))
    }

    /// Load in the background and report the outcome through `signal`.
    pub fn spawn_load(config: DetectorConfig, signal: ReadySignal<HttpDetector>) {
        tokio::spawn(async move {
            match HttpDetector::load(&config).await {
                Ok(detector) => signal.ready(detector),
                Err(e) => signal.failed(e.to_string()),
            }
        });
    }
}

impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "image/jpeg")
            .body(frame.jpeg.clone())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DetectionError::HttpStatus(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        parse_predictions(&body)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Decode a JSON prediction list into detections, preserving order.
pub fn parse_predictions(body: &[u8]) -> Result<Vec<Detection>, DetectionError> {
    let predictions: Vec<Prediction> = serde_json::from_slice(body)?;
    Ok(predictions.into_iter().map(Detection::from).collect())
}
