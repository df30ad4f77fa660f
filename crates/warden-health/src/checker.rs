//! HTTP probe logic and per-service failure tracking.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::BodyExt;
use thiserror::Error;
use tracing::{debug, warn};

use warden_core::ProbeState;

/// Why an HTTP request to a worker or dependency failed.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request to {uri} failed: {reason}")]
    Request { uri: String, reason: String },

    #[error("request to {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },
}

/// Issue a bounded `GET http://{address}{path}` and return status + body.
pub async fn http_get(
    address: &str,
    path: &str,
    timeout: Duration,
) -> Result<(http::StatusCode, Bytes), HttpError> {
    let uri = format!("http://{address}{path}");

    let fut = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| HttpError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HttpError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "warden-health/0.1")
            .body(http_body_util::Empty::<Bytes>::new())
            .map_err(|e| HttpError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        let resp = sender.send_request(req).await.map_err(|e| HttpError::Request {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| HttpError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?
            .to_bytes();
        Ok((status, body))
    };

    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(HttpError::Timeout {
            uri: uri.clone(),
            timeout,
        }),
    }
}

/// Probe a health endpoint. Returns the state and the observed latency.
///
/// 2xx is `Healthy`; anything else, including connection failure or
/// timeout, is `Unhealthy`.
pub async fn http_probe(address: &str, path: &str, timeout: Duration) -> (ProbeState, Duration) {
    let started = Instant::now();
    let state = match http_get(address, path, timeout).await {
        Ok((status, _)) if status.is_success() => ProbeState::Healthy,
        Ok((status, _)) => {
            debug!(%status, %address, %path, "health probe non-2xx");
            ProbeState::Unhealthy
        }
        Err(e) => {
            debug!(error = %e, "health probe failed");
            ProbeState::Unhealthy
        }
    };
    (state, started.elapsed())
}

/// A change in a tracked service's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameUnhealthy,
    Recovered,
}

/// Tracks consecutive probe results for a single service.
#[derive(Debug)]
pub struct HealthTracker {
    /// `None` until the first probe.
    status: Option<ProbeState>,
    consecutive_failures: u32,
    /// Failures before the service is reported unhealthy.
    unhealthy_threshold: u32,
    current_backoff: Duration,
    base_interval: Duration,
    max_backoff: Duration,
}

impl HealthTracker {
    pub fn new(unhealthy_threshold: u32, interval: Duration) -> Self {
        Self {
            status: None,
            consecutive_failures: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            current_backoff: interval,
            base_interval: interval,
            max_backoff: Duration::from_secs(60),
        }
    }

    /// Record a probe result; returns a transition if the status flipped.
    pub fn record(&mut self, result: ProbeState) -> Option<Transition> {
        let previous = self.status;
        match result {
            ProbeState::Healthy => {
                self.consecutive_failures = 0;
                self.current_backoff = self.base_interval;
                self.status = Some(ProbeState::Healthy);
            }
            ProbeState::Unhealthy => {
                self.consecutive_failures += 1;
                // Exponential backoff: double the interval up to max.
                self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
                if self.consecutive_failures >= self.unhealthy_threshold {
                    self.status = Some(ProbeState::Unhealthy);
                }
            }
        }

        match (previous, self.status) {
            (Some(ProbeState::Unhealthy), Some(ProbeState::Healthy)) => Some(Transition::Recovered),
            (prev, Some(ProbeState::Unhealthy)) if prev != Some(ProbeState::Unhealthy) => {
                warn!(
                    failures = self.consecutive_failures,
                    threshold = self.unhealthy_threshold,
                    "service marked unhealthy"
                );
                Some(Transition::BecameUnhealthy)
            }
            _ => None,
        }
    }

    pub fn status(&self) -> Option<ProbeState> {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Suggested delay before the next probe of this service.
    pub fn next_interval(&self) -> Duration {
        self.current_backoff
    }
}
