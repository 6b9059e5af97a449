// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retry with exponential backoff and full jitter, wrapped around every
//! backend call.
//!
//! Classification is strict: 2xx succeeds, 429 and 5xx are retryable, 401 is
//! an authentication failure, and everything else is terminal unless the
//! response body names a known error type. Transient transport failures
//! (timeouts, connection resets) never escape this module; if they persist
//! the caller sees a single terminal error carrying the retry history.

use std::time::Duration;

use rand::RngCore;

use crate::transport::{RawResponse, TransportError};
use crate::{Error, ErrorKind, Result};

/// Exponential backoff parameters.
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
/// for the full-jitter strategy.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Base delay of the first retry.
    pub init_backoff: Duration,
    /// Multiplier applied per retry round.
    pub factor: f64,
    /// Ceiling on a single delay.
    pub max_backoff: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(500),
            factor: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// The retry budget for one logical backend call.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Budget that server-directed delays may extend.
    pub soft_timeout: Duration,
    /// Absolute wall-clock ceiling.
    pub hard_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            soft_timeout: Duration::from_secs(1_800),
            hard_timeout: Duration::from_secs(3_600),
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            soft_timeout: settings.retry_soft_timeout(),
            hard_timeout: settings.retry_hard_timeout(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Produces consecutive jittered delays; the attempt counter resets whenever
/// the server dictates the delay itself.
struct Backoff {
    config: BackoffConfig,
    tries: u32,
    rng: Option<Box<dyn RngCore + Send>>,
}

impl Backoff {
    fn new(config: BackoffConfig, rng: Option<Box<dyn RngCore + Send>>) -> Self {
        Self {
            config,
            tries: 0,
            rng,
        }
    }

    fn reset(&mut self) {
        self.tries = 0;
    }

    fn next(&mut self) -> Duration {
        self.tries += 1;
        let exponent = (self.tries - 1) as i32;
        let sleep = self.config.init_backoff.as_secs_f64() * self.config.factor.powi(exponent);
        let jitter = match self.rng.as_mut() {
            Some(rng) => (rng.next_u64() as f64) / (u64::MAX as f64),
            None => rand::Rng::gen_range(&mut rand::thread_rng(), 0.0..1.0),
        };
        let sleep = (sleep * jitter).min(self.config.max_backoff.as_secs_f64());
        Duration::from_secs_f64(sleep)
    }
}

/// How a single response should be handled.
enum Disposition {
    Success,
    Retry,
    Terminal(Error),
}

/// Applies the status taxonomy to a response.
fn classify_response(response: &RawResponse) -> Disposition {
    match response.status {
        200..=299 => Disposition::Success,
        429 | 500..=599 => Disposition::Retry,
        401 => Disposition::Terminal(ErrorKind::InvalidCredentials.into()),
        status => Disposition::Terminal(classify_error_body(status, &response.body)),
    }
}

/// A non-retryable non-success status: the body may still carry a known,
/// more specific error type.
fn classify_error_body(status: u16, body: &[u8]) -> Error {
    if let Ok(content) = serde_json::from_slice::<serde_json::Value>(body) {
        if content.get("errorType").and_then(|v| v.as_str()) == Some("ACCESS_DENIED") {
            return ErrorKind::ProjectInaccessible.into();
        }
    }
    ErrorKind::unexpected_response(status, body)
}

/// Calls `call` until it succeeds, the classification turns terminal, or the
/// retry budget runs out.
///
/// A `Retry-After` header overrides the computed delay, resets the backoff
/// attempt counter, and extends the soft budget by the server-directed wait
/// (it still consumes wall clock against the hard budget).
pub(crate) async fn with_retries<F, Fut>(policy: &RetryPolicy, call: F) -> Result<RawResponse>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<RawResponse, TransportError>>,
{
    with_retries_with_rng(policy, None, call).await
}

pub(crate) async fn with_retries_with_rng<F, Fut>(
    policy: &RetryPolicy,
    rng: Option<Box<dyn RngCore + Send>>,
    mut call: F,
) -> Result<RawResponse>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<RawResponse, TransportError>>,
{
    let start = tokio::time::Instant::now();
    let mut backoff = Backoff::new(policy.backoff.clone(), rng);
    let mut attempts: u32 = 0;
    let mut soft_extension = Duration::ZERO;
    let mut last_response: Option<RawResponse> = None;
    let mut last_transport_error: Option<TransportError> = None;

    loop {
        attempts += 1;
        let server_delay = match call().await {
            Ok(response) => match classify_response(&response) {
                Disposition::Success => return Ok(response),
                Disposition::Terminal(error) => return Err(error),
                Disposition::Retry => {
                    let delay = response.retry_after.map(Duration::from_secs);
                    last_response = Some(response);
                    delay
                }
            },
            Err(error) => {
                if matches!(error, TransportError::Timeout(_)) {
                    tracing::warn!(
                        %error,
                        "backend request timed out, retrying; check the network connection \
                         or raise NEPTUNE_HTTP_REQUEST_TIMEOUT_SECONDS"
                    );
                }
                last_transport_error = Some(error);
                None
            }
        };

        let sleep = match server_delay {
            Some(delay) => {
                soft_extension += delay;
                backoff.reset();
                delay
            }
            None => backoff.next(),
        };

        let elapsed = start.elapsed();
        let soft_remaining = (policy.soft_timeout + soft_extension).saturating_sub(elapsed);
        let hard_remaining = policy.hard_timeout.saturating_sub(elapsed);
        let remaining = soft_remaining.min(hard_remaining);
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(sleep.min(remaining)).await;
    }

    let elapsed = start.elapsed();
    let error = ErrorKind::retry_exhausted(
        attempts,
        elapsed,
        last_response.as_ref().map(|r| r.status),
        last_response.as_ref().map(|r| r.body.as_slice()),
    );
    match last_transport_error {
        Some(source) => Err(error.with_source(source)),
        None => Err(error),
    }
}
