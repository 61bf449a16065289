//! Fetches whose failures are classified into actionable [`RequestResult`]s.
//!
//! # Logic
//!
//! [`fetch_and_classify`] runs a caller-supplied fetch routine as a [`CancelableTask`]:
//!
//! 1. Canceling the task aborts the [`AbortSignal`] handed to the fetch routine.
//! 2. With an [`Expiry`], the server's clock is consulted first. An expired reference
//!    resolves as [`RequestResult::Expired`] without fetching.
//! 3. Failures are sorted by [`classify`]:
//!    - a response with a `Retry-After` header is retryable at the indicated instant,
//!    - a `403` response is [`RequestResult::Forbidden`],
//!    - a transport failure is retryable after [`FetchOptions::network_retry_delay`],
//!    - anything else is a plain [`RequestResult::Error`].
//!
//! Whatever is awaited, a task that was canceled meanwhile settles as
//! [`TaskError::Canceled`] instead of yielding a classification.

use core::{
    fmt::{self, Debug, Formatter},
    future::Future,
    time::Duration,
};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use tendril::{callback, AbortController, AbortSignal, CancelableTask, TaskError, TaskState};
use thiserror::Error;
use tracing::{debug, warn};

/// How long to wait before retrying after a transport failure, unless configured otherwise.
pub const DEFAULT_NETWORK_RETRY_DELAY: Duration = Duration::from_secs(3);

/// The parts of an HTTP response that matter for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    /// The status code.
    pub status: u16,
    /// Header name-value pairs, in received order.
    pub headers: Vec<(String, String)>,
}

impl ResponseInfo {
    /// A response with `status` and no headers.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The value of the first header called `name`, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// How a fetch routine can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The server responded, but not successfully.
    #[error("request failed with status {}", .0.status)]
    Response(ResponseInfo),
    /// No response was received.
    #[error("network error: {0}")]
    Transport(String),
    /// Anything else, e.g. an undecodable body.
    #[error("{0}")]
    Other(String),
}

/// The outcome of [`fetch_and_classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestResult<D> {
    /// The fetch succeeded.
    Success(D),
    /// The reference expired before it could be fetched. Refresh it.
    Expired,
    /// The server refused access. Refresh the reference.
    Forbidden,
    /// Try again at `retry_at`.
    ErrorRetryable {
        /// The earliest sensible retry instant.
        retry_at: DateTime<Utc>,
        /// A human-readable account of the failure.
        description: String,
    },
    /// Unrecoverable. Surface it to the user.
    Error {
        /// A human-readable account of the failure.
        description: String,
    },
}

/// An authoritative time source, usually the server's.
pub trait Clock: Send + Sync {
    /// The current time according to this clock.
    fn server_now(&self) -> CancelableTask<'static, DateTime<Utc>>;
}

/// A [`Clock`] that trusts the local system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn server_now(&self) -> CancelableTask<'static, DateTime<Utc>> {
        CancelableTask::ready(Ok(Utc::now()))
    }
}

type IsExpired<R> = Box<dyn Send + Sync + Fn(&R, DateTime<Utc>) -> bool>;

/// Checks references of type `R` for expiry against a [`Clock`] before fetching them.
pub struct Expiry<R> {
    is_expired: IsExpired<R>,
    clock: Arc<dyn Clock>,
}

impl<R> Debug for Expiry<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expiry").finish_non_exhaustive()
    }
}

impl<R> Expiry<R> {
    /// `is_expired` receives the reference and the clock's current time.
    pub fn new(
        is_expired: impl 'static + Send + Sync + Fn(&R, DateTime<Utc>) -> bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            is_expired: Box::new(is_expired),
            clock,
        }
    }
}

/// Options for [`fetch_and_classify`].
#[derive(Debug)]
pub struct FetchOptions<R> {
    /// Checked before fetching, if present.
    pub expiry: Option<Expiry<R>>,
    /// How long to wait before retrying after a transport failure.
    pub network_retry_delay: Duration,
}

impl<R> Default for FetchOptions<R> {
    fn default() -> Self {
        Self {
            expiry: None,
            network_retry_delay: DEFAULT_NETWORK_RETRY_DELAY,
        }
    }
}

impl<R> FetchOptions<R> {
    /// Sets [`FetchOptions::expiry`].
    #[must_use]
    pub fn with_expiry(self, expiry: Expiry<R>) -> Self {
        Self {
            expiry: Some(expiry),
            ..self
        }
    }

    /// Sets [`FetchOptions::network_retry_delay`].
    #[must_use]
    pub fn with_network_retry_delay(self, network_retry_delay: Duration) -> Self {
        Self {
            network_retry_delay,
            ..self
        }
    }
}

/// Fetches `reference` through `fetch` and classifies the outcome.
///
/// See the [module documentation](`self`).
///
/// # Errors
///
/// The task only fails with [`TaskError::Canceled`]. Every other failure is classified.
pub fn fetch_and_classify<'a, R, D, F, Fut>(
    reference: R,
    fetch: F,
    options: FetchOptions<R>,
) -> CancelableTask<'a, RequestResult<D>>
where
    R: 'a + Send,
    D: 'a,
    F: 'a + Send + FnOnce(R, AbortSignal) -> Fut,
    Fut: 'a + Send + Future<Output = Result<D, FetchError>>,
{
    CancelableTask::new(move |state: Arc<TaskState>| {
        let controller = AbortController::new();
        state.cancelers().add(callback({
            let controller = controller.clone();
            move |()| {
                controller.abort();
            }
        }));

        async move {
            let FetchOptions {
                expiry,
                network_retry_delay,
            } = options;

            if let Some(expiry) = expiry {
                let server_now = expiry.clock.server_now();
                let clock = server_now.handle();
                state.cancelers().add(callback(move |()| {
                    clock.cancel();
                }));

                let outcome = server_now.await;
                state.ensure_live()?;
                let now = match outcome {
                    Ok(now) => now,
                    Err(error) if error.is_canceled() => return Err(error),
                    Err(error) => {
                        debug!(%error, "couldn't check expiry");
                        return Ok(RequestResult::Error {
                            description: error.to_string(),
                        });
                    }
                };
                if (expiry.is_expired)(&reference, now) {
                    debug!(%now, "reference expired");
                    return Ok(RequestResult::Expired);
                }
            }

            let outcome = fetch(reference, controller.signal()).await;
            state.ensure_live()?;
            Ok::<_, TaskError>(match outcome {
                Ok(data) => RequestResult::Success(data),
                Err(error) => classify(&error, Utc::now(), network_retry_delay),
            })
        }
    })
}

/// Sorts a fetch failure into a [`RequestResult`].
///
/// `now` anchors relative `Retry-After` values and the network retry delay.
#[must_use]
pub fn classify<D>(
    error: &FetchError,
    now: DateTime<Utc>,
    network_retry_delay: Duration,
) -> RequestResult<D> {
    let description = error.to_string();
    let result = match error {
        FetchError::Response(response) => {
            if let Some(raw) = response.header("retry-after") {
                if let Some(retry_at) = parse_retry_after(raw, now) {
                    RequestResult::ErrorRetryable {
                        retry_at,
                        description,
                    }
                } else {
                    warn!(retry_after = raw, "unparseable Retry-After header");
                    RequestResult::Error { description }
                }
            } else if response.status == 403 {
                RequestResult::Forbidden
            } else {
                RequestResult::Error { description }
            }
        }
        FetchError::Transport(_) => match TimeDelta::from_std(network_retry_delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
        {
            Some(retry_at) => RequestResult::ErrorRetryable {
                retry_at,
                description,
            },
            None => RequestResult::Error { description },
        },
        FetchError::Other(_) => RequestResult::Error { description },
    };
    debug!(%error, kind = kind(&result), "classified fetch failure");
    result
}

fn kind<D>(result: &RequestResult<D>) -> &'static str {
    match result {
        RequestResult::Success(_) => "success",
        RequestResult::Expired => "expired",
        RequestResult::Forbidden => "forbidden",
        RequestResult::ErrorRetryable { .. } => "error_retryable",
        RequestResult::Error { .. } => "error",
    }
}

/// The obsolete HTTP-date forms: RFC 850 and asctime.
const OBSOLETE_HTTP_DATES: [&str; 2] = ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Parses a `Retry-After` header value into an instant.
///
/// The value is either a number of seconds after `now` or an HTTP-date, in any of
/// the IMF-fixdate, RFC 850 or asctime forms.
///
/// **Returns** [`None`] iff the value is neither, or if the instant is out of range.
#[must_use]
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay));
    }
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    OBSOLETE_HTTP_DATES
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|date| date.and_utc())
}
