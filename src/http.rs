//! Shared HTTP client with bounded retry.
//!
//! One [`HttpClient`] is built per run and handed to every component that
//! talks to the network. The underlying `ureq::Agent` pools connections and is
//! safe to share between worker threads.

use std::io::Read;
use std::time::Duration;

use thiserror::Error;

/// Statuses that are worth retrying.
const RETRY_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

#[derive(Error, Debug)]
pub enum HttpError {
    /// Connection, DNS or TLS failure after all retries.
    #[error("request to {url} failed: {detail}")]
    Transport { url: String, detail: String },
    /// Final response had a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("IO error reading response body: {0}")]
    Io(#[from] std::io::Error),
}

/// Retry schedule for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn retries_status(&self, status: u16) -> bool {
        RETRY_STATUSES.contains(&status)
    }
}

/// Cheap "is this remote worth cloning from" check.
pub trait RemoteProbe: Send + Sync {
    fn is_available(&self, url: &str) -> bool;
}

/// HTTP client context.
pub struct HttpClient {
    agent: ureq::Agent,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(policy: RetryPolicy) -> Self {
        let agent = ureq::AgentBuilder::new()
            // 301 is a meaningful answer for the probe, so never follow it.
            .redirects(0)
            .timeout_connect(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("elmirror/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent, policy }
    }

    /// Issue a HEAD request and return the final status code.
    pub fn head(&self, url: &str) -> Result<u16, HttpError> {
        let response = self.call_with_retry(url, || self.agent.head(url).call())?;
        Ok(response.status())
    }

    /// GET `url` and return the body. Any status outside 2xx is an error.
    pub fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self.call_with_retry(url, || self.agent.get(url).call())?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(HttpError::Status {
                url: url.to_string(),
                status,
            });
        }

        let mut body = String::new();
        response.into_reader().read_to_string(&mut body)?;
        Ok(body)
    }

    fn call_with_retry<F>(&self, url: &str, mut send: F) -> Result<ureq::Response, HttpError>
    where
        F: FnMut() -> Result<ureq::Response, ureq::Error>,
    {
        let mut attempt = 0;
        loop {
            let result = match send() {
                Ok(response) => Ok(response),
                // ureq reports 4xx/5xx as errors; for us they are just responses.
                Err(ureq::Error::Status(_, response)) => Ok(response),
                Err(ureq::Error::Transport(transport)) => Err(transport),
            };

            let exhausted = attempt >= self.policy.max_retries;
            match result {
                Ok(response) if exhausted || !self.policy.retries_status(response.status()) => {
                    return Ok(response);
                }
                Ok(response) => {
                    log::debug!(
                        "{} returned {}, retrying ({}/{})",
                        url,
                        response.status(),
                        attempt + 1,
                        self.policy.max_retries
                    );
                }
                Err(transport) if exhausted => {
                    return Err(HttpError::Transport {
                        url: url.to_string(),
                        detail: transport.to_string(),
                    });
                }
                Err(transport) => {
                    log::debug!(
                        "{} failed: {}, retrying ({}/{})",
                        url,
                        transport,
                        attempt + 1,
                        self.policy.max_retries
                    );
                }
            }

            std::thread::sleep(self.policy.backoff(attempt));
            attempt += 1;
        }
    }
}

impl RemoteProbe for HttpClient {
    fn is_available(&self, url: &str) -> bool {
        match self.head(url) {
            Ok(200) | Ok(301) => true,
            Ok(status) => {
                log::warn!("{} returned {}", url, status);
                false
            }
            Err(e) => {
                log::warn!("{}", e);
                false
            }
        }
    }
}
