use std::fmt;

/// LLM call failure with the classification the cascade needs to pick its
/// recovery: advance, disable the provider, or just log.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Backoff hint extracted from a 429 response body, if any.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403. Operator action required; the cascade darkens this
    /// provider for the rest of the process lifetime.
    Auth,
    /// 429, possibly with a retry_after_secs hint.
    RateLimit,
    /// 404, usually a misconfigured model name.
    NotFound,
    /// 408 or the request outlived its deadline.
    Timeout,
    /// Could not reach the provider at all (DNS, refused, reset).
    Network,
    /// 5xx, the provider's problem.
    ServerError,
    /// Remaining 4xx and anything else.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };

        let retry_after_secs = if kind == ProviderErrorKind::RateLimit {
            extract_retry_after(body)
        } else {
            None
        };

        Self {
            kind,
            status: Some(status),
            message: crate::utils::truncate_str(body, 300),
            retry_after_secs,
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
            retry_after_secs: None,
        }
    }

    /// Whether the cascade should even bother with this provider again
    /// during this process lifetime.
    pub fn is_fatal_for_provider(&self) -> bool {
        self.kind == ProviderErrorKind::Auth
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => {
                write!(f, "LLM provider error ({}, {:?}): {}", status, self.kind, self.message)
            }
            None => write!(f, "LLM provider error ({:?}): {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Pull a retry-after hint out of a 429 body. Providers put it either at
/// the top level or under "error", as an integer or a float.
fn extract_retry_after(body: &str) -> Option<u64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v["error"]["retry_after"]
        .as_u64()
        .or_else(|| v["retry_after"].as_u64())
        .or_else(|| {
            v["error"]["retry_after"]
                .as_f64()
                .or_else(|| v["retry_after"].as_f64())
                .map(|f| f.ceil() as u64)
        })
}
