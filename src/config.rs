use std::time::Duration;

use crate::reveal::{RetryPolicy, RevealConfig};

/// Flask's development server address, which is where the backend usually runs.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub reveal: RevealConfig,
    pub retry: RetryPolicy,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            reveal: RevealConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AdvisorConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Drops all reveal pacing so output appears at once.
    pub fn instant(mut self) -> Self {
        self.reveal = RevealConfig::instant();
        self
    }
}
