//! Retry logic for storage operations with configurable policies

use crate::error::{HubError, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Callback invoked before each retry with the error, the attempt number that
/// failed (1-based) and the delay about to be slept
pub type OnRetry = Arc<dyn Fn(&HubError, u32, Duration) + Send + Sync>;

/// Retry policy configuration
#[derive(Clone)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to apply +/-25% jitter to avoid thundering herd
    pub jitter_enabled: bool,
    /// Optional observer for retries
    pub on_retry: Option<OnRetry>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_enabled", &self.jitter_enabled)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter_enabled = enabled;
        self
    }

    pub fn with_on_retry(mut self, on_retry: OnRetry) -> Self {
        self.on_retry = Some(on_retry);
        self
    }

    /// Un-jittered delay for a 1-based attempt number
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let base = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay to sleep after the given 1-based attempt failed
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter_enabled {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
    }
}

/// Transient error codes: socket errno names plus PostgreSQL connection-class SQLSTATEs
const RETRYABLE_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ECONNABORTED",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
    "ENOTCONN",
    "57P03", // cannot_connect_now
    "08000", // connection_exception
    "08001", // sqlclient_unable_to_establish_sqlconnection
    "08003", // connection_does_not_exist
    "08004", // sqlserver_rejected_establishment_of_sqlconnection
    "08006", // connection_failure
    "57P01", // admin_shutdown
];

/// Message patterns that mark an error as transient when no code is available
const RETRYABLE_PATTERNS: &[&str] = &[
    r"connection\s+(reset|closed|lost|terminated|refused)",
    r"connection\s+(timeout|timed\s+out)",
    r"timeout\s+exceeded\s+when\s+trying\s+to\s+connect",
    r"socket\s+hang\s*up",
    r"pool\s+(is\s+)?exhausted",
    r"too\s+many\s+(connections|clients)",
    r"(server|client)\s+(has\s+)?closed",
];

static GLOBAL_CLASSIFIER: Lazy<RetryClassifier> = Lazy::new(RetryClassifier::default);

/// Table-driven classification of retryable errors
#[derive(Debug, Clone)]
pub struct RetryClassifier {
    codes: HashSet<String>,
    patterns: Vec<Regex>,
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self::new(RETRYABLE_CODES, RETRYABLE_PATTERNS)
    }
}

impl RetryClassifier {
    /// Build a classifier from code and regex tables.
    ///
    /// Patterns are matched case-insensitively; invalid patterns are skipped
    /// with a warning.
    pub fn new(codes: &[&str], patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = p, error = %e, "Ignoring invalid retry pattern");
                    None
                }
            })
            .collect();
        Self {
            codes: codes.iter().map(|c| c.to_string()).collect(),
            patterns,
        }
    }

    /// Shared default classifier
    pub fn global() -> &'static RetryClassifier {
        &GLOBAL_CLASSIFIER
    }

    pub fn is_retryable_code(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn is_retryable_message(&self, message: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(message))
    }

    /// Determines if an error should be retried
    pub fn is_retryable(&self, error: &HubError) -> bool {
        match error {
            // Caller mistakes and configuration problems are permanent
            HubError::Validation { .. } | HubError::Config { .. } | HubError::NotFound { .. } => false,
            _ => {
                if let Some(code) = error.code() {
                    if self.is_retryable_code(&code) {
                        return true;
                    }
                }
                self.is_retryable_message(&error.to_string())
            }
        }
    }
}

/// Determines if an error should be retried using the default tables
pub fn should_retry_error(error: &HubError) -> bool {
    RetryClassifier::global().is_retryable(error)
}

/// Retry executor that handles the retry logic
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    classifier: RetryClassifier,
}

impl RetryExecutor {
    /// Create a new retry executor with the given policy and default classification
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: RetryClassifier::global().clone(),
        }
    }

    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a function with retry logic.
    ///
    /// Performs at most `max_retries + 1` attempts. Non-retryable errors are
    /// returned after the attempt that produced them.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = &self.policy;
        let max_attempts = policy.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.classifier.is_retryable(&error) {
                        debug!(
                            operation = operation_name,
                            attempt,
                            error = %error,
                            "Error is not retryable, failing immediately"
                        );
                        return Err(error);
                    }

                    if attempt >= max_attempts {
                        error!(
                            operation = operation_name,
                            total_attempts = attempt,
                            error = %error,
                            "All retry attempts exhausted, failing"
                        );
                        return Err(error);
                    }

                    let delay = policy.calculate_delay(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying after delay"
                    );
                    if let Some(on_retry) = &policy.on_retry {
                        on_retry(&error, attempt, delay);
                    }

                    sleep(delay).await;
                }
            }
        }
    }
}

/// Run `operation` under `policy` with the default classifier
pub async fn with_retry<T, F, Fut>(operation: F, policy: &RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(policy.clone())
        .execute("storage_operation", operation)
        .await
}
