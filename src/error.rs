// Error types for route reconciliation and the desired-state source

use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors surfaced by the route reconciliation core
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Invalid destination CIDR: {0}")]
    InvalidCidr(String),

    #[error("Gateway {0} is not included in any local network")]
    GatewayUnreachable(Ipv4Addr),

    #[error("Kernel route operation failed: {0}")]
    KernelOperationFailed(String),

    #[error("No local network with an IPv4 address found")]
    NoLocalNetwork,
}

/// Result type alias using RouteError
pub type RouteResult<T> = Result<T, RouteError>;

impl RouteError {
    /// Convert error to an operator-facing message
    pub fn user_message(&self) -> String {
        match self {
            RouteError::InvalidCidr(cidr) => {
                format!("Destination {} is not a valid IPv4 CIDR. Fix the block definition.", cidr)
            }
            RouteError::GatewayUnreachable(gw) => {
                format!(
                    "Node address {} is not on any local subnet, so no route can point at it.",
                    gw
                )
            }
            RouteError::KernelOperationFailed(_) => {
                "The kernel rejected a route operation. Check CAP_NET_ADMIN and link state.".to_string()
            }
            RouteError::NoLocalNetwork => {
                "No interface carries an IPv4 address. At least one is required.".to_string()
            }
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RouteError::KernelOperationFailed(_))
    }
}

/// Errors from reading the desired-state file or resolving nodes in it
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse desired state: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node {0} has no internal IPv4 address")]
    NodeAddressMissing(String),
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        delay.min(self.max_delay_ms as f64) as u64
    }
}

/// Retry a route operation with exponential backoff.
///
/// Only errors reporting `is_retryable()` are retried; anything else is
/// returned on the first failure.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> RouteResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = RouteResult<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded after {} attempt(s)", operation_name, attempt + 1);
                }
                return Ok(result);
            }
            Err(e) => {
                attempt += 1;

                if !e.is_retryable() || attempt >= config.max_attempts {
                    if e.is_retryable() {
                        tracing::error!("{} failed after {} attempts: {}", operation_name, attempt, e);
                    }
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    operation_name,
                    attempt,
                    config.max_attempts,
                    e,
                    delay
                );

                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            }
        }
    }
}
