//! Tracing setup for processes that embed the Hub.

use hub_types::HubError;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` when set, otherwise `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a global fmt subscriber.
///
/// Fails with `Config` if a global subscriber is already installed.
pub fn init_tracing(level: &str) -> Result<(), HubError> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| HubError::Config(format!("Failed to set tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // the first call may race other tests; either way a second call fails
        let _ = init_tracing("debug");
        assert!(matches!(init_tracing("info"), Err(HubError::Config(_))));
    }
}
