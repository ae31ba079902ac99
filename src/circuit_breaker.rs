use crate::config::Config;
use failsafe::{backoff, failure_policy};
use std::time::Duration;

/// Trip and recovery thresholds for the store breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            backoff_min: Duration::from_secs(10),
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl BreakerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            failure_threshold: config.breaker_failure_threshold,
            backoff_min: Duration::from_secs(config.breaker_backoff_min_secs),
            backoff_max: Duration::from_secs(config.breaker_backoff_max_secs),
        }
    }
}

/// Creates a circuit breaker for store operations to prevent cascading failures.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: `failure_threshold` consecutive failures; store calls fail fast with
///   `AppError::StoreUnavailable`.
/// - **HALF_OPEN**: After an exponential backoff between `backoff_min` and `backoff_max`,
///   one call is let through to test whether the database recovered.
pub fn create_store_circuit_breaker(
    settings: BreakerSettings,
) -> impl failsafe::CircuitBreaker + Send + Sync + 'static {
    let backoff_strategy = backoff::exponential(settings.backoff_min, settings.backoff_max);
    let failure_policy =
        failure_policy::consecutive_failures(settings.failure_threshold, backoff_strategy);

    failsafe::Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    fn trip(cb: &impl CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("connection refused"));
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_store_circuit_breaker(BreakerSettings::default());
        trip(&cb, 5);

        assert!(!cb.is_call_permitted());
        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_configured_threshold_is_honored() {
        let cb = create_store_circuit_breaker(BreakerSettings {
            failure_threshold: 2,
            ..BreakerSettings::default()
        });

        trip(&cb, 1);
        assert!(cb.is_call_permitted());
        trip(&cb, 1);
        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn test_circuit_breaker_records_success() {
        let cb = create_store_circuit_breaker(BreakerSettings::default());

        let result: Result<String, Error<&str>> = cb.call(|| Ok::<_, &str>("row-id".to_string()));

        assert_eq!(result.unwrap(), "row-id");
        assert!(cb.is_call_permitted());
    }
}
