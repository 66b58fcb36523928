use crate::errors::AppError;
use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{CircuitBreaker, Config, StateMachine};
use std::future::Future;
use std::time::Duration;

/// Concrete breaker type shared by every index client clone.
pub type IndexCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates the circuit breaker that guards the search index.
///
/// - **Failure threshold**: 5 consecutive failed queries open the circuit.
/// - **Backoff**: exponential, 10s up to 60s, before a trial query is let through.
///
/// Only index failures count. A query that returns zero hits is a success.
pub fn create_index_circuit_breaker() -> IndexCircuitBreaker {
    let backoff_strategy = backoff::exponential(Duration::from_secs(10), Duration::from_secs(60));

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Runs `query` behind the breaker.
///
/// The breaker is consulted before the request goes out, and the outcome is
/// recorded afterwards. An open circuit short-circuits to `Unavailable`
/// without touching the network.
pub async fn guarded<T, F>(breaker: &IndexCircuitBreaker, query: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    if !breaker.is_call_permitted() {
        return Err(AppError::Unavailable(
            "circuit open after repeated index failures".to_string(),
        ));
    }

    let outcome = query.await;

    match breaker.call(move || outcome) {
        Ok(value) => Ok(value),
        Err(failsafe::Error::Inner(e)) => Err(e),
        Err(failsafe::Error::Rejected) => Err(AppError::Unavailable(
            "circuit opened while the query was in flight".to_string(),
        )),
    }
}
