//! Bounded wait for the sink function to answer through its public host

use tracing::{debug, info};

use eventing_prep_common::retry::{retry_with_backoff, RetryConfig};
use eventing_prep_common::Error;

use crate::config::ReachabilityBudget;
use crate::functions::FunctionOps;

/// Look up the function's host and probe it until it answers or the budget
/// runs out.
///
/// Each attempt fetches the host with [`FunctionOps::service_host`], fails if
/// none is published yet, then calls [`FunctionOps::check_reachable`]. At
/// most `budget.attempts` attempts are made, `budget.interval` apart.
/// Exhaustion is reported as [`Error::Timeout`] carrying the last failure.
/// Returns the host that answered.
pub async fn wait_until_reachable(
    functions: &dyn FunctionOps,
    name: &str,
    namespace: &str,
    budget: ReachabilityBudget,
) -> Result<String, Error> {
    let attempts = budget.attempts.max(1);
    let config = RetryConfig::fixed(attempts, budget.interval);

    let host = retry_with_backoff(&config, "check_reachable", move || async move {
        let host = functions.service_host(name, namespace).await?;
        if host.is_empty() {
            return Err(Error::preparation(
                "service_host",
                format!("no host published for {}", name),
            ));
        }
        debug!(host = %host, "Host fetched, checking that the function is reachable");
        functions.check_reachable(name, namespace, &host).await?;
        Ok(host)
    })
    .await
    .map_err(|e| Error::timeout("check_reachable", attempts, e.to_string()))?;

    info!(function = %name, host = %host, "Function is reachable");
    Ok(host)
}
