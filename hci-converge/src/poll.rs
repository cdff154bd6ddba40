//! Bounded wait loops for the control plane's eventual consistency.

use std::future::Future;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::PollConfig;
use crate::error::{Error, Result};

/// Result of one observation inside a wait loop.
#[derive(Debug)]
pub enum Probe<T> {
    Done(T),
    /// Not there yet; carries a description of the current state.
    Pending(String),
}

/// Call `probe` every `interval` until it reports `Done`, fails, runs out of
/// attempts, or the loop exceeds its wall-clock budget.
pub async fn wait_for<T, F, Fut>(config: &PollConfig, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>>>,
{
    let attempts = async {
        let mut last = String::from("unobserved");
        for attempt in 1..=config.max_attempts {
            match probe().await? {
                Probe::Done(value) => return Ok(value),
                Probe::Pending(state) => {
                    debug!(
                        attempt,
                        max_attempts = config.max_attempts,
                        state = %state,
                        "Waiting for {}",
                        what
                    );
                    last = state;
                }
            }
            if attempt < config.max_attempts {
                sleep(config.interval).await;
            }
        }
        Err(Error::Timeout(format!(
            "{what} still {last} after {} attempts",
            config.max_attempts
        )))
    };

    let result = match timeout(config.budget, attempts).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{what} did not settle within {}s",
            config.budget.as_secs()
        ))),
    };
    if let Err(Error::Timeout(msg)) = &result {
        warn!("{}", msg);
    }
    result
}
