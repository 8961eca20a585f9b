use std::{future::Future, time::Duration};

use log::warn;
use rand::Rng;

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConflictRetry {
    /// Total attempts, the first one included.
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Runs a whole read-modify-write cycle again each time it ends in
/// [`Error::Conflict`]. The last conflict is returned once attempts run out.
pub async fn retry_on_conflict<T, F, Fut>(retry: ConflictRetry, mut cycle: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 1;
    loop {
        match cycle().await {
            Err(error) if error.is_conflict() && attempt < retry.attempts => {
                warn!("Attempt {}/{} conflicted: {}", attempt, retry.attempts, error);
                attempt += 1;
                tokio::time::sleep(jittered(retry.backoff)).await;
            }
            result => return result,
        }
    }
}

fn jittered(backoff: Duration) -> Duration {
    if backoff.is_zero() {
        return backoff;
    }
    backoff.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.1))
}
