use std::{future::Future, time::Duration};

use log::trace;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use super::wait::deadline_after;
use crate::error::Error;

/// Polls `getter` every `poll_interval` until it reports [`Error::NotFound`].
///
/// The first poll happens one interval after the call. Any other error is
/// returned as is; running past `deadline` yields [`Error::Timeout`].
pub async fn wait_until_absent<T, F, Fut>(
    mut getter: F,
    poll_interval: Duration,
    deadline: Duration,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let period = poll_interval.max(Duration::from_millis(1));
    let started = Instant::now();
    let mut ticker = interval_at(deadline_after(started, period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let poll = async {
        loop {
            ticker.tick().await;
            match getter().await {
                Ok(_) => trace!("Object still present, polling again in {:?}", period),
                Err(error) if error.is_not_found() => return Ok(()),
                Err(error) => return Err(error),
            }
        }
    };

    match timeout(deadline, poll).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(started.elapsed())),
    }
}
