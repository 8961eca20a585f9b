use std::{fmt::Debug, time::Duration};

use futures::StreamExt;
use kube::{Resource, ResourceExt};
use log::{debug, warn};
use tokio::time::{sleep, timeout_at, Instant};

use super::port::{WatchScope, WatchSource};
use crate::error::{Error, WaitError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitConfig {
    /// Covers every stream restart.
    pub timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry_backoff: Duration::from_millis(250),
        }
    }
}

// Stand-in for deadlines past what `Instant` can hold.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

pub(crate) fn deadline_after(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

enum Attempt<T> {
    Converged(T),
    Retry,
}

/// Returns the first object accepted by `predicate`. A conflict from the
/// predicate restarts the watch like a closed stream does.
pub async fn wait<T, S, P>(source: &S, config: &WaitConfig, predicate: P) -> Result<T, WaitError<T>>
where
    T: Resource + Clone + Debug + Send,
    S: WatchSource<T> + Sync + ?Sized,
    P: FnMut(&T) -> Result<bool, Error> + Send,
{
    retry_watch(source, &WatchScope::All, config, predicate, None).await
}

pub async fn wait_for_object<T, S, P>(
    source: &S,
    object: T,
    config: &WaitConfig,
    mut predicate: P,
) -> Result<T, WaitError<T>>
where
    T: Resource + Clone + Debug + Send,
    S: WatchSource<T> + Sync + ?Sized,
    P: FnMut(&T) -> Result<bool, Error> + Send,
{
    match predicate(&object) {
        Ok(true) => return Ok(object),
        Ok(false) => {}
        Err(error) if error.is_conflict() => {
            warn!("Conflict while checking {}, watching for a fresh copy", object.name_any());
        }
        Err(error) => return Err(WaitError::Fatal(error)),
    }

    let scope = WatchScope::Named {
        name: object.name_any(),
        namespace: object.namespace(),
    };
    retry_watch(source, &scope, config, predicate, Some(object)).await
}

async fn retry_watch<T, S, P>(
    source: &S,
    scope: &WatchScope,
    config: &WaitConfig,
    mut predicate: P,
    mut last: Option<T>,
) -> Result<T, WaitError<T>>
where
    T: Resource + Clone + Debug + Send,
    S: WatchSource<T> + Sync + ?Sized,
    P: FnMut(&T) -> Result<bool, Error> + Send,
{
    let started = Instant::now();
    let outcome = {
        let predicate = &mut predicate;
        let last = &mut last;
        timeout_at(deadline_after(started, config.timeout), async move {
            let mut restarts = 0u32;
            loop {
                match watch_once(source, scope, &mut *predicate, &mut *last).await? {
                    Attempt::Converged(object) => return Ok::<T, Error>(object),
                    Attempt::Retry => {
                        restarts += 1;
                        debug!("Restarting watch on {:?} (restart {})", scope, restarts);
                        if !config.retry_backoff.is_zero() {
                            sleep(config.retry_backoff).await;
                        }
                    }
                }
            }
        })
        .await
    };

    match outcome {
        Ok(result) => result.map_err(WaitError::Fatal),
        Err(_) => Err(WaitError::TimedOut {
            waited: started.elapsed(),
            last,
        }),
    }
}

async fn watch_once<T, S, P>(
    source: &S,
    scope: &WatchScope,
    predicate: &mut P,
    last: &mut Option<T>,
) -> Result<Attempt<T>, Error>
where
    T: Resource + Clone + Debug + Send,
    S: WatchSource<T> + Sync + ?Sized,
    P: FnMut(&T) -> Result<bool, Error> + Send,
{
    let mut events = source.watch(scope).await?;
    while let Some(event) = events.next().await {
        let object = event?.into_object();
        match predicate(&object) {
            Ok(true) => return Ok(Attempt::Converged(object)),
            Ok(false) => *last = Some(object),
            Err(error) if error.is_conflict() => {
                warn!("Conflict on {}, retrying against fresh state: {}", object.name_any(), error);
                *last = Some(object);
                return Ok(Attempt::Retry);
            }
            Err(error) => return Err(error),
        }
    }
    Ok(Attempt::Retry)
}
