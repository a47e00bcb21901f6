use super::{Error, Predicate};
use crate::config::WaitOptions;
use crate::k8s_types::K8sType;
use crate::metrics::ClientMetrics;

use std::future::Future;

/// Decides whether a wait is over. It gets either the latest version of the object or the
/// error from trying to get it. Returning `Ok(true)` ends the wait successfully, returning an
/// error ends it with that error, and `Ok(false)` keeps polling.
pub type ConditionFuncE<T> = Box<dyn FnMut(Result<&T, Error>) -> Result<bool, Error> + Send>;

/// Done once the object is gone. Any error other than not found ends the wait with that error.
pub fn condition_deleted<T>() -> ConditionFuncE<T> {
    Box::new(|result: Result<&T, Error>| match result {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => Err(e),
    })
}

/// Done once the predicate matches. Errors end the wait immediately.
pub fn wrap_predicate<T: 'static>(predicate: Predicate<T>) -> ConditionFuncE<T> {
    Box::new(move |result: Result<&T, Error>| match result {
        Ok(obj) => Ok(predicate(obj)),
        Err(e) => Err(e),
    })
}

/// Polls `fetch` until `condition` is done, the timeout elapses or the wait is cancelled. The
/// first check happens right away. Returns the object that satisfied the condition, or None
/// if the condition was satisfied by an error (like a not found while waiting for deletion).
pub(crate) async fn poll_until<T, F, Fut>(
    k8s_type: &K8sType,
    kind: &str,
    options: &WaitOptions,
    metrics: Option<&ClientMetrics>,
    mut fetch: F,
    mut condition: ConditionFuncE<T>,
) -> Result<Option<T>, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let deadline = options
        .timeout
        .map(|timeout| tokio::time::Instant::now() + timeout);
    let mut timer = options.poll_timer();
    let mut polls = 0usize;

    loop {
        if options.cancel.as_ref().map(|c| c.is_cancelled()).unwrap_or(false) {
            log::warn!("Waiting for {} was cancelled after {} checks", kind, polls);
            return Err(Error::Cancelled {
                kind: kind.to_owned(),
            });
        }

        polls += 1;
        if let Some(metrics) = metrics {
            metrics.wait_poll(k8s_type);
        }
        let (done, instance) = match fetch().await {
            Ok(obj) => (condition(Ok(&obj))?, Some(obj)),
            Err(err) => (condition(Err(err))?, None),
        };
        log::debug!("Checked {} ({} checks so far), done: {}", kind, polls, done);
        if done {
            return Ok(instance);
        }

        let delay = timer.next_interval();
        let timed_out = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => futures::future::pending::<()>().await,
            }
        };
        let cancelled = async {
            match options.cancel.as_ref() {
                Some(token) => token.cancelled().await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = timed_out => {
                log::warn!("Waiting for {} timed out after {} checks", kind, polls);
                return Err(Error::Timeout { kind: kind.to_owned() });
            }
            _ = cancelled => {
                log::warn!("Waiting for {} was cancelled after {} checks", kind, polls);
                return Err(Error::Cancelled { kind: kind.to_owned() });
            }
        }
    }
}
