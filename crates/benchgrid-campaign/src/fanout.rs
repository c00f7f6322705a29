//! One task per host, joined before the campaign moves on.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{CampaignError, CampaignResult};

/// Run every `(host, task)` concurrently and wait for all of them.
///
/// A failing task does not cancel the others. Once every task has finished,
/// each failure is logged and the one belonging to the earliest host in
/// `tasks` order is returned.
pub async fn fan_out<I, Fut, E>(action: &str, tasks: I) -> CampaignResult<()>
where
    I: IntoIterator<Item = (String, Fut)>,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<CampaignError> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut hosts = Vec::new();
    for (index, (host, task)) in tasks.into_iter().enumerate() {
        hosts.push(host);
        set.spawn(async move { (index, task.await) });
    }
    debug!(action, hosts = hosts.len(), "fan-out started");

    let mut failures: Vec<(usize, CampaignError)> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((index, Err(e))) => {
                let e: CampaignError = e.into();
                error!(action, host = %hosts[index], error = %e, "task failed");
                failures.push((index, e));
            }
            Err(e) => {
                // A panicked task no longer knows its host; report it last.
                error!(action, error = %e, "task did not complete");
                failures.push((
                    usize::MAX,
                    CampaignError::Join {
                        host: "unknown".to_string(),
                        reason: e.to_string(),
                    },
                ));
            }
        }
    }

    failures.sort_by_key(|(index, _)| *index);
    match failures.into_iter().next() {
        Some((_, e)) => Err(e),
        None => {
            debug!(action, "fan-out complete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use benchgrid_remote::RemoteError;

    #[tokio::test(start_paused = true)]
    async fn failure_waits_for_every_task() {
        let finished = Arc::new(AtomicUsize::new(0));
        let tasks = ["a", "b", "c"].into_iter().map(|host| {
            let finished = finished.clone();
            let task = async move {
                if host == "a" {
                    return Err(RemoteError::NotConnected(host.to_string()));
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            };
            (host.to_string(), task)
        });

        let err = fan_out("test", tasks).await.unwrap_err();
        assert!(matches!(err, CampaignError::Remote(RemoteError::NotConnected(h)) if h == "a"));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn earliest_host_error_wins() {
        let tasks = ["a", "b", "c"].into_iter().map(|host| {
            let task = async move {
                if host == "a" {
                    Ok(())
                } else {
                    Err(RemoteError::NotConnected(host.to_string()))
                }
            };
            (host.to_string(), task)
        });
        let err = fan_out("test", tasks).await.unwrap_err();
        assert!(matches!(err, CampaignError::Remote(RemoteError::NotConnected(h)) if h == "b"));
    }

    #[tokio::test]
    async fn empty_fan_out_succeeds() {
        let tasks: Vec<(String, std::future::Ready<Result<(), RemoteError>>)> = Vec::new();
        fan_out("nothing", tasks).await.unwrap();
    }
}
