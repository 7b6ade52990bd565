//! Bounded, deadline-limited execution of one batch phase.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::error::{BatchError, ErrorKind, Phase, TaskFailure};

/// Run every task with at most `workers` in flight and wait for all of them.
///
/// The task list is fully built before anything is spawned. The wait stops at
/// the first failed task or when `deadline` expires; any other failures that
/// have already completed by then are collected and the rest of the phase is
/// aborted. Tasks that hand work to the blocking pool are detached from that
/// work, not stopped.
pub(crate) async fn run_phase<T, Fut>(
    phase: Phase,
    tasks: Vec<(String, Fut)>,
    workers: usize,
    deadline: Duration,
) -> Result<Vec<(String, T)>, BatchError>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, TaskFailure>> + Send + 'static,
{
    let total = tasks.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for (item, task) in tasks {
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (
                    item.clone(),
                    Err(TaskFailure::new(item, ErrorKind::InvariantViolation, "worker pool closed")),
                );
            };
            let result = task.await;
            (item, result)
        });
    }

    let mut completed = Vec::with_capacity(total);
    let mut failures = Vec::new();

    let waited = tokio::time::timeout(deadline, async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((item, Ok(value))) => completed.push((item, value)),
                Ok((_, Err(failure))) => {
                    failures.push(failure);
                    break;
                }
                Err(e) => {
                    failures.push(TaskFailure::new(
                        "(task)",
                        ErrorKind::InvariantViolation,
                        e.to_string(),
                    ));
                    break;
                }
            }
        }
    })
    .await;
    let timed_out = waited.is_err();

    if failures.is_empty() && !timed_out {
        debug!("{} phase completed {} tasks", phase, completed.len());
        return Ok(completed);
    }

    // Keep failures that raced the first one; everything else is cancelled.
    set.abort_all();
    while let Some(joined) = set.join_next().await {
        if let Ok((_, Err(failure))) = joined {
            failures.push(failure);
        }
    }

    warn!(
        "{} phase stopped after {}/{} tasks ({} failures{})",
        phase,
        completed.len(),
        total,
        failures.len(),
        if timed_out { ", deadline exceeded" } else { "" }
    );

    Err(BatchError {
        phase,
        failures,
        timed_out,
    })
}
