// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::error;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Tasks of one shutdown stage
pub type TaskSet = JoinSet<Result<(), BoxError>>;

/// Resolve when the first task of `tasks` ends, with its result.
pub async fn wait_for_any_task(tasks: &mut TaskSet) -> Result<(), BoxError> {
    match tasks.join_next().await {
        // Nothing to wait for, park forever so `select!` picks another branch
        None => std::future::pending().await,
        Some(res) => res?,
    }
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut TaskSet,
    timeout: Duration,
) -> Result<(), BoxError> {
    let stop_at = Instant::now() + timeout;
    let mut result = Ok(());
    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                result = Err(format!(
                    "timed out waiting for {} tasks to complete",
                    tasks.len()
                )
                .into());
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => error!("Failed to join with task: {:?}", e),
        }
    }

    result
}
