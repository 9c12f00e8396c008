use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::configuration::{IterationCount, RunnerSettings};

/// Emits a start and a completion record for each synthetic task.
#[derive(Clone, Debug)]
pub struct TaskRunner {
    iterations: IterationCount,
    work_delay: Duration,
    pause: Duration,
    processor: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: u64,
    pub interrupted: bool,
}

impl TaskRunner {
    pub fn new(settings: &RunnerSettings) -> Self {
        Self {
            iterations: settings.iteration_count,
            work_delay: Duration::from_millis(settings.work_delay_ms),
            pause: Duration::from_millis(settings.pause_ms),
            processor: settings.processor.clone(),
        }
    }

    /// Runs tasks until the iteration count is exhausted or `shutdown` resolves.
    ///
    /// `shutdown` is observed before every task, including the first, and
    /// during the pause between tasks. A task that has logged its start
    /// always logs its completion.
    pub async fn run<F>(&self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tracing::info!("Application starting");

        let mut completed = 0;
        let interrupted = loop {
            if !self.iterations.allows(completed) {
                break false;
            }

            let pause = if completed == 0 {
                Duration::ZERO
            } else {
                self.pause
            };
            tokio::select! {
                biased;
                _ = &mut shutdown => break true,
                _ = tokio::time::sleep(pause) => {}
            }

            self.process_task(completed).await;
            completed += 1;
        };

        let reason = if interrupted { "interrupted" } else { "completed" };
        tracing::info!(completed, reason, "Application shutdown");

        RunSummary {
            completed,
            interrupted,
        }
    }

    async fn process_task(&self, task_id: u64) {
        let task_id = i64::try_from(task_id).unwrap_or(i64::MAX);

        tracing::info!(
            task_id,
            processor = self.processor.as_str(),
            timestamp = unix_seconds(),
            "Processing task {task_id}"
        );

        tokio::time::sleep(self.work_delay).await;

        tracing::info!(task_id, status = "completed", "Completed task {task_id}");
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
