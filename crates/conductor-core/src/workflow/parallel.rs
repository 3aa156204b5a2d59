//! Bounded parallel dispatch of one batch of ready steps.
//!
//! At most `concurrency_limit` step futures hold a permit at once. A fatal
//! result (a non-recoverable failure of a required step, or a journal
//! error) cancels the rest of the batch; steps already finished keep their
//! results.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use conductor_types::error::{ErrorCategory, ErrorInfo};
use conductor_types::workflow::StepDefinition;

use super::step_runner::{panic_message, StepResult};

/// Runs step futures with a concurrency bound.
#[derive(Debug, Clone, Copy)]
pub struct ParallelStepExecutor {
    concurrency_limit: usize,
}

impl ParallelStepExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Run `executor_fn` for every step and collect one result per step,
    /// sorted by step id.
    ///
    /// `cancel` stops the whole batch; each step future receives a child
    /// token that also fires when a sibling fails fatally.
    pub async fn execute_parallel<F, Fut>(
        &self,
        steps: Vec<StepDefinition>,
        executor_fn: F,
        cancel: &CancellationToken,
    ) -> Vec<StepResult>
    where
        F: Fn(StepDefinition, CancellationToken) -> Fut,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        let batch = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let optional: HashMap<String, bool> =
            steps.iter().map(|s| (s.id.clone(), s.optional)).collect();

        let mut join_set = JoinSet::new();
        let mut task_steps: HashMap<Id, String> = HashMap::new();
        for step in steps {
            let step_id = step.id.clone();
            let task_step = step.id.clone();
            let token = batch.clone();
            let fut = executor_fn(step, token.clone());
            let semaphore = Arc::clone(&semaphore);
            let handle = join_set.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return StepResult::cancelled(step_id, None),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return StepResult::cancelled(step_id, None),
                    },
                };
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(&panic);
                        tracing::error!(step_id = %step_id, panic = %message, "step task panicked");
                        StepResult::failed(
                            step_id.clone(),
                            0,
                            ErrorInfo::new(ErrorCategory::Execution, format!("step task panicked: {message}"))
                                .with_step(step_id),
                        )
                    }
                }
            });
            task_steps.insert(handle.id(), task_step);
        }

        let mut results = Vec::with_capacity(optional.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => {
                    let is_optional = optional.get(&result.step_id).copied().unwrap_or(false);
                    if result.is_fatal(is_optional) && !batch.is_cancelled() {
                        tracing::warn!(
                            step_id = %result.step_id,
                            "fatal step failure, cancelling remaining steps in batch"
                        );
                        batch.cancel();
                    }
                    results.push(result);
                }
                Err(e) => {
                    let Some(step_id) = task_steps.get(&e.id()).cloned() else {
                        tracing::error!(error = %e, "step task join error for unknown task");
                        continue;
                    };
                    tracing::error!(step_id = %step_id, error = %e, "step task join error");
                    let result = join_failure(step_id, &e);
                    let is_optional = optional.get(&result.step_id).copied().unwrap_or(false);
                    if result.is_fatal(is_optional) && !batch.is_cancelled() {
                        batch.cancel();
                    }
                    results.push(result);
                }
            }
        }

        results.sort_by(|a, b| a.step_id.cmp(&b.step_id));
        results
    }
}

/// A task that died outside the step future still owes its step a result.
fn join_failure(step_id: String, error: &JoinError) -> StepResult {
    let message = if error.is_cancelled() {
        "step task was aborted".to_string()
    } else {
        format!("step task failed: {error}")
    };
    StepResult::failed(
        step_id.clone(),
        0,
        ErrorInfo::new(ErrorCategory::Execution, message).with_step(step_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step_runner::StepOutcome;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn step(id: &str) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            agent: "agent".to_string(),
            action: "run".to_string(),
            description: None,
            requires: vec![],
            creates: vec![],
            consumes: vec![],
            inputs: BTreeMap::new(),
            timeout_secs: None,
            retry: None,
            optional: false,
        }
    }

    fn completed(step_id: String) -> StepResult {
        StepResult {
            step_id,
            outcome: StepOutcome::Completed {
                attempt: 1,
                artifacts: BTreeMap::new(),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let executor = ParallelStepExecutor::new(2);
        let steps = (0..6).map(|i| step(&format!("s{i}"))).collect();

        let results = executor
            .execute_parallel(
                steps,
                |step, _cancel| {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        completed(step.id)
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_cancels_siblings() {
        let executor = ParallelStepExecutor::new(4);
        let steps = vec![step("fast"), step("broken"), step("slow")];

        let results = executor
            .execute_parallel(
                steps,
                |step, cancel| async move {
                    match step.id.as_str() {
                        "fast" => completed(step.id),
                        "broken" => {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            StepResult::failed(
                                step.id,
                                1,
                                ErrorInfo::new(ErrorCategory::Validation, "bad input"),
                            )
                        }
                        _ => {
                            tokio::select! {
                                _ = cancel.cancelled() => StepResult::cancelled(step.id, Some(1)),
                                _ = tokio::time::sleep(Duration::from_secs(60)) => completed(step.id),
                            }
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["broken", "fast", "slow"]);
        assert!(matches!(results[0].outcome, StepOutcome::Failed { .. }));
        assert!(matches!(results[1].outcome, StepOutcome::Completed { .. }));
        assert!(matches!(
            results[2].outcome,
            StepOutcome::Cancelled { attempt: Some(1) }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_failure_lets_siblings_finish() {
        let executor = ParallelStepExecutor::new(4);
        let steps = vec![step("flaky"), step("slow")];

        let results = executor
            .execute_parallel(
                steps,
                |step, _cancel| async move {
                    if step.id == "flaky" {
                        StepResult::failed(
                            step.id,
                            3,
                            ErrorInfo::new(ErrorCategory::ExternalDependency, "unavailable"),
                        )
                    } else {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        completed(step.id)
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(results[1].outcome, StepOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn panicking_step_is_reported_as_failure() {
        let executor = ParallelStepExecutor::new(2);
        let results = executor
            .execute_parallel(
                vec![step("boom"), step("ok")],
                |step, _cancel| async move {
                    if step.id == "boom" {
                        panic!("capability exploded");
                    }
                    completed(step.id)
                },
                &CancellationToken::new(),
            )
            .await;

        match &results[0].outcome {
            StepOutcome::Failed { error, .. } => {
                assert_eq!(error.category, ErrorCategory::Execution);
                assert!(error.message.contains("capability exploded"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// Yields its result, then panics when dropped: outside the unwind
    /// guard, so the task itself fails to join.
    struct PanicsOnDrop(Option<StepResult>);

    impl Future for PanicsOnDrop {
        type Output = StepResult;

        fn poll(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<StepResult> {
            match self.0.take() {
                Some(result) => std::task::Poll::Ready(result),
                None => std::task::Poll::Pending,
            }
        }
    }

    impl Drop for PanicsOnDrop {
        fn drop(&mut self) {
            if self.0.is_none() {
                panic!("teardown failed");
            }
        }
    }

    #[tokio::test]
    async fn failed_join_still_yields_a_result_for_its_step() {
        let executor = ParallelStepExecutor::new(2);
        let results = executor
            .execute_parallel(
                vec![step("ok"), step("torn")],
                |step, _cancel| {
                    let torn = step.id == "torn";
                    let result = completed(step.id);
                    async move {
                        if torn {
                            PanicsOnDrop(Some(result)).await
                        } else {
                            result
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["ok", "torn"]);
        match &results[1].outcome {
            StepOutcome::Failed { error, .. } => {
                assert_eq!(error.category, ErrorCategory::Execution);
                assert_eq!(error.step_id.as_deref(), Some("torn"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn aborted_task_maps_to_execution_failure() {
        let handle = tokio::spawn(std::future::pending::<()>());
        handle.abort();
        let err = handle.await.unwrap_err();

        let result = join_failure("stuck".into(), &err);
        match result.outcome {
            StepOutcome::Failed { error, .. } => assert!(error.message.contains("aborted")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_batch_dispatches_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = ParallelStepExecutor::new(2)
            .execute_parallel(
                vec![step("a"), step("b")],
                |step, _cancel| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        completed(step.id)
                    }
                },
                &cancel,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(results
            .iter()
            .all(|r| matches!(r.outcome, StepOutcome::Cancelled { attempt: None })));
    }
}
