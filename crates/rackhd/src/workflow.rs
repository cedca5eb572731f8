//! Remote workflow submission and completion polling.
//!
//! A workflow moves `Submitted -> Running -> {Succeeded | Failed | TimedOut}`.
//! The runner never cancels a workflow: on timeout the remote instance is
//! left running.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{DriverError, DriverResult};
use crate::inventory::InventoryClient;

/// Terminal success status.
pub const STATUS_SUCCEEDED: &str = "succeeded";

/// Non-terminal status.
pub const STATUS_RUNNING: &str = "running";

/// Stand-in for deadlines past what [`Instant`] can represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline and poll interval for one workflow wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowTiming {
    /// Wall-clock limit measured from the start of the wait.
    pub timeout: Duration,
    /// Delay between status queries.
    pub poll_interval: Duration,
}

impl WorkflowTiming {
    /// Timing used for internally triggered power workflows.
    pub const POWER_ACTION: Self = Self {
        timeout: Duration::from_secs(60),
        poll_interval: Duration::from_secs(10),
    };

    /// Build from minutes / seconds as exposed on the command line.
    ///
    /// Timeouts too large to represent saturate.
    #[must_use]
    pub fn from_minutes_and_secs(timeout_mins: u64, poll_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_mins.saturating_mul(60)),
            poll_interval: Duration::from_secs(poll_secs),
        }
    }
}

/// Submits workflows and waits for them to finish.
#[derive(Clone)]
pub struct WorkflowRunner {
    inventory: Arc<dyn InventoryClient>,
}

impl WorkflowRunner {
    /// Create a runner on top of an Inventory Service client.
    #[must_use]
    pub fn new(inventory: Arc<dyn InventoryClient>) -> Self {
        Self { inventory }
    }

    /// Submit `workflow` against `node_id`.
    ///
    /// # Errors
    /// Returns [`DriverError::SubmitFailed`] if the service rejects the request
    /// or its response has no instance ID.
    pub async fn submit(&self, node_id: &str, workflow: &str) -> DriverResult<String> {
        let instance_id = self
            .inventory
            .submit_workflow(node_id, workflow)
            .await
            .map_err(|source| DriverError::SubmitFailed {
                node_id: node_id.to_string(),
                workflow: workflow.to_string(),
                source,
            })?;

        debug!(node_id, workflow, instance_id = %instance_id, "Workflow applied");
        Ok(instance_id)
    }

    /// Poll `instance_id` until it reaches a terminal status or times out.
    ///
    /// The first query is issued one poll interval after entry.
    ///
    /// # Errors
    /// - [`DriverError::WorkflowFailed`] on any status other than `running` or `succeeded`
    /// - [`DriverError::WorkflowTimeout`] if the deadline passes first
    /// - [`DriverError::PollError`] if a status query fails
    /// - [`DriverError::Config`] for a zero poll interval
    pub async fn await_completion(
        &self,
        instance_id: &str,
        timing: WorkflowTiming,
    ) -> DriverResult<()> {
        if timing.poll_interval.is_zero() {
            return Err(DriverError::Config("workflow poll interval must be positive".into()));
        }

        let start = Instant::now();
        let deadline = start
            .checked_add(timing.timeout)
            .unwrap_or_else(|| start + FAR_FUTURE);
        let first_tick = start
            .checked_add(timing.poll_interval)
            .unwrap_or_else(|| start + FAR_FUTURE);
        let mut ticker = tokio::time::interval_at(first_tick, timing.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            instance_id,
            timeout_secs = timing.timeout.as_secs(),
            poll_secs = timing.poll_interval.as_secs(),
            "Waiting for workflow to complete"
        );

        let mut last_status = String::from("submitted");
        let mut polls: u32 = 0;

        loop {
            tokio::select! {
                biased;
                () = tokio::time::sleep_until(deadline) => {
                    return Err(DriverError::WorkflowTimeout {
                        instance_id: instance_id.to_string(),
                        timeout: timing.timeout,
                        last_status,
                    });
                }
                _ = ticker.tick() => {
                    polls += 1;
                    let status = self
                        .inventory
                        .workflow_status(instance_id)
                        .await
                        .map_err(|source| DriverError::PollError {
                            instance_id: instance_id.to_string(),
                            source,
                        })?
                        .status;

                    debug!(
                        instance_id,
                        status = %status,
                        polls,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Polled workflow status"
                    );

                    match status.as_str() {
                        STATUS_SUCCEEDED => {
                            info!(instance_id, polls, "Workflow successful");
                            return Ok(());
                        }
                        STATUS_RUNNING => last_status = status,
                        _ => {
                            return Err(DriverError::WorkflowFailed {
                                instance_id: instance_id.to_string(),
                                status,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Submit a workflow and wait for it, returning the instance ID.
    ///
    /// # Errors
    /// Any error from [`Self::submit`] or [`Self::await_completion`].
    pub async fn run(
        &self,
        node_id: &str,
        workflow: &str,
        timing: WorkflowTiming,
    ) -> DriverResult<String> {
        let instance_id = self.submit(node_id, workflow).await?;
        self.await_completion(&instance_id, timing).await?;
        Ok(instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeInventory;

    const TIMING: WorkflowTiming = WorkflowTiming {
        timeout: Duration::from_secs(95),
        poll_interval: Duration::from_secs(10),
    };

    fn runner(inventory: &Arc<FakeInventory>) -> WorkflowRunner {
        WorkflowRunner::new(inventory.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_then_succeeded() {
        let inventory = Arc::new(FakeInventory::default());
        inventory.set_statuses(&["running", "running", "succeeded"]);

        let start = Instant::now();
        runner(&inventory).await_completion("wf-1", TIMING).await.unwrap();

        assert_eq!(inventory.status_polls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert!(start.elapsed() < TIMING.timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_terminal_times_out_at_deadline() {
        let inventory = Arc::new(FakeInventory::default());
        inventory.set_statuses(&["running"]);

        let start = Instant::now();
        let err = runner(&inventory)
            .await_completion("wf-1", TIMING)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DriverError::WorkflowTimeout { ref instance_id, ref last_status, .. }
                if instance_id == "wf-1" && last_status == "running"
        ));
        assert!(start.elapsed() >= TIMING.timeout);
        assert!(start.elapsed() < TIMING.timeout + TIMING.poll_interval);
        assert_eq!(inventory.status_polls(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_returns_immediately() {
        for expected in ["failed", "cancelled", "pending-ish"] {
            let inventory = Arc::new(FakeInventory::default());
            inventory.set_statuses(&[expected]);

            let start = Instant::now();
            let err = runner(&inventory)
                .await_completion("wf-2", TIMING)
                .await
                .unwrap_err();

            assert!(
                matches!(err, DriverError::WorkflowFailed { ref status, .. } if status == expected),
                "{expected}"
            );
            assert_eq!(inventory.status_polls(), 1);
            assert_eq!(start.elapsed(), TIMING.poll_interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_propagates() {
        let inventory = Arc::new(FakeInventory::default());
        inventory.fail_status_queries();

        let err = runner(&inventory)
            .await_completion("wf-3", TIMING)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::PollError { ref instance_id, .. } if instance_id == "wf-3"
        ));
        assert_eq!(inventory.status_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_is_rejected() {
        let inventory = Arc::new(FakeInventory::default());
        let timing = WorkflowTiming {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::ZERO,
        };

        let err = runner(&inventory)
            .await_completion("wf-4", timing)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
        assert_eq!(inventory.status_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_saturates() {
        let timing = WorkflowTiming::from_minutes_and_secs(u64::MAX / 2, 15);
        assert_eq!(timing.timeout, Duration::from_secs(u64::MAX));

        let inventory = Arc::new(FakeInventory::default());
        inventory.set_statuses(&["running", "succeeded"]);
        runner(&inventory)
            .await_completion("wf-5", timing)
            .await
            .unwrap();
        assert_eq!(inventory.status_polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_submits_then_waits() {
        let inventory = Arc::new(FakeInventory::default());
        inventory.set_statuses(&["succeeded"]);

        let instance = runner(&inventory)
            .run("node-1", "Graph.InstallCoreOS", TIMING)
            .await
            .unwrap();

        assert_eq!(instance, "instance-1");
        assert_eq!(
            inventory.submitted(),
            vec![("node-1".to_string(), "Graph.InstallCoreOS".to_string())]
        );
    }

    #[tokio::test]
    async fn test_submit_rejected() {
        let inventory = Arc::new(FakeInventory::default());
        inventory.reject_submissions();

        let err = runner(&inventory).submit("node-1", "Graph.Bogus").await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::SubmitFailed { ref node_id, ref workflow, .. }
                if node_id == "node-1" && workflow == "Graph.Bogus"
        ));
    }
}
