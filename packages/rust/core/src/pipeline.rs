//! Multi-identity pipeline orchestration.
//!
//! Drives every identity through Collect → Enrich → Embed on independently
//! spawned tokio tasks. Admission is bounded by `max_concurrent_tasks` with
//! a fixed pacing delay between admissions. The driver loop joins finished
//! stage tasks, applies state transitions, spawns follow-up stages, and
//! terminates only once every identity is terminal. A panicking or erroring
//! stage records a Failed terminal state for its identity and never
//! disturbs siblings.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use reviewharvest_shared::{Identity, PipelineConfig, PipelineRunSummary, Stage, StageResult};

use crate::stages::StageRunner;

/// Sleep between driver-loop wakeups when nothing is joinable yet.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-identity progress through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IdentityState {
    Pending,
    Collecting,
    Enriching,
    Embedding,
    Done,
    Failed(String),
}

impl IdentityState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

/// Orchestrator options, derived from the pipeline configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Bound on identities in a non-terminal, non-pending state.
    pub max_concurrent: usize,
    /// Pacing delay between consecutive admissions.
    pub admission_delay: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            admission_delay: Duration::from_millis(500),
        }
    }
}

impl From<&PipelineConfig> for OrchestratorOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_tasks.max(1),
            admission_delay: config.admission_delay,
        }
    }
}

/// Drives identities through the staged pipeline via a `StageRunner`.
pub struct PipelineOrchestrator<R: StageRunner> {
    runner: Arc<R>,
    options: OrchestratorOptions,
}

impl<R: StageRunner> PipelineOrchestrator<R> {
    pub fn new(runner: R, options: OrchestratorOptions) -> Self {
        Self {
            runner: Arc::new(runner),
            options,
        }
    }

    /// Run the pipeline to completion over `identities`, returning the
    /// aggregate summary. Always completes; per-identity failures are
    /// recorded, never propagated.
    #[instrument(skip_all, fields(domain, identities = identities.len()))]
    pub async fn run(&self, domain: &str, identities: Vec<Identity>) -> PipelineRunSummary {
        let mut summary = PipelineRunSummary::new(domain);

        let mut states: Vec<IdentityState> = vec![IdentityState::Pending; identities.len()];
        let mut pending: VecDeque<usize> = (0..identities.len()).collect();
        let mut tasks: JoinSet<(usize, Stage, StageResult)> = JoinSet::new();
        let mut active = 0usize;

        info!(
            total = identities.len(),
            max_concurrent = self.options.max_concurrent,
            "starting pipeline run"
        );

        loop {
            // Admit pending identities while slots are free, pacing each
            // admission.
            while active < self.options.max_concurrent {
                let Some(idx) = pending.pop_front() else { break };
                states[idx] = IdentityState::Collecting;
                active += 1;
                info!(identity = %identities[idx], "admitted");
                self.spawn_stage(&mut tasks, idx, identities[idx].clone(), Stage::Collect);
                tokio::time::sleep(self.options.admission_delay).await;
            }

            if active == 0 && pending.is_empty() {
                break;
            }

            // The task set grows while we wait, so wake periodically and
            // re-poll rather than blocking on a snapshot of it.
            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let (idx, stage, result) = match joined {
                        Ok(finished) => finished,
                        Err(e) => {
                            // Stage panics are contained inside the spawned
                            // future, so a join error is unexpected.
                            error!(error = %e, "stage task join failed");
                            continue;
                        }
                    };

                    let identity = &identities[idx];
                    match result {
                        StageResult::Succeeded { .. } => match stage {
                            Stage::Collect => {
                                states[idx] = IdentityState::Enriching;
                                self.spawn_stage(&mut tasks, idx, identity.clone(), Stage::Enrich);
                            }
                            Stage::Enrich => {
                                states[idx] = IdentityState::Embedding;
                                self.spawn_stage(&mut tasks, idx, identity.clone(), Stage::Embed);
                            }
                            Stage::Embed => {
                                states[idx] = IdentityState::Done;
                                active -= 1;
                                let comments = self.runner.collected_count(identity);
                                summary.record_success(identity, comments);
                                info!(identity = %identity, comments, "identity complete");
                            }
                        },
                        StageResult::Failed { reason } => {
                            warn!(identity = %identity, stage = %stage, reason = %reason, "identity failed");
                            states[idx] = IdentityState::Failed(reason.clone());
                            active -= 1;
                            summary.record_failure(identity, reason);
                        }
                    }
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }

        debug_assert!(states.iter().all(IdentityState::is_terminal));

        summary.finished_at = Some(chrono::Utc::now());
        info!(
            succeeded = summary.identities_succeeded,
            failed = summary.identities_failed,
            total_comments = summary.total_comments,
            "pipeline run complete"
        );
        summary
    }

    /// Spawn one stage task. A panic inside the runner is caught and
    /// converted into a stage failure so it cannot poison the driver loop.
    fn spawn_stage(
        &self,
        tasks: &mut JoinSet<(usize, Stage, StageResult)>,
        idx: usize,
        identity: Identity,
        stage: Stage,
    ) {
        let runner = Arc::clone(&self.runner);
        tasks.spawn(async move {
            let result = std::panic::AssertUnwindSafe(runner.run(stage, &identity))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| StageResult::failed(format!("{stage} stage panicked")));
            (idx, stage, result)
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
