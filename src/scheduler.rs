//! # Step Scheduler
//!
//! Runs an ordered list of named, predicate-gated build steps against one
//! shared, read-only build configuration.
//!
//! ## Execution Model
//!
//! ```text
//!   for step in registration order:
//!       predicate rejects / name filter mismatch → skip
//!       Sync  → run inline; failure stops the loop
//!       Async → spawn on the join set, continue immediately
//!   drain the join set (always, also after a sync failure)
//! ```
//!
//! ## Failure Semantics
//!
//! - A failed sync step wins: its error is returned once in-flight async
//!   steps have finished.
//! - Otherwise the first failed async step in registration order is
//!   returned; further async failures are logged.
//! - Errors name the failed step and carry the step's own error unmodified
//!   as their source.
//!
//! There are no retries and no cancellation: a dispatched async step always
//! runs to completion.

use crate::error::{BoxError, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A named unit of build work.
///
/// Steps are registered once and hold no per-run state; everything a run
/// needs comes from the shared configuration.
#[async_trait]
pub trait BuildStep<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    /// Step name, used for filtering and error reporting.
    fn name(&self) -> &str;

    /// Whether the step applies to `config`.
    fn predicate(&self, _config: &C) -> bool {
        true
    }

    /// Runs the step. The returned artifact (e.g. an image ID or output
    /// path) is recorded in the step's outcome.
    async fn run(&self, config: Arc<C>) -> std::result::Result<Option<String>, BoxError>;

    /// Images the step will use for `config`.
    fn images_used(&self, _config: &C) -> Vec<String> {
        Vec::new()
    }
}

/// How a step is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// Runs inline; later steps wait for it.
    #[default]
    Sync,
    /// Runs as an independent task.
    Async,
}

/// Lifecycle state of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Record of one executed step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub mode: StepMode,
    pub status: StepStatus,
    pub artifact: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepOutcome {
    fn pending(name: &str, mode: StepMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            status: StepStatus::Pending,
            artifact: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn start(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        debug!("Step {} {}", self.name, self.status);
    }

    fn finish(&mut self, status: StepStatus, artifact: Option<String>) {
        self.status = status;
        self.artifact = artifact;
        self.finished_at = Some(Utc::now());
        match status {
            StepStatus::Failed => warn!("Step {} {}", self.name, status),
            _ => info!("Step {} {}", self.name, status),
        }
    }
}

struct Entry<C> {
    step: Arc<dyn BuildStep<C>>,
    mode: StepMode,
}

type StepResult = std::result::Result<Option<String>, BoxError>;

/// Ordered build-step runner bound to one configuration.
pub struct StepScheduler<C>
where
    C: Send + Sync + 'static,
{
    steps: Vec<Entry<C>>,
    config: Arc<C>,
}

impl<C> StepScheduler<C>
where
    C: Send + Sync + 'static,
{
    /// Creates an empty scheduler for `config`.
    pub fn new(config: C) -> Self {
        Self::with_shared(Arc::new(config))
    }

    /// Creates an empty scheduler for an already shared `config`.
    pub fn with_shared(config: Arc<C>) -> Self {
        Self {
            steps: Vec::new(),
            config,
        }
    }

    /// Appends a step.
    pub fn register(&mut self, step: Arc<dyn BuildStep<C>>, mode: StepMode) -> &mut Self {
        debug!("Registered step {} ({:?})", step.name(), mode);
        self.steps.push(Entry { step, mode });
        self
    }

    /// Appends a step that runs inline.
    pub fn register_sync(&mut self, step: Arc<dyn BuildStep<C>>) -> &mut Self {
        self.register(step, StepMode::Sync)
    }

    /// Appends a step that runs as an independent task.
    pub fn register_async(&mut self, step: Arc<dyn BuildStep<C>>) -> &mut Self {
        self.register(step, StepMode::Async)
    }

    /// True once at least one step is registered.
    pub fn is_initialized(&self) -> bool {
        !self.steps.is_empty()
    }

    /// Registered step names in order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|e| e.step.name()).collect()
    }

    pub fn config(&self) -> &Arc<C> {
        &self.config
    }

    /// Runs every applicable step, or only the step named `only`.
    pub async fn run(&self, only: Option<&str>) -> Result<Vec<StepOutcome>> {
        if let Some(name) = only {
            if !self.steps.iter().any(|e| e.step.name() == name) {
                warn!("No step named {} is registered", name);
            }
        }

        let mut outcomes: Vec<StepOutcome> = Vec::new();
        let mut tasks: JoinSet<(usize, StepResult)> = JoinSet::new();
        let mut sync_failure: Option<Error> = None;

        for entry in &self.steps {
            let name = entry.step.name();
            if only.is_some_and(|o| o != name) {
                continue;
            }
            if !entry.step.predicate(&self.config) {
                debug!("Step {} skipped by predicate", name);
                continue;
            }

            let index = outcomes.len();
            let mut outcome = StepOutcome::pending(name, entry.mode);
            outcome.start();
            outcomes.push(outcome);

            match entry.mode {
                StepMode::Async => {
                    let step = Arc::clone(&entry.step);
                    let config = Arc::clone(&self.config);
                    tasks.spawn(async move { (index, run_guarded(step, config).await) });
                }
                StepMode::Sync => {
                    match run_guarded(Arc::clone(&entry.step), Arc::clone(&self.config)).await {
                        Ok(artifact) => outcomes[index].finish(StepStatus::Completed, artifact),
                        Err(source) => {
                            outcomes[index].finish(StepStatus::Failed, None);
                            sync_failure = Some(Error::StepFailed {
                                step: name.to_string(),
                                source,
                            });
                            break;
                        }
                    }
                }
            }
        }

        let mut async_failures: Vec<(usize, Error)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(artifact))) => {
                    outcomes[index].finish(StepStatus::Completed, artifact);
                }
                Ok((index, Err(source))) => {
                    outcomes[index].finish(StepStatus::Failed, None);
                    async_failures.push((
                        index,
                        Error::StepFailed {
                            step: outcomes[index].name.clone(),
                            source,
                        },
                    ));
                }
                Err(e) => error!("Async step task lost: {}", e),
            }
        }
        async_failures.sort_by_key(|(index, _)| *index);

        if let Some(err) = sync_failure {
            for (_, failure) in &async_failures {
                error!("{}", failure);
            }
            return Err(err);
        }

        let mut failures = async_failures.into_iter().map(|(_, e)| e);
        if let Some(first) = failures.next() {
            for other in failures {
                error!("{}", other);
            }
            return Err(first);
        }

        Ok(outcomes)
    }

    /// Union of images used by every step accepting each group's config,
    /// de-duplicated in first-seen order.
    pub fn images(&self, groups: &[C]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut images = Vec::new();
        for group in groups {
            for entry in &self.steps {
                if !entry.step.predicate(group) {
                    continue;
                }
                for image in entry.step.images_used(group) {
                    if seen.insert(image.clone()) {
                        images.push(image);
                    }
                }
            }
        }
        images
    }
}

/// Runs a step, turning a panic into a step error.
async fn run_guarded<C>(step: Arc<dyn BuildStep<C>>, config: Arc<C>) -> StepResult
where
    C: Send + Sync + 'static,
{
    match AssertUnwindSafe(step.run(config)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("step panicked: {}", message).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl BuildStep<()> for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _config: Arc<()>) -> std::result::Result<Option<String>, BoxError> {
            Ok(Some(format!("{}-artifact", self.0)))
        }
    }

    struct Panics;

    #[async_trait]
    impl BuildStep<()> for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn run(&self, _config: Arc<()>) -> std::result::Result<Option<String>, BoxError> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_outcomes_record_artifacts() {
        let mut scheduler = StepScheduler::new(());
        scheduler.register_sync(Arc::new(Echo("compile")));
        scheduler.register_async(Arc::new(Echo("package")));

        let outcomes = scheduler.run(None).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == StepStatus::Completed));
        assert_eq!(outcomes[1].artifact.as_deref(), Some("package-artifact"));
        assert!(outcomes[0].finished_at >= outcomes[0].started_at);
    }

    #[tokio::test]
    async fn test_only_filter() {
        let mut scheduler = StepScheduler::new(());
        scheduler.register_sync(Arc::new(Echo("a")));
        scheduler.register_sync(Arc::new(Echo("b")));

        let outcomes = scheduler.run(Some("b")).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "b");
    }

    #[tokio::test]
    async fn test_panic_becomes_step_error() {
        let mut scheduler = StepScheduler::new(());
        scheduler.register_async(Arc::new(Panics));

        let err = scheduler.run(None).await.unwrap_err();
        assert_eq!(err.to_string(), "step 'panics' failed: step panicked: boom");
    }

    #[test]
    fn test_initialized_flag() {
        let mut scheduler = StepScheduler::new(());
        assert!(!scheduler.is_initialized());
        scheduler.register_sync(Arc::new(Echo("a")));
        assert!(scheduler.is_initialized());
        assert_eq!(scheduler.step_names(), vec!["a"]);
    }
}
