//! Pipeline Lifecycle
//!
//! Owns the publisher and the ingestion task, and sequences them so that no
//! publish is attempted on a stopped publisher.
//!
//! # Sequencing
//!
//! Startup: select source → start publisher → spawn ingestion loop.
//! Shutdown: cancel loop → await loop task → stop publisher.
//!
//! The publisher is stopped exactly once on every exit path, including a
//! bounded shutdown whose loop task had to be aborted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::ingestion::{
    IngestError, IngestionContext, IngestionLoop, IngestionReport, IngestionSettings,
};
use crate::application::ports::{ConfigurationError, PublishError, Publisher};
use crate::infrastructure::metrics;
use crate::infrastructure::sources::SourceSelector;

// =============================================================================
// Pipeline State
// =============================================================================

/// Pipeline lifecycle state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, not started.
    Created,
    /// Publisher started and loop task running.
    Running,
    /// Shutdown requested, waiting for the loop to exit.
    Cancelling,
    /// Loop exited and publisher stopped.
    Stopped,
}

impl PipelineState {
    /// State name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Stopped => "stopped",
        }
    }

    const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Running, Self::Cancelling)
                | (Self::Cancelling, Self::Stopped)
        )
    }
}

/// Read-only handle to the pipeline state, shared with the status surface.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    state: Arc<parking_lot::RwLock<PipelineState>>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStatus {
    fn new() -> Self {
        Self {
            state: Arc::new(parking_lot::RwLock::new(PipelineState::Created)),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Whether the pipeline is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub(crate) fn advance(&self, next: PipelineState) -> Result<(), PipelineError> {
        let mut state = self.state.write();
        if !state.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        *state = next;
        drop(state);

        metrics::set_pipeline_state(next);
        tracing::debug!(state = next.as_str(), "Pipeline state changed");
        Ok(())
    }
}

// =============================================================================
// Configuration and Errors
// =============================================================================

/// What the lifecycle selects and how the loop runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Declarative source identifier.
    pub source_kind: String,
    /// Pairs to subscribe to or query.
    pub pairs: Vec<String>,
    /// Lookback window, required for the historical source.
    pub lookback: Option<Duration>,
    /// Loop tuning.
    pub ingestion: IngestionSettings,
}

/// Lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Source selection rejected the configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The publisher could not be started.
    #[error("failed to start publisher: {0}")]
    PublisherStart(#[source] PublishError),

    /// The publisher failed while stopping.
    #[error("failed to stop publisher: {0}")]
    PublisherStop(#[source] PublishError),

    /// The ingestion loop ended with a fatal error.
    #[error("ingestion loop failed: {0}")]
    Ingest(#[from] IngestError),

    /// The ingestion task panicked or was aborted.
    #[error("ingestion task failed: {0}")]
    TaskFailed(String),

    /// The loop did not drain within the shutdown bound and was aborted.
    #[error("ingestion loop did not drain within {waited:?}; task aborted")]
    DrainTimeout {
        /// Bound that elapsed.
        waited: Duration,
    },

    /// Startup was already attempted on this instance.
    #[error("pipeline cannot be restarted; construct a new instance")]
    NotRestartable,

    /// Illegal state transition.
    #[error("invalid pipeline transition from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition {
        /// Current state.
        from: PipelineState,
        /// Requested state.
        to: PipelineState,
    },
}

// =============================================================================
// Pipeline Lifecycle
// =============================================================================

type IngestionTask = JoinHandle<Result<IngestionReport, IngestError>>;

/// Start/stop orchestration for one source, one publisher, one loop.
pub struct PipelineLifecycle {
    config: PipelineConfig,
    selector: SourceSelector,
    publisher: Arc<dyn Publisher>,
    status: PipelineStatus,
    cancel: CancellationToken,
    finished: CancellationToken,
    task: Option<IngestionTask>,
    startup_attempted: bool,
    publisher_stopped: bool,
}

impl PipelineLifecycle {
    /// Create a pipeline in the `Created` state.
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        selector: SourceSelector,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            selector,
            publisher,
            status: PipelineStatus::new(),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            task: None,
            startup_attempted: false,
            publisher_stopped: false,
        }
    }

    /// Shared state handle for the status surface.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        self.status.clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.status.state()
    }

    /// Resolves once the ingestion task has exited, for whatever reason.
    ///
    /// Never resolves if the pipeline was not started.
    #[must_use]
    pub fn finished(&self) -> WaitForCancellationFutureOwned {
        self.finished.clone().cancelled_owned()
    }

    /// Start the pipeline.
    ///
    /// Selects the source, starts the publisher, then spawns the ingestion
    /// loop. A failed startup leaves the pipeline in `Created`; the instance
    /// cannot be started again.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if source selection fails
    /// (before the publisher is touched), `PipelineError::PublisherStart` if
    /// the publisher fails to start, and `PipelineError::NotRestartable` on
    /// a second call.
    pub async fn on_startup(&mut self) -> Result<(), PipelineError> {
        if self.startup_attempted {
            return Err(PipelineError::NotRestartable);
        }
        self.startup_attempted = true;

        let mut source = self.selector.create(
            &self.config.source_kind,
            &self.config.pairs,
            self.config.lookback,
        )?;

        if let Err(e) = self.publisher.start().await {
            tracing::error!(error = %e, "Publisher failed to start");
            let _ = self.stop_publisher().await;
            return Err(PipelineError::PublisherStart(e));
        }

        let ingestion = IngestionLoop::new(self.config.ingestion.clone(), self.cancel.clone());
        let publisher = Arc::clone(&self.publisher);
        let finished = self.finished.clone();

        self.status.advance(PipelineState::Running)?;
        self.task = Some(tokio::spawn(async move {
            let _finished = finished.drop_guard();
            ingestion
                .run(IngestionContext {
                    source: source.as_mut(),
                    publisher: publisher.as_ref(),
                })
                .await
        }));

        tracing::info!(
            source = %self.config.source_kind,
            pairs = ?self.config.pairs,
            "Trade pipeline started"
        );
        Ok(())
    }

    /// Stop the pipeline and wait for it to drain.
    ///
    /// Cancels the loop, waits for its task, then stops the publisher. A
    /// no-op returning `Ok(None)` in `Created` or `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Ingest` if the loop ended with a fatal error,
    /// `PipelineError::TaskFailed` if its task panicked, and
    /// `PipelineError::PublisherStop` if only the final stop failed. The
    /// publisher is stopped in every case.
    pub async fn on_shutdown(&mut self) -> Result<Option<IngestionReport>, PipelineError> {
        self.shutdown(None).await
    }

    /// Stop the pipeline, aborting the loop if it has not drained within
    /// `limit`.
    ///
    /// On expiry the loop task is aborted and awaited, then the publisher is
    /// stopped and the pipeline reaches `Stopped` as in `on_shutdown`. A
    /// publish cut off by the abort is not acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::DrainTimeout` if the bound elapsed, otherwise
    /// the same errors as `on_shutdown`.
    pub async fn on_shutdown_within(
        &mut self,
        limit: Duration,
    ) -> Result<Option<IngestionReport>, PipelineError> {
        self.shutdown(Some(limit)).await
    }

    async fn shutdown(
        &mut self,
        limit: Option<Duration>,
    ) -> Result<Option<IngestionReport>, PipelineError> {
        match self.status.state() {
            PipelineState::Created | PipelineState::Stopped => return Ok(None),
            PipelineState::Running => self.status.advance(PipelineState::Cancelling)?,
            PipelineState::Cancelling => {}
        }

        tracing::info!("Cancelling ingestion loop");
        self.cancel.cancel();

        let outcome = match self.task.take() {
            Some(task) => join_task(task, limit).await,
            None => Ok(None),
        };

        let stopped = self.stop_publisher().await;
        self.status.advance(PipelineState::Stopped)?;

        match (&outcome, stopped) {
            (Err(e), _) => tracing::error!(error = %e, "Trade pipeline stopped after failure"),
            (Ok(_), Err(e)) => return Err(PipelineError::PublisherStop(e)),
            (Ok(report), Ok(())) => tracing::info!(report = ?report, "Trade pipeline stopped"),
        }
        outcome
    }

    async fn stop_publisher(&mut self) -> Result<(), PublishError> {
        if self.publisher_stopped {
            return Ok(());
        }
        self.publisher_stopped = true;

        let result = self.publisher.stop().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Publisher stop reported an error");
        }
        result
    }
}

async fn join_task(
    mut task: IngestionTask,
    limit: Option<Duration>,
) -> Result<Option<IngestionReport>, PipelineError> {
    let joined = match limit {
        None => task.await,
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "Ingestion loop did not drain in time, aborting"
                );
                task.abort();
                // The aborted task must release the publisher before stop.
                let _ = task.await;
                return Err(PipelineError::DrainTimeout { waited: limit });
            }
        },
    };

    match joined {
        Ok(result) => result.map(Some).map_err(PipelineError::from),
        Err(e) => Err(PipelineError::TaskFailed(e.to_string())),
    }
}

impl Drop for PipelineLifecycle {
    fn drop(&mut self) {
        if self.task.is_some() {
            tracing::warn!("Pipeline dropped without shutdown; cancelling ingestion loop");
            self.cancel.cancel();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
