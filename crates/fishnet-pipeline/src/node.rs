//! The node contract and its lifecycle.
//!
//! A node implements [`Stage`]; [`run_stage`] drives it through
//!
//! ```text
//! Uninitialized -> RequirementsChecked -> Initialized
//!     -> Processing <-> AwaitingFeedback -> Done
//! ```
//!
//! Unmet requirements jump straight to `Done`. A retry-enabled node
//! loops between processing and review until the operator accepts or
//! abandons; any other node processes exactly once.

use std::fmt;

use tracing::{debug, info};

use crate::context::PipelineContext;
use crate::registry::Artifact;
use crate::resolver::resolve_requirements;
use crate::review::Verdict;
use crate::types::PipelineError;

/// What one call to [`Stage::process`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// The node finished and has an output.
    Complete(Artifact),
    /// The node ended without an output, e.g. the operator quit.
    Incomplete,
}

impl Processed {
    /// What the output holds, or `no output`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Complete(artifact) => artifact.describe(),
            Self::Incomplete => "no output".to_string(),
        }
    }
}

/// How a node run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// Output to publish.
    Success(Artifact),
    /// Ended cleanly without output.
    Abandoned,
    /// These requirements were missing and had no substitute.
    RequirementsUnmet(Vec<String>),
}

/// Lifecycle position of a running node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not started.
    Uninitialized,
    /// Requirements are in the registry.
    RequirementsChecked,
    /// One-time setup done.
    Initialized,
    /// Inside `process`.
    Processing,
    /// Waiting for the operator's verdict.
    AwaitingFeedback,
    /// Finished.
    Done,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::RequirementsChecked => "requirements_checked",
            Self::Initialized => "initialized",
            Self::Processing => "processing",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// One unit of pipeline work.
pub trait Stage {
    /// Human-readable name.
    fn title(&self) -> &str;

    /// Registry name of the output.
    fn output_name(&self) -> &str;

    /// Registry names that must exist before initialization.
    fn requirements(&self) -> &[String];

    /// Whether outputs go through operator review.
    fn retryable(&self) -> bool {
        false
    }

    /// One-time setup.
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn initialize(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError>;

    /// Setup before a retry. Defaults to [`initialize`](Self::initialize).
    ///
    /// # Errors
    ///
    /// Any error aborts the run.
    fn reinitialize(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError> {
        self.initialize(ctx)
    }

    /// Do the work.
    ///
    /// # Errors
    ///
    /// Any error aborts the run. A node that merely has nothing to
    /// output returns [`Processed::Incomplete`].
    fn process(&mut self, ctx: &mut PipelineContext<'_>) -> Result<Processed, PipelineError>;

    /// One line on `processed`, shown at review and kept in the
    /// diagnostics.
    fn summary(&self, processed: &Processed) -> String {
        processed.describe()
    }
}

/// Result of [`run_stage`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    /// How the node ended.
    pub outcome: NodeOutcome,
    /// Times `process` ran.
    pub attempts: usize,
    /// [`Stage::summary`] of the final attempt, or the missing names.
    pub summary: String,
}

fn enter(title: &str, from: NodeState, to: NodeState) -> NodeState {
    debug!(node = title, %from, %to, "node state");
    to
}

/// Drive `stage` through its lifecycle.
///
/// # Errors
///
/// Propagates errors from the stage and from requirement resolution.
pub fn run_stage<S: Stage + ?Sized>(
    stage: &mut S,
    ctx: &mut PipelineContext<'_>,
) -> Result<NodeReport, PipelineError> {
    let title = stage.title().to_string();
    info!(node = %title, output = stage.output_name(), "starting node");
    let mut state = NodeState::Uninitialized;

    let missing = resolve_requirements(stage.requirements(), ctx)?;
    if !missing.is_empty() {
        enter(&title, state, NodeState::Done);
        return Ok(NodeReport {
            summary: format!("missing: {}", missing.join(", ")),
            outcome: NodeOutcome::RequirementsUnmet(missing),
            attempts: 0,
        });
    }
    state = enter(&title, state, NodeState::RequirementsChecked);

    stage.initialize(ctx)?;
    state = enter(&title, state, NodeState::Initialized);

    let mut attempts = 0;
    loop {
        if attempts > 0 {
            stage.reinitialize(ctx)?;
        }
        attempts += 1;
        state = enter(&title, state, NodeState::Processing);
        let processed = stage.process(ctx)?;
        let summary = stage.summary(&processed);

        let verdict = if stage.retryable() {
            state = enter(&title, state, NodeState::AwaitingFeedback);
            ctx.operator.verdict(&title, &summary)
        } else {
            Verdict::Accept
        };

        let outcome = match (verdict, processed) {
            (Verdict::Retry, _) => {
                info!(node = %title, attempts, "retrying node");
                continue;
            }
            (Verdict::Accept, Processed::Complete(artifact)) => NodeOutcome::Success(artifact),
            (Verdict::Accept, Processed::Incomplete) | (Verdict::Abandon, _) => NodeOutcome::Abandoned,
        };
        enter(&title, state, NodeState::Done);
        return Ok(NodeReport {
            outcome,
            attempts,
            summary,
        });
    }
}
