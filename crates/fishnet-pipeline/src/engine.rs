//! The pipeline engine.
//!
//! Nodes run strictly in order, one at a time. A node whose
//! requirements stay unmet stops the run; nothing already saved is
//! rolled back and later nodes are never invoked.

use tracing::{error, info, warn};

use crate::context::PipelineContext;
use crate::diagnostics::{Clock, NodeDiagnostics, OutcomeKind, RunDiagnostics, StdClock};
use crate::node::{NodeOutcome, Stage, run_stage};
use crate::types::PipelineError;

/// Result of [`Pipeline::run_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// The node finished, with or without output.
    Success,
    /// The node's requirements were unmet. The run must stop.
    Failure,
}

/// An ordered list of nodes and a cursor.
#[derive(Debug)]
pub struct Pipeline<S, C = StdClock> {
    nodes: Vec<S>,
    current: usize,
    clock: C,
    diagnostics: Vec<NodeDiagnostics>,
    unmet: Option<PipelineError>,
}

impl<S: Stage> Pipeline<S> {
    /// A pipeline timed by the system clock.
    #[must_use]
    pub const fn new(nodes: Vec<S>) -> Self {
        Self::with_clock(nodes, StdClock)
    }
}

impl<S: Stage, C: Clock> Pipeline<S, C> {
    /// A pipeline timed by `clock`.
    #[must_use]
    pub const fn with_clock(nodes: Vec<S>, clock: C) -> Self {
        Self {
            nodes,
            current: 0,
            clock,
            diagnostics: Vec::new(),
            unmet: None,
        }
    }

    /// Whether nodes remain.
    #[must_use]
    pub fn is_not_finished(&self) -> bool {
        self.current < self.nodes.len()
    }

    /// The node [`run_node`](Self::run_node) would run next.
    #[must_use]
    pub fn current(&self) -> Option<&S> {
        self.nodes.get(self.current)
    }

    /// All nodes.
    #[must_use]
    pub fn nodes(&self) -> &[S] {
        &self.nodes
    }

    /// Diagnostics of the nodes run so far.
    #[must_use]
    pub fn diagnostics(&self) -> &[NodeDiagnostics] {
        &self.diagnostics
    }

    /// Run the current node's full lifecycle.
    ///
    /// A successful output is saved to the store, then published in the
    /// registry under the node's output name.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Finished`] when no node remains,
    /// [`PipelineError::DuplicateOutput`] when the output name is
    /// taken, and propagates node and store errors.
    pub fn run_node(&mut self, ctx: &mut PipelineContext<'_>) -> Result<StatusCode, PipelineError> {
        let node = self
            .nodes
            .get_mut(self.current)
            .ok_or(PipelineError::Finished)?;
        let started = self.clock.now();
        let report = run_stage(node, ctx)?;
        let title = node.title().to_string();
        let output_name = node.output_name().to_string();

        let detail = report.summary;
        let (status, outcome) = match report.outcome {
            NodeOutcome::Success(artifact) => {
                ctx.store.save(&output_name, &artifact)?;
                ctx.registry.insert(&output_name, artifact)?;
                info!(node = %title, output = %output_name, %detail, "node succeeded");
                (StatusCode::Success, OutcomeKind::Success)
            }
            NodeOutcome::Abandoned => {
                warn!(node = %title, %detail, "node ended without output");
                (StatusCode::Success, OutcomeKind::Abandoned)
            }
            NodeOutcome::RequirementsUnmet(missing) => {
                error!(node = %title, missing = ?missing, "requirements unmet");
                self.unmet = Some(PipelineError::RequirementsUnmet {
                    node: title.clone(),
                    missing,
                });
                (StatusCode::Failure, OutcomeKind::RequirementsUnmet)
            }
        };

        self.diagnostics.push(NodeDiagnostics {
            title,
            output_name,
            outcome,
            attempts: report.attempts,
            duration: self.clock.elapsed(&started),
            detail,
        });
        Ok(status)
    }

    /// Move to the next node.
    pub const fn advance(&mut self) {
        if self.current < self.nodes.len() {
            self.current += 1;
        }
    }

    /// Run every remaining node.
    ///
    /// # Errors
    ///
    /// Stops at the first [`StatusCode::Failure`] with
    /// [`PipelineError::RequirementsUnmet`], and propagates any error
    /// from [`run_node`](Self::run_node).
    pub fn run(&mut self, ctx: &mut PipelineContext<'_>) -> Result<RunDiagnostics, PipelineError> {
        let started = self.clock.now();
        while self.is_not_finished() {
            match self.run_node(ctx)? {
                StatusCode::Success => self.advance(),
                StatusCode::Failure => {
                    return Err(self.unmet.take().unwrap_or(PipelineError::Finished));
                }
            }
        }
        Ok(RunDiagnostics {
            nodes: self.diagnostics.clone(),
            total_duration: self.clock.elapsed(&started),
        })
    }
}
