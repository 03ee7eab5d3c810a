//! fishnet-pipeline: cell segmentation and per-cell quantification (sans-IO).
//!
//! Turns a z-by-channel fluorescence stack into per-cell measurements:
//! box-guided segmentation -> nucleus/cytoplasm stitching -> mean
//! intensity -> tiled particle counting.
//!
//! This crate has **no I/O dependencies**. The segmentation model, the
//! operator, and artifact persistence are traits
//! ([`Segmenter`], [`Operator`], [`ArtifactStore`]) supplied by the
//! caller through a [`PipelineContext`]. Rendering and CSV output live
//! in `fishnet-export`.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod labels;
pub mod node;
pub mod nodes;
pub mod quantify;
pub mod quilt;
pub mod registry;
pub mod resolver;
pub mod review;
pub mod segmentation;
pub mod stack;
pub mod stitch;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::{PipelineConfig, QuiltConfig};
pub use context::PipelineContext;
pub use diagnostics::{Clock, RunDiagnostics, RunFailure, StdClock};
pub use engine::{Pipeline, StatusCode};
pub use node::{NodeOutcome, Processed, Stage};
pub use nodes::{CELL_MASK_PACK, DOT_COUNT_PACK, MEAN_INTENSITY_PACK, Node};
pub use registry::{Artifact, ArtifactStore, MemoryStore, OutputRegistry};
pub use review::{Operator, ReviewCommand, Verdict};
pub use segmentation::{Candidate, Segmenter};
pub use stack::{ImageStack, Plane};
pub use types::{BoundingBox, CellMaskPack, CellPart, Dimensions, LabelMask, PipelineError};

/// Run the standard pipeline: segment, measure, count.
///
/// # Errors
///
/// Returns a [`RunFailure`] carrying the diagnostics of every node that
/// ran. Its error is [`PipelineError::InvalidConfig`] for a bad
/// configuration, [`PipelineError::RequirementsUnmet`] if a node cannot
/// start, or any node, backend, or store error.
pub fn run(ctx: &mut PipelineContext<'_>) -> Result<RunDiagnostics, RunFailure> {
    let clock = StdClock;
    let started = clock.now();
    let failure = |error: PipelineError, nodes: Vec<diagnostics::NodeDiagnostics>| RunFailure {
        diagnostics: RunDiagnostics {
            nodes,
            total_duration: clock.elapsed(&started),
        },
        error,
    };

    if let Err(error) = ctx.config.validate() {
        return Err(failure(error, Vec::new()));
    }
    let mut pipeline = Pipeline::new(Node::standard(&ctx.config));
    pipeline
        .run(ctx)
        .map_err(|error| failure(error, pipeline.diagnostics().to_vec()))
}
