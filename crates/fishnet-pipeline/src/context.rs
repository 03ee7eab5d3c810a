//! State shared by every node during one run.

use crate::config::PipelineConfig;
use crate::registry::{ArtifactStore, OutputRegistry};
use crate::review::Operator;
use crate::segmentation::Segmenter;
use crate::stack::ImageStack;

/// Everything a node may read or call.
///
/// Built by the caller before the pipeline starts and passed by
/// reference into each node. Collaborators are borrowed so the caller
/// keeps ownership after the run.
pub struct PipelineContext<'a> {
    /// Run parameters.
    pub config: PipelineConfig,
    /// The acquisition being analysed.
    pub images: ImageStack,
    /// Artifacts produced so far.
    pub registry: OutputRegistry,
    /// Segmentation backend.
    pub segmenter: &'a mut dyn Segmenter,
    /// The human in the loop.
    pub operator: &'a mut dyn Operator,
    /// Persistence for outputs and substitutes.
    pub store: &'a mut dyn ArtifactStore,
}

impl<'a> PipelineContext<'a> {
    /// Assemble a context with an empty registry.
    pub fn new(
        config: PipelineConfig,
        images: ImageStack,
        segmenter: &'a mut dyn Segmenter,
        operator: &'a mut dyn Operator,
        store: &'a mut dyn ArtifactStore,
    ) -> Self {
        Self {
            config,
            images,
            registry: OutputRegistry::new(),
            segmenter,
            operator,
            store,
        }
    }
}
