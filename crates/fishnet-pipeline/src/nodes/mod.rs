//! The closed set of pipeline nodes.

mod cell_segmenter;
mod dot_counter;
mod mean_intensity;

pub use cell_segmenter::CellSegmenter;
pub use dot_counter::DotCounter;
pub use mean_intensity::MeanIntensity;

use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::node::{Processed, Stage};
use crate::types::PipelineError;

/// Registry name of the stitched cell masks.
pub const CELL_MASK_PACK: &str = "cell_mask_pack";
/// Registry name of the mean intensity table.
pub const MEAN_INTENSITY_PACK: &str = "mean_intensity_pack";
/// Registry name of the particle counts.
pub const DOT_COUNT_PACK: &str = "dot_count_pack";

/// Any pipeline node.
#[derive(Debug)]
pub enum Node {
    /// Box-guided cell segmentation.
    CellSegmenter(CellSegmenter),
    /// Mean intensity per cell and plane.
    MeanIntensity(MeanIntensity),
    /// Particle counting per cell.
    DotCounter(DotCounter),
}

impl Node {
    /// Segment, then measure, then count.
    #[must_use]
    pub fn standard(config: &PipelineConfig) -> Vec<Self> {
        vec![
            Self::CellSegmenter(CellSegmenter::new(config.review_cell_segmentation)),
            Self::MeanIntensity(MeanIntensity::new()),
            Self::DotCounter(DotCounter::new()),
        ]
    }

    fn stage(&self) -> &dyn Stage {
        match self {
            Self::CellSegmenter(n) => n,
            Self::MeanIntensity(n) => n,
            Self::DotCounter(n) => n,
        }
    }

    fn stage_mut(&mut self) -> &mut dyn Stage {
        match self {
            Self::CellSegmenter(n) => n,
            Self::MeanIntensity(n) => n,
            Self::DotCounter(n) => n,
        }
    }
}

impl Stage for Node {
    fn title(&self) -> &str {
        self.stage().title()
    }

    fn output_name(&self) -> &str {
        self.stage().output_name()
    }

    fn requirements(&self) -> &[String] {
        self.stage().requirements()
    }

    fn retryable(&self) -> bool {
        self.stage().retryable()
    }

    fn initialize(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError> {
        self.stage_mut().initialize(ctx)
    }

    fn reinitialize(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError> {
        self.stage_mut().reinitialize(ctx)
    }

    fn process(&mut self, ctx: &mut PipelineContext<'_>) -> Result<Processed, PipelineError> {
        self.stage_mut().process(ctx)
    }

    fn summary(&self, processed: &Processed) -> String {
        self.stage().summary(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_and_requirements() {
        let nodes = Node::standard(&PipelineConfig::default());
        let names: Vec<&str> = nodes.iter().map(Stage::output_name).collect();
        assert_eq!(names, vec![CELL_MASK_PACK, MEAN_INTENSITY_PACK, DOT_COUNT_PACK]);
        assert!(nodes[0].requirements().is_empty());
        assert_eq!(nodes[1].requirements(), &[CELL_MASK_PACK.to_string()]);
        assert_eq!(nodes[2].requirements(), &[CELL_MASK_PACK.to_string()]);
        assert!(!nodes[0].retryable());
    }

    #[test]
    fn review_flag_makes_segmenter_retryable() {
        let config = PipelineConfig {
            review_cell_segmentation: true,
            ..PipelineConfig::default()
        };
        assert!(Node::standard(&config)[0].retryable());
    }
}
