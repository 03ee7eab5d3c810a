//! Pipeline configuration.

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Tiling parameters for the quilt aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiltConfig {
    /// Square tile edge in pixels.
    pub block_size: u32,

    /// Candidates covering strictly more than this fraction of a tile
    /// are discarded as background.
    pub max_area_fraction: f64,

    /// Edge length each per-cell crop is resized to before tiling.
    /// Must be a multiple of `block_size`.
    pub crop_size: u32,
}

impl QuiltConfig {
    /// Default tile edge.
    pub const DEFAULT_BLOCK_SIZE: u32 = 512;
    /// Default candidate area ceiling.
    pub const DEFAULT_MAX_AREA_FRACTION: f64 = 0.05;
    /// Default crop edge.
    pub const DEFAULT_CROP_SIZE: u32 = 1024;

    /// Check the tiling invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero block size, a
    /// crop size that is not a positive multiple of the block size, or
    /// an area fraction outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.block_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "block_size must be positive".to_string(),
            ));
        }
        if self.crop_size == 0 || self.crop_size % self.block_size != 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "crop_size {} is not a multiple of block_size {}",
                self.crop_size, self.block_size,
            )));
        }
        if !(self.max_area_fraction > 0.0 && self.max_area_fraction <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "max_area_fraction {} must lie in (0, 1]",
                self.max_area_fraction,
            )));
        }
        Ok(())
    }
}

impl Default for QuiltConfig {
    fn default() -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE,
            max_area_fraction: Self::DEFAULT_MAX_AREA_FRACTION,
            crop_size: Self::DEFAULT_CROP_SIZE,
        }
    }
}

/// Configuration for a full pipeline run.
///
/// Every field has a default so a partial JSON document is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pixel area the interactive canvas is resized to before boxes are
    /// drawn. Aspect ratio is preserved.
    pub canvas_pixel_area: u64,

    /// Boxes with an area at or below this are treated as stray clicks.
    pub min_box_area: u64,

    /// Padding around each cell when exporting raw crops.
    pub crop_pad: u32,

    /// Put the cell segmenter in a review loop (retry/accept/abandon).
    pub review_cell_segmentation: bool,

    /// Tiled counting parameters.
    pub quilt: QuiltConfig,
}

impl PipelineConfig {
    /// Default canvas area (768 x 768).
    pub const DEFAULT_CANVAS_PIXEL_AREA: u64 = 768 * 768;
    /// Default stray-click threshold.
    pub const DEFAULT_MIN_BOX_AREA: u64 = 100;
    /// Default raw crop padding.
    pub const DEFAULT_CROP_PAD: u32 = 20;

    /// Check every parameter.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// violated constraint.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.canvas_pixel_area == 0 {
            return Err(PipelineError::InvalidConfig(
                "canvas_pixel_area must be positive".to_string(),
            ));
        }
        self.quilt.validate()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canvas_pixel_area: Self::DEFAULT_CANVAS_PIXEL_AREA,
            min_box_area: Self::DEFAULT_MIN_BOX_AREA,
            crop_pad: Self::DEFAULT_CROP_PAD,
            review_cell_segmentation: false,
            quilt: QuiltConfig::default(),
        }
    }
}
