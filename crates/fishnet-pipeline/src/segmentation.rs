//! The segmentation backend seam.
//!
//! The pipeline never segments pixels itself. It drives a
//! [`Segmenter`]: a box-prompted model for the cell masks and an
//! unsupervised candidate generator for particle counting.

use image::GrayImage;

use crate::types::{BoundingBox, Dimensions, PipelineError};

/// One object proposed by [`Segmenter::generate_candidates`].
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Binary mask, same size as the image it was generated for.
    pub mask: GrayImage,
    /// Fraction of the image the mask covers, as reported by the backend.
    pub area_fraction: f64,
}

impl Candidate {
    /// Wrap a mask and compute its area fraction.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_mask(mask: GrayImage) -> Self {
        let total = Dimensions::of(&mask).pixel_count();
        let area_fraction = if total == 0 {
            0.0
        } else {
            count_foreground(&mask) as f64 / total as f64
        };
        Self {
            mask,
            area_fraction,
        }
    }

    /// Number of foreground pixels in the mask.
    #[must_use]
    pub fn pixel_area(&self) -> u64 {
        count_foreground(&self.mask)
    }
}

fn count_foreground(mask: &GrayImage) -> u64 {
    mask.as_raw().iter().filter(|&&v| v != 0).count() as u64
}

/// A segmentation model.
///
/// Calls are synchronous. Failures are reported as
/// [`PipelineError::Segmentation`] and are not retried.
pub trait Segmenter {
    /// Declare the image that later [`masks_for_boxes`](Self::masks_for_boxes)
    /// calls refer to.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot embed the image.
    fn set_image_context(&mut self, image: &GrayImage) -> Result<(), PipelineError>;

    /// One binary mask per box, in box order, each the size of the
    /// context image.
    ///
    /// # Errors
    ///
    /// Returns an error if no context is set or the backend fails.
    fn masks_for_boxes(&mut self, boxes: &[BoundingBox]) -> Result<Vec<GrayImage>, PipelineError>;

    /// Unsupervised object proposals for `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn generate_candidates(&mut self, image: &GrayImage) -> Result<Vec<Candidate>, PipelineError>;
}

/// Remembers the last context image so it is only re-sent on change.
#[derive(Debug, Clone, Default)]
pub struct ContextTracker {
    last: Option<GrayImage>,
}

impl ContextTracker {
    /// Set `image` as the segmenter context unless it already is.
    ///
    /// Returns `true` if the context was sent.
    ///
    /// # Errors
    ///
    /// Propagates [`Segmenter::set_image_context`] failures.
    pub fn ensure(
        &mut self,
        segmenter: &mut dyn Segmenter,
        image: &GrayImage,
    ) -> Result<bool, PipelineError> {
        if self.last.as_ref() == Some(image) {
            return Ok(false);
        }
        segmenter.set_image_context(image)?;
        self.last = Some(image.clone());
        Ok(true)
    }
}
