//! A classical segmentation backend.
//!
//! Stands in for a promptable model: inside each box the Otsu-thresholded
//! foreground's largest connected component becomes the mask, and
//! candidate generation proposes every connected component of the
//! Otsu-thresholded image, up to a limit.

use std::collections::{BTreeMap, BTreeSet};

use fishnet_pipeline::{BoundingBox, Candidate, Dimensions, PipelineError, Segmenter};
use image::imageops;
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::{debug, warn};

const ON: u8 = 255;

/// Otsu threshold plus connected components.
#[derive(Debug)]
pub struct ThresholdSegmenter {
    context: Option<GrayImage>,
    candidate_limit: usize,
}

impl Default for ThresholdSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThresholdSegmenter {
    /// Most candidates proposed for one image. Every candidate is a
    /// full-size mask, so this bounds memory on dense images.
    pub const DEFAULT_CANDIDATE_LIMIT: usize = 1024;

    /// A backend with no image context.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            context: None,
            candidate_limit: Self::DEFAULT_CANDIDATE_LIMIT,
        }
    }

    /// Propose at most `limit` candidates per image.
    #[must_use]
    pub const fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit;
        self
    }

    fn box_mask(context: &GrayImage, bbox: BoundingBox) -> GrayImage {
        let dims = Dimensions::of(context);
        let b = bbox.clamp_to(dims);
        let mut mask = GrayImage::new(dims.width, dims.height);
        if b.is_empty() {
            return mask;
        }
        let view = imageops::crop_imm(context, b.x_min, b.y_min, b.width(), b.height()).to_image();
        let fg = binarize(&view);
        let labels = connected_components(&fg, Connectivity::Eight, Luma([0u8]));

        let mut areas = std::collections::BTreeMap::<u32, u64>::new();
        for p in labels.pixels() {
            if p.0[0] != 0 {
                *areas.entry(p.0[0]).or_default() += 1;
            }
        }
        // largest component, lowest label on ties; an empty box is filled
        let keep = areas
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(&label, _)| label);

        for (x, y, p) in labels.enumerate_pixels() {
            let inside = keep.is_none_or(|label| p.0[0] == label);
            if inside {
                mask.put_pixel(b.x_min + x, b.y_min + y, Luma([ON]));
            }
        }
        mask
    }
}

/// Pixels strictly above the Otsu level. A flat image has no foreground.
fn binarize(image: &GrayImage) -> GrayImage {
    let raw = image.as_raw();
    let flat = raw.iter().min() == raw.iter().max();
    if flat {
        return GrayImage::new(image.width(), image.height());
    }
    let level = otsu_level(image);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([if image.get_pixel(x, y).0[0] > level { ON } else { 0 }])
    })
}

impl Segmenter for ThresholdSegmenter {
    fn set_image_context(&mut self, image: &GrayImage) -> Result<(), PipelineError> {
        debug!(width = image.width(), height = image.height(), "set image context");
        self.context = Some(image.clone());
        Ok(())
    }

    fn masks_for_boxes(&mut self, boxes: &[BoundingBox]) -> Result<Vec<GrayImage>, PipelineError> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| PipelineError::Segmentation("no image context set".to_string()))?;
        Ok(boxes.iter().map(|&b| Self::box_mask(context, b)).collect())
    }

    fn generate_candidates(&mut self, image: &GrayImage) -> Result<Vec<Candidate>, PipelineError> {
        let labels = connected_components(&binarize(image), Connectivity::Eight, Luma([0u8]));

        // one pass: pixel coordinates per component, in raster order of
        // each component's first pixel
        let mut slot: BTreeMap<u32, usize> = BTreeMap::new();
        let mut components: Vec<Vec<(u32, u32)>> = Vec::new();
        let mut dropped = BTreeSet::new();
        for (x, y, p) in labels.enumerate_pixels() {
            let label = p.0[0];
            if label == 0 {
                continue;
            }
            if let Some(pixels) = slot.get(&label).and_then(|&i| components.get_mut(i)) {
                pixels.push((x, y));
            } else if components.len() < self.candidate_limit {
                slot.insert(label, components.len());
                components.push(vec![(x, y)]);
            } else {
                dropped.insert(label);
            }
        }
        if !dropped.is_empty() {
            warn!(
                limit = self.candidate_limit,
                dropped = dropped.len(),
                "candidate limit reached, dropping components"
            );
        }

        Ok(components
            .into_iter()
            .map(|pixels| {
                let mut mask = GrayImage::new(image.width(), image.height());
                for (x, y) in pixels {
                    mask.put_pixel(x, y, Luma([ON]));
                }
                Candidate::from_mask(mask)
            })
            .collect())
    }
}
