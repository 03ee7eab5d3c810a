//! Scripted collaborators for unit tests.

use std::collections::VecDeque;

use image::{GrayImage, Luma};

use crate::review::{BoxRequest, ContextSelection, Operator, ReviewCommand, SelectionPurpose, Verdict};
use crate::segmentation::{Candidate, Segmenter};
use crate::stack::{ImageStack, Plane};
use crate::types::{BoundingBox, Dimensions, PipelineError};

/// Replays queued answers; defaults to accepting and declining.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    pub boxes: VecDeque<Vec<ReviewCommand>>,
    pub verdicts: VecDeque<Verdict>,
    pub substitutes: Vec<String>,
    pub selection: Option<ContextSelection>,
    pub substitutes_asked: Vec<String>,
    pub verdicts_asked: usize,
    pub summaries: Vec<String>,
    pub box_requests: usize,
}

impl Operator for ScriptedOperator {
    fn draw_boxes(&mut self, _request: &BoxRequest<'_>) -> Vec<ReviewCommand> {
        self.box_requests += 1;
        self.boxes.pop_front().unwrap_or_default()
    }

    fn verdict(&mut self, _title: &str, summary: &str) -> Verdict {
        self.verdicts_asked += 1;
        self.summaries.push(summary.to_string());
        self.verdicts.pop_front().unwrap_or(Verdict::Accept)
    }

    fn has_substitute(&mut self, requirement: &str) -> bool {
        self.substitutes_asked.push(requirement.to_string());
        self.substitutes.iter().any(|s| s == requirement)
    }

    fn select_contexts(
        &mut self,
        _purpose: SelectionPurpose,
        z_labels: &[String],
        channel_labels: &[String],
    ) -> ContextSelection {
        self.selection
            .clone()
            .unwrap_or_else(|| ContextSelection::all(z_labels.len(), channel_labels.len()))
    }
}

/// Fills each box exactly; proposes bright pixels as one candidate.
#[derive(Debug, Default)]
pub struct BoxSegmenter {
    pub context: Option<Dimensions>,
    pub contexts_set: usize,
}

impl Segmenter for BoxSegmenter {
    fn set_image_context(&mut self, image: &GrayImage) -> Result<(), PipelineError> {
        self.context = Some(Dimensions::of(image));
        self.contexts_set += 1;
        Ok(())
    }

    fn masks_for_boxes(&mut self, boxes: &[BoundingBox]) -> Result<Vec<GrayImage>, PipelineError> {
        let dims = self
            .context
            .ok_or_else(|| PipelineError::Segmentation("no image context".to_string()))?;
        Ok(boxes
            .iter()
            .map(|b| {
                GrayImage::from_fn(dims.width, dims.height, |x, y| {
                    let inside = (b.x_min..b.x_max).contains(&x) && (b.y_min..b.y_max).contains(&y);
                    Luma([if inside { 255 } else { 0 }])
                })
            })
            .collect())
    }

    fn generate_candidates(&mut self, image: &GrayImage) -> Result<Vec<Candidate>, PipelineError> {
        let bright = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([if image.get_pixel(x, y).0[0] > 128 { 255 } else { 0 }])
        });
        if bright.as_raw().iter().all(|&v| v == 0) {
            return Ok(Vec::new());
        }
        Ok(vec![Candidate::from_mask(bright)])
    }
}

/// One 8x8 plane with a gradient.
pub fn tiny_stack() -> ImageStack {
    let plane = Plane::from_fn(8, 8, |x, y| Luma([u16::try_from(x + y).unwrap_or(0)]));
    ImageStack::new(vec!["1".to_string()], vec!["dapi".to_string()], vec![plane])
        .unwrap_or_else(|err| unreachable!("{err}"))
}
