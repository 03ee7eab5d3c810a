//! Shared collaborators for the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;

use fishnet_pipeline::review::{BoxRequest, ContextSelection, SelectionPurpose};
use fishnet_pipeline::{
    Artifact, BoundingBox, Candidate, ImageStack, Operator, PipelineContext, PipelineError, Plane,
    Processed, ReviewCommand, Segmenter, Stage, Verdict,
};
use image::{GrayImage, Luma};

/// Replays queued box batches; answers substitutes from a fixed list.
#[derive(Debug, Default)]
pub struct Scripted {
    pub boxes: VecDeque<Vec<ReviewCommand>>,
    pub substitutes: Vec<String>,
    pub substitutes_asked: Vec<String>,
}

impl Operator for Scripted {
    fn draw_boxes(&mut self, _request: &BoxRequest<'_>) -> Vec<ReviewCommand> {
        self.boxes.pop_front().unwrap_or_default()
    }

    fn verdict(&mut self, _title: &str, _summary: &str) -> Verdict {
        Verdict::Accept
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
        ContextSelection::all(z_labels.len(), channel_labels.len())
    }
}

/// Fills boxes exactly; proposes each bright pixel as its own candidate.
#[derive(Debug, Default)]
pub struct Exact {
    size: Option<(u32, u32)>,
}

impl Segmenter for Exact {
    fn set_image_context(&mut self, image: &GrayImage) -> Result<(), PipelineError> {
        self.size = Some(image.dimensions());
        Ok(())
    }

    fn masks_for_boxes(&mut self, boxes: &[BoundingBox]) -> Result<Vec<GrayImage>, PipelineError> {
        let (w, h) = self
            .size
            .ok_or_else(|| PipelineError::Segmentation("no context".to_string()))?;
        Ok(boxes
            .iter()
            .map(|b| {
                GrayImage::from_fn(w, h, |x, y| {
                    let inside = (b.x_min..b.x_max).contains(&x) && (b.y_min..b.y_max).contains(&y);
                    Luma([if inside { 255 } else { 0 }])
                })
            })
            .collect())
    }

    fn generate_candidates(&mut self, image: &GrayImage) -> Result<Vec<Candidate>, PipelineError> {
        let (w, h) = image.dimensions();
        Ok(image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] > 200)
            .map(|(px, py, _)| {
                Candidate::from_mask(GrayImage::from_fn(w, h, |x, y| {
                    Luma([if (x, y) == (px, py) { 255 } else { 0 }])
                }))
            })
            .collect())
    }
}

/// A stage that records whether it ran and outputs a fixed artifact.
#[derive(Debug)]
pub struct Fixed {
    pub output: String,
    pub requirements: Vec<String>,
    pub artifact: Artifact,
    pub initialized: bool,
    pub processed: bool,
}

impl Fixed {
    pub fn new(output: &str, requirements: &[&str], artifact: Artifact) -> Self {
        Self {
            output: output.to_string(),
            requirements: requirements.iter().map(ToString::to_string).collect(),
            artifact,
            initialized: false,
            processed: false,
        }
    }
}

impl Stage for Fixed {
    fn title(&self) -> &str {
        &self.output
    }

    fn output_name(&self) -> &str {
        &self.output
    }

    fn requirements(&self) -> &[String] {
        &self.requirements
    }

    fn initialize(&mut self, _ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError> {
        self.initialized = true;
        Ok(())
    }

    fn process(&mut self, _ctx: &mut PipelineContext<'_>) -> Result<Processed, PipelineError> {
        self.processed = true;
        Ok(Processed::Complete(self.artifact.clone()))
    }
}

/// 64x64, two z-levels by two channels. Channel "dapi" is a flat
/// gradient; "cy5" has bright 1-pixel dots on a dark background.
pub fn stack() -> ImageStack {
    let dapi = |z: u16| Plane::from_fn(64, 64, move |x, y| Luma([u16::try_from(x + y).unwrap() + z]));
    let cy5 = |z: u16| {
        Plane::from_fn(64, 64, move |x, y| {
            Luma([if x % 16 == 5 && y % 16 == 5 { 4000 + z } else { 100 }])
        })
    };
    ImageStack::new(
        vec!["1".to_string(), "2".to_string()],
        vec!["dapi".to_string(), "cy5".to_string()],
        vec![dapi(0), cy5(0), dapi(1), cy5(1)],
    )
    .unwrap()
}
