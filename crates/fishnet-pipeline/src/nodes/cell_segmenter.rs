//! Box-guided cell segmentation.
//!
//! The operator picks planes for a canvas, draws nucleus boxes, then
//! cytoplasm boxes. Each box becomes one backend mask; the per-part
//! label masks are stitched into a
//! [`CellMaskPack`](crate::types::CellMaskPack).

use std::collections::BTreeMap;

use image::GrayImage;
use tracing::{debug, info};

use super::CELL_MASK_PACK;
use crate::context::PipelineContext;
use crate::labels::compose_from_binary;
use crate::node::{Processed, Stage};
use crate::registry::Artifact;
use crate::review::{BoxRequest, BoxSession, SelectionPurpose, SessionState};
use crate::segmentation::ContextTracker;
use crate::stack::{normalize_to_u8, resize_to_pixel_area};
use crate::stitch::{StitchReport, stitch};
use crate::types::{CellPart, Dimensions, LabelMask, PipelineError};

/// Parts in drawing order.
const DRAW_ORDER: [CellPart; 2] = [CellPart::Nucleus, CellPart::Cytoplasm];

/// Produces [`CELL_MASK_PACK`].
#[derive(Debug)]
pub struct CellSegmenter {
    retryable: bool,
    requirements: Vec<String>,
    canvas: Option<GrayImage>,
    context: ContextTracker,
    session: BoxSession,
    masks: BTreeMap<CellPart, LabelMask>,
    last_report: Option<StitchReport>,
}

impl CellSegmenter {
    /// A segmenter, optionally with operator review.
    #[must_use]
    pub fn new(retryable: bool) -> Self {
        Self {
            retryable,
            requirements: Vec::new(),
            canvas: None,
            context: ContextTracker::default(),
            session: BoxSession::new(),
            masks: BTreeMap::new(),
            last_report: None,
        }
    }

    /// Stitch statistics of the latest attempt.
    #[must_use]
    pub const fn last_report(&self) -> Option<&StitchReport> {
        self.last_report.as_ref()
    }

    /// Segment the current boxes of `part` on `canvas`.
    fn segment_boxes(
        &mut self,
        ctx: &mut PipelineContext<'_>,
        canvas: &GrayImage,
    ) -> Result<LabelMask, PipelineError> {
        let dims = Dimensions::of(canvas);
        let boxes = self.session.boxes_above(ctx.config.min_box_area);
        if boxes.is_empty() {
            return Ok(LabelMask::new(dims.width, dims.height));
        }
        if self.context.ensure(ctx.segmenter, canvas)? {
            debug!("segmentation context updated");
        }
        let masks = ctx.segmenter.masks_for_boxes(&boxes)?;
        if masks.len() != boxes.len() {
            return Err(PipelineError::MaskCountMismatch {
                boxes: boxes.len(),
                masks: masks.len(),
            });
        }
        compose_from_binary(&masks, dims)
    }

    /// Collect boxes for one part. `None` means the operator quit.
    fn collect_part(
        &mut self,
        ctx: &mut PipelineContext<'_>,
        canvas: &GrayImage,
        part: CellPart,
    ) -> Result<Option<LabelMask>, PipelineError> {
        self.session.reset();
        let mut preview: Option<LabelMask> = None;
        loop {
            let request = BoxRequest {
                part,
                canvas,
                boxes: self.session.boxes(),
                preview: preview.as_ref(),
            };
            let commands = ctx.operator.draw_boxes(&request);
            match self.session.apply_all(commands) {
                SessionState::Quit => return Ok(None),
                SessionState::Finished => break,
                SessionState::Drawing => preview = Some(self.segment_boxes(ctx, canvas)?),
            }
        }
        let mask = self.segment_boxes(ctx, canvas)?;
        info!(%part, boxes = self.session.boxes().len(), "collected boxes");
        Ok(Some(mask))
    }
}

impl Stage for CellSegmenter {
    fn title(&self) -> &str {
        "Cell segmenter"
    }

    fn output_name(&self) -> &str {
        CELL_MASK_PACK
    }

    fn requirements(&self) -> &[String] {
        &self.requirements
    }

    fn retryable(&self) -> bool {
        self.retryable
    }

    fn initialize(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError> {
        let selection = ctx.operator.select_contexts(
            SelectionPurpose::Canvas,
            ctx.images.z_labels(),
            ctx.images.channel_labels(),
        );
        let projected = ctx.images.project(&selection.z_levels, &selection.channels);
        let canvas = resize_to_pixel_area(&normalize_to_u8(&projected), ctx.config.canvas_pixel_area);
        debug!(
            width = canvas.width(),
            height = canvas.height(),
            "prepared canvas"
        );
        self.canvas = Some(canvas);
        self.masks.clear();
        self.last_report = None;
        Ok(())
    }

    fn process(&mut self, ctx: &mut PipelineContext<'_>) -> Result<Processed, PipelineError> {
        let canvas = self
            .canvas
            .clone()
            .ok_or_else(|| PipelineError::NotInitialized(self.title().to_string()))?;

        for part in DRAW_ORDER {
            match self.collect_part(ctx, &canvas, part)? {
                Some(mask) => {
                    self.masks.insert(part, mask);
                }
                None => {
                    info!(%part, "operator quit while drawing");
                    return Ok(Processed::Incomplete);
                }
            }
        }

        let (Some(nucleus), Some(cytoplasm)) = (
            self.masks.get(&CellPart::Nucleus),
            self.masks.get(&CellPart::Cytoplasm),
        ) else {
            return Ok(Processed::Incomplete);
        };
        let stitched = stitch(nucleus, cytoplasm)?;
        info!(cells = stitched.report.cells, "stitched cell masks");
        self.last_report = Some(stitched.report);
        Ok(Processed::Complete(Artifact::CellMasks(stitched.pack)))
    }

    fn summary(&self, processed: &Processed) -> String {
        match (processed, self.last_report) {
            (Processed::Complete(_), Some(report))
                if report.removed_nuclei + report.removed_cytoplasm > 0 =>
            {
                format!(
                    "{} cells ({} unpaired nuclei, {} unpaired cytoplasm dropped)",
                    report.cells, report.removed_nuclei, report.removed_cytoplasm
                )
            }
            _ => processed.describe(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::labels::unique_ids;
    use crate::registry::MemoryStore;
    use crate::review::{ReviewCommand, Verdict};
    use crate::test_support::{BoxSegmenter, ScriptedOperator, tiny_stack};
    use crate::types::BoundingBox;

    fn config() -> PipelineConfig {
        PipelineConfig {
            canvas_pixel_area: 64 * 64,
            min_box_area: 4,
            ..PipelineConfig::default()
        }
    }

    fn run_process(operator: &mut ScriptedOperator, segmenter: &mut BoxSegmenter) -> (Processed, CellSegmenter) {
        let mut store = MemoryStore::new();
        let mut ctx = PipelineContext::new(config(), tiny_stack(), segmenter, operator, &mut store);
        let mut node = CellSegmenter::new(false);
        node.initialize(&mut ctx).unwrap();
        let processed = node.process(&mut ctx).unwrap();
        (processed, node)
    }

    #[test]
    fn boxes_become_stitched_cells() {
        let mut operator = ScriptedOperator {
            boxes: vec![
                vec![
                    ReviewCommand::AddBox(BoundingBox::new(4, 4, 10, 10)),
                    ReviewCommand::AddBox(BoundingBox::new(40, 40, 46, 46)),
                    ReviewCommand::Finish,
                ],
                vec![
                    ReviewCommand::AddBox(BoundingBox::new(40, 40, 60, 60)),
                    ReviewCommand::AddBox(BoundingBox::new(0, 0, 20, 20)),
                    ReviewCommand::Finish,
                ],
            ]
            .into(),
            ..ScriptedOperator::default()
        };
        let mut segmenter = BoxSegmenter::default();
        let (processed, node) = run_process(&mut operator, &mut segmenter);

        let Processed::Complete(Artifact::CellMasks(pack)) = processed else {
            unreachable!("expected cell masks");
        };
        assert_eq!(pack.dimensions(), Dimensions::new(64, 64));
        assert_eq!(unique_ids(&pack.nucleus).len(), 2);
        assert_eq!(unique_ids(&pack.cytoplasm), unique_ids(&pack.nucleus));
        // cytoplasm ordering decides ids: the (40,40) cytoplasm was drawn first
        assert_eq!(pack.nucleus.get(42, 42), 1);
        assert_eq!(pack.nucleus.get(5, 5), 2);
        assert_eq!(pack.cytoplasm.get(5, 5), 0);
        assert_eq!(node.last_report().unwrap().cells, 2);
        assert_eq!(segmenter.contexts_set, 1);
    }

    #[test]
    fn summary_reports_dropped_regions() {
        let mut operator = ScriptedOperator {
            boxes: vec![
                vec![
                    ReviewCommand::AddBox(BoundingBox::new(4, 4, 10, 10)),
                    ReviewCommand::AddBox(BoundingBox::new(40, 40, 46, 46)),
                    ReviewCommand::Finish,
                ],
                vec![
                    ReviewCommand::AddBox(BoundingBox::new(0, 0, 20, 20)),
                    ReviewCommand::Finish,
                ],
            ]
            .into(),
            ..ScriptedOperator::default()
        };
        let mut segmenter = BoxSegmenter::default();
        let (processed, node) = run_process(&mut operator, &mut segmenter);
        assert_eq!(
            node.summary(&processed),
            "1 cells (1 unpaired nuclei, 0 unpaired cytoplasm dropped)"
        );
        assert_eq!(node.summary(&Processed::Incomplete), "no output");
    }

    #[test]
    fn drawing_rounds_get_previews() {
        let mut operator = ScriptedOperator {
            boxes: vec![
                vec![ReviewCommand::AddBox(BoundingBox::new(4, 4, 10, 10))],
                vec![
                    ReviewCommand::AddBox(BoundingBox::new(0, 0, 1, 1)),
                    ReviewCommand::RemoveLastBox,
                ],
                vec![ReviewCommand::Finish],
                vec![ReviewCommand::AddBox(BoundingBox::new(0, 0, 20, 20))],
                vec![],
            ]
            .into(),
            ..ScriptedOperator::default()
        };
        let mut segmenter = BoxSegmenter::default();
        let (processed, _) = run_process(&mut operator, &mut segmenter);
        assert!(matches!(processed, Processed::Complete(_)));
        assert_eq!(operator.box_requests, 5);
    }

    #[test]
    fn quit_yields_no_output() {
        let mut operator = ScriptedOperator {
            boxes: vec![vec![ReviewCommand::Quit]].into(),
            ..ScriptedOperator::default()
        };
        let mut segmenter = BoxSegmenter::default();
        let (processed, _) = run_process(&mut operator, &mut segmenter);
        assert_eq!(processed, Processed::Incomplete);
    }

    #[test]
    fn tiny_boxes_are_ignored() {
        let mut operator = ScriptedOperator {
            boxes: vec![
                vec![ReviewCommand::AddBox(BoundingBox::new(0, 0, 2, 2)), ReviewCommand::Finish],
                vec![ReviewCommand::AddBox(BoundingBox::new(0, 0, 20, 20)), ReviewCommand::Finish],
            ]
            .into(),
            ..ScriptedOperator::default()
        };
        let mut segmenter = BoxSegmenter::default();
        let (processed, _) = run_process(&mut operator, &mut segmenter);
        let Processed::Complete(Artifact::CellMasks(pack)) = processed else {
            unreachable!("expected cell masks");
        };
        assert!(pack.nucleus.is_blank());
        assert!(pack.cytoplasm.is_blank());
    }

    #[test]
    fn process_before_initialize_fails() {
        let mut operator = ScriptedOperator::default();
        let mut segmenter = BoxSegmenter::default();
        let mut store = MemoryStore::new();
        let mut ctx =
            PipelineContext::new(config(), tiny_stack(), &mut segmenter, &mut operator, &mut store);
        let err = CellSegmenter::new(false).process(&mut ctx).unwrap_err();
        assert!(matches!(err, PipelineError::NotInitialized(_)));
    }

    #[test]
    fn review_verdict_drives_retries() {
        let boxes = || {
            vec![
                vec![ReviewCommand::AddBox(BoundingBox::new(4, 4, 10, 10))],
                vec![],
                vec![ReviewCommand::AddBox(BoundingBox::new(0, 0, 20, 20))],
                vec![],
            ]
        };
        let mut operator = ScriptedOperator {
            boxes: boxes().into_iter().chain(boxes()).collect(),
            verdicts: vec![Verdict::Retry, Verdict::Accept].into(),
            ..ScriptedOperator::default()
        };
        let mut segmenter = BoxSegmenter::default();
        let mut store = MemoryStore::new();
        let mut ctx =
            PipelineContext::new(config(), tiny_stack(), &mut segmenter, &mut operator, &mut store);
        let mut node = CellSegmenter::new(true);
        let report = crate::node::run_stage(&mut node, &mut ctx).unwrap();
        assert_eq!(report.attempts, 2);
        assert!(matches!(report.outcome, crate::node::NodeOutcome::Success(_)));
    }
}
