//! Particle counting per cell.
//!
//! Each cell part is cropped out of the all-plane projection, scaled
//! to the quilt crop size, and quilted. The surviving candidate count
//! is the particle count for that cell part.
//!
//! Cells are ids `1..=N` of the cytoplasm mask. A part with no pixels,
//! at mask or at image resolution, is skipped and gets no count.

use image::GrayImage;
use tracing::{debug, info, warn};

use super::{CELL_MASK_PACK, DOT_COUNT_PACK};
use crate::context::PipelineContext;
use crate::labels::{activation, max_id, region_bbox, rescale_box, resize_nearest};
use crate::node::{Processed, Stage};
use crate::quantify::{CellSegmentation, DotCountPack, RawCrop, crop, masked_crop, resize_square};
use crate::quilt::quilt;
use crate::registry::Artifact;
use crate::stack::normalize_to_u8;
use crate::types::{CellMaskPack, CellPart, Dimensions, PipelineError};

/// Parts in counting order.
const COUNT_ORDER: [CellPart; 2] = [CellPart::Cytoplasm, CellPart::Nucleus];

/// Produces [`DOT_COUNT_PACK`] from [`CELL_MASK_PACK`].
#[derive(Debug)]
pub struct DotCounter {
    requirements: Vec<String>,
    masks: Option<CellMaskPack>,
    base: Option<GrayImage>,
}

impl Default for DotCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl DotCounter {
    /// A node requiring the cell masks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requirements: vec![CELL_MASK_PACK.to_string()],
            masks: None,
            base: None,
        }
    }
}

impl Stage for DotCounter {
    fn title(&self) -> &str {
        "Dot counter"
    }

    fn output_name(&self) -> &str {
        DOT_COUNT_PACK
    }

    fn requirements(&self) -> &[String] {
        &self.requirements
    }

    fn initialize(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError> {
        self.masks = Some(ctx.registry.cell_masks(CELL_MASK_PACK)?.clone());
        self.base = Some(normalize_to_u8(&ctx.images.project_all()));
        Ok(())
    }

    fn process(&mut self, ctx: &mut PipelineContext<'_>) -> Result<Processed, PipelineError> {
        let (Some(pack), Some(base)) = (self.masks.as_ref(), self.base.as_ref()) else {
            return Err(PipelineError::NotInitialized(self.title().to_string()));
        };
        let base_dims = Dimensions::of(base);
        let quilt_config = &ctx.config.quilt;

        let mut out = DotCountPack::default();
        let cell_ids = 1..=max_id(&pack.cytoplasm);
        for part in COUNT_ORDER {
            let mask = pack.part(part);
            let at_base = resize_nearest(mask, base_dims);
            for id in cell_ids.clone() {
                let Some(bbox) = region_bbox(mask, id) else {
                    warn!(%part, cell = id, "no contour found, skipping");
                    continue;
                };
                let region = activation(&at_base, id);
                if region.as_raw().iter().all(|&v| v == 0) {
                    warn!(%part, cell = id, "region vanishes at image resolution, skipping");
                    continue;
                }
                let bbox = rescale_box(bbox, mask.dimensions(), base_dims);
                let cell = masked_crop(base, &region, bbox);
                let cell = resize_square(&cell, quilt_config.crop_size);
                let quilted = quilt(&cell, quilt_config, ctx.segmenter)?;
                let count = quilted.total();
                debug!(%part, cell = id, count, "counted particles");
                out.counts_mut(part).insert(id, count);

                if part == CellPart::Cytoplasm {
                    out.raw_crops.push(RawCrop {
                        cell_id: id,
                        image: crop(base, bbox.padded(ctx.config.crop_pad, base_dims)),
                    });
                }
                out.segmentations.push(CellSegmentation {
                    cell_id: id,
                    part,
                    crop: cell,
                    mosaic: quilted.mosaic,
                });
            }
            info!(%part, cells = out.counts(part).len(), "finished counting");
        }

        Ok(Processed::Complete(Artifact::DotCounts(out)))
    }
}
