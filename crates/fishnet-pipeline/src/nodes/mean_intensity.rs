//! Mean intensity per cell, part, and plane.

use tracing::{info, warn};

use super::{CELL_MASK_PACK, MEAN_INTENSITY_PACK};
use crate::context::PipelineContext;
use crate::labels::max_id;
use crate::node::{Processed, Stage};
use crate::quantify::{MeanIntensityRecord, MeanIntensityTable, region_means};
use crate::registry::Artifact;
use crate::review::{ContextSelection, SelectionPurpose};
use crate::types::{CellMaskPack, PipelineError};

/// Produces [`MEAN_INTENSITY_PACK`] from [`CELL_MASK_PACK`].
#[derive(Debug)]
pub struct MeanIntensity {
    requirements: Vec<String>,
    masks: Option<CellMaskPack>,
    selection: ContextSelection,
}

impl Default for MeanIntensity {
    fn default() -> Self {
        Self::new()
    }
}

impl MeanIntensity {
    /// A node requiring the cell masks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requirements: vec![CELL_MASK_PACK.to_string()],
            masks: None,
            selection: ContextSelection::default(),
        }
    }
}

impl Stage for MeanIntensity {
    fn title(&self) -> &str {
        "Mean intensity"
    }

    fn output_name(&self) -> &str {
        MEAN_INTENSITY_PACK
    }

    fn requirements(&self) -> &[String] {
        &self.requirements
    }

    fn initialize(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), PipelineError> {
        self.masks = Some(ctx.registry.cell_masks(CELL_MASK_PACK)?.clone());
        self.selection = ctx.operator.select_contexts(
            SelectionPurpose::Measurement,
            ctx.images.z_labels(),
            ctx.images.channel_labels(),
        );
        Ok(())
    }

    fn process(&mut self, ctx: &mut PipelineContext<'_>) -> Result<Processed, PipelineError> {
        let pack = self
            .masks
            .as_ref()
            .ok_or_else(|| PipelineError::NotInitialized(self.title().to_string()))?;
        let max_cell_id = max_id(&pack.cytoplasm);

        let mut table = MeanIntensityTable::default();
        for &z in &self.selection.z_levels {
            for &c in &self.selection.channels {
                let (Some(plane), Some(z_label), Some(channel)) = (
                    ctx.images.plane(z, c),
                    ctx.images.z_labels().get(z),
                    ctx.images.channel_labels().get(c),
                ) else {
                    warn!(z, c, "selected plane does not exist");
                    continue;
                };

                let cytoplasm = region_means(plane, &pack.cytoplasm, max_cell_id);
                let nucleus = region_means(plane, &pack.nucleus, max_cell_id);
                for id in 1..=max_cell_id {
                    match (cytoplasm.get(&id), nucleus.get(&id)) {
                        (Some(&cytoplasm_mean), Some(&nucleus_mean)) => {
                            table.records.push(MeanIntensityRecord {
                                cell_id: id,
                                cytoplasm_mean,
                                nucleus_mean,
                                z_level: z_label.clone(),
                                channel: channel.clone(),
                            });
                        }
                        _ => warn!(cell = id, z = %z_label, %channel, "empty region skipped"),
                    }
                }
            }
        }

        info!(rows = table.records.len(), "measured mean intensities");
        Ok(Processed::Complete(Artifact::MeanIntensity(table)))
    }
}
