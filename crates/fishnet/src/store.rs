//! Artifacts on disk.
//!
//! Every artifact is written as `<name>.json`, which is what later runs
//! load as a substitute. Alongside, each kind gets its human-facing
//! files:
//!
//! ```text
//! cell_figures/{segment,overlay,outline}.png   cell masks
//! mean_intensity.csv                           mean intensities
//! dot_counts.csv                               particle counts
//! particle_segmentations/cell<id>_<part>.png   quilted crops
//! particle_segmentations/c<id>_raw.png         padded raw crops
//! ```

use std::path::{Path, PathBuf};

use fishnet_export::render::CELL_ALPHA;
use fishnet_export::{
    ExportError, blend, cell_labels, colorize, dot_counts_csv, encode_png, mean_intensity_csv,
    outline, particle_figure,
};
use fishnet_pipeline::quantify::DotCountPack;
use fishnet_pipeline::{Artifact, ArtifactStore, CellMaskPack, PipelineError};
use image::GrayImage;
use image::imageops::{self, FilterType};
use tracing::{debug, info};

/// Writes artifacts under an output directory.
#[derive(Debug)]
pub struct FileStore {
    output: PathBuf,
    substitutes: PathBuf,
    backdrop: Option<GrayImage>,
}

fn store_error(path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::Store(format!("{}: {err}", path.display()))
}

fn export_error(err: ExportError) -> PipelineError {
    PipelineError::Store(err.to_string())
}

impl FileStore {
    /// Write to and load from `output`.
    #[must_use]
    pub fn new(output: impl Into<PathBuf>) -> Self {
        let output = output.into();
        Self {
            substitutes: output.clone(),
            output,
            backdrop: None,
        }
    }

    /// Load substitutes from `dir` instead of the output directory.
    #[must_use]
    pub fn with_substitutes(mut self, dir: impl Into<PathBuf>) -> Self {
        self.substitutes = dir.into();
        self
    }

    /// Image the cell figures are drawn over. Resized to fit the masks.
    #[must_use]
    pub fn with_backdrop(mut self, backdrop: GrayImage) -> Self {
        self.backdrop = Some(backdrop);
        self
    }

    /// Where outputs go.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    fn write(&self, relative: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let path = self.output.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| store_error(parent, e))?;
        }
        std::fs::write(&path, bytes).map_err(|e| store_error(&path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }

    fn write_png(&self, relative: &str, image: impl Into<image::DynamicImage>) -> Result<(), PipelineError> {
        let bytes = encode_png(image).map_err(export_error)?;
        self.write(relative, &bytes)
    }

    fn backdrop_for(&self, pack: &CellMaskPack) -> GrayImage {
        let dims = pack.dimensions();
        match &self.backdrop {
            Some(b) if b.dimensions() == (dims.width, dims.height) => b.clone(),
            Some(b) => imageops::resize(b, dims.width, dims.height, FilterType::Triangle),
            None => GrayImage::new(dims.width, dims.height),
        }
    }

    fn cell_figures(&self, pack: &CellMaskPack) -> Result<(), PipelineError> {
        let cells = cell_labels(pack);
        let colored = colorize(&cells);
        let base = self.backdrop_for(pack);
        let overlay = blend(&colored, &base, CELL_ALPHA).map_err(export_error)?;
        let outlined = outline(&cells, &base).map_err(export_error)?;
        self.write_png("cell_figures/segment.png", colored)?;
        self.write_png("cell_figures/overlay.png", overlay)?;
        self.write_png("cell_figures/outline.png", outlined)
    }

    fn particle_figures(&self, pack: &DotCountPack) -> Result<(), PipelineError> {
        for segmentation in &pack.segmentations {
            let figure = particle_figure(segmentation).map_err(export_error)?;
            let name = format!(
                "particle_segmentations/cell{}_{}.png",
                segmentation.cell_id,
                segmentation.part.short_name()
            );
            self.write_png(&name, figure)?;
        }
        for raw in &pack.raw_crops {
            let name = format!("particle_segmentations/c{}_raw.png", raw.cell_id);
            self.write_png(&name, raw.image.clone())?;
        }
        Ok(())
    }
}

impl ArtifactStore for FileStore {
    fn save(&mut self, name: &str, artifact: &Artifact) -> Result<(), PipelineError> {
        let json = serde_json::to_vec_pretty(artifact)
            .map_err(|e| PipelineError::Store(format!("{name}: {e}")))?;
        self.write(&format!("{name}.json"), &json)?;

        match artifact {
            Artifact::CellMasks(pack) => self.cell_figures(pack)?,
            Artifact::MeanIntensity(table) => {
                let csv = mean_intensity_csv(table).map_err(export_error)?;
                self.write("mean_intensity.csv", csv.as_bytes())?;
            }
            Artifact::DotCounts(pack) => {
                let csv = dot_counts_csv(pack).map_err(export_error)?;
                self.write("dot_counts.csv", csv.as_bytes())?;
                self.particle_figures(pack)?;
            }
        }
        info!(artifact = name, kind = artifact.kind(), dir = %self.output.display(), "saved artifact");
        Ok(())
    }

    fn load(&mut self, name: &str) -> Result<Artifact, PipelineError> {
        let path = self.substitutes.join(format!("{name}.json"));
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::MissingArtifact(name.to_string()));
            }
            Err(e) => return Err(store_error(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| store_error(&path, e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fishnet_pipeline::quantify::{CellSegmentation, MeanIntensityTable, RawCrop};
    use fishnet_pipeline::{CellPart, LabelMask};
    use image::Luma;

    use super::*;

    fn masks() -> Artifact {
        Artifact::CellMasks(
            CellMaskPack::new(
                LabelMask::from_fn(4, 4, |x, y| u32::from(x == 1 && y == 1)),
                LabelMask::from_fn(4, 4, |x, y| u32::from(x < 3 && y < 3 && (x, y) != (1, 1))),
            )
            .unwrap(),
        )
    }

    #[test]
    fn cell_masks_write_json_and_figures() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path()).with_backdrop(GrayImage::from_pixel(8, 8, Luma([80])));
        store.save("cell_mask_pack", &masks()).unwrap();

        for file in [
            "cell_mask_pack.json",
            "cell_figures/segment.png",
            "cell_figures/overlay.png",
            "cell_figures/outline.png",
        ] {
            assert!(dir.path().join(file).is_file(), "{file} missing");
        }
        let overlay = image::open(dir.path().join("cell_figures/overlay.png")).unwrap();
        assert_eq!((overlay.width(), overlay.height()), (4, 4));
    }

    #[test]
    fn saved_artifacts_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        store.save("cell_mask_pack", &masks()).unwrap();
        assert_eq!(store.load("cell_mask_pack").unwrap(), masks());
        assert!(matches!(
            store.load("dot_count_pack"),
            Err(PipelineError::MissingArtifact(_))
        ));
    }

    #[test]
    fn substitutes_come_from_their_own_directory() {
        let previous = tempfile::tempdir().unwrap();
        FileStore::new(previous.path())
            .save("cell_mask_pack", &masks())
            .unwrap();

        let output = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(output.path()).with_substitutes(previous.path());
        assert_eq!(store.load("cell_mask_pack").unwrap(), masks());
    }

    #[test]
    fn corrupt_json_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cell_mask_pack.json"), b"{not json").unwrap();
        let mut store = FileStore::new(dir.path());
        assert!(matches!(
            store.load("cell_mask_pack"),
            Err(PipelineError::Store(_))
        ));
    }

    #[test]
    fn measurements_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path());
        store
            .save(
                "mean_intensity_pack",
                &Artifact::MeanIntensity(MeanIntensityTable::default()),
            )
            .unwrap();
        let csv = std::fs::read_to_string(dir.path().join("mean_intensity.csv")).unwrap();
        assert!(csv.starts_with("cell_id,cyto_mean_intensity"));

        let mut pack = DotCountPack::default();
        pack.cytoplasm_counts.insert(1, 3);
        pack.nucleus_counts.insert(1, 1);
        pack.segmentations.push(CellSegmentation {
            cell_id: 1,
            part: CellPart::Cytoplasm,
            crop: GrayImage::new(4, 4),
            mosaic: LabelMask::new(4, 4),
        });
        pack.raw_crops.push(RawCrop {
            cell_id: 1,
            image: GrayImage::new(6, 6),
        });
        store.save("dot_count_pack", &Artifact::DotCounts(pack)).unwrap();

        let csv = std::fs::read_to_string(dir.path().join("dot_counts.csv")).unwrap();
        assert_eq!(csv, "cell_id,cyto_counts,nuc_counts\n1,3,1\n");
        assert!(dir.path().join("particle_segmentations/cell1_cyto.png").is_file());
        assert!(dir.path().join("particle_segmentations/c1_raw.png").is_file());
    }
}
