//! Per-cell measurements.

use std::collections::BTreeMap;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::labels::resize_nearest;
use crate::stack::Plane;
use crate::types::{BoundingBox, CellPart, Dimensions, LabelMask};

/// Mean intensity of one cell in one plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanIntensityRecord {
    /// Cell id.
    pub cell_id: u32,
    /// Mean over the cytoplasm ring.
    pub cytoplasm_mean: f64,
    /// Mean over the nucleus.
    pub nucleus_mean: f64,
    /// Z label of the plane.
    pub z_level: String,
    /// Channel name of the plane.
    pub channel: String,
}

/// Output of the mean intensity node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanIntensityTable {
    /// Rows ordered by plane, then cell id.
    pub records: Vec<MeanIntensityRecord>,
}

/// Particle count for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotCountRecord {
    /// Cell id.
    pub cell_id: u32,
    /// Particles in the cytoplasm crop.
    pub cytoplasm: usize,
    /// Particles in the nucleus crop.
    pub nucleus: usize,
}

/// Quilted crop of one cell part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSegmentation {
    /// Cell id.
    pub cell_id: u32,
    /// Part the crop shows.
    pub part: CellPart,
    /// Masked crop at quilt resolution.
    pub crop: GrayImage,
    /// Tile instances at crop resolution.
    pub mosaic: LabelMask,
}

/// Unmasked, padded crop around a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCrop {
    /// Cell id.
    pub cell_id: u32,
    /// The crop.
    pub image: GrayImage,
}

/// Output of the dot counting node.
///
/// Only the counts are persisted; the images are for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotCountPack {
    /// Cytoplasm counts by cell id.
    pub cytoplasm_counts: BTreeMap<u32, usize>,
    /// Nucleus counts by cell id.
    pub nucleus_counts: BTreeMap<u32, usize>,
    /// Quilted crops.
    #[serde(skip)]
    pub segmentations: Vec<CellSegmentation>,
    /// Raw crops, one per cytoplasm id.
    #[serde(skip)]
    pub raw_crops: Vec<RawCrop>,
}

impl DotCountPack {
    /// Count map for one part.
    #[must_use]
    pub const fn counts(&self, part: CellPart) -> &BTreeMap<u32, usize> {
        match part {
            CellPart::Nucleus => &self.nucleus_counts,
            CellPart::Cytoplasm => &self.cytoplasm_counts,
        }
    }

    /// Count map for one part, mutably.
    pub const fn counts_mut(&mut self, part: CellPart) -> &mut BTreeMap<u32, usize> {
        match part {
            CellPart::Nucleus => &mut self.nucleus_counts,
            CellPart::Cytoplasm => &mut self.cytoplasm_counts,
        }
    }

    /// One record per cell counted in both parts, ascending.
    #[must_use]
    pub fn records(&self) -> Vec<DotCountRecord> {
        self.cytoplasm_counts
            .iter()
            .filter_map(|(&cell_id, &cytoplasm)| {
                self.nucleus_counts.get(&cell_id).map(|&nucleus| DotCountRecord {
                    cell_id,
                    cytoplasm,
                    nucleus,
                })
            })
            .collect()
    }

    /// Sum of every count.
    #[must_use]
    pub fn total(&self) -> usize {
        self.cytoplasm_counts.values().sum::<usize>() + self.nucleus_counts.values().sum::<usize>()
    }
}

/// Mean plane intensity over every id of `mask` up to `max_cell_id`.
///
/// The mask is resampled to the plane's resolution first. Ids with no
/// pixels at that resolution are absent from the result.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn region_means(plane: &Plane, mask: &LabelMask, max_cell_id: u32) -> BTreeMap<u32, f64> {
    let dims = Dimensions::new(plane.width(), plane.height());
    let resized = resize_nearest(mask, dims);

    let mut sums: BTreeMap<u32, (u64, u64)> = BTreeMap::new();
    for (&id, &value) in resized.as_raw().iter().zip(plane.as_raw()) {
        if id != 0 && id <= max_cell_id {
            let entry = sums.entry(id).or_insert((0, 0));
            entry.0 += u64::from(value);
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .filter(|&(_, (_, n))| n > 0)
        .map(|(id, (sum, n))| (id, sum as f64 / n as f64))
        .collect()
}

/// Crop `bbox` out of `image`, zeroing pixels outside `region`.
///
/// `region` must be the size of `image`.
#[must_use]
pub fn masked_crop(image: &GrayImage, region: &GrayImage, bbox: BoundingBox) -> GrayImage {
    let bbox = bbox.clamp_to(Dimensions::of(image));
    GrayImage::from_fn(bbox.width(), bbox.height(), |x, y| {
        let (sx, sy) = (bbox.x_min + x, bbox.y_min + y);
        let inside = region
            .get_pixel_checked(sx, sy)
            .is_some_and(|p| p.0[0] != 0);
        if inside {
            *image.get_pixel(sx, sy)
        } else {
            Luma([0])
        }
    })
}

/// Plain crop, clipped to the image.
#[must_use]
pub fn crop(image: &GrayImage, bbox: BoundingBox) -> GrayImage {
    let bbox = bbox.clamp_to(Dimensions::of(image));
    imageops::crop_imm(image, bbox.x_min, bbox.y_min, bbox.width(), bbox.height()).to_image()
}

/// Resize a crop to a `size` square.
#[must_use]
pub fn resize_square(image: &GrayImage, size: u32) -> GrayImage {
    imageops::resize(image, size, size, FilterType::Triangle)
}
