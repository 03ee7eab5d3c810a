//! Shared types for the fishnet segmentation pipeline.

use std::fmt;

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference 8-bit
/// rasters without depending on `image` directly.
pub use image::GrayImage;

/// Raw storage behind a [`LabelMask`].
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Dimensions of a raster in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new set of dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an 8-bit image.
    #[must_use]
    pub fn of(image: &GrayImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if either side is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned box in pixel coordinates.
///
/// `x_min`/`y_min` are inclusive, `x_max`/`y_max` exclusive, so a
/// single pixel at `(3, 4)` is `3..4 x 4..5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge (inclusive).
    pub x_min: u32,
    /// Top edge (inclusive).
    pub y_min: u32,
    /// Right edge (exclusive).
    pub x_max: u32,
    /// Bottom edge (exclusive).
    pub y_max: u32,
}

impl BoundingBox {
    /// Create a box from its edges.
    #[must_use]
    pub const fn new(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Box spanned by two drag corners in either order.
    #[must_use]
    pub fn from_corners(a: (u32, u32), b: (u32, u32)) -> Self {
        Self::new(a.0.min(b.0), a.1.min(b.1), a.0.max(b.0), a.1.max(b.1))
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.x_max.saturating_sub(self.x_min)
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.y_max.saturating_sub(self.y_min)
    }

    /// Area in pixels.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Returns `true` if the box covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Clip the box to lie inside an image of the given size.
    #[must_use]
    pub fn clamp_to(self, dims: Dimensions) -> Self {
        let x_max = self.x_max.min(dims.width);
        let y_max = self.y_max.min(dims.height);
        Self::new(self.x_min.min(x_max), self.y_min.min(y_max), x_max, y_max)
    }

    /// Grow the box by `pad` pixels on every side, clipped to `dims`.
    #[must_use]
    pub fn padded(self, pad: u32, dims: Dimensions) -> Self {
        Self::new(
            self.x_min.saturating_sub(pad),
            self.y_min.saturating_sub(pad),
            self.x_max.saturating_add(pad),
            self.y_max.saturating_add(pad),
        )
        .clamp_to(dims)
    }
}

/// Which part of a cell a label mask describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellPart {
    /// The nucleus.
    Nucleus,
    /// The whole cell body; after stitching, the ring outside the nucleus.
    Cytoplasm,
}

impl CellPart {
    /// Short name used in file names and table headers.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Nucleus => "nuc",
            Self::Cytoplasm => "cyto",
        }
    }
}

impl fmt::Display for CellPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nucleus => f.write_str("nucleus"),
            Self::Cytoplasm => f.write_str("cytoplasm"),
        }
    }
}

/// A 2-D grid of instance ids; 0 is background.
#[derive(Debug, Clone)]
pub struct LabelMask(LabelImage);

impl LabelMask {
    /// An all-background mask.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self(LabelImage::new(width, height))
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> u32) -> Self {
        Self(LabelImage::from_fn(width, height, |x, y| Luma([f(x, y)])))
    }

    /// Wrap row-major ids. Returns `None` unless there is exactly one id
    /// per pixel.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, ids: Vec<u32>) -> Option<Self> {
        if ids.len() as u64 != u64::from(width) * u64::from(height) {
            return None;
        }
        LabelImage::from_raw(width, height, ids).map(Self)
    }

    /// Wrap an existing label buffer.
    #[must_use]
    pub const fn from_image(image: LabelImage) -> Self {
        Self(image)
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Width and height.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width(), self.height())
    }

    /// Id at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate lies outside the mask.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u32 {
        self.0.get_pixel(x, y).0[0]
    }

    /// Set the id at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate lies outside the mask.
    pub fn set(&mut self, x: u32, y: u32, id: u32) {
        self.0.put_pixel(x, y, Luma([id]));
    }

    /// Row-major ids.
    #[must_use]
    pub fn as_raw(&self) -> &[u32] {
        self.0.as_raw()
    }

    /// Mutable row-major ids.
    pub fn ids_mut(&mut self) -> &mut [u32] {
        &mut self.0
    }

    /// Borrow the underlying buffer.
    #[must_use]
    pub const fn as_image(&self) -> &LabelImage {
        &self.0
    }

    /// Returns `true` if no pixel carries an id.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.as_raw().iter().all(|&id| id == 0)
    }
}

impl PartialEq for LabelMask {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions() == other.dimensions() && self.as_raw() == other.as_raw()
    }
}

impl Eq for LabelMask {}

/// Serde proxy: `image::ImageBuffer` does not implement serde, so a
/// mask travels as `(width, height, raw_ids)`.
#[derive(Serialize, Deserialize)]
struct LabelMaskProxy(u32, u32, Vec<u32>);

impl Serialize for LabelMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        LabelMaskProxy(self.width(), self.height(), self.as_raw().to_vec()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LabelMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let LabelMaskProxy(width, height, ids) = LabelMaskProxy::deserialize(deserializer)?;
        Self::from_raw(width, height, ids)
            .ok_or_else(|| serde::de::Error::custom("invalid label mask dimensions"))
    }
}

/// A stitched nucleus/cytoplasm pair sharing ids `1..=N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CellMaskPackProxy")]
pub struct CellMaskPack {
    /// Nucleus label mask.
    pub nucleus: LabelMask,
    /// Cytoplasm label mask (nucleus pixels removed).
    pub cytoplasm: LabelMask,
}

impl CellMaskPack {
    /// Pair two masks of identical size.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if the masks differ
    /// in size.
    pub fn new(nucleus: LabelMask, cytoplasm: LabelMask) -> Result<Self, PipelineError> {
        ensure_dimensions(nucleus.dimensions(), cytoplasm.dimensions())?;
        Ok(Self { nucleus, cytoplasm })
    }

    /// The mask for one part.
    #[must_use]
    pub const fn part(&self, part: CellPart) -> &LabelMask {
        match part {
            CellPart::Nucleus => &self.nucleus,
            CellPart::Cytoplasm => &self.cytoplasm,
        }
    }

    /// Shared size of both masks.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        self.cytoplasm.dimensions()
    }

    /// Number of cells, i.e. the largest cytoplasm id.
    #[must_use]
    pub fn cell_count(&self) -> u32 {
        crate::labels::max_id(&self.cytoplasm)
    }
}

/// Deserialized fields, checked by [`CellMaskPack::new`].
#[derive(Deserialize)]
struct CellMaskPackProxy {
    nucleus: LabelMask,
    cytoplasm: LabelMask,
}

impl TryFrom<CellMaskPackProxy> for CellMaskPack {
    type Error = PipelineError;

    fn try_from(proxy: CellMaskPackProxy) -> Result<Self, Self::Error> {
        Self::new(proxy.nucleus, proxy.cytoplasm)
    }
}

/// Check that two rasters share a size.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] when they differ.
pub fn ensure_dimensions(expected: Dimensions, actual: Dimensions) -> Result<(), PipelineError> {
    if expected == actual {
        Ok(())
    } else {
        Err(PipelineError::DimensionMismatch { expected, actual })
    }
}

/// Errors that can occur while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A configuration parameter is out of range.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// Two rasters that must align differ in size.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Size of the reference raster.
        expected: Dimensions,
        /// Size of the offending raster.
        actual: Dimensions,
    },

    /// A crop does not split into whole tiles.
    #[error("{width}x{height} image does not divide into {block_size}px tiles")]
    TileMismatch {
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
        /// Tile edge.
        block_size: u32,
    },

    /// The z-by-channel plane grid is inconsistent.
    #[error("invalid image stack: {0}")]
    InvalidStack(String),

    /// The segmentation backend answered with the wrong number of masks.
    #[error("segmenter returned {masks} masks for {boxes} boxes")]
    MaskCountMismatch {
        /// Boxes submitted.
        boxes: usize,
        /// Masks received.
        masks: usize,
    },

    /// The segmentation backend failed.
    #[error("segmentation failed: {0}")]
    Segmentation(String),

    /// Two nodes tried to publish the same output name.
    #[error("output {0:?} was already produced")]
    DuplicateOutput(String),

    /// A named artifact is neither in the registry nor the store.
    #[error("artifact {0:?} is not available")]
    MissingArtifact(String),

    /// A named artifact has a different kind than the consumer expects.
    #[error("artifact {name:?} is a {found}, expected {expected}")]
    UnexpectedArtifact {
        /// Registry name.
        name: String,
        /// Kind the consumer needs.
        expected: &'static str,
        /// Kind actually stored.
        found: &'static str,
    },

    /// The artifact store could not save or load.
    #[error("artifact store error: {0}")]
    Store(String),

    /// A node ran before `initialize`.
    #[error("node {0:?} was processed before it was initialized")]
    NotInitialized(String),

    /// The engine was asked to run past its last node.
    #[error("pipeline has no remaining nodes")]
    Finished,

    /// A node's requirements were unmet and no substitute was supplied.
    #[error("node {node:?} is missing requirements: {}", .missing.join(", "))]
    RequirementsUnmet {
        /// Title of the halted node.
        node: String,
        /// Names still absent from the registry.
        missing: Vec<String>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn from_corners_normalizes_drag_direction() {
        let bbox = BoundingBox::from_corners((30, 5), (10, 25));
        assert_eq!(bbox, BoundingBox::new(10, 5, 30, 25));
        assert_eq!(bbox.area(), 400);
    }

    #[test]
    fn padded_box_stays_inside_image() {
        let bbox = BoundingBox::new(5, 5, 95, 40).padded(20, Dimensions::new(100, 50));
        assert_eq!(bbox, BoundingBox::new(0, 0, 100, 50));
    }

    #[test]
    fn inverted_box_is_empty() {
        assert!(BoundingBox::new(10, 10, 5, 20).is_empty());
    }

    #[test]
    fn label_mask_json_roundtrip_preserves_ids() {
        let mask = LabelMask::from_fn(3, 2, |x, y| x + 3 * y);
        let json = serde_json::to_string(&mask).unwrap();
        let back: LabelMask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mask);
    }

    #[test]
    fn label_mask_rejects_short_buffer() {
        let err = serde_json::from_str::<LabelMask>("[2,2,[1,2,3]]");
        assert!(err.is_err());
    }

    #[test]
    fn label_mask_rejects_long_buffer() {
        assert!(LabelMask::from_raw(2, 1, vec![1, 2, 3]).is_none());
        let err = serde_json::from_str::<LabelMask>("[1,1,[0,7]]");
        assert!(err.is_err());
    }

    #[test]
    fn pack_json_with_mismatched_masks_is_rejected() {
        let json = r#"{"nucleus": [2, 2, [0, 1, 0, 0]], "cytoplasm": [2, 1, [1, 0]]}"#;
        let err = serde_json::from_str::<CellMaskPack>(json).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"), "{err}");

        let pack = CellMaskPack::new(LabelMask::new(2, 2), LabelMask::from_fn(2, 2, |x, _| x)).unwrap();
        let back: CellMaskPack = serde_json::from_str(&serde_json::to_string(&pack).unwrap()).unwrap();
        assert_eq!(back, pack);
    }

    #[test]
    fn pack_requires_matching_sizes() {
        let err = CellMaskPack::new(LabelMask::new(4, 4), LabelMask::new(4, 5)).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert_eq!(err.to_string(), "dimension mismatch: expected 4x4, got 4x5");
    }

    #[test]
    fn requirements_error_lists_names() {
        let err = PipelineError::RequirementsUnmet {
            node: "Dot counter".to_string(),
            missing: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "node \"Dot counter\" is missing requirements: a, b"
        );
    }
}
