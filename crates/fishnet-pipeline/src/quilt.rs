//! Tiled automatic segmentation and particle counting.
//!
//! The candidate generator is only reliable on small inputs, so a crop
//! is cut into square tiles of [`QuiltConfig::block_size`], each tile is
//! segmented on its own, and the per-tile instance masks are written
//! back into a mosaic the size of the crop.
//!
//! Instance ids restart at 1 in every tile. Only the total count and
//! the mosaic layout carry meaning across tiles.

use image::GrayImage;
use image::imageops;

use crate::config::QuiltConfig;
use crate::labels::compose_from_binary;
use crate::segmentation::{Candidate, Segmenter};
use crate::types::{BoundingBox, Dimensions, LabelMask, PipelineError};

/// One tile of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Row in the grid, from the top.
    pub row: u32,
    /// Column in the grid, from the left.
    pub column: u32,
    /// Pixel extent inside the crop.
    pub bounds: BoundingBox,
}

/// Segmentation of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileResult {
    /// Where the tile sits.
    pub tile: Tile,
    /// Surviving candidates.
    pub count: usize,
    /// Tile-local instance ids `1..=count`.
    pub instances: LabelMask,
}

/// Result of quilting one crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quilt {
    /// Per-tile results in raster order.
    pub tiles: Vec<TileResult>,
    /// Tile instance masks reassembled at crop resolution.
    pub mosaic: LabelMask,
}

impl Quilt {
    /// Sum of per-tile counts.
    #[must_use]
    pub fn total(&self) -> usize {
        self.tiles.iter().map(|t| t.count).sum()
    }
}

/// Partition `dims` into `block_size` squares, rows first.
///
/// # Errors
///
/// Returns [`PipelineError::TileMismatch`] unless `block_size` is
/// positive and divides both sides.
pub fn tile_grid(dims: Dimensions, block_size: u32) -> Result<Vec<Tile>, PipelineError> {
    if block_size == 0
        || dims.is_empty()
        || dims.width % block_size != 0
        || dims.height % block_size != 0
    {
        return Err(PipelineError::TileMismatch {
            width: dims.width,
            height: dims.height,
            block_size,
        });
    }
    let rows = dims.height / block_size;
    let columns = dims.width / block_size;
    Ok((0..rows)
        .flat_map(|row| {
            (0..columns).map(move |column| Tile {
                row,
                column,
                bounds: BoundingBox::new(
                    column * block_size,
                    row * block_size,
                    (column + 1) * block_size,
                    (row + 1) * block_size,
                ),
            })
        })
        .collect())
}

/// Drop candidates covering more than `max_fraction` of the tile.
///
/// The area is measured from the mask. A candidate exactly at the limit
/// is kept.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn filter_candidates(candidates: Vec<Candidate>, tile_area: u64, max_fraction: f64) -> Vec<Candidate> {
    let limit = max_fraction * tile_area as f64;
    candidates
        .into_iter()
        .filter(|c| c.pixel_area() as f64 <= limit)
        .collect()
}

/// Segment one tile image.
///
/// # Errors
///
/// Propagates backend failures and rejects candidate masks that do not
/// match the tile size.
pub fn segment_tile(
    tile: Tile,
    image: &GrayImage,
    config: &QuiltConfig,
    segmenter: &mut dyn Segmenter,
) -> Result<TileResult, PipelineError> {
    let dims = Dimensions::of(image);
    let candidates = segmenter.generate_candidates(image)?;
    let proposed = candidates.len();
    let kept = filter_candidates(candidates, dims.pixel_count(), config.max_area_fraction);
    let masks: Vec<GrayImage> = kept.into_iter().map(|c| c.mask).collect();
    let instances = compose_from_binary(&masks, dims)?;
    tracing::debug!(
        row = tile.row,
        column = tile.column,
        proposed,
        kept = masks.len(),
        "segmented tile"
    );
    Ok(TileResult {
        tile,
        count: masks.len(),
        instances,
    })
}

/// Copy every tile's instances into a mosaic of size `dims`.
#[must_use]
pub fn reassemble(dims: Dimensions, tiles: &[TileResult]) -> LabelMask {
    let mut mosaic = LabelMask::new(dims.width, dims.height);
    for result in tiles {
        let bounds = result.tile.bounds.clamp_to(dims);
        for y in 0..bounds.height().min(result.instances.height()) {
            for x in 0..bounds.width().min(result.instances.width()) {
                mosaic.set(bounds.x_min + x, bounds.y_min + y, result.instances.get(x, y));
            }
        }
    }
    mosaic
}

/// Tile `image`, segment each tile, and reassemble.
///
/// # Errors
///
/// Returns [`PipelineError::TileMismatch`] when the block size does not
/// divide the image, and propagates backend failures.
pub fn quilt(
    image: &GrayImage,
    config: &QuiltConfig,
    segmenter: &mut dyn Segmenter,
) -> Result<Quilt, PipelineError> {
    let dims = Dimensions::of(image);
    let grid = tile_grid(dims, config.block_size)?;

    let mut tiles = Vec::with_capacity(grid.len());
    for tile in grid {
        let b = tile.bounds;
        let view = imageops::crop_imm(image, b.x_min, b.y_min, b.width(), b.height()).to_image();
        tiles.push(segment_tile(tile, &view, config, segmenter)?);
    }

    let mosaic = reassemble(dims, &tiles);
    Ok(Quilt { tiles, mosaic })
}
