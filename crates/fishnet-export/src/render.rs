//! Label mask renders.
//!
//! Each id gets a stable pseudo-random color derived from a SipHash of
//! the id, so the same cell has the same color in every figure of a
//! run and across runs. Id 0 is always black.

use std::hash::Hasher;
use std::io::Cursor;

use fishnet_pipeline::quantify::CellSegmentation;
use fishnet_pipeline::types::ensure_dimensions;
use fishnet_pipeline::{CellMaskPack, Dimensions, LabelMask};
use image::{DynamicImage, GrayImage, ImageFormat, Rgb, RgbImage};
use siphasher::sip::SipHasher13;

use crate::ExportError;

/// Weight of the segmentation layer in [`particle_figure`] overlays.
pub const PARTICLE_ALPHA: f32 = 0.3;

/// Weight of the segmentation layer in whole-cell overlays.
pub const CELL_ALPHA: f32 = 0.4;

/// Lowest channel value of a label color, keeping labels visible on black.
const MIN_CHANNEL: u8 = 64;

/// Stable color for a label id.
#[must_use]
pub fn label_color(id: u32) -> Rgb<u8> {
    if id == 0 {
        return Rgb([0, 0, 0]);
    }
    let mut hasher = SipHasher13::new();
    hasher.write_u32(id);
    let [r, g, b, ..] = hasher.finish().to_le_bytes();
    let span = u8::MAX - MIN_CHANNEL;
    Rgb([r, g, b].map(|c| MIN_CHANNEL + c % span))
}

/// Paint every id with its [`label_color`].
#[must_use]
pub fn colorize(mask: &LabelMask) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| label_color(mask.get(x, y)))
}

/// Mix `layer` over a grayscale `base`: `layer * alpha + base * (1 - alpha)`.
///
/// # Errors
///
/// Returns [`ExportError::Mismatch`] if the images differ in size.
pub fn blend(layer: &RgbImage, base: &GrayImage, alpha: f32) -> Result<RgbImage, ExportError> {
    ensure_dimensions(
        Dimensions::of(base),
        Dimensions::new(layer.width(), layer.height()),
    )?;
    let alpha = alpha.clamp(0.0, 1.0);
    Ok(RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let under = f32::from(base.get_pixel(x, y).0[0]);
        let over = layer.get_pixel(x, y).0;
        Rgb(over.map(|c| mix(f32::from(c), under, alpha)))
    }))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mix(over: f32, under: f32, alpha: f32) -> u8 {
    over.mul_add(alpha, under * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8
}

/// Draw region borders in their label color over a grayscale base.
///
/// A pixel is on a border when its id is nonzero and a 4-neighbour, or
/// the image edge, holds a different id.
///
/// # Errors
///
/// Returns [`ExportError::Mismatch`] if the images differ in size.
pub fn outline(mask: &LabelMask, base: &GrayImage) -> Result<RgbImage, ExportError> {
    ensure_dimensions(Dimensions::of(base), mask.dimensions())?;
    let (w, h) = (mask.width(), mask.height());
    Ok(RgbImage::from_fn(w, h, |x, y| {
        let id = mask.get(x, y);
        let differs = |nx: Option<u32>, ny: Option<u32>| match (nx, ny) {
            (Some(nx), Some(ny)) if nx < w && ny < h => mask.get(nx, ny) != id,
            _ => true,
        };
        let border = id != 0
            && (differs(x.checked_sub(1), Some(y))
                || differs(x.checked_add(1), Some(y))
                || differs(Some(x), y.checked_sub(1))
                || differs(Some(x), y.checked_add(1)));
        if border {
            label_color(id)
        } else {
            let v = base.get_pixel(x, y).0[0];
            Rgb([v, v, v])
        }
    }))
}

/// Whole cells: each nucleus painted with its cell's color over the
/// cytoplasm ring.
#[must_use]
pub fn cell_labels(pack: &CellMaskPack) -> LabelMask {
    LabelMask::from_fn(pack.cytoplasm.width(), pack.cytoplasm.height(), |x, y| {
        match pack.nucleus.get(x, y) {
            0 => pack.cytoplasm.get(x, y),
            id => id,
        }
    })
}

/// A quilted crop with its instances blended over it.
///
/// # Errors
///
/// Returns [`ExportError::Mismatch`] if the mosaic and crop differ in size.
pub fn particle_figure(segmentation: &CellSegmentation) -> Result<RgbImage, ExportError> {
    blend(&colorize(&segmentation.mosaic), &segmentation.crop, PARTICLE_ALPHA)
}

/// PNG bytes of any image.
///
/// # Errors
///
/// Returns [`ExportError::Image`] if encoding fails.
pub fn encode_png(image: impl Into<DynamicImage>) -> Result<Vec<u8>, ExportError> {
    let mut bytes = Vec::new();
    image
        .into()
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
