//! Mask algebra over [`LabelMask`]s.
//!
//! Pure functions used by the stitcher, the quilt aggregator, and the
//! quantification nodes. Id 0 is background everywhere: it is never
//! reported by [`unique_ids`], never relabeled, and never counted.
//!
//! Functions that combine two masks require equal dimensions and
//! report [`PipelineError::DimensionMismatch`] otherwise.

use std::collections::{BTreeMap, BTreeSet};

use image::{GrayImage, Luma};
use imageproc::contours::{BorderType, Contour};

use crate::types::{BoundingBox, Dimensions, LabelMask, PipelineError, ensure_dimensions};

/// Foreground value of binary masks produced here.
pub const ACTIVE: u8 = 255;

/// Nonzero ids in ascending order.
#[must_use]
pub fn unique_ids(mask: &LabelMask) -> BTreeSet<u32> {
    mask.as_raw().iter().copied().filter(|&id| id != 0).collect()
}

/// Largest id present, or 0 for a blank mask.
#[must_use]
pub fn max_id(mask: &LabelMask) -> u32 {
    mask.as_raw().iter().copied().max().unwrap_or(0)
}

/// Pixel count of every nonzero id.
#[must_use]
pub fn pixel_counts(mask: &LabelMask) -> BTreeMap<u32, u64> {
    let mut counts = BTreeMap::new();
    for &id in mask.as_raw() {
        if id != 0 {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    counts
}

/// Number of pixels where `mask == id` and `other == other_id`.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the masks differ in size.
pub fn overlap_area(
    mask: &LabelMask,
    id: u32,
    other: &LabelMask,
    other_id: u32,
) -> Result<u64, PipelineError> {
    ensure_dimensions(mask.dimensions(), other.dimensions())?;
    Ok(mask
        .as_raw()
        .iter()
        .zip(other.as_raw())
        .filter(|&(&a, &b)| a == id && b == other_id)
        .count() as u64)
}

/// Binary image that is [`ACTIVE`] where `mask == id`.
#[must_use]
pub fn activation(mask: &LabelMask, id: u32) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get(x, y) == id { ACTIVE } else { 0 }])
    })
}

/// Binary image that is [`ACTIVE`] wherever the mask has any id.
#[must_use]
pub fn foreground(mask: &LabelMask) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get(x, y) == 0 { 0 } else { ACTIVE }])
    })
}

/// Copy of the mask keeping only `id`.
#[must_use]
pub fn isolate(mask: &LabelMask, id: u32) -> LabelMask {
    LabelMask::from_fn(mask.width(), mask.height(), |x, y| {
        let value = mask.get(x, y);
        if value == id { value } else { 0 }
    })
}

/// Rewrite every `from` pixel to `to`.
pub fn replace_id(mask: &mut LabelMask, from: u32, to: u32) {
    for id in mask.ids_mut() {
        if *id == from {
            *id = to;
        }
    }
}

/// Exchange two ids. Both regions keep their pixel counts.
pub fn swap_ids(mask: &mut LabelMask, a: u32, b: u32) {
    for id in mask.ids_mut() {
        if *id == a {
            *id = b;
        } else if *id == b {
            *id = a;
        }
    }
}

/// Clear every id for which `keep` returns `false`.
pub fn retain_ids(mask: &mut LabelMask, mut keep: impl FnMut(u32) -> bool) {
    for id in mask.ids_mut() {
        if *id != 0 && !keep(*id) {
            *id = 0;
        }
    }
}

/// Clear every id in `ids`.
pub fn remove_ids(mask: &mut LabelMask, ids: &BTreeSet<u32>) {
    retain_ids(mask, |id| !ids.contains(&id));
}

/// Apply an id mapping in one pass. Ids missing from `map` are kept.
pub fn relabel(mask: &mut LabelMask, map: &BTreeMap<u32, u32>) {
    for id in mask.ids_mut() {
        if let Some(&to) = map.get(&*id) {
            *id = to;
        }
    }
}

/// Zero `mask` wherever `other` is nonzero.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the masks differ in size.
pub fn subtract(mask: &mut LabelMask, other: &LabelMask) -> Result<(), PipelineError> {
    ensure_dimensions(mask.dimensions(), other.dimensions())?;
    for (id, &cover) in mask.ids_mut().iter_mut().zip(other.as_raw()) {
        if cover != 0 {
            *id = 0;
        }
    }
    Ok(())
}

/// Map the ascending ids of `mask` onto `1..=N`.
#[must_use]
pub fn sequence_map(mask: &LabelMask) -> BTreeMap<u32, u32> {
    unique_ids(mask).into_iter().zip(1..).collect()
}

/// Renumber ids to `1..=N` keeping their relative order.
#[must_use]
pub fn resequence(mask: &LabelMask) -> LabelMask {
    let mut out = mask.clone();
    relabel(&mut out, &sequence_map(mask));
    out
}

/// Renumber a nucleus/cytoplasm pair using the cytoplasm order.
///
/// Both masks receive the same mapping so paired ids stay paired.
/// Nucleus ids without a cytoplasm counterpart are cleared.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the masks differ in size.
pub fn resequence_pair(
    nucleus: &LabelMask,
    cytoplasm: &LabelMask,
) -> Result<(LabelMask, LabelMask), PipelineError> {
    ensure_dimensions(cytoplasm.dimensions(), nucleus.dimensions())?;
    let map = sequence_map(cytoplasm);

    let mut cyto = cytoplasm.clone();
    relabel(&mut cyto, &map);

    let mut nuc = nucleus.clone();
    retain_ids(&mut nuc, |id| map.contains_key(&id));
    relabel(&mut nuc, &map);

    Ok((nuc, cyto))
}

/// Build a label mask from per-box binary masks.
///
/// Mask `i` contributes id `i + 1` wherever it is nonzero. Later masks
/// overwrite earlier ones where they overlap.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if any mask differs
/// from `dims`.
pub fn compose_from_binary(masks: &[GrayImage], dims: Dimensions) -> Result<LabelMask, PipelineError> {
    let mut out = LabelMask::new(dims.width, dims.height);
    for (mask, id) in masks.iter().zip(1u32..) {
        ensure_dimensions(dims, Dimensions::of(mask))?;
        for (slot, &value) in out.ids_mut().iter_mut().zip(mask.as_raw()) {
            if value != 0 {
                *slot = id;
            }
        }
    }
    Ok(out)
}

/// Shoelace area of a closed contour, in pixels.
#[allow(clippy::cast_precision_loss)]
fn contour_area(contour: &Contour<u32>) -> f64 {
    let points = &contour.points;
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: i64 = (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y)
        })
        .sum();
    twice.unsigned_abs() as f64 / 2.0
}

/// Bounding box of the largest outer contour of `id`.
///
/// Returns `None` when the id has no pixels. On equal contour areas the
/// first contour found wins.
#[must_use]
pub fn region_bbox(mask: &LabelMask, id: u32) -> Option<BoundingBox> {
    if id == 0 || !mask.as_raw().contains(&id) {
        return None;
    }
    let contours: Vec<Contour<u32>> = imageproc::contours::find_contours(&activation(mask, id));

    let mut best: Option<(f64, &Contour<u32>)> = None;
    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && !c.points.is_empty())
    {
        let area = contour_area(contour);
        if best.is_none_or(|(best_area, _)| area > best_area) {
            best = Some((area, contour));
        }
    }

    let (_, contour) = best?;
    let xs = contour.points.iter().map(|p| p.x);
    let ys = contour.points.iter().map(|p| p.y);
    Some(BoundingBox::new(
        xs.clone().min()?,
        ys.clone().min()?,
        xs.max()? + 1,
        ys.max()? + 1,
    ))
}

/// Scale a box between two resolutions, rounding outward.
#[must_use]
pub fn rescale_box(bbox: BoundingBox, from: Dimensions, to: Dimensions) -> BoundingBox {
    if from.is_empty() {
        return BoundingBox::new(0, 0, 0, 0);
    }
    let scale = |value: u32, src: u32, dst: u32, round_up: bool| -> u32 {
        let scaled = u64::from(value) * u64::from(dst);
        let src = u64::from(src);
        let q = if round_up { scaled.div_ceil(src) } else { scaled / src };
        u32::try_from(q).unwrap_or(u32::MAX)
    };
    BoundingBox::new(
        scale(bbox.x_min, from.width, to.width, false),
        scale(bbox.y_min, from.height, to.height, false),
        scale(bbox.x_max, from.width, to.width, true),
        scale(bbox.y_max, from.height, to.height, true),
    )
    .clamp_to(to)
}

/// Nearest-neighbour resize. Ids are never blended.
#[must_use]
pub fn resize_nearest(mask: &LabelMask, dims: Dimensions) -> LabelMask {
    if mask.dimensions() == dims {
        return mask.clone();
    }
    if mask.dimensions().is_empty() {
        return LabelMask::new(dims.width, dims.height);
    }
    let source = |dst: u32, dst_len: u32, src_len: u32| -> u32 {
        let src = u64::from(dst) * u64::from(src_len) / u64::from(dst_len);
        u32::try_from(src).unwrap_or(src_len - 1).min(src_len - 1)
    };
    LabelMask::from_fn(dims.width, dims.height, |x, y| {
        mask.get(
            source(x, dims.width, mask.width()),
            source(y, dims.height, mask.height()),
        )
    })
}
