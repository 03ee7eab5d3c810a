//! Nucleus/cytoplasm reconciliation.
//!
//! Nucleus and cytoplasm masks are drawn independently, so their ids
//! carry no relationship. [`stitch`] turns them into a [`CellMaskPack`]
//! in which id `k` names the same cell in both masks.
//!
//! # Algorithm
//!
//! 1. **Claims.** For every cytoplasm id `c`, ascending, the nucleus id
//!    with the largest overlap inside `c` is its claim. Equal overlaps
//!    go to the lowest nucleus id.
//! 2. **Pairing.** A nucleus claimed by several cytoplasm ids goes to
//!    the largest overlap; equal overlaps go to the lowest cytoplasm
//!    id. Each paired nucleus is then relabeled to its cytoplasm id.
//!    When that label is held by another nucleus the two labels are
//!    exchanged, so the relabeling is a permutation and every region
//!    keeps its pixel count.
//! 3. **Trim.** Nucleus pixels are removed from the cytoplasm mask.
//! 4. **Orphan nuclei.** Nucleus labels that are unpaired, exceed the
//!    largest cytoplasm id, or have no cytoplasm left are cleared.
//! 5. **Orphan cytoplasm.** Cytoplasm ids with no nucleus are cleared.
//!    This runs after step 4.
//! 6. **Resequence.** Surviving ids become `1..=N` in ascending
//!    cytoplasm order, applied identically to both masks.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::labels::{relabel, resequence_pair, retain_ids, subtract, unique_ids};
use crate::types::{CellMaskPack, LabelMask, PipelineError, ensure_dimensions};

/// The nucleus a cytoplasm region overlaps most.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NucleusClaim {
    /// Claiming cytoplasm id.
    pub cytoplasm: u32,
    /// Claimed nucleus id.
    pub nucleus: u32,
    /// Overlap in pixels.
    pub area: u64,
}

/// Counts describing one stitch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StitchReport {
    /// Distinct nucleus ids in the input.
    pub nuclei: usize,
    /// Distinct cytoplasm ids in the input.
    pub cytoplasm: usize,
    /// Cytoplasm ids that overlapped at least one nucleus.
    pub claims: usize,
    /// Nuclei cleared in step 4.
    pub removed_nuclei: usize,
    /// Cytoplasm ids cleared in step 5.
    pub removed_cytoplasm: usize,
    /// Cells in the output.
    pub cells: usize,
}

/// Output of [`stitch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stitched {
    /// The paired masks.
    pub pack: CellMaskPack,
    /// Bookkeeping.
    pub report: StitchReport,
}

/// Step 1: the best nucleus for every cytoplasm id that overlaps one.
///
/// Claims are returned in ascending cytoplasm order.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the masks differ in size.
pub fn claims(nucleus: &LabelMask, cytoplasm: &LabelMask) -> Result<Vec<NucleusClaim>, PipelineError> {
    ensure_dimensions(cytoplasm.dimensions(), nucleus.dimensions())?;

    let mut overlaps: BTreeMap<u32, BTreeMap<u32, u64>> = BTreeMap::new();
    for (&c, &n) in cytoplasm.as_raw().iter().zip(nucleus.as_raw()) {
        if c != 0 && n != 0 {
            *overlaps.entry(c).or_default().entry(n).or_insert(0) += 1;
        }
    }

    Ok(overlaps
        .into_iter()
        .filter_map(|(cytoplasm, nuclei)| {
            let mut best: Option<NucleusClaim> = None;
            for (nucleus, area) in nuclei {
                if best.is_none_or(|b| area > b.area) {
                    best = Some(NucleusClaim {
                        cytoplasm,
                        nucleus,
                        area,
                    });
                }
            }
            best
        })
        .collect())
}

/// Step 2a: keep one claim per nucleus.
///
/// Input must be in ascending cytoplasm order, as produced by
/// [`claims`]. Output is in ascending cytoplasm order.
#[must_use]
pub fn resolve_claims(claims: &[NucleusClaim]) -> Vec<NucleusClaim> {
    let mut by_nucleus: BTreeMap<u32, NucleusClaim> = BTreeMap::new();
    for claim in claims {
        match by_nucleus.get(&claim.nucleus) {
            Some(held) if held.area >= claim.area => {}
            _ => {
                by_nucleus.insert(claim.nucleus, *claim);
            }
        }
    }
    let mut pairs: Vec<NucleusClaim> = by_nucleus.into_values().collect();
    pairs.sort_by_key(|p| p.cytoplasm);
    pairs
}

/// Step 2b: the id permutation that gives each paired nucleus its
/// cytoplasm id.
///
/// Displaced labels move to the slot the paired nucleus vacated. Only
/// ids that change appear in the result.
#[must_use]
pub fn pairing_permutation(nucleus_ids: &BTreeSet<u32>, pairs: &[NucleusClaim]) -> BTreeMap<u32, u32> {
    // original id -> current label, and the inverse
    let mut label_of: BTreeMap<u32, u32> = nucleus_ids.iter().map(|&id| (id, id)).collect();
    let mut holder: BTreeMap<u32, u32> = label_of.clone();

    for pair in pairs {
        let Some(&current) = label_of.get(&pair.nucleus) else {
            continue;
        };
        let target = pair.cytoplasm;
        if current == target {
            continue;
        }
        if let Some(&displaced) = holder.get(&target) {
            label_of.insert(displaced, current);
            holder.insert(current, displaced);
        } else {
            holder.remove(&current);
        }
        label_of.insert(pair.nucleus, target);
        holder.insert(target, pair.nucleus);
    }

    label_of.into_iter().filter(|(from, to)| from != to).collect()
}

/// Reconcile independently labeled nucleus and cytoplasm masks.
///
/// See the module documentation for the steps.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if the masks differ in size.
pub fn stitch(nucleus: &LabelMask, cytoplasm: &LabelMask) -> Result<Stitched, PipelineError> {
    let nucleus_ids = unique_ids(nucleus);
    let claims = claims(nucleus, cytoplasm)?;
    let pairs = resolve_claims(&claims);
    let paired: BTreeSet<u32> = pairs.iter().map(|p| p.cytoplasm).collect();

    let mut nuc = nucleus.clone();
    relabel(&mut nuc, &pairing_permutation(&nucleus_ids, &pairs));

    let mut cyto = cytoplasm.clone();
    subtract(&mut cyto, &nuc)?;

    let cyto_ids = unique_ids(&cyto);
    let max_cyto = cyto_ids.last().copied().unwrap_or(0);
    retain_ids(&mut nuc, |id| {
        id <= max_cyto && paired.contains(&id) && cyto_ids.contains(&id)
    });

    let kept_nuclei = unique_ids(&nuc);
    retain_ids(&mut cyto, |id| kept_nuclei.contains(&id));

    let (nuc, cyto) = resequence_pair(&nuc, &cyto)?;

    let report = StitchReport {
        nuclei: nucleus_ids.len(),
        cytoplasm: unique_ids(cytoplasm).len(),
        claims: claims.len(),
        removed_nuclei: nucleus_ids.len() - kept_nuclei.len(),
        removed_cytoplasm: cyto_ids.len().saturating_sub(kept_nuclei.len()),
        cells: kept_nuclei.len(),
    };
    tracing::debug!(?report, "stitched nucleus and cytoplasm masks");

    Ok(Stitched {
        pack: CellMaskPack::new(nuc, cyto)?,
        report,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::labels::pixel_counts;

    fn rect(x: std::ops::Range<u32>, y: std::ops::Range<u32>) -> impl Fn(u32, u32) -> bool {
        move |px, py| x.contains(&px) && y.contains(&py)
    }

    fn ids(mask: &LabelMask) -> Vec<u32> {
        unique_ids(mask).into_iter().collect()
    }

    #[test]
    fn two_cells_are_paired_and_resequenced() {
        let a = rect(2..5, 2..5);
        let b = rect(12..15, 2..5);
        let nucleus = LabelMask::from_fn(20, 10, |x, y| {
            if a(x, y) {
                1
            } else if b(x, y) {
                2
            } else {
                0
            }
        });
        let cytoplasm = LabelMask::from_fn(20, 10, |x, y| {
            if x < 8 && y < 8 {
                5
            } else if (10..18).contains(&x) && y < 8 {
                6
            } else {
                0
            }
        });

        let Stitched { pack, report } = stitch(&nucleus, &cytoplasm).unwrap();

        assert_eq!(ids(&pack.nucleus), vec![1, 2]);
        assert_eq!(ids(&pack.cytoplasm), vec![1, 2]);
        assert_eq!(pack.nucleus.get(3, 3), 1);
        assert_eq!(pack.nucleus.get(13, 3), 2);
        assert_eq!(pack.cytoplasm.get(0, 0), 1);
        assert_eq!(pack.cytoplasm.get(3, 3), 0);
        let cyto_counts = pixel_counts(&pack.cytoplasm);
        assert_eq!(cyto_counts[&1], 64 - 9);
        assert_eq!(cyto_counts[&2], 64 - 9);
        assert_eq!(report.cells, 2);
        assert_eq!(pack.cell_count(), 2);
    }

    #[test]
    fn crossed_ids_are_swapped_not_merged() {
        // Nucleus 1 (9 px) sits inside cytoplasm 2, nucleus 2 (4 px) inside cytoplasm 1.
        let nucleus = LabelMask::from_fn(20, 10, |x, y| {
            if rect(2..5, 2..5)(x, y) {
                1
            } else if rect(12..14, 2..4)(x, y) {
                2
            } else {
                0
            }
        });
        let cytoplasm = LabelMask::from_fn(20, 10, |x, y| {
            if x < 8 && y < 8 {
                2
            } else if (10..18).contains(&x) && y < 8 {
                1
            } else {
                0
            }
        });

        let pack = stitch(&nucleus, &cytoplasm).unwrap().pack;

        assert_eq!(pack.nucleus.get(3, 3), pack.cytoplasm.get(0, 0));
        assert_eq!(pack.nucleus.get(12, 2), pack.cytoplasm.get(10, 0));
        let counts = pixel_counts(&pack.nucleus);
        assert_eq!(counts[&pack.nucleus.get(3, 3)], 9);
        assert_eq!(counts[&pack.nucleus.get(12, 2)], 4);
    }

    #[test]
    fn equal_overlap_goes_to_lowest_nucleus_id() {
        let nucleus = LabelMask::from_fn(10, 4, |x, _| match x {
            1 | 2 => 7,
            5 | 6 => 3,
            _ => 0,
        });
        let cytoplasm = LabelMask::from_fn(10, 4, |_, _| 1);
        let found = claims(&nucleus, &cytoplasm).unwrap();
        assert_eq!(
            found,
            vec![NucleusClaim {
                cytoplasm: 1,
                nucleus: 3,
                area: 8
            }]
        );
        let pack = stitch(&nucleus, &cytoplasm).unwrap().pack;
        assert_eq!(pack.nucleus.get(5, 0), 1);
        assert_eq!(pack.nucleus.get(1, 0), 0);
    }

    #[test]
    fn contested_nucleus_goes_to_largest_overlap() {
        let claims = [
            NucleusClaim {
                cytoplasm: 1,
                nucleus: 4,
                area: 3,
            },
            NucleusClaim {
                cytoplasm: 2,
                nucleus: 4,
                area: 10,
            },
            NucleusClaim {
                cytoplasm: 3,
                nucleus: 4,
                area: 10,
            },
        ];
        let pairs = resolve_claims(&claims);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].cytoplasm, 2);
    }

    #[test]
    fn permutation_swaps_displaced_labels() {
        let ids: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let pairs = [NucleusClaim {
            cytoplasm: 3,
            nucleus: 1,
            area: 1,
        }];
        let perm = pairing_permutation(&ids, &pairs);
        assert_eq!(perm, BTreeMap::from([(1, 3), (3, 1)]));
    }

    #[test]
    fn permutation_moves_into_unused_label() {
        let ids: BTreeSet<u32> = [1, 2].into_iter().collect();
        let pairs = [NucleusClaim {
            cytoplasm: 9,
            nucleus: 2,
            area: 1,
        }];
        assert_eq!(pairing_permutation(&ids, &pairs), BTreeMap::from([(2, 9)]));
    }

    #[test]
    fn orphans_are_removed() {
        // Cytoplasm 1 has no nucleus; nucleus 8 lies outside every cytoplasm.
        let nucleus = LabelMask::from_fn(30, 10, |x, y| {
            if rect(12..14, 2..4)(x, y) {
                4
            } else if rect(25..28, 2..4)(x, y) {
                8
            } else {
                0
            }
        });
        let cytoplasm = LabelMask::from_fn(30, 10, |x, y| {
            if x < 8 && y < 8 {
                1
            } else if (10..18).contains(&x) && y < 8 {
                2
            } else {
                0
            }
        });
        let Stitched { pack, report } = stitch(&nucleus, &cytoplasm).unwrap();
        assert_eq!(ids(&pack.nucleus), vec![1]);
        assert_eq!(ids(&pack.cytoplasm), vec![1]);
        assert_eq!(pack.cytoplasm.get(0, 0), 0);
        assert_eq!(pack.nucleus.get(26, 2), 0);
        assert_eq!(report.removed_nuclei, 1);
        assert_eq!(report.removed_cytoplasm, 1);
    }

    #[test]
    fn fully_covered_cytoplasm_drops_its_cell() {
        let nucleus = LabelMask::from_fn(4, 4, |_, _| 1);
        let cytoplasm = LabelMask::from_fn(4, 4, |_, _| 1);
        let pack = stitch(&nucleus, &cytoplasm).unwrap().pack;
        assert!(pack.nucleus.is_blank());
        assert!(pack.cytoplasm.is_blank());
    }

    #[test]
    fn blank_inputs_stay_blank() {
        let blank = LabelMask::new(8, 8);
        let Stitched { pack, report } = stitch(&blank, &blank).unwrap();
        assert!(pack.nucleus.is_blank());
        assert_eq!(report, StitchReport::default());
    }

    #[test]
    fn size_mismatch_is_reported() {
        let err = stitch(&LabelMask::new(4, 4), &LabelMask::new(5, 4)).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }
}
