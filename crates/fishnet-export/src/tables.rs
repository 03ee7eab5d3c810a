//! CSV tables for the measurement artifacts.
//!
//! Headers are always written, even for an empty table, so downstream
//! tooling can rely on the column layout. Line endings are `\n`.

use fishnet_pipeline::quantify::{DotCountPack, MeanIntensityTable};
use serde::Serialize;

use crate::ExportError;

const MEAN_INTENSITY_HEADER: [&str; 5] = [
    "cell_id",
    "cyto_mean_intensity",
    "nuc_mean_intensity",
    "z_level",
    "channel",
];

const DOT_COUNT_HEADER: [&str; 3] = ["cell_id", "cyto_counts", "nuc_counts"];

#[derive(Serialize)]
struct MeanIntensityRow<'a> {
    cell_id: u32,
    cyto_mean_intensity: String,
    nuc_mean_intensity: String,
    z_level: &'a str,
    channel: &'a str,
}

#[derive(Serialize)]
struct DotCountRow {
    cell_id: u32,
    cyto_counts: usize,
    nuc_counts: usize,
}

fn writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, ExportError> {
    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Io(err.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Serialize mean intensities, one row per record, floats to 3 decimals.
///
/// # Errors
///
/// Returns [`ExportError`] if CSV encoding fails.
pub fn mean_intensity_csv(table: &MeanIntensityTable) -> Result<String, ExportError> {
    let mut out = writer();
    out.write_record(MEAN_INTENSITY_HEADER)?;
    for record in &table.records {
        out.serialize(MeanIntensityRow {
            cell_id: record.cell_id,
            cyto_mean_intensity: format!("{:.3}", record.cytoplasm_mean),
            nuc_mean_intensity: format!("{:.3}", record.nucleus_mean),
            z_level: &record.z_level,
            channel: &record.channel,
        })?;
    }
    finish(out)
}

/// Serialize particle counts for every cell counted in both parts.
///
/// # Errors
///
/// Returns [`ExportError`] if CSV encoding fails.
pub fn dot_counts_csv(pack: &DotCountPack) -> Result<String, ExportError> {
    let mut out = writer();
    out.write_record(DOT_COUNT_HEADER)?;
    for record in pack.records() {
        out.serialize(DotCountRow {
            cell_id: record.cell_id,
            cyto_counts: record.cytoplasm,
            nuc_counts: record.nucleus,
        })?;
    }
    finish(out)
}
