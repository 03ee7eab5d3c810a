//! fishnet-export: Pure format serializers (sans-IO)
//!
//! Converts pipeline artifacts into output formats: CSV tables for the
//! measurements and PNG renders of label masks. Every function returns
//! bytes or images; writing them anywhere is the caller's job.

pub mod render;
pub mod tables;

pub use render::{blend, cell_labels, colorize, encode_png, label_color, outline, particle_figure};
pub use tables::{dot_counts_csv, mean_intensity_csv};

/// Errors from the serializers.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// CSV encoding failed.
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    /// Flushing an in-memory writer failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV writer produced invalid UTF-8.
    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// PNG encoding failed.
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// Two images that must line up do not.
    #[error("size mismatch: {0}")]
    Mismatch(#[from] fishnet_pipeline::PipelineError),
}
