//! The raw acquisition: a z-by-channel grid of 16-bit planes.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};

use crate::types::{Dimensions, PipelineError};

/// One 16-bit plane.
pub type Plane = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Planes indexed by z level and channel, stored z-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStack {
    z_labels: Vec<String>,
    channel_labels: Vec<String>,
    planes: Vec<Plane>,
    dimensions: Dimensions,
}

impl ImageStack {
    /// Assemble a stack. `planes[z * channels + c]` is level `z`, channel `c`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidStack`] when the plane count does
    /// not match the labels or the stack is empty, and
    /// [`PipelineError::DimensionMismatch`] when planes differ in size.
    pub fn new(
        z_labels: Vec<String>,
        channel_labels: Vec<String>,
        planes: Vec<Plane>,
    ) -> Result<Self, PipelineError> {
        let expected = z_labels.len() * channel_labels.len();
        if expected == 0 || planes.len() != expected {
            return Err(PipelineError::InvalidStack(format!(
                "{} planes for {} z levels x {} channels",
                planes.len(),
                z_labels.len(),
                channel_labels.len(),
            )));
        }
        let dimensions = Dimensions::new(planes[0].width(), planes[0].height());
        for plane in &planes[1..] {
            crate::types::ensure_dimensions(
                dimensions,
                Dimensions::new(plane.width(), plane.height()),
            )?;
        }
        Ok(Self {
            z_labels,
            channel_labels,
            planes,
            dimensions,
        })
    }

    /// Z labels, `"1"`, `"2"`, ... by convention.
    #[must_use]
    pub fn z_labels(&self) -> &[String] {
        &self.z_labels
    }

    /// Channel names.
    #[must_use]
    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    /// Size shared by every plane.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// The plane at level `z`, channel `c`.
    #[must_use]
    pub fn plane(&self, z: usize, c: usize) -> Option<&Plane> {
        if z >= self.z_labels.len() || c >= self.channel_labels.len() {
            return None;
        }
        self.planes.get(z * self.channel_labels.len() + c)
    }

    /// Per-pixel maximum over the selected planes.
    ///
    /// Out-of-range indices are ignored; an empty selection yields a
    /// black plane.
    #[must_use]
    pub fn project(&self, z_levels: &[usize], channels: &[usize]) -> Plane {
        let mut out = Plane::new(self.dimensions.width, self.dimensions.height);
        for &z in z_levels {
            for &c in channels {
                if let Some(plane) = self.plane(z, c) {
                    for (dst, &src) in out.iter_mut().zip(plane.as_raw()) {
                        *dst = (*dst).max(src);
                    }
                }
            }
        }
        out
    }

    /// Maximum over every plane.
    #[must_use]
    pub fn project_all(&self) -> Plane {
        let zs: Vec<usize> = (0..self.z_labels.len()).collect();
        let cs: Vec<usize> = (0..self.channel_labels.len()).collect();
        self.project(&zs, &cs)
    }
}

/// Min-max stretch to 8 bits. A constant plane maps to black.
#[must_use]
pub fn normalize_to_u8(plane: &Plane) -> GrayImage {
    let (lo, hi) = plane
        .as_raw()
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi <= lo {
        return GrayImage::new(plane.width(), plane.height());
    }
    let range = u32::from(hi - lo);
    GrayImage::from_fn(plane.width(), plane.height(), |x, y| {
        let v = u32::from(plane.get_pixel(x, y).0[0] - lo);
        let scaled = (v * 255 + range / 2) / range;
        Luma([u8::try_from(scaled).unwrap_or(u8::MAX)])
    })
}

/// Resize keeping aspect ratio so the pixel count is close to `area`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resize_to_pixel_area(image: &GrayImage, area: u64) -> GrayImage {
    let dims = Dimensions::of(image);
    if dims.is_empty() || area == 0 || dims.pixel_count() == area {
        return image.clone();
    }
    let scale = (area as f64 / dims.pixel_count() as f64).sqrt();
    let width = (f64::from(dims.width) * scale).round().max(1.0) as u32;
    let height = (f64::from(dims.height) * scale).round().max(1.0) as u32;
    imageops::resize(image, width, height, FilterType::Triangle)
}
