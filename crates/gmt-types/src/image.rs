//! 8-bit raster images with 1, 3 or 4 bands.

use crate::grid::check_shape;
use crate::{ContainerError, Increments, Region, Registration};

/// An image stored band-major: all of band 0, then all of band 1, and so
/// on. Within a band, samples are row-major with row 0 at the north edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub n_bands: usize,
    pub n_rows: usize,
    pub n_columns: usize,
    pub region: Region,
    pub increments: Increments,
    pub registration: Registration,
}

impl Image {
    /// Band counts the engine accepts: gray, RGB and RGBA.
    pub const SUPPORTED_BANDS: [usize; 3] = [1, 3, 4];

    /// Creates an image from band-major samples.
    pub fn from_band_major(
        data: Vec<u8>,
        n_bands: usize,
        n_rows: usize,
        n_columns: usize,
        region: Region,
        registration: Registration,
    ) -> Result<Self, ContainerError> {
        let increments = implied_increments(&region, registration, n_rows, n_columns);
        let image = Self {
            data,
            n_bands,
            n_rows,
            n_columns,
            region,
            increments,
            registration,
        };
        image.validate()?;
        Ok(image)
    }

    /// Creates an image from pixel-interleaved samples (`RGBRGB...`).
    pub fn from_pixel_interleaved(
        pixels: &[u8],
        n_bands: usize,
        n_rows: usize,
        n_columns: usize,
        region: Region,
        registration: Registration,
    ) -> Result<Self, ContainerError> {
        check_bands(n_bands)?;
        let plane = n_rows * n_columns;
        if pixels.len() != plane * n_bands {
            return Err(ContainerError::DataLength {
                what: "image samples",
                expected: plane * n_bands,
                found: pixels.len(),
            });
        }
        let mut data = vec![0u8; pixels.len()];
        for (pixel, values) in pixels.chunks_exact(n_bands).enumerate() {
            for (band, &value) in values.iter().enumerate() {
                data[band * plane + pixel] = value;
            }
        }
        Self::from_band_major(data, n_bands, n_rows, n_columns, region, registration)
    }

    /// Checks band count, sample count and region/shape agreement.
    pub fn validate(&self) -> Result<(), ContainerError> {
        check_bands(self.n_bands)?;
        let expected = self.n_bands * self.n_rows * self.n_columns;
        if self.data.len() != expected {
            return Err(ContainerError::DataLength {
                what: "image samples",
                expected,
                found: self.data.len(),
            });
        }
        if self.is_empty() {
            return Ok(());
        }
        check_shape(&self.region, &self.increments, self.registration, self.n_rows, self.n_columns)
            .map_err(|e| ContainerError::InvalidImage(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0 || self.n_columns == 0
    }

    pub fn has_alpha(&self) -> bool {
        self.n_bands == 4
    }

    /// Colour interpretation name.
    pub fn color_interpretation(&self) -> &'static str {
        match self.n_bands {
            1 => "Gray",
            3 => "RGB",
            _ => "RGBA",
        }
    }

    /// Samples of one band.
    pub fn band(&self, band: usize) -> Option<&[u8]> {
        if band >= self.n_bands {
            return None;
        }
        let plane = self.n_rows * self.n_columns;
        self.data.get(band * plane..(band + 1) * plane)
    }

    /// All band values of one pixel.
    pub fn pixel(&self, row: usize, column: usize) -> Option<Vec<u8>> {
        if row >= self.n_rows || column >= self.n_columns {
            return None;
        }
        let plane = self.n_rows * self.n_columns;
        let offset = row * self.n_columns + column;
        Some((0..self.n_bands).map(|b| self.data[b * plane + offset]).collect())
    }

    /// Samples reordered pixel by pixel.
    pub fn to_pixel_interleaved(&self) -> Vec<u8> {
        let plane = self.n_rows * self.n_columns;
        let mut out = Vec::with_capacity(self.data.len());
        for pixel in 0..plane {
            for band in 0..self.n_bands {
                out.push(self.data[band * plane + pixel]);
            }
        }
        out
    }
}

fn check_bands(n_bands: usize) -> Result<(), ContainerError> {
    if Image::SUPPORTED_BANDS.contains(&n_bands) {
        Ok(())
    } else {
        Err(ContainerError::InvalidImage(format!(
            "{} bands; only 1, 3 or 4 are supported",
            n_bands
        )))
    }
}

fn implied_increments(region: &Region, registration: Registration, n_rows: usize, n_columns: usize) -> Increments {
    let step = |extent: f64, n: usize| match registration {
        Registration::Pixel if n > 0 => extent / n as f64,
        Registration::Gridline if n > 1 => extent / (n - 1) as f64,
        _ => 1.0,
    };
    Increments::new(step(region.width(), n_columns), step(region.height(), n_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn region() -> Region {
        Region::new(0.0, 2.0, 0.0, 1.0)
    }

    #[test]
    fn test_band_major_layout() {
        let data: Vec<u8> = (0..6).collect();
        let image = Image::from_band_major(data, 3, 1, 2, region(), Registration::Pixel).unwrap();
        assert_eq!(image.band(1), Some(&[2u8, 3][..]));
        assert_eq!(image.pixel(0, 1), Some(vec![1, 3, 5]));
        assert_eq!(image.to_pixel_interleaved(), vec![0, 2, 4, 1, 3, 5]);
        assert_eq!(image.increments, Increments::new(1.0, 1.0));
    }

    #[test]
    fn test_pixel_interleaved_input() {
        let pixels = [10u8, 20, 30, 40, 11, 21, 31, 41];
        let image = Image::from_pixel_interleaved(&pixels, 4, 1, 2, region(), Registration::Pixel).unwrap();
        assert!(image.has_alpha());
        assert_eq!(image.band(3), Some(&[40u8, 41][..]));
        assert_eq!(image.to_pixel_interleaved(), pixels.to_vec());
    }

    #[test]
    fn test_two_bands_rejected() {
        let err = Image::from_band_major(vec![0; 4], 2, 1, 2, region(), Registration::Pixel).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidImage(_)));
    }

    #[test]
    fn test_gray_image() {
        let image = Image::from_band_major(vec![7; 6], 1, 2, 3, Region::new(0.0, 2.0, 0.0, 1.0), Registration::Gridline)
            .unwrap();
        assert_eq!(image.color_interpretation(), "Gray");
        assert_eq!(image.increments, Increments::new(1.0, 1.0));
    }
}
