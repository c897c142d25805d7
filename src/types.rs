//! Result types produced by the background removal pipeline

use crate::error::{BgRemovalError, Result};
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Per-pixel foreground probability in original image coordinates
///
/// Values are 0 (background) to 255 (foreground), stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    /// Row-major mask values
    pub data: Vec<u8>,
    /// Mask size as `(width, height)`
    pub dimensions: (u32, u32),
}

/// Summary of a mask, thresholded at 50%
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: u64,
    pub foreground_pixels: u64,
    pub background_pixels: u64,
    /// Foreground share in `0.0..=1.0`
    pub foreground_ratio: f64,
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Render the mask as a grayscale image
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone()).ok_or_else(|| {
            BgRemovalError::processing(format!(
                "Mask data has {} values, expected {width}x{height}",
                self.data.len()
            ))
        })
    }

    /// Cut out `image` using the mask as alpha
    ///
    /// Kept pixels retain their color with alpha set to the mask value. Pixels
    /// whose mask value is zero become fully transparent black.
    ///
    /// # Errors
    /// - Image and mask dimensions differ
    pub fn apply_to_image(&self, image: &DynamicImage) -> Result<RgbaImage> {
        let rgba_image = image.to_rgba8();
        if rgba_image.dimensions() != self.dimensions {
            return Err(BgRemovalError::processing(format!(
                "Mask is {}x{} but image is {}x{}",
                self.dimensions.0,
                self.dimensions.1,
                rgba_image.width(),
                rgba_image.height()
            )));
        }

        let width = self.dimensions.0;
        let mut result = RgbaImage::new(rgba_image.width(), rgba_image.height());
        for (x, y, pixel) in rgba_image.enumerate_pixels() {
            let pixel_index = (y as usize) * (width as usize) + (x as usize);
            let alpha = self.data.get(pixel_index).copied().unwrap_or(0);

            let out = if alpha > 0 {
                image::Rgba([pixel[0], pixel[1], pixel[2], alpha])
            } else {
                image::Rgba([0, 0, 0, 0])
            };
            result.put_pixel(x, y, out);
        }

        Ok(result)
    }

    /// Resize the mask with bilinear filtering
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if (width, height) == self.dimensions {
            return Ok(self.clone());
        }

        let resized = image::imageops::resize(
            &self.to_image()?,
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        Ok(Self::new(resized.into_raw(), (width, height)))
    }

    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len() as u64;
        let foreground_pixels = self.data.iter().filter(|&&value| value > 127).count() as u64;
        let foreground_ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f64 / total_pixels as f64
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels: total_pixels - foreground_pixels,
            foreground_ratio,
        }
    }

    /// Encode the mask as a grayscale PNG
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    /// - PNG encoding failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        encode_png(&DynamicImage::ImageLuma8(self.to_image()?))
    }
}

/// Wall-clock time spent in each pipeline stage, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub decode_ms: u64,
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    pub postprocessing_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

/// Cut-out image together with the mask that produced it
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// RGBA image with the background made transparent
    pub image: RgbaImage,
    pub mask: SegmentationMask,
    /// Input size as `(width, height)`
    pub original_dimensions: (u32, u32),
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    #[must_use]
    pub fn new(
        image: RgbaImage,
        mask: SegmentationMask,
        original_dimensions: (u32, u32),
        timings: ProcessingTimings,
    ) -> Self {
        Self {
            image,
            mask,
            original_dimensions,
            timings,
        }
    }

    /// Encode the cut-out as RGBA PNG
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        encode_png(&DynamicImage::ImageRgba8(self.image.clone()))
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| BgRemovalError::processing(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer.into_inner())
}
