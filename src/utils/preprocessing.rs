//! Image preprocessing for model inference
//!
//! Images are letterboxed into the model's input: converted to RGB, resized
//! with the aspect ratio preserved, centered on a padded canvas and
//! normalized into an NCHW tensor.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Configuration for preprocessing behavior
#[derive(Debug, Clone)]
pub struct PreprocessingOptions {
    /// Padding color for aspect ratio preservation (RGB)
    pub padding_color: [u8; 3],
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            padding_color: [255, 255, 255],
        }
    }
}

/// Placement of an original image inside the model input canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Original image size as `(width, height)`
    pub original: (u32, u32),
    /// Model canvas size as `(width, height)`
    pub canvas: (u32, u32),
    /// Resized image size as `(width, height)`
    pub scaled: (u32, u32),
    /// Uniform scale from original to canvas coordinates
    pub scale: f32,
    /// Top-left corner of the resized image on the canvas
    pub offset: (u32, u32),
}

impl Letterbox {
    /// Compute the placement of a `width` x `height` image on a `target_size` (`[height, width]`) canvas
    ///
    /// # Errors
    /// - Zero-sized image or canvas
    pub fn new(original: (u32, u32), target_size: [u32; 2]) -> Result<Self> {
        let (orig_width, orig_height) = original;
        let [canvas_height, canvas_width] = target_size;

        if orig_width == 0 || orig_height == 0 {
            return Err(BgRemovalError::processing(format!(
                "Image has zero size: {orig_width}x{orig_height}"
            )));
        }
        if canvas_width == 0 || canvas_height == 0 {
            return Err(BgRemovalError::processing(format!(
                "Model input has zero size: {canvas_width}x{canvas_height}"
            )));
        }

        let scale = (canvas_width as f32 / orig_width as f32)
            .min(canvas_height as f32 / orig_height as f32);

        let scaled_width = ((orig_width as f32 * scale).round() as u32).clamp(1, canvas_width);
        let scaled_height = ((orig_height as f32 * scale).round() as u32).clamp(1, canvas_height);

        Ok(Self {
            original,
            canvas: (canvas_width, canvas_height),
            scaled: (scaled_width, scaled_height),
            scale,
            offset: (
                (canvas_width - scaled_width) / 2,
                (canvas_height - scaled_height) / 2,
            ),
        })
    }

    /// Map an original pixel to the canvas pixel covering its center
    ///
    /// Every pixel of the original image lands on the resized region, never on
    /// the padding. Returns `None` for coordinates outside the original image.
    #[must_use]
    pub fn to_canvas(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        let (orig_width, orig_height) = self.original;
        if x >= orig_width || y >= orig_height {
            return None;
        }

        let (scaled_width, scaled_height) = self.scaled;
        let scaled_x = Self::sample_center(x, orig_width, scaled_width);
        let scaled_y = Self::sample_center(y, orig_height, scaled_height);
        Some((scaled_x + self.offset.0, scaled_y + self.offset.1))
    }

    fn sample_center(position: u32, original: u32, scaled: u32) -> u32 {
        let ratio = scaled as f32 / original as f32;
        (((position as f32 + 0.5) * ratio).floor() as u32).min(scaled - 1)
    }
}

/// Shared image preprocessing utilities
#[derive(Debug)]
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox and normalize `image` into a `(1, 3, H, W)` tensor
    ///
    /// # Errors
    /// - Zero-sized image or model input
    pub fn preprocess_image(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
        options: &PreprocessingOptions,
    ) -> Result<(Letterbox, Array4<f32>)> {
        let rgb_image = image.to_rgb8();
        let letterbox = Letterbox::new(rgb_image.dimensions(), preprocessing_config.target_size)?;

        let resized = image::imageops::resize(
            &rgb_image,
            letterbox.scaled.0,
            letterbox.scaled.1,
            image::imageops::FilterType::Triangle,
        );

        let (canvas_width, canvas_height) = letterbox.canvas;
        let mut canvas: RgbImage = ImageBuffer::from_pixel(
            canvas_width,
            canvas_height,
            image::Rgb(options.padding_color),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset.0),
            i64::from(letterbox.offset.1),
        );

        let tensor = Self::canvas_to_tensor(&canvas, preprocessing_config);
        Ok((letterbox, tensor))
    }

    /// Preprocess with the default white padding
    ///
    /// # Errors
    /// - Zero-sized image or model input
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(Letterbox, Array4<f32>)> {
        Self::preprocess_image(image, preprocessing_config, &PreprocessingOptions::default())
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mean = config.normalization_mean;
        let std = config.normalization_std;

        Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| {
                let pixel = canvas.get_pixel(x as u32, y as u32);
                let value = pixel.0.get(channel).copied().unwrap_or(0);
                let mean = mean.get(channel).copied().unwrap_or(0.0);
                let std = std.get(channel).copied().unwrap_or(1.0);
                (f32::from(value) / 255.0 - mean) / std
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn test_config(target_size: [u32; 2]) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [0.5, 0.5, 0.5],
        }
    }

    fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_letterbox_wide_image() {
        let letterbox = Letterbox::new((200, 100), [64, 64]).unwrap();
        assert_eq!(letterbox.scaled, (64, 32));
        assert_eq!(letterbox.offset, (0, 16));
        assert!((letterbox.scale - 0.32).abs() < 1e-6);

        assert_eq!(letterbox.to_canvas(0, 0), Some((0, 16)));
        assert_eq!(letterbox.to_canvas(100, 50), Some((32, 32)));
        assert_eq!(letterbox.to_canvas(200, 0), None);
    }

    #[test]
    fn test_letterbox_edges_stay_on_image() {
        let letterbox = Letterbox::new((200, 100), [64, 64]).unwrap();
        assert_eq!(letterbox.to_canvas(199, 99), Some((63, 47)));

        // 4000x3000 photo on a 1024 canvas: rows 128..896 hold the image
        let letterbox = Letterbox::new((4000, 3000), [1024, 1024]).unwrap();
        assert_eq!(letterbox.scaled, (1024, 768));
        for (x, y) in [(0, 0), (3999, 0), (0, 2999), (3999, 2999)] {
            let (cx, cy) = letterbox.to_canvas(x, y).unwrap();
            assert!(cx < 1024, "x={x}");
            assert!((128..896).contains(&cy), "y={y} -> {cy}");
        }

        // Upscaled images map each pixel onto its own block
        let letterbox = Letterbox::new((10, 20), [40, 40]).unwrap();
        assert_eq!(letterbox.to_canvas(0, 0), Some((11, 1)));
        assert_eq!(letterbox.to_canvas(9, 19), Some((29, 39)));
    }

    #[test]
    fn test_letterbox_upscales_small_images() {
        let letterbox = Letterbox::new((10, 20), [40, 40]).unwrap();
        assert_eq!(letterbox.scaled, (20, 40));
        assert_eq!(letterbox.offset, (10, 0));
    }

    #[test]
    fn test_letterbox_rejects_zero_sizes() {
        assert!(Letterbox::new((0, 10), [32, 32]).is_err());
        assert!(Letterbox::new((10, 10), [0, 32]).is_err());
    }

    #[test]
    fn test_preprocess_tensor_shape_and_padding() {
        let image = solid_image(100, 50, [0, 0, 0]);
        let (letterbox, tensor) =
            ImagePreprocessor::preprocess_for_inference(&image, &test_config([32, 48])).unwrap();

        assert_eq!(tensor.dim(), (1, 3, 32, 48));
        assert_eq!(letterbox.scaled, (48, 24));
        assert_eq!(letterbox.offset, (0, 4));

        // White padding normalizes to (1.0 - 0.5) / 0.5 and black content to -1.0
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 16, 24]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_custom_padding() {
        let image = solid_image(10, 40, [255, 0, 0]);
        let options = PreprocessingOptions {
            padding_color: [0, 255, 0],
        };
        let (_, tensor) =
            ImagePreprocessor::preprocess_image(&image, &test_config([40, 40]), &options).unwrap();

        // Left padding column is green
        assert!((tensor[[0, 0, 20, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 20, 0]] - 1.0).abs() < 1e-6);
        // Center is red
        assert!((tensor[[0, 0, 20, 20]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 20, 20]] + 1.0).abs() < 1e-6);
    }
}
