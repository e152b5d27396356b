//! Decoded RGB frame and the bilinear sampling shared by the model preprocessors.

use image::DynamicImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has zero size")]
    Empty,
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A decoded image as packed 8-bit RGB.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl Frame {
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn from_image(img: &DynamicImage) -> Result<Self, FrameError> {
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::from_rgb(rgb.into_raw(), width, height)
    }

    /// Decode an encoded image (JPEG, PNG, WebP, ...) from memory.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes)?;
        Self::from_image(&img)
    }

    /// Bilinear sample of channel `c` at sub-pixel position (x, y).
    ///
    /// Out-of-bounds neighbours contribute 0 (black).
    pub fn sample(&self, x: f32, y: f32, c: usize) -> f32 {
        let x0 = x.floor() as i32;
        let y0 = y.floor() as i32;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let px = |x: i32, y: i32| -> f32 {
            if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
                self.data[(y as usize * self.width as usize + x as usize) * 3 + c] as f32
            } else {
                0.0
            }
        };

        px(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + px(x0 + 1, y0) * fx * (1.0 - fy)
            + px(x0, y0 + 1) * (1.0 - fx) * fy
            + px(x0 + 1, y0 + 1) * fx * fy
    }
}

/// Resize packed RGB with bilinear interpolation and edge clamping.
pub fn resize_bilinear(frame: &Frame, new_w: usize, new_h: usize) -> Vec<u8> {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    let mut resized = vec![0u8; new_w * new_h * 3];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = frame.data[(y0 * width + x0) * 3 + c] as f32;
                let tr = frame.data[(y0 * width + x1) * 3 + c] as f32;
                let bl = frame.data[(y1 * width + x0) * 3 + c] as f32;
                let br = frame.data[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                resized[(y * new_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    resized
}
