//! Luma conversion and fixed-size pixel grids.
//!
//! Color images are reduced to a single channel with integer ITU-R BT.601
//! weights so the result does not depend on floating-point rounding:
//!
//! ```text
//! Y = (299 * R + 587 * G + 114 * B + 500) / 1000
//! ```
//!
//! Alpha is ignored. Grayscale inputs pass through unchanged.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

/// Filter used for every downscale to a working resolution.
pub const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

/// Convert one RGB sample to luma with the fixed BT.601 integer weights.
#[inline]
pub fn luma_from_rgb(rgb: [u8; 3]) -> u8 {
    let [r, g, b] = rgb.map(u32::from);
    // max is (255 * 1000 + 500) / 1000 = 255
    ((299 * r + 587 * g + 114 * b + 500) / 1000) as u8
}

/// Reduce a decoded image to a full-resolution luma plane.
pub fn to_luma(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }

    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        Luma([luma_from_rgb(rgb.get_pixel(x, y).0)])
    })
}

/// A small row-major grid of luma samples, the input of every hash algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelGrid {
    /// Wrap row-major samples. Returns `None` if the length does not match.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Build a grid by evaluating `f(x, y)` for every cell.
    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> u8,
    {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Downscale a luma plane to exactly `width` × `height`.
    pub fn resample(luma: &GrayImage, width: u32, height: u32) -> Self {
        if luma.dimensions() == (width, height) {
            return Self {
                width,
                height,
                pixels: luma.as_raw().clone(),
            };
        }

        let resized = imageops::resize(luma, width, height, RESAMPLE_FILTER);
        Self {
            width,
            height,
            pixels: resized.into_raw(),
        }
    }

    /// This grid if it already has the given size, otherwise a resampled copy.
    pub fn normalized(&self, width: u32, height: u32) -> Cow<'_, PixelGrid> {
        if self.width == width && self.height == height {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(Self::resample(&self.to_image(), width, height))
        }
    }

    /// Copy the samples into an image buffer.
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| Luma([self.get(x, y)]))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major samples.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Sample at column `x`, row `y`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the grid.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    /// Iterate over rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        // chunks_exact panics on a zero chunk size
        self.pixels.chunks_exact(self.width.max(1) as usize)
    }
}
