use image::{Rgb, RgbImage};

use crate::error::DecodeError;

/// Pack 8-bit red, green and blue channels into a single pixel value.
///
/// The top 8 bits are left at zero; they are ignored by every consumer.
pub const fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Split a packed pixel value into its red, green and blue channels.
pub const fn unpack_rgb(pixel: u32) -> (u8, u8, u8) {
    ((pixel >> 16) as u8, (pixel >> 8) as u8, pixel as u8)
}

/// A full copy of a drawing canvas: `width * height` packed pixels in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterSnapshot {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl RasterSnapshot {
    /// Build a snapshot, rejecting pixel buffers that do not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u32>) -> Result<Self, DecodeError> {
        match pixel_count(width, height) {
            Some(expected) if expected == pixels.len() => Ok(Self {
                width,
                height,
                pixels,
            }),
            _ => Err(DecodeError::SizeMismatch {
                width,
                height,
                pixels: pixels.len(),
            }),
        }
    }

    /// A canvas of the given size painted a single color.
    pub fn filled(width: u32, height: u32, color: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        self.index(x, y).map(|idx| self.pixels[idx])
    }

    /// Convert into an RGB image buffer, dropping the unused top byte.
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let (r, g, b) = unpack_rgb(self.pixels[(y as usize) * (self.width as usize) + x as usize]);
            Rgb([r, g, b])
        })
    }

    pub fn from_rgb_image(image: &RgbImage) -> Self {
        let pixels = image
            .pixels()
            .map(|Rgb([r, g, b])| pack_rgb(*r, *g, *b))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels,
        }
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x < self.width && y < self.height {
            Some((y as usize) * (self.width as usize) + x as usize)
        } else {
            None
        }
    }
}

/// Number of pixels a `width x height` canvas holds, or `None` on overflow.
pub fn pixel_count(width: u32, height: u32) -> Option<usize> {
    (width as usize).checked_mul(height as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_pixel_count() {
        let err = RasterSnapshot::new(2, 2, vec![0; 3]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::SizeMismatch {
                width: 2,
                height: 2,
                pixels: 3
            }
        );
    }

    #[test]
    fn pixels_are_row_major() {
        let snapshot = RasterSnapshot::new(3, 2, vec![0, 1, 2, 10, 11, 12]).unwrap();
        assert_eq!(snapshot.pixel(0, 0), Some(0));
        assert_eq!(snapshot.pixel(2, 0), Some(2));
        assert_eq!(snapshot.pixel(0, 1), Some(10));
        assert_eq!(snapshot.pixel(2, 1), Some(12));
        assert_eq!(snapshot.pixel(3, 0), None);
        assert_eq!(snapshot.pixel(0, 2), None);
    }

    #[test]
    fn pack_ignores_alpha_byte() {
        let packed = pack_rgb(0x12, 0x34, 0x56);
        assert_eq!(packed, 0x0012_3456);
        assert_eq!(unpack_rgb(packed | 0xff00_0000), (0x12, 0x34, 0x56));
    }

    #[test]
    fn rgb_image_conversion_keeps_layout() {
        let snapshot = RasterSnapshot::new(
            2,
            1,
            vec![pack_rgb(255, 0, 0), pack_rgb(0, 0, 255)],
        )
        .unwrap();
        let image = snapshot.to_rgb_image();
        assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(image.get_pixel(1, 0), &Rgb([0, 0, 255]));
        assert_eq!(RasterSnapshot::from_rgb_image(&image), snapshot);
    }
}
