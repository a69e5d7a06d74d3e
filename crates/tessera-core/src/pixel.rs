//! RGB pixel buffers returned by region reads.

use image::DynamicImage;

use crate::geometry::Rectangle;
use crate::metadata::Orientation;

/// A decoded region with RGB pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGB pixel data in row-major order (3 bytes per pixel).
    pub pixels: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * 3,
            "Pixel buffer size mismatch"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn from_rgb_image(img: image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.into_raw(),
        }
    }

    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }

    /// Copy out a whole-pixel region, clipped to the buffer.
    ///
    /// Returns `None` if nothing of `region` lies inside the buffer.
    pub fn crop(&self, region: &Rectangle) -> Option<PixelBuffer> {
        let left = region.int_x().min(self.width);
        let top = region.int_y().min(self.height);
        let right = (left + region.int_width()).min(self.width);
        let bottom = (top + region.int_height()).min(self.height);
        let out_width = right.saturating_sub(left);
        let out_height = bottom.saturating_sub(top);
        if out_width == 0 || out_height == 0 {
            return None;
        }

        let src_stride = self.width as usize * 3;
        let row_len = out_width as usize * 3;
        let mut output = Vec::with_capacity(row_len * out_height as usize);

        // Copy pixel data row by row
        for y in top..bottom {
            let start = y as usize * src_stride + left as usize * 3;
            output.extend_from_slice(&self.pixels[start..start + row_len]);
        }

        Some(PixelBuffer::new(out_width, out_height, output))
    }

    /// Apply an EXIF orientation, returning an upright image.
    pub fn oriented(&self, orientation: Orientation) -> Option<PixelBuffer> {
        if orientation == Orientation::Normal {
            return Some(self.clone());
        }
        let img = DynamicImage::ImageRgb8(self.to_rgb_image()?);
        let upright = match orientation {
            Orientation::Normal => img,
            Orientation::FlipHorizontal => img.fliph(),
            Orientation::Rotate180 => img.rotate180(),
            Orientation::FlipVertical => img.flipv(),
            Orientation::Transpose => img.rotate90().fliph(),
            Orientation::Rotate90CW => img.rotate90(),
            Orientation::Transverse => img.rotate270().fliph(),
            Orientation::Rotate270CW => img.rotate270(),
        };
        Some(PixelBuffer::from_rgb_image(upright.into_rgb8()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a test image where each pixel has a unique value based on position.
    fn test_image(width: u32, height: u32) -> PixelBuffer {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = ((y * width + x) % 256) as u8;
                pixels.push(v);
                pixels.push(v);
                pixels.push(v);
            }
        }
        PixelBuffer::new(width, height, pixels)
    }

    #[test]
    fn test_crop_interior() {
        let img = test_image(10, 10);
        let cropped = img.crop(&Rectangle::new(2.0, 3.0, 4.0, 5.0)).unwrap();
        assert_eq!((cropped.width, cropped.height), (4, 5));
        // First pixel comes from (2, 3): 3 * 10 + 2 = 32
        assert_eq!(cropped.pixels[0], 32);
        assert_eq!(cropped.pixels.len(), 4 * 5 * 3);
    }

    #[test]
    fn test_crop_clips_to_edges() {
        let img = test_image(10, 10);
        let cropped = img.crop(&Rectangle::new(8.0, 8.0, 5.0, 5.0)).unwrap();
        assert_eq!((cropped.width, cropped.height), (2, 2));
    }

    #[test]
    fn test_crop_outside() {
        let img = test_image(10, 10);
        assert!(img.crop(&Rectangle::new(10.0, 0.0, 5.0, 5.0)).is_none());
    }

    #[test]
    fn test_oriented_rotate90_swaps_dimensions() {
        let pixels = vec![
            255, 0, 0, // Red (left)
            0, 255, 0, // Green (right)
        ];
        let img = PixelBuffer::new(2, 1, pixels);
        let rotated = img.oriented(Orientation::Rotate90CW).unwrap();
        assert_eq!((rotated.width, rotated.height), (1, 2));
    }

    #[test]
    fn test_oriented_flip_horizontal() {
        let pixels = vec![255, 0, 0, 0, 255, 0];
        let img = PixelBuffer::new(2, 1, pixels);
        let flipped = img.oriented(Orientation::FlipHorizontal).unwrap();
        assert_eq!(&flipped.pixels[0..3], &[0, 255, 0]);
        assert_eq!(&flipped.pixels[3..6], &[255, 0, 0]);
    }

    #[test]
    fn test_oriented_normal_is_identity() {
        let img = test_image(3, 2);
        assert_eq!(img.oriented(Orientation::Normal).unwrap(), img);
    }
}
