use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};

use crate::geometry::ScaleRatio;
use crate::video::VideoError;

/// Three-channel pixel buffer in decoder (BGR) order.
///
/// The `Rgb` pixel type is only used as a generic 3-byte container here; the
/// bytes are swapped to display order by [`Frame::into_display`].
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: ImageBuffer<Rgb<u8>, Vec<u8>>,
}

impl Frame {
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Result<Self, VideoError> {
        let len = data.len();
        if width == 0 || height == 0 || len != width as usize * height as usize * 3 {
            return Err(VideoError::MalformedFrame { width, height, len });
        }
        let pixels = ImageBuffer::from_raw(width, height, data)
            .ok_or(VideoError::MalformedFrame { width, height, len })?;
        Ok(Self { pixels })
    }

    /// Builds a frame from an image decoded in RGB order.
    pub fn from_rgb(mut image: RgbImage) -> Result<Self, VideoError> {
        swap_red_blue(&mut image);
        let (width, height) = image.dimensions();
        Self::from_bgr(width, height, image.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[cfg(test)]
    pub(crate) fn pixels(&self) -> &ImageBuffer<Rgb<u8>, Vec<u8>> {
        &self.pixels
    }

    /// Resizes to `target_height`, keeping aspect. Returns the new frame and
    /// the ratio that produced it.
    pub fn resize_to_height(&self, target_height: u32) -> (Frame, ScaleRatio) {
        let ratio = ScaleRatio::for_heights(target_height, self.height());
        let (w, h) = ratio.scaled_size(self.width(), self.height());
        let resized = if (w, h) == self.pixels.dimensions() {
            self.pixels.clone()
        } else {
            imageops::resize(&self.pixels, w.max(1), h.max(1), FilterType::Triangle)
        };
        (Frame { pixels: resized }, ratio)
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut ImageBuffer<Rgb<u8>, Vec<u8>> {
        &mut self.pixels
    }

    /// Converts to display (RGB) order.
    pub fn into_display(self) -> RgbImage {
        let mut pixels = self.pixels;
        swap_red_blue(&mut pixels);
        pixels
    }
}

fn swap_red_blue(pixels: &mut ImageBuffer<Rgb<u8>, Vec<u8>>) {
    for px in pixels.pixels_mut() {
        px.0.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_geometry() {
        assert!(matches!(
            Frame::from_bgr(0, 10, Vec::new()),
            Err(VideoError::MalformedFrame { width: 0, .. })
        ));
        assert!(matches!(
            Frame::from_bgr(4, 4, vec![0; 10]),
            Err(VideoError::MalformedFrame { len: 10, .. })
        ));
    }

    #[test]
    fn display_copy_swaps_channel_order() {
        let frame = Frame::from_bgr(1, 1, vec![10, 20, 30]).unwrap();
        assert_eq!(frame.clone().into_display().get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(frame.pixels().as_raw(), &[10, 20, 30]);
    }

    #[test]
    fn display_copy_keeps_every_pixel_of_a_non_square_frame() {
        let data: Vec<u8> = (0..3 * 2 * 3).map(|v| v as u8 + 1).collect();
        let out = Frame::from_bgr(3, 2, data).unwrap().into_display();
        assert_eq!(out.dimensions(), (3, 2));
        assert_eq!(out.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(out.get_pixel(2, 1).0, [18, 17, 16]);
        assert!(out.pixels().all(|p| p.0 != [0, 0, 0]));
    }

    #[test]
    fn from_rgb_stores_bgr() {
        let img = RgbImage::from_pixel(2, 1, Rgb([1, 2, 3]));
        let frame = Frame::from_rgb(img).unwrap();
        assert_eq!(frame.pixels().as_raw(), &[3, 2, 1, 3, 2, 1]);
    }

    #[test]
    fn resize_hits_target_height() {
        let frame = Frame::from_bgr(200, 100, vec![128; 200 * 100 * 3]).unwrap();
        let (resized, ratio) = frame.resize_to_height(900);
        assert_eq!(ratio.value(), 9.0);
        assert_eq!((resized.width(), resized.height()), (1800, 900));
        assert_eq!(resized.pixels().as_raw()[0], 128);
    }
}
