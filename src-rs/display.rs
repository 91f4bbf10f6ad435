use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use tracing::debug;

pub const STATUS_HINT: &str =
    "Press 'N' to show the next frame, 'R' to clear annotations, 'Q' to exit";
pub const STATUS_FINISHED: &str = "Video Finished!";

const STATUS_BAR_HEIGHT: u32 = 20;
const STATUS_BAR_COLOR: Rgb<u8> = Rgb([32, 32, 32]);
const STATUS_TEXT_COLOR: Rgb<u8> = Rgb([230, 230, 230]);

/// Where rendered frames end up. Images arrive in RGB order.
pub trait DisplaySurface {
    fn present(&mut self, frame: &RgbImage) -> Result<()>;
    fn set_status(&mut self, text: &str) -> Result<()>;
}

/// Rewrites a PNG on every present: the frame with a status bar underneath.
pub struct PngSurface {
    path: PathBuf,
    status: String,
    last_frame: Option<RgbImage>,
}

impl PngSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: STATUS_HINT.to_string(),
            last_frame: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<()> {
        let Some(frame) = self.last_frame.as_ref() else {
            return Ok(());
        };
        let composed = compose_with_status(frame, &self.status);
        ensure_parent_dir(&self.path)?;
        composed
            .save(&self.path)
            .with_context(|| format!("failed to save display image: {}", self.path.display()))?;
        debug!("presented {}x{} to {}", frame.width(), frame.height(), self.path.display());
        Ok(())
    }
}

impl DisplaySurface for PngSurface {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        self.last_frame = Some(frame.clone());
        self.write()
    }

    fn set_status(&mut self, text: &str) -> Result<()> {
        if self.status == text {
            return Ok(());
        }
        self.status = text.to_string();
        self.write()
    }
}

fn compose_with_status(frame: &RgbImage, status: &str) -> RgbImage {
    let text_width = status.chars().count() as u32 * 8 + 8;
    let width = frame.width().max(text_width);
    let height = frame.height() + STATUS_BAR_HEIGHT;
    let mut out = RgbImage::from_pixel(width, height, STATUS_BAR_COLOR);
    image::imageops::replace(&mut out, frame, 0, 0);
    let text_y = frame.height() as i32 + (STATUS_BAR_HEIGHT as i32 - 8) / 2;
    draw_bitmap_text(&mut out, 4, text_y, status, STATUS_TEXT_COLOR);
    out
}

fn draw_bitmap_text(img: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let tx = cursor_x + col_idx;
                let ty = y + row_idx as i32;
                if tx >= 0 && ty >= 0 && tx < img.width() as i32 && ty < img.height() as i32 {
                    img.put_pixel(tx as u32, ty as u32, color);
                }
            }
        }
        cursor_x += 8;
    }
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}
