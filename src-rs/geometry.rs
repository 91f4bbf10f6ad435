use serde::Serialize;

/// Integer pixel position, either in display space (the resized frame shown
/// on screen) or source space (native decoded resolution).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

/// `target_display_height / source_frame_height`, recomputed per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRatio(f64);

impl ScaleRatio {
    pub const IDENTITY: ScaleRatio = ScaleRatio(1.0);

    /// Caller guarantees `source_height > 0`.
    pub fn for_heights(target_height: u32, source_height: u32) -> Self {
        ScaleRatio(f64::from(target_height) / f64::from(source_height))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn scaled_size(self, width: u32, height: u32) -> (u32, u32) {
        (
            (f64::from(width) * self.0) as u32,
            (f64::from(height) * self.0) as u32,
        )
    }
}

/// Maps a display-space point back to source space. Each axis is divided by
/// the ratio and truncated toward zero.
pub fn to_source(display: Point, ratio: ScaleRatio) -> Point {
    Point {
        x: (f64::from(display.x) / ratio.0).trunc() as i32,
        y: (f64::from(display.y) / ratio.0).trunc() as i32,
    }
}
