use image::{ImageBuffer, Rgb, RgbImage};

use crate::annotation::{CommittedQuad, QUAD_POINTS};
use crate::frame::Frame;
use crate::geometry::Point;

type Canvas = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Overlay appearance. `color` is given in display (RGB) order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub color: [u8; 3],
    pub marker_radius: f64,
    pub line_width: f64,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            marker_radius: 3.0,
            line_width: 1.0,
        }
    }
}

/// Burns annotation overlays into a copy of a frame and hands back an image in
/// display channel order. The source frame is never touched.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    style: OverlayStyle,
}

impl Compositor {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn render(
        &self,
        original: &Frame,
        pending: &[Point],
        committed: &[CommittedQuad],
    ) -> RgbImage {
        let mut working = original.clone();
        let canvas = working.pixels_mut();
        let [r, g, b] = self.style.color;
        let color = Rgb([b, g, r]);

        for quad in committed {
            self.draw_markers(canvas, &quad.display, color);
            self.draw_closed_outline(canvas, &quad.display, color);
        }

        let pending = &pending[..pending.len().min(QUAD_POINTS)];
        self.draw_markers(canvas, pending, color);
        if pending.len() == QUAD_POINTS {
            self.draw_closed_outline(canvas, pending, color);
        }

        working.into_display()
    }

    fn draw_markers(&self, canvas: &mut Canvas, points: &[Point], color: Rgb<u8>) {
        for p in points {
            draw_disc(
                canvas,
                f64::from(p.x),
                f64::from(p.y),
                self.style.marker_radius,
                color,
            );
        }
    }

    fn draw_closed_outline(&self, canvas: &mut Canvas, points: &[Point], color: Rgb<u8>) {
        let n = points.len();
        for i in 0..n {
            let a = points[i];
            let b = points[(i + 1) % n];
            draw_line(
                canvas,
                (f64::from(a.x), f64::from(a.y)),
                (f64::from(b.x), f64::from(b.y)),
                color,
                self.style.line_width,
            );
        }
    }
}

fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

fn blend_pixel(dst: Rgb<u8>, src: Rgb<u8>, coverage: f64) -> Rgb<u8> {
    if coverage >= 1.0 {
        return src;
    }
    let inv = 1.0 - coverage;
    let mix = |d: u8, s: u8| {
        (f64::from(d) * inv + f64::from(s) * coverage)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgb([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2])])
}

fn plot(canvas: &mut Canvas, x: i32, y: i32, color: Rgb<u8>, coverage: f64) {
    if coverage <= 0.0 {
        return;
    }
    let dst = *canvas.get_pixel(x as u32, y as u32);
    canvas.put_pixel(x as u32, y as u32, blend_pixel(dst, color, coverage));
}

/// Pixel window `[min, max]` covering `lo..hi` clipped to the canvas, or
/// `None` when it falls entirely outside.
fn clip_span(lo: f64, hi: f64, size: u32) -> Option<(i32, i32)> {
    let max_index = size as i32 - 1;
    let min = lo.floor() as i32;
    let max = hi.ceil() as i32;
    if max < 0 || min > max_index {
        return None;
    }
    Some((clamp_i32(min, 0, max_index), clamp_i32(max, 0, max_index)))
}

/// Filled disc with a one pixel soft edge.
fn draw_disc(canvas: &mut Canvas, cx: f64, cy: f64, radius: f64, color: Rgb<u8>) {
    let reach = radius + 1.0;
    let Some((min_x, max_x)) = clip_span(cx - reach, cx + reach, canvas.width()) else {
        return;
    };
    let Some((min_y, max_y)) = clip_span(cy - reach, cy + reach, canvas.height()) else {
        return;
    };
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = f64::from(x) - cx;
            let dy = f64::from(y) - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            let coverage = (radius + 0.5 - dist).clamp(0.0, 1.0);
            plot(canvas, x, y, color, coverage);
        }
    }
}

fn distance_to_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 <= f64::EPSILON {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
    };
    let (qx, qy) = (a.0 + dx * t, a.1 + dy * t);
    ((p.0 - qx).powi(2) + (p.1 - qy).powi(2)).sqrt()
}

/// Anti-aliased segment: coverage falls off linearly over one pixel beyond
/// half the stroke width.
fn draw_line(canvas: &mut Canvas, a: (f64, f64), b: (f64, f64), color: Rgb<u8>, width: f64) {
    let half = width.max(1.0) / 2.0;
    let reach = half + 1.0;
    let Some((min_x, max_x)) = clip_span(a.0.min(b.0) - reach, a.0.max(b.0) + reach, canvas.width())
    else {
        return;
    };
    let Some((min_y, max_y)) =
        clip_span(a.1.min(b.1) - reach, a.1.max(b.1) + reach, canvas.height())
    else {
        return;
    };
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let d = distance_to_segment((f64::from(x), f64::from(y)), a, b);
            let coverage = (half + 0.5 - d).clamp(0.0, 1.0);
            plot(canvas, x, y, color, coverage);
        }
    }
}
