//! Annotated keogram rendering.
//!
//! The raster is copied into a white canvas with margins, and the axes, tick
//! labels and title are drawn as an SVG overlay rasterized with resvg and
//! alpha-blended on top. Text needs a system font; without one the labels are
//! silently omitted while ticks and frame are still drawn.

use crate::catalog::MINUTES_PER_DAY;
use crate::prelude::{StageError, StageResult};
use image::{Rgb, RgbImage};
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{self, fontdb};
use std::fmt::Write as _;
use std::sync::Arc;

const MARGIN_LEFT: u32 = 120;
const MARGIN_RIGHT: u32 = 30;
const MARGIN_TOP: u32 = 60;
const MARGIN_BOTTOM: u32 = 70;

const ZENITH_TICKS: [(f32, &str); 7] = [
    (-90.0, "South"),
    (-60.0, "60° S"),
    (-30.0, "30° S"),
    (0.0, "Zenith"),
    (30.0, "30° N"),
    (60.0, "60° N"),
    (90.0, "90° N"),
];

pub struct KeogramRenderer {
    fonts: Arc<fontdb::Database>,
}

impl KeogramRenderer {
    pub fn new() -> Self {
        let mut fonts = fontdb::Database::new();
        fonts.load_system_fonts();
        Self {
            fonts: Arc::new(fonts),
        }
    }

    /// Canvas size for a raster of the given dimensions.
    pub fn canvas_size(raster_width: u32, raster_height: u32) -> (u32, u32) {
        (
            MARGIN_LEFT + raster_width + MARGIN_RIGHT,
            MARGIN_TOP + raster_height + MARGIN_BOTTOM,
        )
    }

    /// Where raster pixel `(x, y)` lands on the canvas. Row 0 of the raster is
    /// the southern horizon and is drawn at the bottom of the plot.
    pub fn canvas_position(raster_height: u32, x: u32, y: u32) -> (u32, u32) {
        (MARGIN_LEFT + x, MARGIN_TOP + raster_height - 1 - y)
    }

    pub fn render(&self, raster: &RgbImage, title: &str) -> StageResult<RgbImage> {
        let (width, height) = raster.dimensions();
        let (canvas_width, canvas_height) = Self::canvas_size(width, height);
        let mut canvas = RgbImage::from_pixel(canvas_width, canvas_height, Rgb([255, 255, 255]));
        for (x, y, pixel) in raster.enumerate_pixels() {
            let (cx, cy) = Self::canvas_position(height, x, y);
            canvas.put_pixel(cx, cy, *pixel);
        }

        let svg = axes_svg(width, height, title);
        let mut options = usvg::Options::default();
        options.fontdb = Arc::clone(&self.fonts);
        let tree = usvg::Tree::from_str(&svg, &options)
            .map_err(|e| StageError::Render(format!("axis overlay: {e}")))?;
        let mut pixmap = Pixmap::new(canvas_width, canvas_height)
            .ok_or_else(|| StageError::Render("zero-sized canvas".into()))?;
        resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());

        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            if let Some(overlay) = pixmap.pixel(x, y) {
                let overlay = overlay.demultiply();
                if overlay.alpha() > 0 {
                    *pixel = Rgb([
                        blend_channel(pixel[0], overlay.red(), overlay.alpha()),
                        blend_channel(pixel[1], overlay.green(), overlay.alpha()),
                        blend_channel(pixel[2], overlay.blue(), overlay.alpha()),
                    ]);
                }
            }
        }
        Ok(canvas)
    }
}

impl Default for KeogramRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn blend_channel(base: u8, overlay: u8, alpha: u8) -> u8 {
    let alpha = alpha as f32 / 255.0;
    (base as f32 * (1.0 - alpha) + overlay as f32 * alpha).round() as u8
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn axes_svg(width: u32, height: u32, title: &str) -> String {
    let (canvas_width, canvas_height) = KeogramRenderer::canvas_size(width, height);
    let left = MARGIN_LEFT as f32;
    let top = MARGIN_TOP as f32;
    let right = left + width as f32;
    let bottom = top + height as f32;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{canvas_width}" height="{canvas_height}">"#
    );
    let _ = write!(
        svg,
        r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="black" stroke-width="1"/>"#,
        left - 0.5,
        top - 0.5,
        width + 1,
        height + 1
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" font-family="sans-serif" font-size="20" text-anchor="middle">{}</text>"#,
        canvas_width as f32 / 2.0,
        top - 20.0,
        escape(title)
    );

    let per_minute = width as f32 / MINUTES_PER_DAY as f32;
    for hour in 0..24 {
        let x = left + (hour * 60) as f32 * per_minute;
        let _ = write!(
            svg,
            r#"<line x1="{x}" y1="{bottom}" x2="{x}" y2="{}" stroke="black" stroke-width="1"/>"#,
            bottom + 6.0
        );
        let _ = write!(
            svg,
            r#"<text x="{x}" y="{}" font-family="sans-serif" font-size="11" text-anchor="middle">{hour}:00</text>"#,
            bottom + 20.0
        );
    }
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" font-family="sans-serif" font-size="14" text-anchor="middle">Time (UT)</text>"#,
        (left + right) / 2.0,
        bottom + 50.0
    );

    for (angle, label) in ZENITH_TICKS {
        let y = bottom - (angle + 90.0) / 180.0 * height as f32;
        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{y}" x2="{left}" y2="{y}" stroke="black" stroke-width="1"/>"#,
            left - 6.0
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-family="sans-serif" font-size="11" text-anchor="end">{}</text>"#,
            left - 10.0,
            y + 4.0,
            escape(label)
        );
    }
    let label_x = 24.0;
    let label_y = (top + bottom) / 2.0;
    let _ = write!(
        svg,
        r#"<text x="{label_x}" y="{label_y}" font-family="sans-serif" font-size="14" text-anchor="middle" transform="rotate(-90 {label_x} {label_y})">Zenith angle (degrees)</text>"#
    );

    svg.push_str("</svg>");
    svg
}
