//! Wallpaper renderer: gradient background with a centred task card.

use super::glyphs::{self, ADVANCE, GLYPH_HEIGHT};
use super::{GatewayError, GatewayResult, RenderedImage, Resolution, WallpaperRenderer};
use async_trait::async_trait;
use image::{ImageEncoder, Rgb, RgbImage};

const HEADING: &str = "TODAY'S FOCUS";
const IDLE_HEADING: &str = "ALL CLEAR";
const IDLE_BODY: &str = "NOTHING URGENT RIGHT NOW";

const TOP: [u8; 3] = [24, 32, 56];
const BOTTOM: [u8; 3] = [58, 44, 82];
const CARD: [u8; 3] = [12, 14, 24];
const ACCENT: [u8; 3] = [120, 170, 255];
const HEADING_INK: [u8; 3] = [236, 239, 246];
const TASK_INK: [u8; 3] = [206, 212, 226];

/// Draws task wallpapers with the built-in bitmap font.
#[derive(Debug, Clone)]
pub struct ImageRenderer {
    /// Largest accepted width or height.
    max_dimension: u32,
}

impl Default for ImageRenderer {
    fn default() -> Self {
        Self {
            max_dimension: 8192,
        }
    }
}

impl ImageRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WallpaperRenderer for ImageRenderer {
    async fn render(
        &self,
        tasks: &[String],
        resolution: Resolution,
    ) -> GatewayResult<RenderedImage> {
        if resolution.is_empty() {
            return Err(GatewayError::render(format!(
                "cannot render at {resolution}"
            )));
        }
        if resolution.width > self.max_dimension || resolution.height > self.max_dimension {
            return Err(GatewayError::render(format!(
                "resolution {resolution} exceeds {0}x{0}",
                self.max_dimension
            )));
        }

        let tasks = tasks.to_vec();
        let png = tokio::task::spawn_blocking(move || {
            let canvas = draw(&tasks, resolution);
            encode_png(&canvas)
        })
        .await
        .map_err(|e| GatewayError::render(format!("render task failed: {e}")))??;

        Ok(RenderedImage { png, resolution })
    }
}

fn draw(tasks: &[String], resolution: Resolution) -> RgbImage {
    let Resolution { width, height } = resolution;
    let mut canvas = RgbImage::from_fn(width, height, |_, y| {
        Rgb(lerp(TOP, BOTTOM, y, height.saturating_sub(1).max(1)))
    });

    let scale = (height / 270).max(1);
    let heading_scale = scale * 2;
    let padding = 12 * scale;
    let line_height = (GLYPH_HEIGHT + 5) * scale;
    let heading_height = GLYPH_HEIGHT * heading_scale;

    let (heading, lines): (&str, Vec<&str>) = if tasks.is_empty() {
        (IDLE_HEADING, vec![IDLE_BODY])
    } else {
        (HEADING, tasks.iter().map(String::as_str).collect())
    };

    let card_width = (width * 3 / 5).max(width.min(padding * 2 + ADVANCE * scale * 8));
    let card_height = padding * 2 + heading_height + 3 * scale + line_height * lines.len() as u32;
    let card_x = (width.saturating_sub(card_width)) / 2;
    let card_y = (height.saturating_sub(card_height)) / 2;

    fill_rect(&mut canvas, card_x, card_y, card_width, card_height, CARD, 160);
    fill_rect(&mut canvas, card_x, card_y, (2 * scale).max(1), card_height, ACCENT, 255);

    let text_x = card_x + padding;
    let usable = card_width.saturating_sub(padding * 2);

    let heading_fit = fit(heading, usable / (ADVANCE * heading_scale));
    draw_text(&mut canvas, &heading_fit, text_x, card_y + padding, heading_scale, HEADING_INK);

    let max_chars = usable / (ADVANCE * scale);
    let mut y = card_y + padding + heading_height + 3 * scale + line_height - GLYPH_HEIGHT * scale;
    for line in lines {
        draw_text(&mut canvas, &fit(line, max_chars), text_x, y, scale, TASK_INK);
        y += line_height;
    }
    canvas
}

/// Shorten `text` to `max_chars`, ending in `...` when cut.
fn fit(text: &str, max_chars: u32) -> String {
    let max_chars = max_chars.max(4) as usize;
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(max_chars - 3).collect();
    cut.push_str("...");
    cut
}

fn lerp(from: [u8; 3], to: [u8; 3], step: u32, steps: u32) -> [u8; 3] {
    let t = step.min(steps) as f32 / steps as f32;
    let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;
    [mix(from[0], to[0]), mix(from[1], to[1]), mix(from[2], to[2])]
}

/// Blend `color` over the rectangle with the given alpha (0..=255).
fn fill_rect(canvas: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: [u8; 3], alpha: u8) {
    let x_end = x.saturating_add(w).min(canvas.width());
    let y_end = y.saturating_add(h).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            let pixel = canvas.get_pixel_mut(px, py);
            pixel.0 = blend(pixel.0, color, alpha);
        }
    }
}

fn blend(under: [u8; 3], over: [u8; 3], alpha: u8) -> [u8; 3] {
    let a = u32::from(alpha);
    let mix = |u: u8, o: u8| ((u32::from(o) * a + u32::from(u) * (255 - a)) / 255) as u8;
    [mix(under[0], over[0]), mix(under[1], over[1]), mix(under[2], over[2])]
}

fn draw_text(canvas: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, ink: [u8; 3]) {
    let (w, h) = canvas.dimensions();
    glyphs::for_each_pixel(text, scale, |dx, dy| {
        let (px, py) = (x + dx, y + dy);
        if px < w && py < h {
            canvas.put_pixel(px, py, Rgb(ink));
        }
    });
}

fn encode_png(canvas: &RgbImage) -> GatewayResult<Vec<u8>> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| GatewayError::render(format!("PNG encode: {e}")))?;
    Ok(buf)
}
