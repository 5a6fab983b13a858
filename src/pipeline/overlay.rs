use chrono::{DateTime, Local};
use image::{Rgb, RgbImage};

use crate::common::Phase;
use crate::error::OverlayError;
use crate::pipeline::font::{glyph, GLYPH_HEIGHT, GLYPH_WIDTH};

pub const OVERLAY_TIME_FORMAT: &str = "%d/%m/%Y-%H:%M:%S";

const BANNER_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
// Minimum characters that must fit on one banner line.
const MIN_COLUMNS: u32 = 8;

/// Everything drawn onto a frame.
#[derive(Debug, Clone)]
pub struct OverlayStamp {
    pub timestamp: DateTime<Local>,
    pub phase: Phase,
    pub operator: String,
}

/// Composites session information onto a frame. Implementations are pure: the
/// input is borrowed and a new image is returned.
pub trait OverlayRenderer: Send + Sync {
    fn render(&self, stamp: &OverlayStamp, image: &RgbImage) -> Result<RgbImage, OverlayError>;
}

/// Black banner across the top with the time, the phase in its color, and the
/// operator name, followed by a thin phase-colored strip.
#[derive(Debug, Clone, Default)]
pub struct BannerOverlay {
    // Pixel scale of the glyphs; derived from the frame width when unset.
    scale: Option<u32>,
}

struct Layout {
    scale: u32,
    pad: u32,
    advance: u32,
    line_height: u32,
    banner_height: u32,
    strip_height: u32,
}

impl BannerOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scale(scale: u32) -> Self {
        Self {
            scale: Some(scale.max(1)),
        }
    }

    fn layout(&self, width: u32) -> Layout {
        let scale = self.scale.unwrap_or_else(|| (width / 320).max(1));
        let pad = 2 * scale;
        let line_height = (GLYPH_HEIGHT + 2) * scale;
        Layout {
            scale,
            pad,
            advance: (GLYPH_WIDTH + 1) * scale,
            line_height,
            banner_height: 2 * pad + 2 * line_height,
            strip_height: 2 * scale,
        }
    }
}

impl OverlayRenderer for BannerOverlay {
    fn render(&self, stamp: &OverlayStamp, image: &RgbImage) -> Result<RgbImage, OverlayError> {
        let (width, height) = image.dimensions();
        let layout = self.layout(width);
        if width < layout.pad + MIN_COLUMNS * layout.advance
            || height < layout.banner_height + layout.strip_height
        {
            return Err(OverlayError::FrameTooSmall { width, height });
        }

        let mut output = image.clone();
        let phase_color = Rgb(stamp.phase.color());
        fill_rect(&mut output, 0, 0, width, layout.banner_height, BANNER_BACKGROUND);
        fill_rect(
            &mut output,
            0,
            layout.banner_height,
            width,
            layout.strip_height,
            phase_color,
        );

        let time = stamp.timestamp.format(OVERLAY_TIME_FORMAT).to_string();
        draw_text(&mut output, layout.pad, layout.pad, &time, TEXT_COLOR, layout.scale);

        let phase_x = layout.pad + (time.chars().count() as u32 + 2) * layout.advance;
        let phase_text = format!("PHASE: {}", stamp.phase);
        draw_text(&mut output, phase_x, layout.pad, &phase_text, phase_color, layout.scale);

        draw_text(
            &mut output,
            layout.pad,
            layout.pad + layout.line_height,
            &stamp.operator,
            TEXT_COLOR,
            layout.scale,
        );

        Ok(output)
    }
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for yy in y..(y + h).min(height) {
        for xx in x..(x + w).min(width) {
            image.put_pixel(xx, yy, color);
        }
    }
}

// Text running past the right edge is clipped.
fn draw_text(image: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>, scale: u32) {
    let (width, height) = image.dimensions();
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as u32 * advance;
        if origin_x >= width {
            break;
        }
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + col * scale;
                let py = y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        if px + dx < width && py + dy < height {
                            image.put_pixel(px + dx, py + dy, color);
                        }
                    }
                }
            }
        }
    }
}
