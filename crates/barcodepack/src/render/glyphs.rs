use std::path::Path;

use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use image::GrayImage;

use crate::error::RenderError;

/// 5x7 digit cells, one byte per row, most significant of the low five bits leftmost.
const DIGITS_5X7: [[u8; 7]; 10] = [
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
];

/// Typeface used for the human-readable digits of raster barcodes.
pub enum GlyphFace {
    /// Built-in blocky digit face, always available.
    Bitmap,
    TrueType(Box<FontVec>),
}

impl GlyphFace {
    /// Loads a TrueType/OpenType font file.
    pub fn load(path: &Path) -> Result<Self, RenderError> {
        let bytes = std::fs::read(path).map_err(|e| RenderError::FontRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| RenderError::FontParse {
            path: path.to_path_buf(),
        })?;
        Ok(GlyphFace::TrueType(Box::new(font)))
    }

    /// Draws `ch` in black, horizontally centred on `center_x`, top edge at `top_y`.
    pub fn draw_centered(
        &self,
        img: &mut GrayImage,
        ch: char,
        center_x: f32,
        top_y: f32,
        size_px: f32,
    ) {
        match self {
            GlyphFace::Bitmap => draw_bitmap(img, ch, center_x, top_y, size_px),
            GlyphFace::TrueType(font) => draw_outline(font, img, ch, center_x, top_y, size_px),
        }
    }
}

fn draw_bitmap(img: &mut GrayImage, ch: char, center_x: f32, top_y: f32, size_px: f32) {
    let Some(rows) = ch.to_digit(10).map(|d| DIGITS_5X7[d as usize]) else {
        return;
    };
    let cell = ((size_px * 0.7 / 7.0).round() as i64).max(1);
    let left = (center_x - (5 * cell) as f32 / 2.0).round() as i64;
    let top = top_y.round() as i64;

    for (r, bits) in rows.iter().enumerate() {
        for c in 0..5 {
            if bits & (0x10 >> c) == 0 {
                continue;
            }
            let x0 = left + c as i64 * cell;
            let y0 = top + r as i64 * cell;
            for y in y0..y0 + cell {
                for x in x0..x0 + cell {
                    put_ink(img, x, y, 255);
                }
            }
        }
    }
}

fn draw_outline(
    font: &FontVec,
    img: &mut GrayImage,
    ch: char,
    center_x: f32,
    top_y: f32,
    size_px: f32,
) {
    let scale = PxScale::from(size_px);
    let scaled = font.as_scaled(scale);
    let glyph_id = font.glyph_id(ch);
    let advance = scaled.h_advance(glyph_id);
    let glyph = glyph_id.with_scale_and_position(
        scale,
        point(center_x - advance / 2.0, top_y + scaled.ascent()),
    );

    if let Some(outlined) = font.outline_glyph(glyph) {
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x as i64 + gx as i64;
            let y = bounds.min.y as i64 + gy as i64;
            put_ink(img, x, y, (coverage.clamp(0.0, 1.0) * 255.0) as u8);
        });
    }
}

fn put_ink(img: &mut GrayImage, x: i64, y: i64, ink: u8) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    let pixel = img.get_pixel_mut(x as u32, y as u32);
    pixel.0[0] = pixel.0[0].min(255 - ink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn dark_bounds(img: &GrayImage) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in img.enumerate_pixels() {
            if p.0[0] < 128 {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        bounds
    }

    #[test]
    fn test_bitmap_digit_is_centred() {
        let mut img = GrayImage::from_pixel(100, 60, Luma([255]));
        GlyphFace::Bitmap.draw_centered(&mut img, '8', 50.0, 10.0, 34.0);

        let (x0, y0, x1, y1) = dark_bounds(&img).unwrap();
        // '8' fills all five columns and seven rows of 3px cells.
        assert_eq!((x0, x1), (43, 57));
        assert_eq!((y0, y1), (10, 30));
    }

    #[test]
    fn test_bitmap_ignores_non_digits_and_clips() {
        let mut img = GrayImage::from_pixel(20, 20, Luma([255]));
        GlyphFace::Bitmap.draw_centered(&mut img, 'x', 10.0, 0.0, 34.0);
        assert!(dark_bounds(&img).is_none());

        GlyphFace::Bitmap.draw_centered(&mut img, '1', 2.0, 15.0, 34.0);
        assert!(dark_bounds(&img).is_some());
    }

    #[test]
    fn test_load_missing_font() {
        let result = GlyphFace::load(Path::new("/nonexistent/font.ttf"));
        assert!(matches!(result, Err(RenderError::FontRead { .. })));
    }

    #[test]
    fn test_load_garbage_font() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.ttf");
        std::fs::write(&path, b"definitely not a font").unwrap();
        let result = GlyphFace::load(&path);
        assert!(matches!(result, Err(RenderError::FontParse { .. })));
    }
}
