use std::path::{Path, PathBuf};

use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::{GrayImage, Luma};

use crate::config::RasterConfig;
use crate::error::RenderError;
use crate::render::glyphs::GlyphFace;
use crate::render::{digit_slots, DigitSlot, OutputFormat, Renderer};
use crate::storage::write_atomic;
use crate::symbology::{encode_modules, is_guard_module, SYMBOL_MODULES};

/// Pixel geometry of a raster barcode.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterLayout {
    pub width: u32,
    pub height: u32,
    /// Blank margin left and right of the bars.
    pub quiet_x: u32,
    pub pad_top: u32,
    /// Height of the band below the bars reserved for digits.
    pub text_height: u32,
    /// Extra downward length of guard bars.
    pub guard_extra: u32,
    /// Distance from the bottom of the normal bars to the top of the digits.
    pub text_offset: u32,
    pub font_px: f32,
}

impl Default for RasterLayout {
    fn default() -> Self {
        Self {
            width: 460,
            height: 300,
            quiet_x: 42,
            pad_top: 12,
            text_height: 72,
            guard_extra: 6,
            text_offset: 10,
            font_px: 34.0,
        }
    }
}

impl RasterLayout {
    pub fn module_width(&self) -> f32 {
        (self.width - 2 * self.quiet_x) as f32 / SYMBOL_MODULES as f32
    }

    pub fn bar_bottom(&self) -> u32 {
        self.height - self.text_height
    }

    fn digit_center_x(&self, slot: DigitSlot) -> f32 {
        let quiet = self.quiet_x as f32;
        match slot.center_module() {
            Some(m) => quiet + m * self.module_width(),
            None if slot == DigitSlot::LeftQuiet => quiet / 2.0,
            None => self.width as f32 - quiet / 2.0,
        }
    }
}

/// Renders UPC-A / EAN-13 barcodes as grayscale JPEGs with an explicit DPI.
pub struct RasterRenderer {
    layout: RasterLayout,
    face: GlyphFace,
    quality: u8,
    dpi: u16,
}

impl RasterRenderer {
    pub fn new(layout: RasterLayout, face: GlyphFace, quality: u8, dpi: u16) -> Self {
        Self {
            layout,
            face,
            quality,
            dpi,
        }
    }

    /// Builds a renderer from configuration, loading the font file if one is set.
    pub fn from_config(config: &RasterConfig) -> Result<Self, RenderError> {
        let face = match &config.font_path {
            Some(path) => GlyphFace::load(&PathBuf::from(path))?,
            None => GlyphFace::Bitmap,
        };
        Ok(Self::new(
            RasterLayout::default(),
            face,
            config.jpeg_quality,
            config.dpi,
        ))
    }

    pub fn layout(&self) -> &RasterLayout {
        &self.layout
    }

    /// Draws the barcode without encoding it.
    pub fn render_image(&self, code: &str) -> Result<GrayImage, RenderError> {
        let modules = encode_modules(code)?;
        let slots = digit_slots(code)?;
        let l = &self.layout;

        let mut img = GrayImage::from_pixel(l.width, l.height, Luma([255]));
        let module_w = l.module_width();
        let bar_bottom = l.bar_bottom();

        for (i, bit) in modules.bytes().enumerate() {
            if bit != b'1' {
                continue;
            }
            let x0 = (l.quiet_x as f32 + i as f32 * module_w).round() as u32;
            let x1 = (l.quiet_x as f32 + (i + 1) as f32 * module_w).round() as u32;
            let y1 = if is_guard_module(i) {
                bar_bottom + l.guard_extra
            } else {
                bar_bottom
            };
            for y in l.pad_top..y1.min(l.height) {
                for x in x0..x1.min(l.width) {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }

        let text_top = (bar_bottom + l.text_offset) as f32;
        for (ch, slot) in slots {
            self.face
                .draw_centered(&mut img, ch, l.digit_center_x(slot), text_top, l.font_px);
        }

        Ok(img)
    }

    /// Encodes the barcode as JPEG bytes with JFIF density set to the configured DPI.
    pub fn render_jpeg(&self, code: &str) -> Result<Vec<u8>, RenderError> {
        let img = self.render_image(code)?;
        let mut buffer = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
        encoder.set_pixel_density(PixelDensity::dpi(self.dpi));
        encoder
            .encode_image(&img)
            .map_err(|e| RenderError::Encode {
                code: code.to_string(),
                reason: e.to_string(),
            })?;
        Ok(buffer)
    }
}

impl Renderer for RasterRenderer {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpg
    }

    fn render(&self, code: &str, dest: &Path) -> Result<(), RenderError> {
        let bytes = self.render_jpeg(code)?;
        write_atomic(dest, &bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn renderer() -> RasterRenderer {
        RasterRenderer::new(RasterLayout::default(), GlyphFace::Bitmap, 90, 300)
    }

    fn module_center_x(layout: &RasterLayout, i: usize) -> u32 {
        (layout.quiet_x as f32 + (i as f32 + 0.5) * layout.module_width()) as u32
    }

    #[test]
    fn test_bars_and_guard_extension() {
        let r = renderer();
        let code = "123456789012";
        let img = r.render_image(code).unwrap();
        let layout = r.layout();
        let modules = encode_modules(code).unwrap();

        assert_eq!(img.dimensions(), (460, 300));

        // Start guard reaches below the normal bars.
        let guard_x = module_center_x(layout, 0);
        assert_eq!(img.get_pixel(guard_x, 100).0[0], 0);
        assert_eq!(img.get_pixel(guard_x, layout.bar_bottom() + 2).0[0], 0);

        let data_bar = (3..45)
            .find(|&i| modules.as_bytes()[i] == b'1')
            .unwrap();
        let data_x = module_center_x(layout, data_bar);
        assert_eq!(img.get_pixel(data_x, 100).0[0], 0);
        assert_eq!(img.get_pixel(data_x, layout.bar_bottom() + 2).0[0], 255);

        // Quiet zones and top padding stay blank.
        assert_eq!(img.get_pixel(10, 100).0[0], 255);
        assert_eq!(img.get_pixel(450, 100).0[0], 255);
        assert_eq!(img.get_pixel(guard_x, 5).0[0], 255);
    }

    #[test]
    fn test_upc_draws_lead_and_check_in_quiet_zones() {
        let r = renderer();
        let img = r.render_image("123456789012").unwrap();
        let band = r.layout().bar_bottom() + r.layout().text_offset..300;

        let dark_in = |x_range: std::ops::Range<u32>| {
            x_range
                .flat_map(|x| band.clone().map(move |y| (x, y)))
                .any(|(x, y)| img.get_pixel(x, y).0[0] == 0)
        };
        assert!(dark_in(0..42));
        assert!(dark_in(418..460));

        // EAN-13 text has nothing in the right quiet zone.
        let img = r.render_image("0123456789012").unwrap();
        let right_quiet_dark = (418..460)
            .flat_map(|x| band.clone().map(move |y| (x, y)))
            .any(|(x, y)| img.get_pixel(x, y).0[0] == 0);
        assert!(!right_quiet_dark);
    }

    #[test]
    fn test_jpeg_carries_300_dpi() {
        let bytes = renderer().render_jpeg("123456789012").unwrap();

        assert_eq!(&bytes[0..2], &[0xFF, 0xD8]);
        let jfif = bytes
            .windows(5)
            .position(|w| w == b"JFIF\0")
            .expect("JFIF header");
        assert_eq!(bytes[jfif + 7], 1, "density unit must be dots per inch");
        assert_eq!(u16::from_be_bytes([bytes[jfif + 8], bytes[jfif + 9]]), 300);
        assert_eq!(u16::from_be_bytes([bytes[jfif + 10], bytes[jfif + 11]]), 300);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (460, 300));
    }

    #[test]
    fn test_render_to_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("UPC-12").join("JPG").join("UPC-12-123456789012.jpg");

        renderer().render("123456789012", &dest).unwrap();

        assert!(dest.exists());
        assert!(std::fs::metadata(&dest).unwrap().len() > 0);
    }

    #[test]
    fn test_rejects_bad_code() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("bad.jpg");
        let result = renderer().render("12345", &dest);
        assert!(matches!(result, Err(RenderError::Symbology(_))));
        assert!(!dest.exists());
    }

    #[test]
    fn test_from_config_with_missing_font() {
        let config = RasterConfig {
            font_path: Some("/nonexistent/DejaVuSans-Bold.ttf".to_string()),
            ..RasterConfig::default()
        };
        assert!(matches!(
            RasterRenderer::from_config(&config),
            Err(RenderError::FontRead { .. })
        ));
    }
}
