use crate::config::VectorConfig;
use crate::error::SymbologyError;
use crate::render::{digit_slots, DigitSlot};
use crate::symbology::{dark_runs, encode_modules, SYMBOL_MODULES};

/// Geometry and typography of vector barcodes, in points.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorOptions {
    pub module: f32,
    pub bar_height: f32,
    pub quiet_modules: u32,
    pub show_text: bool,
    /// Standard Type1 font name, referenced but never embedded.
    pub font: String,
    pub font_size: f32,
    pub text_gap: f32,
}

impl Default for VectorOptions {
    fn default() -> Self {
        Self::from_config(&VectorConfig::default())
    }
}

impl VectorOptions {
    pub fn from_config(config: &VectorConfig) -> Self {
        Self {
            module: config.module_pt,
            bar_height: config.bar_height_pt,
            quiet_modules: config.quiet_modules,
            show_text: config.show_text,
            font: config.font.clone(),
            font_size: config.font_pt,
            text_gap: config.text_gap_pt,
        }
    }
}

/// A filled rectangle, origin bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A single digit drawn with its left edge at `x` and baseline at `y`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub x: f32,
    pub y: f32,
}

/// Resolved drawing of one code, shared by the PDF and EPS writers.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorLayout {
    pub width: f32,
    pub height: f32,
    pub bars: Vec<Bar>,
    pub glyphs: Vec<Glyph>,
    pub font: String,
    pub font_size: f32,
}

impl VectorLayout {
    pub fn compute(code: &str, opts: &VectorOptions) -> Result<Self, SymbologyError> {
        let modules = encode_modules(code)?;
        let m = opts.module;
        let quiet_x = opts.quiet_modules as f32 * m;
        let text_block = if opts.show_text {
            opts.font_size + opts.text_gap
        } else {
            0.0
        };

        let width = (SYMBOL_MODULES as f32 + 2.0 * opts.quiet_modules as f32) * m;
        let height = opts.bar_height + text_block;

        let bars = dark_runs(&modules)
            .into_iter()
            .map(|(start, len)| Bar {
                x: quiet_x + start as f32 * m,
                y: text_block,
                width: len as f32 * m,
                height: opts.bar_height,
            })
            .collect();

        let mut glyphs = Vec::new();
        if opts.show_text {
            // Approximate advance of a digit in the standard fonts.
            let char_width = 0.6 * opts.font_size;
            let baseline = 0.2 * opts.font_size;
            for (ch, slot) in digit_slots(code)? {
                let x = match slot {
                    DigitSlot::LeftQuiet => quiet_x - 3.0 * m - char_width,
                    DigitSlot::RightQuiet => quiet_x + (SYMBOL_MODULES as f32 + 3.0) * m,
                    DigitSlot::Left(_) | DigitSlot::Right(_) => {
                        let center = slot.center_module().unwrap_or_default();
                        quiet_x + center * m - char_width / 2.0
                    }
                };
                glyphs.push(Glyph {
                    ch,
                    x,
                    y: baseline,
                });
            }
        }

        Ok(Self {
            width,
            height,
            bars,
            glyphs,
            font: opts.font.clone(),
            font_size: opts.font_size,
        })
    }
}

/// Formats a coordinate with at most three decimals and no trailing zeros.
pub(crate) fn fmt_num(v: f32) -> String {
    let s = format!("{:.3}", v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
