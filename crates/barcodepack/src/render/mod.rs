//! Barcode renderers and the deterministic output layout.
//!
//! Every artifact lives at `<root>/<SYM>/<FMT>/<SYM>-<code>.<ext>`, so the
//! path alone tells a chunk worker whether a code was already rendered.

pub mod eps;
pub mod glyphs;
pub mod pdf;
pub mod raster;
pub mod vector;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{RenderError, SymbologyError};
use crate::symbology::Symbology;

pub use eps::EpsRenderer;
pub use glyphs::GlyphFace;
pub use pdf::PdfRenderer;
pub use raster::{RasterLayout, RasterRenderer};
pub use vector::{VectorLayout, VectorOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpg,
    Pdf,
    Eps,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Jpg, OutputFormat::Pdf, OutputFormat::Eps];

    pub fn dir_name(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "JPG",
            OutputFormat::Pdf => "PDF",
            OutputFormat::Eps => "EPS",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Eps => "eps",
        }
    }
}

/// Renders one code into one file.
pub trait Renderer: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn render(&self, code: &str, dest: &Path) -> Result<(), RenderError>;
}

pub fn format_dir(root: &Path, symbology: Symbology, format: OutputFormat) -> PathBuf {
    root.join(symbology.label()).join(format.dir_name())
}

pub fn artifact_path(root: &Path, symbology: Symbology, format: OutputFormat, code: &str) -> PathBuf {
    format_dir(root, symbology, format).join(format!(
        "{}-{}.{}",
        symbology.label(),
        code,
        format.extension()
    ))
}

/// Where a human-readable digit sits relative to the 95 symbol modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitSlot {
    LeftQuiet,
    /// Under left-half symbol character `0..6`.
    Left(usize),
    /// Under right-half symbol character `0..6`.
    Right(usize),
    RightQuiet,
}

impl DigitSlot {
    /// Centre of the slot in module units, for slots under the bars.
    pub fn center_module(self) -> Option<f32> {
        match self {
            DigitSlot::Left(k) => Some(3.0 + 7.0 * k as f32 + 3.5),
            DigitSlot::Right(j) => Some(50.0 + 7.0 * j as f32 + 3.5),
            DigitSlot::LeftQuiet | DigitSlot::RightQuiet => None,
        }
    }
}

/// Text layout of a code: UPC-A reads `lead | 5 | 5 | check`, EAN-13 reads `lead | 6 | 6`.
pub fn digit_slots(code: &str) -> Result<Vec<(char, DigitSlot)>, SymbologyError> {
    if !code.bytes().all(|b| b.is_ascii_digit()) || !(code.len() == 12 || code.len() == 13) {
        return Err(SymbologyError::InvalidInput {
            input: code.to_string(),
            expected: "12 or 13 ASCII digits",
        });
    }
    let chars: Vec<char> = code.chars().collect();
    let slots = if chars.len() == 12 {
        chars
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let slot = match i {
                    0 => DigitSlot::LeftQuiet,
                    1..=5 => DigitSlot::Left(i),
                    6..=10 => DigitSlot::Right(i - 6),
                    _ => DigitSlot::RightQuiet,
                };
                (c, slot)
            })
            .collect()
    } else {
        chars
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let slot = match i {
                    0 => DigitSlot::LeftQuiet,
                    1..=6 => DigitSlot::Left(i - 1),
                    _ => DigitSlot::Right(i - 7),
                };
                (c, slot)
            })
            .collect()
    };
    Ok(slots)
}

/// One renderer per output format, shared by all chunk workers.
#[derive(Clone)]
pub struct RendererSet {
    raster: Arc<dyn Renderer>,
    pdf: Arc<dyn Renderer>,
    eps: Arc<dyn Renderer>,
}

impl RendererSet {
    pub fn new(raster: Arc<dyn Renderer>, pdf: Arc<dyn Renderer>, eps: Arc<dyn Renderer>) -> Self {
        Self { raster, pdf, eps }
    }

    /// Builds the standard renderers. Fails if a configured font cannot be loaded.
    pub fn from_config(config: &Config) -> Result<Self, RenderError> {
        let raster = RasterRenderer::from_config(&config.raster)?;
        let options = VectorOptions::from_config(&config.vector);
        Ok(Self::new(
            Arc::new(raster),
            Arc::new(PdfRenderer::new(options.clone())),
            Arc::new(EpsRenderer::new(options)),
        ))
    }

    pub fn get(&self, format: OutputFormat) -> &dyn Renderer {
        match format {
            OutputFormat::Jpg => self.raster.as_ref(),
            OutputFormat::Pdf => self.pdf.as_ref(),
            OutputFormat::Eps => self.eps.as_ref(),
        }
    }
}
