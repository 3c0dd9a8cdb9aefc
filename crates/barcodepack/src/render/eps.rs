use std::fmt::Write as _;
use std::path::Path;

use crate::error::RenderError;
use crate::render::vector::{fmt_num, VectorLayout, VectorOptions};
use crate::render::{OutputFormat, Renderer};
use crate::storage::write_atomic;

/// DSC-conformant encapsulated PostScript barcodes.
pub struct EpsRenderer {
    options: VectorOptions,
}

impl EpsRenderer {
    pub fn new(options: VectorOptions) -> Self {
        Self { options }
    }

    pub fn render_string(&self, code: &str) -> Result<String, RenderError> {
        let layout = VectorLayout::compute(code, &self.options)?;
        Ok(build_eps(code, &layout))
    }
}

impl Renderer for EpsRenderer {
    fn format(&self) -> OutputFormat {
        OutputFormat::Eps
    }

    fn render(&self, code: &str, dest: &Path) -> Result<(), RenderError> {
        let eps = self.render_string(code)?;
        write_atomic(dest, eps.as_bytes())?;
        Ok(())
    }
}

fn build_eps(code: &str, layout: &VectorLayout) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "%!PS-Adobe-3.0 EPSF-3.0");
    let _ = writeln!(
        out,
        "%%BoundingBox: 0 0 {} {}",
        layout.width.ceil() as i64,
        layout.height.ceil() as i64
    );
    let _ = writeln!(
        out,
        "%%HiResBoundingBox: 0 0 {} {}",
        fmt_num(layout.width),
        fmt_num(layout.height)
    );
    let _ = writeln!(out, "%%Title: {}", code);
    let _ = writeln!(out, "%%Creator: barcodepack");
    let _ = writeln!(out, "%%Pages: 0");
    let _ = writeln!(out, "%%EndComments");
    let _ = writeln!(out, "gsave");
    let _ = writeln!(out, "/b {{ newpath rectfill }} bind def");
    let _ = writeln!(out, "0 setgray");
    for bar in &layout.bars {
        let _ = writeln!(
            out,
            "{} {} {} {} b",
            fmt_num(bar.x),
            fmt_num(bar.y),
            fmt_num(bar.width),
            fmt_num(bar.height)
        );
    }
    if !layout.glyphs.is_empty() {
        let _ = writeln!(
            out,
            "/{} findfont {} scalefont setfont",
            layout.font,
            fmt_num(layout.font_size)
        );
        for glyph in &layout.glyphs {
            let _ = writeln!(
                out,
                "{} {} moveto ({}) show",
                fmt_num(glyph.x),
                fmt_num(glyph.y),
                glyph.ch
            );
        }
    }
    let _ = writeln!(out, "grestore");
    let _ = writeln!(out, "showpage");
    let _ = writeln!(out, "%%EOF");
    out
}
