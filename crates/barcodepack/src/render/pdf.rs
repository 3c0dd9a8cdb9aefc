use std::path::Path;

use lopdf::{dictionary, Document, Object, Stream};

use crate::error::RenderError;
use crate::render::vector::{fmt_num, VectorLayout, VectorOptions};
use crate::render::{OutputFormat, Renderer};
use crate::storage::write_atomic;

/// Single-page PDF barcodes with a page size equal to the symbol's bounding box.
pub struct PdfRenderer {
    options: VectorOptions,
}

impl PdfRenderer {
    pub fn new(options: VectorOptions) -> Self {
        Self { options }
    }

    pub fn render_bytes(&self, code: &str) -> Result<Vec<u8>, RenderError> {
        let layout = VectorLayout::compute(code, &self.options)?;
        build_pdf(&layout).map_err(|reason| RenderError::Encode {
            code: code.to_string(),
            reason,
        })
    }
}

impl Renderer for PdfRenderer {
    fn format(&self) -> OutputFormat {
        OutputFormat::Pdf
    }

    fn render(&self, code: &str, dest: &Path) -> Result<(), RenderError> {
        let bytes = self.render_bytes(code)?;
        write_atomic(dest, &bytes)?;
        Ok(())
    }
}

fn content_stream(layout: &VectorLayout) -> String {
    let mut content = String::from("0 g\n");
    for bar in &layout.bars {
        content.push_str(&format!(
            "{} {} {} {} re f\n",
            fmt_num(bar.x),
            fmt_num(bar.y),
            fmt_num(bar.width),
            fmt_num(bar.height)
        ));
    }
    for glyph in &layout.glyphs {
        content.push_str(&format!(
            "BT /F1 {} Tf 1 0 0 1 {} {} Tm ({}) Tj ET\n",
            fmt_num(layout.font_size),
            fmt_num(glyph.x),
            fmt_num(glyph.y),
            glyph.ch
        ));
    }
    content
}

fn build_pdf(layout: &VectorLayout) -> Result<Vec<u8>, String> {
    let mut doc = Document::with_version("1.4");

    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let resources_id = doc.new_object_id();
    let content_id = doc.new_object_id();
    let page_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => Object::Name(layout.font.as_bytes().to_vec()),
            "Encoding" => "WinAnsiEncoding",
        }),
    );

    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        }),
    );

    let content_stream = Stream::new(dictionary! {}, content_stream(layout).into_bytes());
    doc.objects
        .insert(content_id, Object::Stream(content_stream));

    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(layout.width),
                Object::Real(layout.height),
            ],
            "Resources" => resources_id,
            "Contents" => content_id,
        }),
    );

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1_i64,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| e.to_string())?;
    Ok(buffer)
}
