use std::sync::Arc;

use tiny_skia::{Pixmap, Transform};
use usvg::fontdb;

use crate::error::CloudError;
use crate::font::FontMetrics;
use crate::layout::PlacedWord;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    /// Output raster scale; 3.0 triples the pixel dimensions of the PNG.
    pub scale: f32,
    /// `#rrggbb` canvas background.
    pub background: String,
}

/// Builds the SVG draw list for a placed-word sequence. Rotated words are
/// drawn with a translate+rotate(90) transform so their glyph run fills the
/// box the layout engine reserved.
pub fn render_svg(
    words: &[PlacedWord],
    options: &RenderOptions,
    font: Option<&FontMetrics>,
) -> String {
    let family = font
        .and_then(|f| f.family())
        .unwrap_or("sans-serif")
        .to_string();

    let mut svg = String::with_capacity(4096);
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = options.width,
        h = options.height
    ));
    svg.push_str(&format!(
        r#"<rect width="100%" height="100%" fill="{}"/>"#,
        options.background
    ));
    svg.push_str(&format!(
        r#"<style>text{{font-family:'{}',sans-serif}}</style>"#,
        escape_xml(&family)
    ));

    for word in words {
        let size = word.font_size as f32;
        let (ascent, descent) = match font {
            Some(font) => (font.ascent_px(size), font.descent_px(size)),
            None => (size * 0.96, size * 0.24),
        };
        if word.rotated {
            // rotate(90) sends the ascent direction to +x and the advance
            // direction to +y; shifting by the descent pins the glyph run to
            // the left edge of the reserved box.
            svg.push_str(&format!(
                r#"<text transform="translate({:.1} {:.1}) rotate(90)" fill="{}" font-size="{}">{}</text>"#,
                word.x as f32 + descent,
                word.y as f32,
                word.color,
                word.font_size,
                escape_xml(&word.word)
            ));
        } else {
            svg.push_str(&format!(
                r#"<text x="{}" y="{:.1}" fill="{}" font-size="{}">{}</text>"#,
                word.x,
                word.y as f32 + ascent,
                word.color,
                word.font_size,
                escape_xml(&word.word)
            ));
        }
    }

    svg.push_str("</svg>");
    svg
}

/// Rasters the draw list to PNG bytes with the resolved font, and only that
/// font, available to the SVG renderer.
pub fn render_png(
    words: &[PlacedWord],
    options: &RenderOptions,
    font: &FontMetrics,
) -> Result<Vec<u8>, CloudError> {
    let svg = render_svg(words, options, Some(font));

    let mut db = fontdb::Database::new();
    db.load_font_source(fontdb::Source::Binary(Arc::new(font.data().to_vec())));

    let usvg_options = usvg::Options {
        font_family: font.family().unwrap_or("sans-serif").to_string(),
        fontdb: Arc::new(db),
        ..Default::default()
    };
    let tree = usvg::Tree::from_str(&svg, &usvg_options)
        .map_err(|err| CloudError::Render(err.to_string()))?;

    let scale = options.scale.max(0.1);
    let out_width = ((options.width as f32 * scale).round() as u32).max(1);
    let out_height = ((options.height as f32 * scale).round() as u32).max(1);
    let mut pixmap = Pixmap::new(out_width, out_height)
        .ok_or_else(|| CloudError::Render("failed to allocate pixel buffer".to_string()))?;

    if let Some(color) = parse_hex_color(&options.background) {
        pixmap.fill(color);
    }
    resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|err| CloudError::Render(err.to_string()))
}

fn parse_hex_color(hex: &str) -> Option<tiny_skia::Color> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(tiny_skia::Color::from_rgba8(r, g, b, 255))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
