use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::Face;
use ttf_parser::name_id;
use usvg::fontdb;

use crate::error::CloudError;

/// Parsed font data plus the handful of metrics word measurement needs.
#[derive(Clone, Debug)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    space_advance: u16,
    ascent: i16,
    descent: i16,
    family: Option<String>,
    face_index: u32,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Line height in pixels at the given size (ascent plus descent depth).
    pub fn line_height_px(&self, font_size: f32) -> f32 {
        let units = self.units_per_em.max(1) as f32;
        (self.ascent as f32 - self.descent as f32) * (font_size / units)
    }

    pub fn ascent_px(&self, font_size: f32) -> f32 {
        let units = self.units_per_em.max(1) as f32;
        self.ascent as f32 * (font_size / units)
    }

    pub fn descent_px(&self, font_size: f32) -> f32 {
        let units = self.units_per_em.max(1) as f32;
        -(self.descent as f32) * (font_size / units)
    }
}

/// Unrotated extent of a word at a font size. Falls back to a per-char width
/// estimate when no font is available, so measurement always succeeds.
pub fn measure_word(word: &str, font_size: f32, font: Option<&FontMetrics>) -> (f32, f32) {
    if let Some(font) = font {
        if let Ok(face) = Face::parse(&font.data, font.face_index) {
            let mut advance = 0u32;
            for ch in word.chars() {
                let glyph_advance = face
                    .glyph_index(ch)
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .unwrap_or(font.space_advance);
                advance = advance.saturating_add(glyph_advance as u32);
            }
            let units = font.units_per_em.max(1) as f32;
            let width = advance as f32 * (font_size / units);
            return (width, font.line_height_px(font_size));
        }
    }
    (
        estimate_text_width_units(word) * font_size,
        font_size * 1.2,
    )
}

/// Resolves the font the run will measure and render with. A configured but
/// unusable font is fatal; silent substitution would change the output in a
/// way callers cannot detect.
pub fn resolve_font(
    font_path: Option<&Path>,
    font_family: Option<&str>,
) -> Result<FontMetrics, CloudError> {
    resolve_font_inner(font_path, font_family)
        .map_err(|err| CloudError::FontResourceMissing(format!("{:#}", err)))
}

fn resolve_font_inner(font_path: Option<&Path>, font_family: Option<&str>) -> Result<FontMetrics> {
    if let Some(path) = font_path {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font: {}", path.display()))?;
        return load_font_metrics_from_data(&data, None)
            .map_err(|err| anyhow!("failed to parse font: {} ({})", path.display(), err));
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(family) = font_family {
        return load_font_metrics_from_family(&db, fontdb::Family::Name(family))
            .with_context(|| format!("font family not available: {}", family));
    }

    load_font_metrics_from_family(&db, fontdb::Family::SansSerif)
        .with_context(|| "no usable sans-serif system font found")
}

fn load_font_metrics_from_family(
    db: &fontdb::Database,
    family: fontdb::Family<'_>,
) -> Result<FontMetrics> {
    let families = [family];
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db.query(&query).ok_or_else(|| anyhow!("font not found"))?;
    let data = db
        .with_face_data(id, |data, _index| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data"))?;
    load_font_metrics_from_data(&data, None)
}

fn load_font_metrics_from_data(data: &[u8], preferred_family: Option<&str>) -> Result<FontMetrics> {
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(data).unwrap_or(1);
    for index in 0..count {
        if let Ok(face) = Face::parse(data, index) {
            let family = extract_family_name(&face);
            let units_per_em = face.units_per_em().max(1);
            let space_advance = face
                .glyph_index(' ')
                .and_then(|id| face.glyph_hor_advance(id))
                .unwrap_or(units_per_em / 2);
            let metrics = FontMetrics {
                data: Arc::new(data.to_vec()),
                units_per_em,
                space_advance,
                ascent: face.ascender(),
                descent: face.descender(),
                family: family.clone(),
                face_index: index,
            };
            if let (Some(preferred), Some(found)) = (preferred_family, &family) {
                if found.eq_ignore_ascii_case(preferred) {
                    return Ok(metrics);
                }
            }
            if fallback.is_none() {
                fallback = Some(metrics);
            }
        }
    }
    if preferred_family.is_some() {
        return Err(anyhow!("font family not found in font file"));
    }
    fallback.ok_or_else(|| anyhow!("failed to parse font data"))
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

fn estimate_char_units_for_width(ch: char) -> f32 {
    if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else if matches!(ch as u32, 0x4E00..=0x9FFF | 0x3040..=0x30FF) {
        1.0
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units_for_width).sum()
}
