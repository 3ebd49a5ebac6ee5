use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::CancelToken;
use crate::error::CloudError;
use crate::font::{FontMetrics, measure_word};
use crate::freq::FrequencyEntry;
use crate::mask::{MaskBitmap, blocked_cell_integral};

#[derive(Debug, Clone)]
pub struct LayoutOptions {
    pub max_words: usize,
    pub min_font_size: u32,
    pub max_font_size: u32,
    /// Probability that a word is laid out horizontally rather than rotated
    /// 90 degrees.
    pub prefer_horizontal: f32,
    /// Extra blocked cells around every placed box.
    pub padding: u32,
    /// Fixing the seed makes rotation and color draws reproducible. `None`
    /// draws a fresh seed per run; decorative variety is the default.
    pub seed: Option<u64>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            max_words: 200,
            min_font_size: 1,
            max_font_size: 50,
            prefer_horizontal: 0.9,
            padding: 1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedWord {
    pub word: String,
    pub font_size: u32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// 90-degree rotation; `w`/`h` already describe the rotated box.
    pub rotated: bool,
    /// `#rrggbb`
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutOutcome {
    pub words: Vec<PlacedWord>,
    /// Words for which the spiral search exhausted the canvas. Recoverable
    /// per-word condition, reported to the caller as a diagnostic.
    pub dropped: usize,
}

/// Places the top-ranked entries into free mask space, largest first.
pub fn layout(
    entries: &[FrequencyEntry],
    mask: &MaskBitmap,
    font: Option<&FontMetrics>,
    options: &LayoutOptions,
    cancel: &CancelToken,
) -> Result<LayoutOutcome, CloudError> {
    let entries = &entries[..entries.len().min(options.max_words.max(1))];
    let width = mask.width();
    let height = mask.height();
    let mut occupancy = Occupancy::from_mask(mask);

    let max_count = entries.iter().map(|e| e.count).max().unwrap_or(0);
    let min_count = entries.iter().map(|e| e.count).min().unwrap_or(0);

    let seed = options.seed.unwrap_or_else(|| rand::random());
    let mut rotation_rng = ChaCha8Rng::seed_from_u64(seed);
    let horizontal_bias = options.prefer_horizontal.clamp(0.0, 1.0) as f64;

    let mut placed = Vec::with_capacity(entries.len());
    let mut dropped = 0usize;

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(CloudError::Cancelled { stage: "layout" });
        }

        let font_size = font_size_for(
            entry.count,
            min_count,
            max_count,
            options.min_font_size,
            options.max_font_size,
        );
        let rotated = !rotation_rng.gen_bool(horizontal_bias);

        let (unrotated_w, unrotated_h) = measure_word(&entry.word, font_size as f32, font);
        let box_w = (unrotated_w.ceil() as u32).max(1);
        let box_h = (unrotated_h.ceil() as u32).max(1);
        let (box_w, box_h) = if rotated { (box_h, box_w) } else { (box_w, box_h) };

        match find_position(&occupancy, width, height, box_w, box_h, options.padding) {
            Some((x, y)) => {
                occupancy.block(
                    x as i64 - options.padding as i64,
                    y as i64 - options.padding as i64,
                    box_w + options.padding * 2,
                    box_h + options.padding * 2,
                );
                let color = draw_color(seed, x, y);
                debug!(word = %entry.word, font_size, x, y, rotated, "placed");
                placed.push(PlacedWord {
                    word: entry.word.clone(),
                    font_size,
                    x,
                    y,
                    w: box_w,
                    h: box_h,
                    rotated,
                    color,
                });
            }
            None => {
                warn!(word = %entry.word, font_size, "placement exhausted, dropping word");
                dropped += 1;
            }
        }
    }

    Ok(LayoutOutcome {
        words: placed,
        dropped,
    })
}

/// Monotonic, order-preserving count → size mapping. Equal counts always get
/// equal sizes; a single distinct count maps to the maximum size.
fn font_size_for(count: u64, min_count: u64, max_count: u64, min_size: u32, max_size: u32) -> u32 {
    let (min_size, max_size) = (min_size.min(max_size), min_size.max(max_size));
    if max_count <= min_count {
        return max_size;
    }
    let t = (count - min_count) as f64 / (max_count - min_count) as f64;
    let size = min_size as f64 + t * (max_size - min_size) as f64;
    (size.round() as u32).clamp(min_size, max_size)
}

/// Deterministic outward spiral from the canvas center; first free padded box
/// wins. Returns the unpadded top-left corner, or `None` once the search ring
/// has swept past the whole canvas.
fn find_position(
    occupancy: &Occupancy,
    width: u32,
    height: u32,
    box_w: u32,
    box_h: u32,
    padding: u32,
) -> Option<(u32, u32)> {
    let center_x = width as i64 / 2;
    let center_y = height as i64 / 2;
    let bound = width.max(height) as i64;
    let aspect = (width as f64 / height.max(1) as f64).max(1.0);

    for (dx, dy) in SpiralIter::new(aspect) {
        if dx.abs() > bound || dy.abs() > bound {
            return None;
        }
        let x = center_x + dx - box_w as i64 / 2;
        let y = center_y + dy - box_h as i64 / 2;
        if occupancy.free(
            x - padding as i64,
            y - padding as i64,
            box_w + padding * 2,
            box_h + padding * 2,
        ) {
            return Some((x as u32, y as u32));
        }
    }
    None
}

/// Rectangular Archimedean spiral: rings of increasing radius walked edge by
/// edge, horizontal steps stretched by the canvas aspect ratio.
struct SpiralIter {
    aspect: f64,
    ring: i64,
    edge: u8,
    pos: i64,
}

const SPIRAL_STEP: i64 = 2;

impl SpiralIter {
    fn new(aspect: f64) -> Self {
        Self {
            aspect,
            ring: 0,
            edge: 0,
            pos: 0,
        }
    }
}

impl Iterator for SpiralIter {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.ring == 0 {
            self.ring = SPIRAL_STEP;
            return Some((0, 0));
        }
        let r = self.ring;
        // Edges: top (left→right), right (top→bottom), bottom (right→left),
        // left (bottom→top).
        let (dx, dy) = match self.edge {
            0 => (-r + self.pos, -r),
            1 => (r, -r + self.pos),
            2 => (r - self.pos, r),
            _ => (-r, r - self.pos),
        };
        self.pos += SPIRAL_STEP;
        if self.pos > 2 * r {
            self.pos = 0;
            self.edge += 1;
            if self.edge == 4 {
                self.edge = 0;
                self.ring += SPIRAL_STEP;
            }
        }
        Some(((dx as f64 * self.aspect) as i64, dy))
    }
}

/// Free-cell grid seeded from the mask and updated as boxes land; the
/// integral image keeps every whole-box probe constant time.
struct Occupancy {
    width: u32,
    height: u32,
    cells: Vec<bool>,
    blocked_integral: Vec<u32>,
}

impl Occupancy {
    fn from_mask(mask: &MaskBitmap) -> Self {
        let (width, height) = (mask.width(), mask.height());
        let mut cells = vec![false; width as usize * height as usize];
        for y in 0..height {
            for x in 0..width {
                cells[y as usize * width as usize + x as usize] = mask.is_drawable(x, y);
            }
        }
        let mut occupancy = Self {
            width,
            height,
            cells,
            blocked_integral: Vec::new(),
        };
        occupancy.rebuild_integral();
        occupancy
    }

    fn rebuild_integral(&mut self) {
        self.blocked_integral = blocked_cell_integral(self.width, self.height, &self.cells);
    }

    fn free(&self, x: i64, y: i64, w: u32, h: u32) -> bool {
        if x < 0 || y < 0 {
            return false;
        }
        if x as u64 + w as u64 > self.width as u64 || y as u64 + h as u64 > self.height as u64 {
            return false;
        }
        let stride = self.width as usize + 1;
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let blocked = self.blocked_integral[y1 * stride + x1]
            + self.blocked_integral[y0 * stride + x0]
            - self.blocked_integral[y0 * stride + x1]
            - self.blocked_integral[y1 * stride + x0];
        blocked == 0
    }

    fn block(&mut self, x: i64, y: i64, w: u32, h: u32) {
        let x0 = x.max(0) as u32;
        let y0 = y.max(0) as u32;
        let x1 = ((x + w as i64).max(0) as u64).min(self.width as u64) as u32;
        let y1 = ((y + h as i64).max(0) as u64).min(self.height as u64) as u32;
        for cy in y0..y1 {
            for cx in x0..x1 {
                self.cells[cy as usize * self.width as usize + cx as usize] = false;
            }
        }
        self.rebuild_integral();
    }
}

/// Hue uniform over the wheel, saturation and value from the upper half of
/// their ranges. Keyed by the run seed mixed with the placed position, so a
/// fixed seed reproduces the palette.
fn draw_color(seed: u64, x: u32, y: u32) -> String {
    let mixed = seed ^ ((x as u64) << 32) ^ (y as u64) ^ 0x9e37_79b9_7f4a_7c15;
    let mut rng = ChaCha8Rng::seed_from_u64(mixed);
    let h: f32 = rng.r#gen();
    let s: f32 = 0.5 + 0.5 * rng.r#gen::<f32>();
    let v: f32 = 0.5 + 0.5 * rng.r#gen::<f32>();
    let (r, g, b) = hsv_to_rgb(h, s, v);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let h = (h.fract() + 1.0).fract() * 6.0;
    let sector = h.floor() as u32 % 6;
    let f = h - h.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(counts: &[(&str, u64)]) -> Vec<FrequencyEntry> {
        counts
            .iter()
            .map(|(word, count)| FrequencyEntry {
                word: word.to_string(),
                count: *count,
            })
            .collect()
    }

    fn options(seed: u64) -> LayoutOptions {
        LayoutOptions {
            seed: Some(seed),
            ..LayoutOptions::default()
        }
    }

    fn boxes_intersect(a: &PlacedWord, b: &PlacedWord) -> bool {
        a.x < b.x + b.w && b.x < a.x + a.w && a.y < b.y + b.h && b.y < a.y + a.h
    }

    #[test]
    fn placed_boxes_never_overlap() {
        let words: Vec<(String, u64)> = (0..40)
            .map(|i| (format!("word{:02}", i), 40 - i as u64))
            .collect();
        let refs: Vec<(&str, u64)> = words.iter().map(|(w, c)| (w.as_str(), *c)).collect();
        let mask = MaskBitmap::full(400, 200);
        let outcome = layout(
            &entries(&refs),
            &mask,
            None,
            &options(7),
            &CancelToken::new(),
        )
        .expect("layout");
        assert!(!outcome.words.is_empty());
        for (i, a) in outcome.words.iter().enumerate() {
            for b in &outcome.words[i + 1..] {
                assert!(!boxes_intersect(a, b), "{:?} overlaps {:?}", a.word, b.word);
            }
        }
    }

    #[test]
    fn placed_boxes_respect_the_mask() {
        // Left half blocked, right half drawable.
        let gray = image::GrayImage::from_fn(400, 200, |x, _| {
            if x < 200 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        });
        let mask = MaskBitmap::from_gray(&gray, crate::mask::MaskPolarity::LightIsDrawable);
        let outcome = layout(
            &entries(&[("alpha", 5), ("beta", 3), ("gamma", 2)]),
            &mask,
            None,
            &options(3),
            &CancelToken::new(),
        )
        .expect("layout");
        assert!(!outcome.words.is_empty());
        for word in &outcome.words {
            assert!(
                mask.region_drawable(word.x as i64, word.y as i64, word.w, word.h),
                "{:?} escaped the mask",
                word.word
            );
        }
    }

    #[test]
    fn truncates_to_max_words() {
        let mask = MaskBitmap::full(400, 200);
        let opts = LayoutOptions {
            max_words: 1,
            seed: Some(1),
            ..LayoutOptions::default()
        };
        let outcome = layout(
            &entries(&[("one", 9), ("two", 5), ("three", 4), ("four", 3), ("five", 1)]),
            &mask,
            None,
            &opts,
            &CancelToken::new(),
        )
        .expect("layout");
        assert_eq!(outcome.words.len(), 1);
        assert_eq!(outcome.words[0].word, "one");
        assert_eq!(outcome.dropped, 0);
    }

    #[test]
    fn higher_counts_never_get_smaller_fonts() {
        let mask = MaskBitmap::full(600, 300);
        let outcome = layout(
            &entries(&[("big", 10), ("mid", 6), ("midtoo", 6), ("small", 1)]),
            &mask,
            None,
            &options(11),
            &CancelToken::new(),
        )
        .expect("layout");
        let size_of = |word: &str| {
            outcome
                .words
                .iter()
                .find(|w| w.word == word)
                .map(|w| w.font_size)
        };
        let (big, mid, midtoo, small) = (
            size_of("big").unwrap(),
            size_of("mid").unwrap(),
            size_of("midtoo").unwrap(),
            size_of("small").unwrap(),
        );
        assert!(big >= mid);
        assert_eq!(mid, midtoo);
        assert!(mid >= small);
        assert_eq!(big, 50);
        assert_eq!(small, 1);
    }

    #[test]
    fn single_distinct_count_gets_max_size() {
        assert_eq!(font_size_for(3, 3, 3, 1, 50), 50);
        assert_eq!(font_size_for(7, 3, 11, 1, 50), 26);
    }

    #[test]
    fn fixed_seed_reproduces_the_layout() {
        let mask = MaskBitmap::full(400, 200);
        let list = entries(&[("测试", 4), ("词云", 2), ("rust", 1)]);
        let first = layout(&list, &mask, None, &options(42), &CancelToken::new()).expect("layout");
        let second = layout(&list, &mask, None, &options(42), &CancelToken::new()).expect("layout");
        assert_eq!(first, second);
    }

    #[test]
    fn all_drawable_mask_equals_no_mask() {
        // All-black silhouette with dark-is-drawable polarity binarizes to a
        // fully open mask; layout must match the maskless canvas exactly.
        let gray = image::GrayImage::from_pixel(400, 200, image::Luma([0]));
        let dark_mask = MaskBitmap::from_gray(&gray, crate::mask::MaskPolarity::DarkIsDrawable);
        let full = MaskBitmap::full(400, 200);
        let list = entries(&[("alpha", 3), ("beta", 2), ("gamma", 1)]);
        let with_mask =
            layout(&list, &dark_mask, None, &options(5), &CancelToken::new()).expect("layout");
        let without =
            layout(&list, &full, None, &options(5), &CancelToken::new()).expect("layout");
        assert_eq!(with_mask, without);
    }

    #[test]
    fn oversized_words_are_dropped_not_fatal() {
        let mask = MaskBitmap::full(20, 10);
        let outcome = layout(
            &entries(&[("averyveryverylongword", 5), ("ok", 1)]),
            &mask,
            None,
            &options(2),
            &CancelToken::new(),
        )
        .expect("layout");
        assert!(outcome.dropped >= 1);
        assert_eq!(outcome.words.len() + outcome.dropped, 2);
    }

    #[test]
    fn cancelled_token_stops_the_run() {
        let mask = MaskBitmap::full(100, 50);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = layout(&entries(&[("word", 1)]), &mask, None, &options(1), &cancel)
            .expect_err("cancelled");
        assert!(matches!(err, CloudError::Cancelled { .. }));
    }

    #[test]
    fn colors_are_hex_and_seed_stable() {
        let first = draw_color(9, 10, 20);
        let second = draw_color(9, 10, 20);
        assert_eq!(first, second);
        assert_eq!(first.len(), 7);
        assert!(first.starts_with('#'));
        assert_ne!(first, draw_color(10, 10, 20));
    }

    #[test]
    fn hsv_conversion_hits_primary_corners() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), (255, 0, 0));
        assert_eq!(hsv_to_rgb(1.0 / 3.0, 1.0, 1.0), (0, 255, 0));
        assert_eq!(hsv_to_rgb(2.0 / 3.0, 1.0, 1.0), (0, 0, 255));
        assert_eq!(hsv_to_rgb(0.5, 0.0, 1.0), (255, 255, 255));
    }
}
