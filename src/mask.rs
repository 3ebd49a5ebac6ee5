use std::path::Path;

use crate::error::MaskDecodeError;

/// Which side of the Otsu threshold counts as drawable. Silhouette images in
/// the wild encode the subject both as the dark and as the light region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPolarity {
    LightIsDrawable,
    DarkIsDrawable,
}

/// Binary placement region at canvas resolution. `true` cells accept words.
/// Carries an integral image of blocked cells so whole-rectangle queries are
/// constant time.
#[derive(Debug, Clone)]
pub struct MaskBitmap {
    width: u32,
    height: u32,
    cells: Vec<bool>,
    blocked_integral: Vec<u32>,
}

impl MaskBitmap {
    /// Fully drawable canvas; what the pipeline falls back to when no mask is
    /// supplied or the mask image cannot be decoded.
    pub fn full(width: u32, height: u32) -> Self {
        Self::from_cells(width, height, vec![true; width as usize * height as usize])
    }

    pub fn from_path(
        path: &Path,
        width: u32,
        height: u32,
        polarity: MaskPolarity,
    ) -> Result<Self, MaskDecodeError> {
        let bytes = std::fs::read(path)
            .map_err(|err| MaskDecodeError::new(format!("{}: {}", path.display(), err)))?;
        Self::from_image_bytes(&bytes, width, height, polarity)
    }

    pub fn from_image_bytes(
        bytes: &[u8],
        width: u32,
        height: u32,
        polarity: MaskPolarity,
    ) -> Result<Self, MaskDecodeError> {
        let image = image::load_from_memory(bytes)
            .map_err(|err| MaskDecodeError::new(err.to_string()))?;
        let resized =
            image.resize_exact(width, height, image::imageops::FilterType::Nearest);
        Ok(Self::from_gray(&to_luma_over_white(&resized), polarity))
    }

    /// Binarizes an already-grayscale image with Otsu's threshold.
    pub fn from_gray(gray: &image::GrayImage, polarity: MaskPolarity) -> Self {
        let threshold = otsu_threshold(gray);
        let (width, height) = gray.dimensions();
        let mut cells = vec![false; width as usize * height as usize];
        for (x, y, pixel) in gray.enumerate_pixels() {
            let light = pixel[0] > threshold;
            let drawable = match polarity {
                MaskPolarity::LightIsDrawable => light,
                MaskPolarity::DarkIsDrawable => !light,
            };
            cells[y as usize * width as usize + x as usize] = drawable;
        }
        Self::from_cells(width, height, cells)
    }

    fn from_cells(width: u32, height: u32, cells: Vec<bool>) -> Self {
        debug_assert_eq!(cells.len(), width as usize * height as usize);
        let blocked_integral = blocked_cell_integral(width, height, &cells);
        Self {
            width,
            height,
            cells,
            blocked_integral,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_drawable(&self, x: u32, y: u32) -> bool {
        x < self.width
            && y < self.height
            && self.cells[y as usize * self.width as usize + x as usize]
    }

    /// True when every cell of the rectangle is drawable. Rectangles leaking
    /// off the canvas are not drawable.
    pub fn region_drawable(&self, x: i64, y: i64, w: u32, h: u32) -> bool {
        if w == 0 || h == 0 {
            return true;
        }
        if x < 0 || y < 0 {
            return false;
        }
        let (x, y) = (x as u64, y as u64);
        if x + w as u64 > self.width as u64 || y + h as u64 > self.height as u64 {
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

    pub fn is_fully_drawable(&self) -> bool {
        self.region_drawable(0, 0, self.width, self.height)
    }
}

/// Summed-area table of blocked (`false`) cells over a row-major grid, with a
/// one-cell guard row and column so rectangle sums need no boundary checks.
pub(crate) fn blocked_cell_integral(width: u32, height: u32, cells: &[bool]) -> Vec<u32> {
    let w = width as usize;
    let h = height as usize;
    let stride = w + 1;
    let mut integral = vec![0u32; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u32;
        for x in 0..w {
            if !cells[y * w + x] {
                row_sum += 1;
            }
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }
    integral
}

/// Grayscale conversion with alpha composited over a white background, so
/// transparent mask regions read as light rather than black.
fn to_luma_over_white(image: &image::DynamicImage) -> image::GrayImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = image::GrayImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        luma.put_pixel(x, y, image::Luma([value]));
    }
    luma
}

/// Otsu's method: pick the threshold maximizing between-class variance of the
/// intensity histogram. A flat histogram degenerates to threshold 0.
fn otsu_threshold(gray: &image::GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }

    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, count)| value as f64 * *count as f64)
        .sum();

    let mut best_threshold = 0u8;
    let mut best_variance = 0.0f64;
    let mut background_count = 0u64;
    let mut background_sum = 0.0f64;

    for threshold in 0..256usize {
        background_count += histogram[threshold];
        if background_count == 0 {
            continue;
        }
        let foreground_count = total - background_count;
        if foreground_count == 0 {
            break;
        }
        background_sum += threshold as f64 * histogram[threshold] as f64;

        let w0 = background_count as f64;
        let w1 = foreground_count as f64;
        let mean0 = background_sum / w0;
        let mean1 = (weighted_total - background_sum) / w1;
        let variance = w0 * w1 * (mean0 - mean1) * (mean0 - mean1);
        if variance > best_variance {
            best_variance = variance;
            best_threshold = threshold as u8;
        }
    }
    best_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bimodal_image() -> image::GrayImage {
        // Left half dark (~20), right half light (~230).
        image::GrayImage::from_fn(64, 32, |x, _| {
            if x < 32 {
                image::Luma([20])
            } else {
                image::Luma([230])
            }
        })
    }

    #[test]
    fn otsu_splits_a_bimodal_histogram() {
        let threshold = otsu_threshold(&bimodal_image());
        assert!(threshold >= 20 && threshold < 230, "threshold {}", threshold);
    }

    #[test]
    fn light_polarity_keeps_the_light_half() {
        let mask = MaskBitmap::from_gray(&bimodal_image(), MaskPolarity::LightIsDrawable);
        assert!(!mask.is_drawable(0, 0));
        assert!(mask.is_drawable(63, 0));
    }

    #[test]
    fn dark_polarity_inverts_the_split() {
        let mask = MaskBitmap::from_gray(&bimodal_image(), MaskPolarity::DarkIsDrawable);
        assert!(mask.is_drawable(0, 0));
        assert!(!mask.is_drawable(63, 0));
    }

    #[test]
    fn all_black_image_with_dark_polarity_is_fully_drawable() {
        let gray = image::GrayImage::from_pixel(40, 20, image::Luma([0]));
        let mask = MaskBitmap::from_gray(&gray, MaskPolarity::DarkIsDrawable);
        assert!(mask.is_fully_drawable());
    }

    #[test]
    fn region_queries_match_per_cell_checks() {
        let mask = MaskBitmap::from_gray(&bimodal_image(), MaskPolarity::LightIsDrawable);
        assert!(mask.region_drawable(32, 0, 32, 32));
        assert!(!mask.region_drawable(16, 0, 32, 16));
        assert!(!mask.region_drawable(0, 0, 8, 8));
        // Off-canvas rectangles are never drawable.
        assert!(!mask.region_drawable(-1, 0, 4, 4));
        assert!(!mask.region_drawable(60, 0, 8, 8));
    }

    #[test]
    fn undecodable_bytes_yield_mask_decode_error() {
        let err = MaskBitmap::from_image_bytes(b"not an image", 10, 10, MaskPolarity::LightIsDrawable)
            .expect_err("should fail");
        assert!(!err.reason.is_empty());
    }

    #[test]
    fn region_queries_match_brute_force_on_a_checkered_grid() {
        let gray = image::GrayImage::from_fn(37, 23, |x, y| {
            if (x / 4 + y / 3) % 2 == 0 {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        });
        let mask = MaskBitmap::from_gray(&gray, MaskPolarity::LightIsDrawable);
        for (x, y, w, h) in [(0, 0, 4, 3), (4, 0, 4, 3), (2, 2, 6, 4), (33, 21, 4, 2)] {
            let brute = (y..y + h).all(|cy| (x..x + w).all(|cx| mask.is_drawable(cx, cy)));
            assert_eq!(
                mask.region_drawable(x as i64, y as i64, w, h),
                brute,
                "rect ({}, {}, {}, {})",
                x,
                y,
                w,
                h
            );
        }
    }

    #[test]
    fn asymmetric_dimensions_index_row_major() {
        let gray = image::GrayImage::from_fn(5, 2, |x, y| {
            if x == 3 && y == 1 {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        });
        let mask = MaskBitmap::from_gray(&gray, MaskPolarity::LightIsDrawable);
        assert!(mask.is_drawable(3, 1));
        assert!(!mask.is_drawable(1, 3));
        assert!(!mask.is_drawable(3, 0));
    }

    #[test]
    fn full_mask_is_fully_drawable() {
        let mask = MaskBitmap::full(800, 400);
        assert!(mask.is_fully_drawable());
        assert!(mask.region_drawable(0, 0, 800, 400));
    }
}
