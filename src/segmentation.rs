// src/segmentation.rs - Locate the spectral waveform and trace its envelope

use image::{GrayImage, Luma, RgbImage};
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::image_utils::{self, BoundingBox, PixelRect, FOREGROUND};
use crate::morphology::{self, ImageOps};

/// Coarse waveform mask and the box around all of it
#[derive(Debug, Clone)]
pub struct CoarseSegmentation {
    pub mask: GrayImage,
    pub bounds: BoundingBox,
}

/// One envelope point: column and (possibly fractional) row
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CurveSample {
    pub x: u32,
    pub y: f64,
}

/// Envelope of the waveform, one sample per column
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopCurve {
    pub samples: Vec<CurveSample>,
}

impl TopCurve {
    /// Mean row of every occupied column; empty columns between occupied
    /// ones are filled by linear interpolation.
    pub fn from_mask(mask: &GrayImage) -> Self {
        let (width, height) = mask.dimensions();

        let column_means: Vec<(u32, f64)> = (0..width)
            .filter_map(|x| {
                let rows: Vec<u32> = (0..height).filter(|&y| mask.get_pixel(x, y)[0] > 0).collect();
                if rows.is_empty() {
                    None
                } else {
                    Some((x, rows.iter().map(|&y| y as f64).sum::<f64>() / rows.len() as f64))
                }
            })
            .collect();

        let mut samples = Vec::new();
        for (i, &(x, y)) in column_means.iter().enumerate() {
            samples.push(CurveSample { x, y });
            if let Some(&(next_x, next_y)) = column_means.get(i + 1) {
                let span = (next_x - x) as f64;
                for gap_x in x + 1..next_x {
                    let f = (gap_x - x) as f64 / span;
                    samples.push(CurveSample { x: gap_x, y: y + f * (next_y - y) });
                }
            }
        }

        Self { samples }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Vertical extent of the curve (max y - min y)
    pub fn span(&self) -> f64 {
        let (lo, hi) = self
            .samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s.y), hi.max(s.y)));
        if lo.is_finite() { hi - lo } else { 0.0 }
    }
}

/// Output of the refinement stage
#[derive(Debug, Clone)]
pub struct RefinedSegmentation {
    pub mask: GrayImage,
    pub curve: TopCurve,
    /// Centroid (x, y) of the largest refined component
    pub centroid: (f64, f64),
    /// The envelope was taken from the bottom edge
    pub inverted: bool,
    /// Area the refined mask is confined to
    pub window: PixelRect,
}

/// Coarse segmentation: bright low-saturation pixels, cleaned up.
///
/// Returns `None` when nothing survives the clean-up.
pub fn coarse_segmentation(image: &RgbImage, ops: &dyn ImageOps, config: &Config) -> Option<CoarseSegmentation> {
    let (width, height) = image.dimensions();

    // Rows above the guard hold the scanner header
    let guard = if height > config.tall_image_rows {
        config.tall_image_guard_rows
    } else {
        config.short_image_guard_rows
    };

    let mask = GrayImage::from_fn(width, height, |x, y| {
        let bright = y >= guard
            && image_utils::is_bright_grey(image.get_pixel(x, y), config.grey_range_max, config.grey_brightness_min);
        Luma([if bright { FOREGROUND } else { 0 }])
    });

    let mask = ops.remove_small_objects(&mask, config.min_object_size);
    let mask = ops.remove_small_holes(&mask, config.max_hole_size);
    // Two erosions detach ticks and thin axis lines from the spectrum
    let mask = ops.erode(&mask, 2);
    let mask = ops.dilate(&mask, 1);

    let bounds = morphology::foreground_bounds(&mask)?;
    debug!(?bounds, "coarse waveform bounds");

    Some(CoarseSegmentation { mask, bounds })
}

/// Refine the waveform inside the coarse box and trace its envelope.
///
/// Returns `None` when no component survives.
pub fn refine_segmentation(
    image: &RgbImage,
    bounds: &BoundingBox,
    ops: &dyn ImageOps,
    config: &Config,
) -> Option<RefinedSegmentation> {
    let (width, height) = image.dimensions();
    let window = PixelRect::new(
        bounds.x_min,
        bounds.x_max + 1,
        bounds.y_min.saturating_sub(config.refine_upward_extension),
        bounds.y_max + 1,
    )
    .clamp_to(width, height);

    // Step 1: threshold the grey image inside the window
    let mut mask = morphology::threshold_mask(&ops.grey(image), config.refine_threshold);
    image_utils::mask_outside(&mut mask, &window);

    // Step 2: clean-up
    let mask = ops.remove_small_objects(&mask, config.min_object_size);
    let mask = ops.remove_small_holes(&mask, config.max_hole_size);
    let mask = ops.erode(&mask, 2);
    let mask = ops.dilate(&mask, 1);
    let mask = ops.dilate(&mask, 1);
    let mask = ops.remove_small_holes(&mask, config.refine_max_hole_size);
    let mask = ops.close(&mask);
    let mask = ops.median_filter(&mask, 1);

    // Step 3: keep the dominant component
    let mask = keep_largest_components(&mask, ops)?;

    // Step 4: smooth, re-binarise at half intensity and clip again
    let blurred = ops.gaussian_filter(&mask, config.blur_sigma);
    let mut mask = morphology::threshold_mask(&blurred, FOREGROUND / 2);
    image_utils::mask_outside(&mut mask, &window);

    let regions = ops.region_properties(&ops.label(&mask));
    let largest = regions.iter().max_by_key(|r| r.area)?;
    let centroid = largest.centroid;
    let centroid_row = centroid.1.floor() as u32;

    // Step 5: boundary above the centroid
    let boundary = image_utils::subtract_mask(&mask, &ops.erode(&mask, 1));
    let mut curve_mask = clear_rows(&boundary, centroid_row, height);
    let mut curve = TopCurve::from_mask(&curve_mask);

    // Step 6: a flat envelope means the spectrum hangs below the baseline
    let box_height = bounds.height().max(1) as f64;
    let inverted = curve.is_empty() || curve.span() / box_height < config.inversion_tolerance;
    if inverted {
        curve_mask = clear_rows(&boundary, 0, centroid_row);
        curve = TopCurve::from_mask(&curve_mask);
    }

    debug!(
        centroid = ?centroid,
        inverted,
        samples = curve.samples.len(),
        "refined waveform"
    );

    Some(RefinedSegmentation {
        mask,
        curve,
        centroid,
        inverted,
        window,
    })
}

/// Keep the largest component, plus the runner-up when the two are within
/// 10 px of each other in area
fn keep_largest_components(mask: &GrayImage, ops: &dyn ImageOps) -> Option<GrayImage> {
    const AREA_TIE: u32 = 10;

    let labels = ops.label(mask);
    let mut regions = ops.region_properties(&labels);
    regions.sort_by(|a, b| b.area.cmp(&a.area).then(a.label.cmp(&b.label)));

    let largest = regions.first()?;
    let mut keep = vec![largest.label];
    if let Some(second) = regions.get(1) {
        if largest.area - second.area < AREA_TIE {
            keep.push(second.label);
        }
    }

    Some(morphology::mask_from_labels(&labels, &keep))
}

/// Copy of `mask` with rows `[from, to)` cleared
fn clear_rows(mask: &GrayImage, from: u32, to: u32) -> GrayImage {
    let mut out = mask.clone();
    let width = out.width();
    for y in from..to.min(out.height()) {
        for x in 0..width {
            out.put_pixel(x, y, Luma([0]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::ImageprocOps;
    use assert_approx_eq::assert_approx_eq;
    use image::Rgb;

    /// A filled hump on a baseline, grey on black
    fn hump_image(inverted: bool) -> RgbImage {
        let (width, height) = (240u32, 200u32);
        let baseline = if inverted { 60.0 } else { 160.0 };
        let mut image = RgbImage::new(width, height);
        for x in 40..200u32 {
            let phase = (x - 40) as f64 / 160.0;
            let amp = 30.0 + 50.0 * (std::f64::consts::PI * phase).sin();
            let (y0, y1) = if inverted {
                (baseline, baseline + amp)
            } else {
                (baseline - amp, baseline)
            };
            for y in y0.round() as u32..y1.round() as u32 {
                image.put_pixel(x, y, Rgb([190, 190, 190]));
            }
        }
        image
    }

    #[test]
    fn curve_fills_gaps_by_interpolation() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(2, 4, Luma([FOREGROUND]));
        mask.put_pixel(5, 1, Luma([FOREGROUND]));
        mask.put_pixel(5, 3, Luma([FOREGROUND]));

        let curve = TopCurve::from_mask(&mask);
        let xs: Vec<u32> = curve.samples.iter().map(|s| s.x).collect();
        assert_eq!(xs, vec![2, 3, 4, 5]);
        assert_approx_eq!(curve.samples[1].y, 4.0 - 2.0 / 3.0);
        assert_approx_eq!(curve.samples[3].y, 2.0);
        assert_approx_eq!(curve.span(), 2.0);
    }

    #[test]
    fn coarse_box_covers_the_hump() {
        let image = hump_image(false);
        let coarse = coarse_segmentation(&image, &ImageprocOps, &Config::default()).unwrap();
        let b = coarse.bounds;
        assert!(b.x_min >= 39 && b.x_min <= 42, "x_min {}", b.x_min);
        assert!(b.x_max >= 197 && b.x_max <= 200, "x_max {}", b.x_max);
        assert!(b.y_max <= 160);
        assert!(b.y_min >= 79 && b.y_min <= 84, "y_min {}", b.y_min);
    }

    #[test]
    fn coarse_finds_nothing_on_black() {
        let image = RgbImage::new(100, 100);
        assert!(coarse_segmentation(&image, &ImageprocOps, &Config::default()).is_none());
    }

    #[test]
    fn refined_envelope_follows_upper_edge() {
        let image = hump_image(false);
        let config = Config::default();
        let coarse = coarse_segmentation(&image, &ImageprocOps, &config).unwrap();
        let refined = refine_segmentation(&image, &coarse.bounds, &ImageprocOps, &config).unwrap();

        assert!(!refined.inverted);
        let mid = refined.curve.samples.iter().find(|s| s.x == 120).unwrap();
        // top of the hump sits at row 80
        assert!((mid.y - 80.0).abs() < 4.0, "y at apex {}", mid.y);

        for w in refined.curve.samples.windows(2) {
            assert_eq!(w[1].x, w[0].x + 1);
        }
        for (x, y, p) in refined.mask.enumerate_pixels() {
            if p[0] > 0 {
                assert!(refined.window.contains(x, y));
            }
        }
    }

    #[test]
    fn hanging_waveform_is_inverted() {
        let image = hump_image(true);
        let config = Config::default();
        let coarse = coarse_segmentation(&image, &ImageprocOps, &config).unwrap();
        let refined = refine_segmentation(&image, &coarse.bounds, &ImageprocOps, &config).unwrap();

        assert!(refined.inverted);
        let mid = refined.curve.samples.iter().find(|s| s.x == 120).unwrap();
        // bottom of the hump sits at row 140
        assert!((mid.y - 139.0).abs() < 4.0, "y at apex {}", mid.y);
    }
}
