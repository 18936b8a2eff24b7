// src/ticks.rs - Tick mark detection inside an axis ROI

use image::{GrayImage, Luma};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::image_utils::{self, PixelRect};
use crate::morphology::{self, Contour, ImageOps};
use crate::roi::{AxisRoi, Side};
use crate::signal;

/// One tick mark, ROI-local coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tick {
    /// (target column, mean contour row)
    pub centre: (f64, f64),
    /// Extent of the tick on the label side (left: min x, right: max x)
    pub endpoint: i32,
}

/// Ticks found on one side
#[derive(Debug, Clone, Serialize)]
pub struct TickSet {
    pub side: Side,
    pub roi: PixelRect,
    /// ROI-local column the ticks were found on
    pub column: u32,
    pub ticks: Vec<Tick>,
    /// ROI-local boundary of the tick region on the label side
    pub shift: u32,
}

impl TickSet {
    /// Tick centres in image coordinates
    pub fn image_centres(&self) -> Vec<(f64, f64)> {
        self.ticks
            .iter()
            .map(|t| (self.roi.x0 as f64 + t.centre.0, self.roi.y0 as f64 + t.centre.1))
            .collect()
    }

    /// Part of the ROI (image coordinates) where labels are searched
    pub fn label_region(&self) -> PixelRect {
        match self.side {
            Side::Left => PixelRect::new(self.roi.x0, self.roi.x0 + self.shift, self.roi.y0, self.roi.y1),
            Side::Right => PixelRect::new(self.roi.x0 + self.shift, self.roi.x1, self.roi.y0, self.roi.y1),
        }
    }
}

/// Find the ticks of one axis.
///
/// Returns `None` when fewer than two ticks survive.
pub fn detect_ticks(grey: &GrayImage, roi: &AxisRoi, ops: &dyn ImageOps, config: &Config) -> Option<TickSet> {
    if roi.is_empty() {
        return None;
    }

    let crop = image_utils::crop_gray(grey, &roi.rect);
    let binary = morphology::threshold_mask(&crop, config.tick_threshold);
    let (width, height) = binary.dimensions();

    let mut outline = morphology::draw_contours(&ops.find_contours(&binary), width, height);
    if roi.side == Side::Right {
        blank_crowded_columns(&mut outline, config.right_glyph_column_limit);
    }

    let contours: Vec<Contour> = ops
        .find_contours(&outline)
        .into_iter()
        .filter(|c| c.is_external())
        .collect();

    let counts: Vec<f64> = (0..width as i32)
        .map(|x| contours.iter().filter(|c| c.touches_column(x)).count() as f64)
        .collect();

    let column = match target_column(&counts, roi.side, config) {
        Some(c) => c,
        None => {
            debug!(side = %roi.side, "no tick column found");
            return None;
        }
    };

    let candidates: Vec<Tick> = contours
        .iter()
        .filter(|c| c.touches_column(column as i32))
        .filter_map(|c| {
            let (x_min, x_max, _, _) = c.extents()?;
            let endpoint = match roi.side {
                Side::Left => x_min,
                Side::Right => x_max,
            };
            Some(Tick {
                centre: (column as f64, c.mean_y()),
                endpoint,
            })
        })
        .collect();

    let endpoints: Vec<f64> = candidates.iter().map(|t| t.endpoint as f64).collect();
    let keep = signal::mad_inliers(&endpoints, config.tick_mad_multiplier);
    let mut ticks: Vec<Tick> = candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(t, k)| k.then_some(t))
        .collect();
    ticks.sort_by(|a, b| a.centre.1.total_cmp(&b.centre.1));

    if ticks.len() < 2 {
        warn!(side = %roi.side, found = ticks.len(), "too few ticks");
        return None;
    }

    let shift = match roi.side {
        Side::Left => ticks.iter().map(|t| t.endpoint).min().unwrap_or(0).max(0) as u32,
        Side::Right => (ticks.iter().map(|t| t.endpoint).max().unwrap_or(0) + 1).max(0) as u32,
    };

    debug!(side = %roi.side, column, ticks = ticks.len(), shift, "ticks detected");

    Some(TickSet {
        side: roi.side,
        roi: roi.rect,
        column,
        ticks,
        shift: shift.min(width),
    })
}

/// Blank outline columns holding more than `limit` pixels
fn blank_crowded_columns(outline: &mut GrayImage, limit: u32) {
    let (width, height) = outline.dimensions();
    for x in 0..width {
        let filled = (0..height).filter(|&y| outline.get_pixel(x, y)[0] > 0).count() as u32;
        if filled > limit {
            for y in 0..height {
                outline.put_pixel(x, y, Luma([0]));
            }
        }
    }
}

/// Column the ticks sit on.
///
/// Left picks the highest count peak; right weighs each peak by its width
/// so a long row of thin ticks beats a lone glyph. Ties go to the column
/// nearest the waveform.
fn target_column(counts: &[f64], side: Side, config: &Config) -> Option<u32> {
    let peaks = signal::find_peaks(counts, Some(config.tick_min_peak_height));
    if peaks.is_empty() {
        return None;
    }

    let scores: Vec<f64> = match side {
        Side::Left => peaks.iter().map(|&p| counts[p]).collect(),
        Side::Right => signal::peak_widths(counts, &peaks, 0.5)
            .iter()
            .zip(&peaks)
            .map(|(w, &p)| counts[p] * w)
            .collect(),
    };

    let best = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let tied = peaks.iter().zip(&scores).filter(|(_, s)| **s == best).map(|(&p, _)| p);
    let column = match side {
        Side::Left => tied.max(),
        Side::Right => tied.min(),
    }?;

    Some(column as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::ImageprocOps;

    fn fill(image: &mut GrayImage, x0: u32, x1: u32, y0: u32, y1: u32) {
        for y in y0..y1 {
            for x in x0..x1 {
                image.put_pixel(x, y, Luma([255]));
            }
        }
    }

    #[test]
    fn left_ticks_sit_on_busiest_column() {
        let mut grey = GrayImage::new(80, 200);
        for i in 0..6 {
            let y = 20 + i * 30;
            fill(&mut grey, 60, 70, y, y + 2); // tick
        }
        for i in 0..3 {
            let y = 16 + i * 60;
            fill(&mut grey, 20, 32, y, y + 9); // label glyph
        }
        let roi = AxisRoi { side: Side::Left, rect: PixelRect::new(0, 76, 0, 200) };
        let ticks = detect_ticks(&grey, &roi, &ImageprocOps, &Config::default()).unwrap();

        assert_eq!(ticks.ticks.len(), 6);
        assert!((60..70).contains(&ticks.column));
        assert_eq!(ticks.shift, 60);
        for tick in &ticks.ticks {
            assert!((tick.centre.0 - ticks.column as f64).abs() <= 1.0);
        }
        assert_eq!(ticks.label_region(), PixelRect::new(0, 60, 0, 200));
    }

    #[test]
    fn right_axis_line_is_ignored() {
        let mut grey = GrayImage::new(80, 200);
        fill(&mut grey, 4, 6, 10, 190); // axis line
        for i in 0..5 {
            let y = 20 + i * 40;
            fill(&mut grey, 6, 16, y, y + 2); // tick stub
        }
        let roi = AxisRoi { side: Side::Right, rect: PixelRect::new(0, 80, 0, 200) };
        let ticks = detect_ticks(&grey, &roi, &ImageprocOps, &Config::default()).unwrap();

        assert_eq!(ticks.ticks.len(), 5);
        assert!((6..16).contains(&ticks.column));
        assert_eq!(ticks.shift, 16);
    }

    #[test]
    fn tick_set_serialises_only_its_geometry() {
        let mut grey = GrayImage::new(60, 100);
        for y in [15, 40, 65, 90] {
            fill(&mut grey, 40, 50, y, y + 2);
        }
        let roi = AxisRoi { side: Side::Left, rect: PixelRect::new(0, 56, 0, 100) };
        let ticks = detect_ticks(&grey, &roi, &ImageprocOps, &Config::default()).unwrap();

        let json = serde_json::to_value(&ticks).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["column", "roi", "shift", "side", "ticks"]);
        assert_eq!(json["ticks"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn single_tick_is_not_enough() {
        let mut grey = GrayImage::new(60, 100);
        fill(&mut grey, 40, 50, 40, 42);
        let roi = AxisRoi { side: Side::Left, rect: PixelRect::new(0, 56, 0, 100) };
        assert!(detect_ticks(&grey, &roi, &ImageprocOps, &Config::default()).is_none());
    }

    #[test]
    fn left_ties_prefer_inboard_column() {
        let counts = [0.0, 4.0, 0.0, 0.0, 4.0, 0.0];
        assert_eq!(target_column(&counts, Side::Left, &Config::default()), Some(4));
        assert_eq!(target_column(&counts, Side::Right, &Config::default()), Some(1));
    }
}
