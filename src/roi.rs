// src/roi.rs - Regions either side of the waveform that hold the axes

use std::fmt;

use serde::Serialize;

use crate::config::Config;
use crate::image_utils::{BoundingBox, PixelRect};

/// Which axis of the spectrum display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    /// Velocity axis
    Left,
    /// Time axis
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// Search region for one axis, in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisRoi {
    pub side: Side,
    pub rect: PixelRect,
}

impl AxisRoi {
    pub fn is_empty(&self) -> bool {
        self.rect.is_empty()
    }
}

/// Left and right axis regions flanking the coarse waveform box.
///
/// Left is `[0, x_min - 1) x [top, H)`. Right is `[x_max, W) x [top, bottom)`
/// where the bottom rows hold vendor legends and are left out. `top` starts
/// a margin above the waveform but never at row 0.
pub fn derive_axis_rois(bounds: &BoundingBox, width: u32, height: u32, config: &Config) -> (AxisRoi, AxisRoi) {
    let top = bounds.y_min.saturating_sub(config.roi_top_margin).max(1);
    let right_bottom = bounds
        .y_min
        .saturating_sub(config.roi_top_margin)
        .max(height.saturating_sub(config.right_legend_exclusion));

    let left = AxisRoi {
        side: Side::Left,
        rect: PixelRect::new(0, bounds.x_min.saturating_sub(1), top, height).clamp_to(width, height),
    };
    let right = AxisRoi {
        side: Side::Right,
        rect: PixelRect::new(bounds.x_max, width, top, right_bottom).clamp_to(width, height),
    };

    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rois_flank_the_waveform() {
        let bounds = BoundingBox { x_min: 80, x_max: 500, y_min: 120, y_max: 360 };
        let (left, right) = derive_axis_rois(&bounds, 600, 480, &Config::default());

        assert_eq!(left.rect, PixelRect::new(0, 79, 95, 480));
        assert_eq!(right.rect, PixelRect::new(500, 600, 95, 410));
        assert_eq!(left.side, Side::Left);
        assert_eq!(right.side, Side::Right);
    }

    #[test]
    fn top_never_reaches_row_zero() {
        let bounds = BoundingBox { x_min: 40, x_max: 90, y_min: 10, y_max: 60 };
        let (left, right) = derive_axis_rois(&bounds, 100, 100, &Config::default());
        assert_eq!(left.rect.y0, 1);
        assert_eq!(right.rect.y0, 1);
    }

    #[test]
    fn waveform_touching_left_edge_leaves_empty_roi() {
        let bounds = BoundingBox { x_min: 0, x_max: 90, y_min: 50, y_max: 90 };
        let (left, right) = derive_axis_rois(&bounds, 120, 200, &Config::default());
        assert!(left.is_empty());
        assert!(!right.is_empty());
    }
}
