use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::Serialize;

/// Foreground value used in every binary mask
pub const FOREGROUND: u8 = 255;

/// Half-open pixel rectangle `[x0, x1) x [y0, y1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x0: u32,
    pub x1: u32,
    pub y0: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn new(x0: u32, x1: u32, y0: u32, y1: u32) -> Self {
        Self { x0, x1, y0, y1 }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Clamp the rectangle to an image of the given size
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x0: self.x0.min(width),
            x1: self.x1.min(width),
            y0: self.y0.min(height),
            y1: self.y1.min(height),
        }
    }
}

/// Inclusive bounding box of foreground pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub fn height(&self) -> u32 {
        self.y_max - self.y_min
    }

    /// Grow to include another box
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x_min: self.x_min.min(other.x_min),
            x_max: self.x_max.max(other.x_max),
            y_min: self.y_min.min(other.y_min),
            y_max: self.y_max.max(other.y_max),
        }
    }
}

/// Greyscale value with the fixed-point BT.601 weights used by OpenCV
#[inline]
pub fn luma_bt601(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14) as u8
}

/// Convert an RGB image to greyscale
pub fn to_grey(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| Luma([luma_bt601(image.get_pixel(x, y))]))
}

/// 8-bit HSV triple (H in 0..180, S and V in 0..=255)
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0;
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        ((h / 2.0).round() as u32 % 180) as u8,
        s.round().min(255.0) as u8,
        v as u8,
    ]
}

/// Convert an RGB image to HSV, stored channel-wise in an `RgbImage`
pub fn to_hsv(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    RgbImage::from_fn(width, height, |x, y| Rgb(rgb_to_hsv(image.get_pixel(x, y))))
}

/// Check if a pixel is a bright, low-saturation grey
#[inline]
pub fn is_bright_grey(pixel: &Rgb<u8>, max_range: u8, min_brightness: u8) -> bool {
    let [r, g, b] = pixel.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    max - min < max_range && max > min_brightness
}

/// Check if an HSV triple lies within inclusive bounds
#[inline]
pub fn hsv_in_range(hsv: [u8; 3], lower: [u8; 3], upper: [u8; 3]) -> bool {
    (0..3).all(|i| hsv[i] >= lower[i] && hsv[i] <= upper[i])
}

/// Mask of pixels whose RGB vector lies inside a cylinder centred on `target`.
///
/// The cylinder axis runs through the origin and `target`, extending `length`
/// either side of the target colour.
pub fn colour_cylinder_mask(image: &RgbImage, target: [u8; 3], length: f64, radius: f64) -> GrayImage {
    let t = [target[0] as f64, target[1] as f64, target[2] as f64];
    let norm = (t[0] * t[0] + t[1] * t[1] + t[2] * t[2]).sqrt();
    let dir = if norm > 0.0 {
        [t[0] / norm, t[1] / norm, t[2] / norm]
    } else {
        let k = 1.0 / 3f64.sqrt();
        [k, k, k]
    };

    let p1 = [t[0] - dir[0] * length, t[1] - dir[1] * length, t[2] - dir[2] * length];
    let axis = [2.0 * length * dir[0], 2.0 * length * dir[1], 2.0 * length * dir[2]];
    let axis_len_sq = axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2];
    let limit = radius * axis_len_sq.sqrt();

    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let q = [r as f64 - p1[0], g as f64 - p1[1], b as f64 - p1[2]];
        let along = q[0] * axis[0] + q[1] * axis[1] + q[2] * axis[2];
        let cross = [
            q[1] * axis[2] - q[2] * axis[1],
            q[2] * axis[0] - q[0] * axis[2],
            q[0] * axis[1] - q[1] * axis[0],
        ];
        let off_axis = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();

        let inside = along >= 0.0 && along <= axis_len_sq && off_axis <= limit;
        Luma([if inside { FOREGROUND } else { 0 }])
    })
}

/// Copy a rectangle out of a greyscale image
pub fn crop_gray(image: &GrayImage, rect: &PixelRect) -> GrayImage {
    let rect = rect.clamp_to(image.width(), image.height());
    image::imageops::crop_imm(image, rect.x0, rect.y0, rect.width(), rect.height()).to_image()
}

/// Zero every pixel outside `keep`
pub fn mask_outside(image: &mut GrayImage, keep: &PixelRect) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if !keep.contains(x, y) {
            pixel[0] = 0;
        }
    }
}

/// Pixel-wise `a AND NOT b`
pub fn subtract_mask(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let (width, height) = a.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let keep = a.get_pixel(x, y)[0] > 0 && b.get_pixel(x, y)[0] == 0;
        Luma([if keep { FOREGROUND } else { 0 }])
    })
}

/// Create a debug image with specified points marked in color
pub fn mark_points(
    image: &RgbImage,
    points: &[(u32, u32)],
    color: [u8; 3],
    point_size: u32,
) -> RgbImage {
    let mut debug_image = image.clone();
    let (width, height) = debug_image.dimensions();

    for &(x, y) in points {
        let radius = point_size / 2;
        for dy in 0..point_size {
            for dx in 0..point_size {
                let px = x.saturating_sub(radius).saturating_add(dx);
                let py = y.saturating_sub(radius).saturating_add(dy);

                if px < width && py < height {
                    debug_image.put_pixel(px, py, Rgb(color));
                }
            }
        }
    }

    debug_image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_matches_opencv_convention() {
        assert_eq!(rgb_to_hsv(&Rgb([255, 255, 0])), [30, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([128, 128, 128])), [0, 0, 128]);
    }

    #[test]
    fn luma_uses_bt601_weights() {
        assert_eq!(luma_bt601(&Rgb([255, 255, 255])), 255);
        assert_eq!(luma_bt601(&Rgb([0, 0, 0])), 0);
        assert_eq!(luma_bt601(&Rgb([255, 0, 0])), 76);
        assert_eq!(luma_bt601(&Rgb([0, 255, 0])), 150);
    }

    #[test]
    fn bright_grey_rule() {
        assert!(is_bright_grey(&Rgb([200, 190, 180]), 100, 120));
        assert!(!is_bright_grey(&Rgb([100, 100, 100]), 100, 120));
        assert!(!is_bright_grey(&Rgb([255, 255, 0]), 100, 120));
    }

    #[test]
    fn cylinder_keeps_target_and_rejects_opposite() {
        let mut image = RgbImage::new(3, 1);
        image.put_pixel(0, 0, Rgb([250, 240, 10]));
        image.put_pixel(1, 0, Rgb([0, 0, 255]));
        image.put_pixel(2, 0, Rgb([0, 0, 0]));

        let mask = colour_cylinder_mask(&image, [255, 255, 0], 100.0, 100.0);
        assert_eq!(mask.get_pixel(0, 0)[0], FOREGROUND);
        assert_eq!(mask.get_pixel(1, 0)[0], 0);
        assert_eq!(mask.get_pixel(2, 0)[0], 0);
    }

    #[test]
    fn rect_clamps_and_contains() {
        let rect = PixelRect::new(5, 50, 2, 40).clamp_to(30, 30);
        assert_eq!(rect, PixelRect::new(5, 30, 2, 30));
        assert!(rect.contains(5, 2));
        assert!(!rect.contains(30, 10));
        assert!(PixelRect::new(4, 4, 0, 10).is_empty());
    }
}
