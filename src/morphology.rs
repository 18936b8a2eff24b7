// src/morphology.rs - Capability interface over the binary-image primitives

use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::contours::BorderType;
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Serialize;

use crate::image_utils::{self, BoundingBox, FOREGROUND};

/// Label image produced by connected-component labelling (0 = background)
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Properties of one labelled region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub label: u32,
    pub area: u32,
    /// Centroid as (x, y)
    pub centroid: (f64, f64),
    pub bounds: BoundingBox,
}

/// A traced border
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<(i32, i32)>,
    /// Outer border (as opposed to the border of a hole)
    pub outer: bool,
    /// Index of the enclosing border, if any
    pub parent: Option<usize>,
}

impl Contour {
    /// Top-level outer border
    pub fn is_external(&self) -> bool {
        self.outer && self.parent.is_none()
    }

    pub fn touches_column(&self, x: i32) -> bool {
        self.points.iter().any(|&(px, _)| px == x)
    }

    /// (min x, max x, min y, max y)
    pub fn extents(&self) -> Option<(i32, i32, i32, i32)> {
        let first = self.points.first()?;
        Some(self.points.iter().fold(
            (first.0, first.0, first.1, first.1),
            |(x0, x1, y0, y1), &(x, y)| (x0.min(x), x1.max(x), y0.min(y), y1.max(y)),
        ))
    }

    pub fn mean_y(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        self.points.iter().map(|&(_, y)| y as f64).sum::<f64>() / self.points.len() as f64
    }
}

/// Narrow set of image operations the pipeline depends on.
///
/// Masks are `GrayImage`s where any non-zero pixel is foreground; every
/// operation returning a mask uses 0 and 255.
pub trait ImageOps: Send + Sync {
    fn grey(&self, image: &RgbImage) -> GrayImage;

    /// HSV with H in 0..180, stored channel-wise
    fn hsv(&self, image: &RgbImage) -> RgbImage;

    /// Erosion with a cross footprint, repeated `iterations` times
    fn erode(&self, mask: &GrayImage, iterations: u8) -> GrayImage;

    /// Dilation with a cross footprint, repeated `iterations` times
    fn dilate(&self, mask: &GrayImage, iterations: u8) -> GrayImage;

    /// Binary closing with a cross footprint
    fn close(&self, mask: &GrayImage) -> GrayImage;

    /// Drop 8-connected components smaller than `min_size` pixels
    fn remove_small_objects(&self, mask: &GrayImage, min_size: u32) -> GrayImage;

    /// Fill 4-connected background regions smaller than `area_threshold` pixels
    fn remove_small_holes(&self, mask: &GrayImage, area_threshold: u32) -> GrayImage;

    /// 8-connected labelling
    fn label(&self, mask: &GrayImage) -> LabelImage;

    fn region_properties(&self, labels: &LabelImage) -> Vec<Region>;

    fn find_contours(&self, mask: &GrayImage) -> Vec<Contour>;

    fn median_filter(&self, mask: &GrayImage, radius: u32) -> GrayImage;

    /// Gaussian blur; the result is grey-level, callers re-binarise
    fn gaussian_filter(&self, mask: &GrayImage, sigma: f32) -> GrayImage;
}

/// [`ImageOps`] backed by `imageproc`
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageprocOps;

impl ImageOps for ImageprocOps {
    fn grey(&self, image: &RgbImage) -> GrayImage {
        image_utils::to_grey(image)
    }

    fn hsv(&self, image: &RgbImage) -> RgbImage {
        image_utils::to_hsv(image)
    }

    fn erode(&self, mask: &GrayImage, iterations: u8) -> GrayImage {
        if iterations == 0 {
            return binarise(mask);
        }
        imageproc::morphology::erode(mask, Norm::L1, iterations)
    }

    fn dilate(&self, mask: &GrayImage, iterations: u8) -> GrayImage {
        if iterations == 0 {
            return binarise(mask);
        }
        imageproc::morphology::dilate(mask, Norm::L1, iterations)
    }

    fn close(&self, mask: &GrayImage) -> GrayImage {
        imageproc::morphology::close(mask, Norm::L1, 1)
    }

    fn remove_small_objects(&self, mask: &GrayImage, min_size: u32) -> GrayImage {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
        let areas = label_areas(&labels);
        let (width, height) = mask.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
            let label = labels.get_pixel(x, y)[0] as usize;
            let keep = label > 0 && areas[label] >= min_size;
            Luma([if keep { FOREGROUND } else { 0 }])
        })
    }

    fn remove_small_holes(&self, mask: &GrayImage, area_threshold: u32) -> GrayImage {
        let inverted = invert(mask);
        let labels = connected_components(&inverted, Connectivity::Four, Luma([0u8]));
        let areas = label_areas(&labels);
        let (width, height) = mask.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
            let label = labels.get_pixel(x, y)[0] as usize;
            let foreground = label == 0 || areas[label] < area_threshold;
            Luma([if foreground { FOREGROUND } else { 0 }])
        })
    }

    fn label(&self, mask: &GrayImage) -> LabelImage {
        connected_components(mask, Connectivity::Eight, Luma([0u8]))
    }

    fn region_properties(&self, labels: &LabelImage) -> Vec<Region> {
        let count = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
        if count == 0 {
            return Vec::new();
        }

        struct Accumulator {
            area: u32,
            sum_x: f64,
            sum_y: f64,
            bounds: Option<BoundingBox>,
        }

        let mut acc: Vec<Accumulator> = (0..=count)
            .map(|_| Accumulator { area: 0, sum_x: 0.0, sum_y: 0.0, bounds: None })
            .collect();

        for (x, y, pixel) in labels.enumerate_pixels() {
            let label = pixel[0] as usize;
            if label == 0 {
                continue;
            }
            let entry = &mut acc[label];
            entry.area += 1;
            entry.sum_x += x as f64;
            entry.sum_y += y as f64;
            let point = BoundingBox { x_min: x, x_max: x, y_min: y, y_max: y };
            entry.bounds = Some(match entry.bounds {
                Some(b) => b.union(&point),
                None => point,
            });
        }

        acc.into_iter()
            .enumerate()
            .skip(1)
            .filter_map(|(label, a)| {
                a.bounds.map(|bounds| Region {
                    label: label as u32,
                    area: a.area,
                    centroid: (a.sum_x / a.area as f64, a.sum_y / a.area as f64),
                    bounds,
                })
            })
            .collect()
    }

    fn find_contours(&self, mask: &GrayImage) -> Vec<Contour> {
        imageproc::contours::find_contours::<i32>(mask)
            .into_iter()
            .map(|c| Contour {
                points: c.points.iter().map(|p| (p.x, p.y)).collect(),
                outer: matches!(c.border_type, BorderType::Outer),
                parent: c.parent,
            })
            .collect()
    }

    fn median_filter(&self, mask: &GrayImage, radius: u32) -> GrayImage {
        imageproc::filter::median_filter(mask, radius, radius)
    }

    fn gaussian_filter(&self, mask: &GrayImage, sigma: f32) -> GrayImage {
        imageproc::filter::gaussian_blur_f32(mask, sigma)
    }
}

/// Areas indexed by label (index 0 is background and always 0)
fn label_areas(labels: &LabelImage) -> Vec<u32> {
    let count = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut areas = vec![0u32; count + 1];
    for pixel in labels.pixels() {
        let label = pixel[0] as usize;
        if label > 0 {
            areas[label] += 1;
        }
    }
    areas
}

/// Map any non-zero pixel to 255
pub fn binarise(mask: &GrayImage) -> GrayImage {
    threshold_mask(mask, 0)
}

/// Pixels strictly above `threshold` become foreground
pub fn threshold_mask(image: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        Luma([if image.get_pixel(x, y)[0] > threshold { FOREGROUND } else { 0 }])
    })
}

pub fn invert(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        Luma([if mask.get_pixel(x, y)[0] > 0 { 0 } else { FOREGROUND }])
    })
}

/// Mask holding only the given labels
pub fn mask_from_labels(labels: &LabelImage, keep: &[u32]) -> GrayImage {
    let (width, height) = labels.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let label = labels.get_pixel(x, y)[0];
        Luma([if label > 0 && keep.contains(&label) { FOREGROUND } else { 0 }])
    })
}

/// Bounding box of all foreground pixels
pub fn foreground_bounds(mask: &GrayImage) -> Option<BoundingBox> {
    mask.enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| BoundingBox { x_min: x, x_max: x, y_min: y, y_max: y })
        .reduce(|a, b| a.union(&b))
}

/// Draw every contour point into a fresh mask of the given size
pub fn draw_contours(contours: &[Contour], width: u32, height: u32) -> GrayImage {
    let mut outline = GrayImage::new(width, height);
    for contour in contours {
        for &(x, y) in &contour.points {
            if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                outline.put_pixel(x as u32, y as u32, Luma([FOREGROUND]));
            }
        }
    }
    outline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_foreground(mask: &GrayImage) -> usize {
        mask.pixels().filter(|p| p[0] > 0).count()
    }

    fn square(mask: &mut GrayImage, x0: u32, y0: u32, size: u32) {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                mask.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }
    }

    #[test]
    fn removes_small_objects_only() {
        let mut mask = GrayImage::new(40, 40);
        square(&mut mask, 2, 2, 3); // 9 px
        square(&mut mask, 10, 10, 20); // 400 px
        let cleaned = ImageprocOps.remove_small_objects(&mask, 200);
        assert_eq!(count_foreground(&cleaned), 400);
        assert_eq!(cleaned.get_pixel(3, 3)[0], 0);
    }

    #[test]
    fn fills_small_holes() {
        let mut mask = GrayImage::new(30, 30);
        square(&mut mask, 5, 5, 20);
        mask.put_pixel(15, 15, Luma([0]));
        mask.put_pixel(16, 15, Luma([0]));
        let filled = ImageprocOps.remove_small_holes(&mask, 200);
        assert_eq!(filled.get_pixel(15, 15)[0], FOREGROUND);
        // outer background is larger than the threshold and stays empty
        assert_eq!(filled.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn region_properties_report_area_and_centroid() {
        let mut mask = GrayImage::new(30, 30);
        square(&mut mask, 0, 0, 4);
        square(&mut mask, 10, 20, 6);
        let ops = ImageprocOps;
        let labels = ops.label(&mask);
        let mut regions = ops.region_properties(&labels);
        regions.sort_by_key(|r| r.area);

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].area, 16);
        assert_eq!(regions[1].area, 36);
        assert_eq!(regions[1].centroid, (12.5, 22.5));
        assert_eq!(regions[1].bounds, BoundingBox { x_min: 10, x_max: 15, y_min: 20, y_max: 25 });
    }

    #[test]
    fn erosion_removes_thin_lines() {
        let mut mask = GrayImage::new(30, 30);
        for y in 0..30 {
            mask.put_pixel(3, y, Luma([FOREGROUND]));
        }
        square(&mut mask, 10, 10, 10);
        let eroded = ImageprocOps.erode(&mask, 2);
        assert_eq!(eroded.get_pixel(3, 15)[0], 0);
        assert_eq!(eroded.get_pixel(15, 15)[0], FOREGROUND);
    }

    #[test]
    fn contours_of_separate_blobs_are_external() {
        let mut mask = GrayImage::new(20, 20);
        square(&mut mask, 2, 2, 3);
        square(&mut mask, 10, 10, 4);
        let contours = ImageprocOps.find_contours(&mask);
        let external: Vec<_> = contours.iter().filter(|c| c.is_external()).collect();
        assert_eq!(external.len(), 2);
        assert!(external.iter().any(|c| c.extents() == Some((10, 13, 10, 13))));
    }

    #[test]
    fn foreground_bounds_spans_all_blobs() {
        let mut mask = GrayImage::new(20, 20);
        square(&mut mask, 2, 3, 2);
        square(&mut mask, 12, 14, 3);
        assert_eq!(
            foreground_bounds(&mask),
            Some(BoundingBox { x_min: 2, x_max: 14, y_min: 3, y_max: 16 })
        );
        assert_eq!(foreground_bounds(&GrayImage::new(4, 4)), None);
    }
}
