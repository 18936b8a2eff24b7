// src/gate.rs - Decide whether a screenshot is a Doppler spectrum from its overlay text

use image::{GrayImage, Luma, RgbImage};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, TextFilter};
use crate::errors::Result;
use crate::image_utils::{self, hsv_in_range};
use crate::morphology::ImageOps;
use crate::ocr::{OcrRequest, TextRecognizer};
use crate::report::{match_keyword, ReportTable};
use crate::rows::{group_rows, TextLine};

/// Result of the scan-type gate
#[derive(Debug, Clone, Serialize)]
pub struct GateOutcome {
    pub is_doppler: bool,
    pub lines: Vec<TextLine>,
    /// Keywords that were found, in configuration order
    pub matched_keywords: Vec<String>,
    /// Measurements read from the overlay (empty unless `is_doppler`)
    pub table: ReportTable,
}

/// Greyscale image holding only the overlay text colour, bottom part blanked
pub fn text_mask(image: &RgbImage, ops: &dyn ImageOps, config: &Config) -> GrayImage {
    let grey = ops.grey(image);
    let (width, height) = image.dimensions();

    let mut mask = match config.text_filter {
        TextFilter::Hsv => {
            let hsv = ops.hsv(image);
            GrayImage::from_fn(width, height, |x, y| {
                let keep = hsv_in_range(hsv.get_pixel(x, y).0, config.gate_hsv_lower, config.gate_hsv_upper);
                Luma([if keep { grey.get_pixel(x, y)[0] } else { 0 }])
            })
        }
        TextFilter::Cylinder => {
            let colour = image_utils::colour_cylinder_mask(
                image,
                config.cylinder_target_rgb,
                config.cylinder_length,
                config.cylinder_radius,
            );
            GrayImage::from_fn(width, height, |x, y| {
                let keep = colour.get_pixel(x, y)[0] > 0;
                Luma([if keep { grey.get_pixel(x, y)[0] } else { 0 }])
            })
        }
    };

    // The measurement overlay lives in the upper part of the screen
    let cutoff = (height as f64 * config.gate_keep_fraction).floor() as u32;
    for y in cutoff..height {
        for x in 0..width {
            mask.put_pixel(x, y, Luma([0]));
        }
    }

    mask
}

/// Keywords present in any line, in the order they are configured
pub fn find_keywords(lines: &[TextLine], keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .filter(|keyword| {
            lines
                .iter()
                .flat_map(|line| line.tokens())
                .any(|token| match_keyword(token, keyword).is_some())
        })
        .cloned()
        .collect()
}

/// Run the scan-type gate: colour filter, OCR, line reassembly, keyword search
pub fn run_gate(
    image: &RgbImage,
    ops: &dyn ImageOps,
    recognizer: &dyn TextRecognizer,
    config: &Config,
) -> Result<GateOutcome> {
    let mask = text_mask(image, ops, config);

    let words = recognizer.recognize(&OcrRequest {
        image: &mask,
        origin: (0, 0),
        whitelist: None,
        page_segmentation: config.gate_psm,
    })?;
    let total = words.len();

    let words: Vec<_> = words
        .into_iter()
        .filter(|w| w.confidence > config.min_word_confidence)
        .collect();
    debug!(total, kept = words.len(), "overlay words after confidence filter");

    let lines = group_rows(&words, config.row_tolerance);
    let matched_keywords = find_keywords(&lines, &config.gate_keywords);
    let is_doppler = !matched_keywords.is_empty();

    let table = if is_doppler {
        ReportTable::from_lines(&lines)
    } else {
        ReportTable::default()
    };

    info!(
        is_doppler,
        lines = lines.len(),
        keywords = ?matched_keywords,
        measurements = table.rows.len(),
        "scan-type gate"
    );

    Ok(GateOutcome {
        is_doppler,
        lines,
        matched_keywords,
        table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::ImageprocOps;
    use crate::ocr::OcrWord;
    use crate::report::ReportKey;
    use image::Rgb;

    struct Canned(Vec<OcrWord>);

    impl TextRecognizer for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn recognize(&self, _request: &OcrRequest<'_>) -> Result<Vec<OcrWord>> {
            Ok(self.0.clone())
        }
    }

    fn overlay_image() -> RgbImage {
        let mut image = RgbImage::new(100, 100);
        for y in 5..15 {
            for x in 10..40 {
                image.put_pixel(x, y, Rgb([255, 255, 0]));
            }
        }
        // Yellow below the cut-off and plain white text are both dropped
        for y in 70..80 {
            for x in 10..40 {
                image.put_pixel(x, y, Rgb([255, 255, 0]));
            }
        }
        for y in 20..25 {
            for x in 50..60 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        image
    }

    #[test]
    fn mask_keeps_upper_overlay_colour_only() {
        let config = Config::default();
        let mask = text_mask(&overlay_image(), &ImageprocOps, &config);
        assert_eq!(mask.get_pixel(20, 10)[0], 226);
        assert_eq!(mask.get_pixel(20, 75)[0], 0);
        assert_eq!(mask.get_pixel(55, 22)[0], 0);
    }

    #[test]
    fn cylinder_filter_selects_yellow() {
        let config = Config {
            text_filter: TextFilter::Cylinder,
            ..Config::default()
        };
        let mask = text_mask(&overlay_image(), &ImageprocOps, &config);
        assert!(mask.get_pixel(20, 10)[0] > 0);
        assert_eq!(mask.get_pixel(20, 75)[0], 0);
        assert_eq!(mask.get_pixel(55, 22)[0], 0);
    }

    #[test]
    fn accepts_hyphenated_keywords_and_reads_table() {
        let ocr = Canned(vec![
            OcrWord::new("Umb-PS", 10, 10, 40, 10, 92.0),
            OcrWord::new("61.0", 60, 11, 20, 10, 90.0),
            OcrWord::new("cm/s", 90, 10, 20, 10, 85.0),
            OcrWord::new("HR", 10, 30, 20, 10, 90.0),
            OcrWord::new("72", 40, 30, 20, 10, 90.0),
            OcrWord::new("bpm", 70, 31, 20, 10, 0.5),
        ]);
        let outcome = run_gate(&overlay_image(), &ImageprocOps, &ocr, &Config::default()).unwrap();

        assert!(outcome.is_doppler);
        assert_eq!(outcome.matched_keywords, vec!["PS".to_string(), "HR".to_string()]);
        assert_eq!(outcome.table.ocr_value(ReportKey::PeakSystolic), Some(61.0));
        // "bpm" fell below the confidence floor
        assert_eq!(outcome.table.get(ReportKey::HeartRate).unwrap().unit, "");
        assert_eq!(outcome.table.ocr_value(ReportKey::HeartRate), Some(72.0));
    }

    #[test]
    fn rejects_text_without_keywords() {
        let ocr = Canned(vec![
            OcrWord::new("Holiday", 10, 10, 40, 10, 92.0),
            OcrWord::new("PSV", 60, 10, 20, 10, 90.0),
        ]);
        let outcome = run_gate(&overlay_image(), &ImageprocOps, &ocr, &Config::default()).unwrap();
        assert!(!outcome.is_doppler);
        assert!(outcome.table.is_empty());
    }
}
