// src/labels.rs - Read axis labels and attach them to ticks

use image::GrayImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::Result;
use crate::image_utils::{self, PixelRect};
use crate::morphology;
use crate::ocr::{OcrRequest, OcrWord, TextRecognizer};
use crate::roi::Side;
use crate::ticks::TickSet;

/// One OCR'd axis label, image coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisLabel {
    pub text: String,
    pub value: f64,
    pub bbox: PixelRect,
    pub confidence: f32,
    pub centre: (f64, f64),
}

/// Labels read on one side
#[derive(Debug, Clone, Serialize)]
pub struct LabelSet {
    pub side: Side,
    /// Binarisation threshold of the accepted (or last) OCR pass
    pub threshold: Option<u8>,
    pub converged: bool,
    pub labels: Vec<AxisLabel>,
}

/// A known value at a known position
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LabelledTick {
    pub value: f64,
    /// Image coordinates (x, y)
    pub position: (f64, f64),
    /// Position is an OCR box centre rather than a detected tick
    pub pseudo: bool,
}

/// Parse a label token as a number that is a multiple of `divisor`
pub fn parse_label_value(text: &str, divisor: f64) -> Option<f64> {
    let value = text.trim().parse::<f64>().ok()?;
    if !value.is_finite() {
        return None;
    }
    let ratio = value / divisor;
    ((ratio - ratio.round()).abs() < 1e-9).then_some(value)
}

fn to_label(word: &OcrWord, origin: (u32, u32), value: f64) -> AxisLabel {
    let x0 = (origin.0 as i64 + word.left as i64).max(0) as u32;
    let y0 = (origin.1 as i64 + word.top as i64).max(0) as u32;
    let (cx, cy) = word.centre();
    AxisLabel {
        text: word.text.clone(),
        value,
        bbox: PixelRect::new(x0, x0 + word.width, y0, y0 + word.height),
        confidence: word.confidence,
        centre: (origin.0 as f64 + cx, origin.1 as f64 + cy),
    }
}

/// Sweep the binarisation threshold until every label reads as a multiple
/// of the configured divisor.
///
/// When no threshold works, the last pass is kept with its non-numeric
/// tokens dropped and `converged` set to false.
pub fn read_labels(
    grey: &GrayImage,
    ticks: &TickSet,
    recognizer: &dyn TextRecognizer,
    config: &Config,
) -> Result<LabelSet> {
    let region = ticks.label_region().clamp_to(grey.width(), grey.height());
    let mut result = LabelSet {
        side: ticks.side,
        threshold: None,
        converged: false,
        labels: Vec::new(),
    };
    if region.is_empty() {
        warn!(side = %ticks.side, "no room for labels beyond the ticks");
        return Ok(result);
    }

    let crop = image_utils::crop_gray(grey, &region);
    let origin = (region.x0, region.y0);

    for threshold in config.label_thresholds() {
        let binary = morphology::threshold_mask(&crop, threshold);
        let words = recognizer.recognize(&OcrRequest {
            image: &binary,
            origin,
            whitelist: Some(config.label_whitelist.as_str()),
            page_segmentation: config.label_psm,
        })?;

        let values: Vec<Option<f64>> = words
            .iter()
            .map(|w| parse_label_value(&w.text, config.label_divisor))
            .collect();
        let converged = !words.is_empty() && values.iter().all(Option::is_some);

        result.threshold = Some(threshold);

        if converged {
            result.labels = words
                .iter()
                .zip(&values)
                .filter_map(|(w, v)| v.map(|v| to_label(w, origin, v)))
                .collect();
            result.converged = true;
            break;
        }

        // Fallback keeps every numeric token, on the grid or not
        result.labels = words
            .iter()
            .filter_map(|w| {
                let value = w.text.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
                Some(to_label(w, origin, value))
            })
            .collect();
        debug!(side = %ticks.side, threshold, words = words.len(), "labels did not read cleanly");
    }

    if result.converged {
        info!(
            side = %ticks.side,
            threshold = ?result.threshold,
            values = ?result.labels.iter().map(|l| l.value).collect::<Vec<_>>(),
            "axis labels read"
        );
    } else {
        warn!(side = %ticks.side, kept = result.labels.len(), "label sweep did not converge");
    }

    Ok(result)
}

/// Pair labels with ticks.
///
/// Converged labels are snapped greedily to the nearest free tick, closest
/// pairs first, so no tick carries two values. Labels that did not converge
/// are used as ticks in their own right.
pub fn snap_labels(labels: &LabelSet, ticks: &TickSet, min_separation: f64) -> Vec<LabelledTick> {
    for (i, a) in labels.labels.iter().enumerate() {
        for b in &labels.labels[i + 1..] {
            let d = distance(a.centre, b.centre);
            if d < min_separation {
                debug!(side = %labels.side, a = %a.text, b = %b.text, distance = d, "labels unusually close");
            }
        }
    }

    if !labels.converged {
        return labels
            .labels
            .iter()
            .map(|l| LabelledTick { value: l.value, position: l.centre, pseudo: true })
            .collect();
    }

    let centres = ticks.image_centres();
    let mut pairs: Vec<(f64, usize, usize)> = labels
        .labels
        .iter()
        .enumerate()
        .flat_map(|(i, l)| centres.iter().enumerate().map(move |(j, &c)| (distance(l.centre, c), i, j)))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut label_used = vec![false; labels.labels.len()];
    let mut tick_used = vec![false; centres.len()];
    let mut snapped = Vec::new();
    for (_, i, j) in pairs {
        if label_used[i] || tick_used[j] {
            continue;
        }
        label_used[i] = true;
        tick_used[j] = true;
        snapped.push(LabelledTick {
            value: labels.labels[i].value,
            position: centres[j],
            pseudo: false,
        });
    }

    let unmatched = label_used.iter().filter(|u| !**u).count();
    if unmatched > 0 {
        debug!(side = %labels.side, unmatched, "labels left without a tick");
    }

    snapped.sort_by(|a, b| a.position.1.total_cmp(&b.position.1));
    snapped
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
