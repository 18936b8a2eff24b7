// src/pipeline.rs - The seven digitisation stages, threaded explicitly

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calibration::{self, CardiacCycles, Calibration, WaveformSample};
use crate::config::Config;
use crate::errors::Result;
use crate::gate::{self, GateOutcome};
use crate::image_io::{save_image, InputImage};
use crate::image_utils::BoundingBox;
use crate::indices::DerivedIndices;
use crate::labels::{self, LabelSet, LabelledTick};
use crate::morphology::ImageOps;
use crate::ocr::TextRecognizer;
use crate::output::{self, ImageSummary};
use crate::report::{ReportKey, ReportTable};
use crate::roi::{self, AxisRoi};
use crate::segmentation::{self, TopCurve};
use crate::ticks::{self, TickSet};

/// Smallest image side the pipeline will look at
const MIN_IMAGE_SIDE: u32 = 64;

/// Content-level outcome markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Flag {
    /// The overlay has no Doppler measurement keywords
    NotDoppler,
    NoWaveformFound,
    /// An axis has too few ticks or labels to calibrate
    InsufficientTicks,
    /// OCR never produced clean labels; box centres were used as ticks
    LabelsDidNotConverge,
    /// Envelope was taken from the bottom edge
    Inverted,
    /// No heart rate on the overlay; time stays on the 0..1 scale
    HRMissing,
    /// Too few systolic peaks to measure a cycle; time stays on the 0..1 scale
    PeriodUndetermined,
}

impl Flag {
    /// Flags that stop the pipeline
    pub fn is_terminal(&self) -> bool {
        matches!(self, Flag::NotDoppler | Flag::NoWaveformFound | Flag::InsufficientTicks)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Envelope of the refined waveform and where it came from
#[derive(Debug, Clone, Serialize)]
pub struct RefinedSummary {
    pub curve: TopCurve,
    pub centroid: (f64, f64),
    pub inverted: bool,
}

/// Intermediate geometry of every stage that ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stages {
    pub gate: Option<GateOutcome>,
    pub coarse_bounds: Option<BoundingBox>,
    pub left_roi: Option<AxisRoi>,
    pub right_roi: Option<AxisRoi>,
    pub refined: Option<RefinedSummary>,
    pub left_ticks: Option<TickSet>,
    pub right_ticks: Option<TickSet>,
    pub left_labels: Option<LabelSet>,
    pub right_labels: Option<LabelSet>,
    pub left_points: Vec<LabelledTick>,
    pub right_points: Vec<LabelledTick>,
    pub calibration: Option<Calibration>,
    pub cycles: Option<CardiacCycles>,
    pub indices: Option<DerivedIndices>,
}

/// Everything `digitise` found out about one screenshot
#[derive(Debug, Clone, Serialize)]
pub struct Digitisation {
    pub waveform: Vec<WaveformSample>,
    pub table: ReportTable,
    pub flags: BTreeSet<Flag>,
    pub stages: Stages,
    /// RMS misfit of the velocity labels to a straight line
    pub axis_residual: Option<f64>,
}

impl Digitisation {
    /// No terminal flag was raised
    pub fn is_complete(&self) -> bool {
        !self.flags.iter().any(Flag::is_terminal)
    }

    fn stopped(flag: Flag, mut flags: BTreeSet<Flag>, table: ReportTable, stages: Stages) -> Self {
        warn!(flag = %flag, "digitisation stopped");
        flags.insert(flag);
        Self {
            waveform: Vec::new(),
            table,
            flags,
            stages,
            axis_residual: None,
        }
    }
}

/// Digitise one Doppler screenshot.
///
/// Content problems are reported as flags; an `Err` only comes from the
/// collaborators (OCR process, I/O).
pub fn digitise(
    image: &RgbImage,
    ops: &dyn ImageOps,
    recognizer: &dyn TextRecognizer,
    config: &Config,
) -> Result<Digitisation> {
    let mut flags = BTreeSet::new();
    let mut stages = Stages::default();
    let (width, height) = image.dimensions();

    // Step 1: scan-type gate
    let gate = gate::run_gate(image, ops, recognizer, config)?;
    let is_doppler = gate.is_doppler;
    let mut table = gate.table.clone();
    stages.gate = Some(gate);
    if !is_doppler {
        return Ok(Digitisation::stopped(Flag::NotDoppler, flags, ReportTable::default(), stages));
    }

    if width < MIN_IMAGE_SIDE || height < MIN_IMAGE_SIDE {
        debug!(width, height, "image too small");
        return Ok(Digitisation::stopped(Flag::NoWaveformFound, flags, table, stages));
    }

    // Step 2: coarse waveform segmentation
    let Some(coarse) = segmentation::coarse_segmentation(image, ops, config) else {
        return Ok(Digitisation::stopped(Flag::NoWaveformFound, flags, table, stages));
    };
    stages.coarse_bounds = Some(coarse.bounds);

    // Step 3: axis ROIs
    let (left_roi, right_roi) = roi::derive_axis_rois(&coarse.bounds, width, height, config);
    stages.left_roi = Some(left_roi);
    stages.right_roi = Some(right_roi);
    if left_roi.is_empty() || right_roi.is_empty() {
        return Ok(Digitisation::stopped(Flag::InsufficientTicks, flags, table, stages));
    }

    // Step 4: refined segmentation and envelope
    let Some(refined) = segmentation::refine_segmentation(image, &coarse.bounds, ops, config) else {
        return Ok(Digitisation::stopped(Flag::NoWaveformFound, flags, table, stages));
    };
    if refined.inverted {
        flags.insert(Flag::Inverted);
    }
    stages.refined = Some(RefinedSummary {
        curve: refined.curve.clone(),
        centroid: refined.centroid,
        inverted: refined.inverted,
    });

    // Step 5: ticks on both axes
    let grey = ops.grey(image);
    let left_ticks = ticks::detect_ticks(&grey, &left_roi, ops, config);
    let right_ticks = ticks::detect_ticks(&grey, &right_roi, ops, config);
    let (Some(left_ticks), Some(right_ticks)) = (left_ticks, right_ticks) else {
        return Ok(Digitisation::stopped(Flag::InsufficientTicks, flags, table, stages));
    };

    // Step 6: labels, snapped to ticks
    let left_labels = labels::read_labels(&grey, &left_ticks, recognizer, config)?;
    let right_labels = labels::read_labels(&grey, &right_ticks, recognizer, config)?;
    if !left_labels.converged || !right_labels.converged {
        flags.insert(Flag::LabelsDidNotConverge);
    }
    let left_points = labels::snap_labels(&left_labels, &left_ticks, config.label_min_separation);
    let right_points = labels::snap_labels(&right_labels, &right_ticks, config.label_min_separation);

    stages.left_ticks = Some(left_ticks);
    stages.right_ticks = Some(right_ticks);
    stages.left_labels = Some(left_labels);
    stages.right_labels = Some(right_labels);
    stages.left_points = left_points;
    stages.right_points = right_points;

    // Step 7: calibration, digitisation and indices
    let calibration = match Calibration::from_ticks(&stages.left_points, &stages.right_points) {
        Ok(c) => c,
        Err(flag) => return Ok(Digitisation::stopped(flag, flags, table, stages)),
    };
    stages.calibration = Some(calibration);
    let axis_residual = calibration::axis_residual(&stages.left_points);

    let Some(mut waveform) = calibration::digitise_curve(&refined.curve, &calibration, config.curve_margin) else {
        return Ok(Digitisation::stopped(Flag::NoWaveformFound, flags, table, stages));
    };

    let velocities: Vec<f64> = waveform.iter().map(|s| s.v).collect();
    let times: Vec<f64> = waveform.iter().map(|s| s.t).collect();
    let cycles = calibration::detect_cycles(&velocities, config);

    let heart_rate = table.ocr_value(ReportKey::HeartRate).filter(|hr| *hr > 0.0);
    let period = calibration::arbitrary_period(&times, &cycles.peaks);
    match (heart_rate, period) {
        (Some(hr), Some(period)) => {
            calibration::rescale_time(&mut waveform, hr, period);
            debug!(heart_rate = hr, arbitrary_period = period, "time axis in seconds");
        }
        (hr, period) => {
            if hr.is_none() {
                flags.insert(Flag::HRMissing);
            }
            if period.is_none() {
                flags.insert(Flag::PeriodUndetermined);
            }
        }
    }

    if let Some(indices) = DerivedIndices::from_cycles(&velocities, &cycles) {
        indices.fill_table(&mut table);
        stages.indices = Some(indices);
    } else {
        warn!(peaks = cycles.peaks.len(), troughs = cycles.troughs.len(), "indices not computed");
    }
    stages.cycles = Some(cycles);

    info!(
        samples = waveform.len(),
        flags = ?flags,
        axis_residual = ?axis_residual,
        "digitisation complete"
    );

    Ok(Digitisation {
        waveform,
        table,
        flags,
        stages,
        axis_residual,
    })
}

/// Digitise one loaded screenshot and write its outputs
pub fn process_image(
    input_image: InputImage,
    ops: &dyn ImageOps,
    recognizer: &dyn TextRecognizer,
    config: &Config,
    debug: bool,
) -> Result<ImageSummary> {
    let InputImage { image, path, filename } = input_image;

    let subfolder = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("root")
        .to_string();

    let result = digitise(&image, ops, recognizer, config)?;
    let output_dir = PathBuf::from(&config.output_base_dir);

    if result.is_complete() {
        output::write_waveform_csv(&result.waveform, &output_dir, &filename)?;
    }
    if !result.table.is_empty() {
        output::write_report_csv(&result.table, &output_dir, &filename)?;
    }

    if debug {
        let debug_dir = output_dir.join("debug");
        std::fs::create_dir_all(&debug_dir)?;

        output::write_json(&result, debug_dir.join(format!("{}.json", filename)))?;
        let annotated = output::annotate(&image, &result);
        save_image(&annotated, debug_dir.join(format!("{}_annotated.png", filename)))?;
    }

    Ok(ImageSummary::new(&filename, &subfolder, &result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_flags() {
        assert!(Flag::NotDoppler.is_terminal());
        assert!(Flag::InsufficientTicks.is_terminal());
        assert!(!Flag::LabelsDidNotConverge.is_terminal());
        assert!(!Flag::HRMissing.is_terminal());
    }

    #[test]
    fn flags_serialise_by_name() {
        let flags: BTreeSet<Flag> = [Flag::HRMissing, Flag::Inverted].into_iter().collect();
        assert_eq!(serde_json::to_string(&flags).unwrap(), r#"["Inverted","HRMissing"]"#);
    }
}
