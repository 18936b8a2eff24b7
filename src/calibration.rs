// src/calibration.rs - Pixel to physical unit mapping and temporal scaling

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::labels::LabelledTick;
use crate::pipeline::Flag;
use crate::segmentation::TopCurve;
use crate::signal;

/// A pixel coordinate paired with the value it stands for
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisPoint {
    pub pixel: f64,
    pub value: f64,
}

/// Two-point calibration of both axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    /// Rows of the lowest and highest velocity labels
    pub velocity: [AxisPoint; 2],
    /// Columns mapped to 0 and 1 on the arbitrary time scale
    pub time: [AxisPoint; 2],
}

impl Calibration {
    /// Build the calibration from the labelled ticks of both axes.
    ///
    /// Velocity comes from the left labels with the smallest and largest
    /// value. Time runs from the column of the smallest left label (t = 0)
    /// to the column of the largest right label (t = 1).
    pub fn from_ticks(left: &[LabelledTick], right: &[LabelledTick]) -> Result<Self, Flag> {
        let low = left.iter().min_by(|a, b| a.value.total_cmp(&b.value));
        let high = left.iter().max_by(|a, b| a.value.total_cmp(&b.value));
        let (low, high) = match (low, high) {
            (Some(l), Some(h)) if h.value > l.value && h.position.1 != l.position.1 => (l, h),
            _ => {
                warn!(labels = left.len(), "need two distinct velocity labels");
                return Err(Flag::InsufficientTicks);
            }
        };

        let Some(right_high) = right.iter().max_by(|a, b| a.value.total_cmp(&b.value)) else {
            warn!("no labelled ticks on the time axis");
            return Err(Flag::InsufficientTicks);
        };

        let x_left = low.position.0;
        let x_right = right_high.position.0;
        if x_right <= x_left {
            warn!(x_left, x_right, "time axis runs backwards");
            return Err(Flag::InsufficientTicks);
        }

        Ok(Self {
            velocity: [
                AxisPoint { pixel: low.position.1, value: low.value },
                AxisPoint { pixel: high.position.1, value: high.value },
            ],
            time: [
                AxisPoint { pixel: x_left, value: 0.0 },
                AxisPoint { pixel: x_right, value: 1.0 },
            ],
        })
    }

    pub fn velocity_at(&self, row: f64) -> f64 {
        interpolate(&self.velocity, row)
    }

    pub fn time_at(&self, column: f64) -> f64 {
        interpolate(&self.time, column)
    }
}

fn interpolate(points: &[AxisPoint; 2], pixel: f64) -> f64 {
    let [a, b] = points;
    (pixel - a.pixel) / (b.pixel - a.pixel) * (b.value - a.value) + a.value
}

/// One digitised point: time (arbitrary or seconds) and velocity
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveformSample {
    pub t: f64,
    pub v: f64,
}

/// Convert the envelope between the two time ticks into samples.
///
/// Columns within `margin` of either time tick are skipped. A waveform whose
/// mean velocity is negative is flipped. Returns `None` when no column is
/// left.
pub fn digitise_curve(curve: &TopCurve, calibration: &Calibration, margin: u32) -> Option<Vec<WaveformSample>> {
    let start = calibration.time[0].pixel + margin as f64;
    let end = calibration.time[1].pixel - margin as f64;

    let mut samples: Vec<WaveformSample> = curve
        .samples
        .iter()
        .filter(|s| (s.x as f64) >= start && (s.x as f64) <= end)
        .map(|s| WaveformSample {
            t: calibration.time_at(s.x as f64),
            v: calibration.velocity_at(s.y),
        })
        .filter(|s| s.t.is_finite() && s.v.is_finite())
        .collect();

    if samples.is_empty() {
        return None;
    }

    let mean_v = samples.iter().map(|s| s.v).sum::<f64>() / samples.len() as f64;
    if mean_v < 0.0 {
        debug!(mean_v, "flipping velocity sign");
        for s in &mut samples {
            s.v = -s.v;
        }
    }

    Some(samples)
}

/// Systolic peaks and diastolic troughs of a digitised waveform
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CardiacCycles {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
}

/// Find peaks and troughs and drop the anomalous ones.
///
/// Troughs narrower than half the mean trough width are dropped. Peaks must
/// be wider than half the mean peak width and higher than a fraction of the
/// mean peak height.
pub fn detect_cycles(v: &[f64], config: &Config) -> CardiacCycles {
    let rel_height = config.peak_width_fraction;

    let peaks = signal::find_peaks(v, None);
    let inverted: Vec<f64> = v.iter().map(|x| -x).collect();
    let troughs = signal::find_peaks(&inverted, None);

    let trough_widths = signal::peak_widths(&inverted, &troughs, rel_height);
    let troughs = match signal::mean(&trough_widths) {
        Some(mean_width) => troughs
            .iter()
            .zip(&trough_widths)
            .filter(|(_, w)| **w > mean_width / 2.0)
            .map(|(&t, _)| t)
            .collect(),
        None => Vec::new(),
    };

    let peak_widths = signal::peak_widths(v, &peaks, rel_height);
    let peak_heights: Vec<f64> = peaks.iter().map(|&p| v[p]).collect();
    let peaks = match (signal::mean(&peak_widths), signal::mean(&peak_heights)) {
        (Some(mean_width), Some(mean_height)) => peaks
            .iter()
            .zip(&peak_widths)
            .filter(|(p, w)| **w > mean_width / 2.0 && v[**p] > mean_height * config.peak_amplitude_fraction)
            .map(|(&p, _)| p)
            .collect(),
        _ => Vec::new(),
    };

    CardiacCycles { peaks, troughs }
}

/// Length of one cardiac cycle on the arbitrary time scale.
///
/// The first peak is skipped when there are three or more, since it is
/// often clipped by the edge of the display.
pub fn arbitrary_period(t: &[f64], peaks: &[usize]) -> Option<f64> {
    let period = match peaks.len() {
        0 | 1 => return None,
        2 => t[peaks[1]] - t[peaks[0]],
        n => (t[peaks[n - 1]] - t[peaks[1]]) / (n - 2) as f64,
    };
    (period.is_finite() && period > 0.0).then_some(period)
}

/// Put the time axis in seconds given a heart rate in beats per minute
pub fn rescale_time(samples: &mut [WaveformSample], heart_rate: f64, period: f64) {
    let real_period = 60.0 / heart_rate;
    let scale = real_period / period;
    for s in samples {
        s.t *= scale;
    }
}

/// RMS residual (value units) of a straight line fitted through the labelled
/// ticks of the velocity axis.
///
/// Large values point at a misread label.
pub fn axis_residual(points: &[LabelledTick]) -> Option<f64> {
    if points.len() < 3 {
        return None;
    }

    let n = points.len();
    let design = DMatrix::from_fn(n, 2, |r, c| if c == 0 { points[r].position.1 } else { 1.0 });
    let values = DVector::from_iterator(n, points.iter().map(|p| p.value));

    let svd = design.clone().svd(true, true);
    let coefficients = svd.solve(&values, 1e-9).ok()?;
    let residuals = &design * coefficients - &values;

    Some((residuals.norm_squared() / n as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::CurveSample;
    use assert_approx_eq::assert_approx_eq;

    fn tick(value: f64, x: f64, y: f64) -> LabelledTick {
        LabelledTick { value, position: (x, y), pseudo: false }
    }

    fn left_axis() -> Vec<LabelledTick> {
        // 3 px per unit, zero at row 300
        [-20.0, 0.0, 20.0, 40.0, 60.0, 80.0]
            .iter()
            .map(|&v| tick(v, 50.0, 300.0 - 3.0 * v))
            .collect()
    }

    fn right_axis() -> Vec<LabelledTick> {
        vec![tick(0.0, 650.0, 300.0), tick(50.0, 650.0, 150.0)]
    }

    #[test]
    fn calibration_maps_label_pixels_to_values() {
        let cal = Calibration::from_ticks(&left_axis(), &right_axis()).unwrap();
        assert_approx_eq!(cal.velocity_at(300.0), 0.0);
        assert_approx_eq!(cal.velocity_at(180.0), 40.0);
        assert_approx_eq!(cal.time_at(50.0), 0.0);
        assert_approx_eq!(cal.time_at(650.0), 1.0);
        assert_approx_eq!(cal.time_at(350.0), 0.5);
    }

    #[test]
    fn calibration_needs_two_values_and_a_right_label() {
        let one = vec![tick(40.0, 50.0, 180.0)];
        assert_eq!(Calibration::from_ticks(&one, &right_axis()), Err(Flag::InsufficientTicks));
        assert_eq!(Calibration::from_ticks(&left_axis(), &[]), Err(Flag::InsufficientTicks));

        let behind = vec![tick(50.0, 10.0, 150.0)];
        assert_eq!(Calibration::from_ticks(&left_axis(), &behind), Err(Flag::InsufficientTicks));
    }

    #[test]
    fn digitising_respects_margin_and_flips_negative() {
        let cal = Calibration::from_ticks(&left_axis(), &right_axis()).unwrap();
        // A flat line 30 units below zero
        let curve = TopCurve {
            samples: (0..700).map(|x| CurveSample { x, y: 390.0 }).collect(),
        };
        let samples = digitise_curve(&curve, &cal, 20).unwrap();

        assert_eq!(samples.len(), (630 - 70 + 1) as usize);
        assert!(samples.iter().all(|s| (s.v - 30.0).abs() < 1e-9));
        assert!(samples.windows(2).all(|w| w[1].t > w[0].t));
    }

    #[test]
    fn digitising_outside_window_gives_nothing() {
        let cal = Calibration::from_ticks(&left_axis(), &right_axis()).unwrap();
        let curve = TopCurve {
            samples: (0..60).map(|x| CurveSample { x, y: 200.0 }).collect(),
        };
        assert!(digitise_curve(&curve, &cal, 20).is_none());
    }

    fn cosine_wave(cycles: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let phase = i as f64 / n as f64 * cycles;
                30.0 + 30.0 * (1.0 - (2.0 * std::f64::consts::PI * phase).cos()) / 2.0
            })
            .collect()
    }

    #[test]
    fn cycles_of_a_clean_wave() {
        let v = cosine_wave(3.0, 600);
        let cycles = detect_cycles(&v, &Config::default());
        assert_eq!(cycles.peaks, vec![100, 300, 500]);
        assert_eq!(cycles.troughs, vec![200, 400]);
    }

    #[test]
    fn small_bumps_are_not_peaks() {
        let mut v = cosine_wave(3.0, 600);
        // a shallow notch on the diastolic run-off
        v[250] += 0.5;
        let cycles = detect_cycles(&v, &Config::default());
        assert_eq!(cycles.peaks, vec![100, 300, 500]);
    }

    #[test]
    fn period_skips_first_peak() {
        let t: Vec<f64> = (0..600).map(|i| i as f64 / 600.0).collect();
        assert_approx_eq!(arbitrary_period(&t, &[100, 300, 500]).unwrap(), 200.0 / 600.0);
        assert_approx_eq!(arbitrary_period(&t, &[100, 300]).unwrap(), 200.0 / 600.0);
        assert_eq!(arbitrary_period(&t, &[100]), None);
    }

    #[test]
    fn rescaling_to_heart_rate() {
        let mut samples = vec![WaveformSample { t: 0.5, v: 1.0 }];
        rescale_time(&mut samples, 60.0, 0.25);
        assert_approx_eq!(samples[0].t, 2.0);
    }

    #[test]
    fn residual_flags_a_misread_label() {
        assert_approx_eq!(axis_residual(&left_axis()).unwrap(), 0.0, 1e-6);

        let mut bad = left_axis();
        bad[3].value = 45.0;
        assert!(axis_residual(&bad).unwrap() > 1.0);
        assert_eq!(axis_residual(&bad[..2]), None);
    }
}
