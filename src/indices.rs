// src/indices.rs - Clinical indices recomputed from the digitised waveform

use serde::Serialize;

use crate::calibration::CardiacCycles;
use crate::report::{ReportKey, ReportTable};
use crate::signal;

/// Indices derived from peak, trough and mean velocity
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DerivedIndices {
    pub ps: f64,
    pub ed: f64,
    pub sd: f64,
    pub ri: f64,
    pub ta_max: f64,
    pub pi: f64,
}

impl DerivedIndices {
    /// Compute the indices from velocities and the retained peaks/troughs.
    ///
    /// Returns `None` when there is no peak or no trough to average.
    pub fn from_cycles(v: &[f64], cycles: &CardiacCycles) -> Option<Self> {
        let peak_values: Vec<f64> = cycles.peaks.iter().map(|&i| v[i]).collect();
        let trough_values: Vec<f64> = cycles.troughs.iter().map(|&i| v[i]).collect();

        let p = signal::mean(&peak_values)?;
        let e = signal::mean(&trough_values)?;
        let m = signal::mean(v)?;

        Some(Self {
            ps: p,
            ed: e,
            sd: p / e,
            ri: (p - e) / p,
            ta_max: (p + 2.0 * e) / 3.0,
            pi: (p - e) / m,
        })
    }

    /// Same indices rounded to two decimals
    pub fn rounded(&self) -> Self {
        let r = |x: f64| (x * 100.0).round() / 100.0;
        Self {
            ps: r(self.ps),
            ed: r(self.ed),
            sd: r(self.sd),
            ri: r(self.ri),
            ta_max: r(self.ta_max),
            pi: r(self.pi),
        }
    }

    pub fn entries(&self) -> [(ReportKey, f64); 6] {
        [
            (ReportKey::PeakSystolic, self.ps),
            (ReportKey::EndDiastolic, self.ed),
            (ReportKey::SystolicDiastolicRatio, self.sd),
            (ReportKey::ResistiveIndex, self.ri),
            (ReportKey::TimeAveragedMax, self.ta_max),
            (ReportKey::PulsatilityIndex, self.pi),
        ]
    }

    /// Write the rounded indices next to the scanner's values
    pub fn fill_table(&self, table: &mut ReportTable) {
        for (key, value) in self.rounded().entries() {
            if value.is_finite() {
                table.set_digitised(key, value);
            }
        }
    }
}
