// src/signal.rs - 1-D peak finding and robust statistics

/// Indices of local maxima, plateau-aware.
///
/// A flat top counts as a single peak located at its (lower) midpoint. The
/// first and last samples are never peaks. When `min_height` is given, peaks
/// below it are dropped.
pub fn find_peaks(signal: &[f64], min_height: Option<f64>) -> Vec<usize> {
    let n = signal.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }

    let i_max = n - 1;
    let mut i = 1;
    while i < i_max {
        if signal[i - 1] < signal[i] {
            let mut i_ahead = i + 1;
            while i_ahead < i_max && signal[i_ahead] == signal[i] {
                i_ahead += 1;
            }

            if signal[i_ahead] < signal[i] {
                let midpoint = (i + i_ahead - 1) / 2;
                peaks.push(midpoint);
                i = i_ahead;
            }
        }
        i += 1;
    }

    if let Some(h) = min_height {
        peaks.retain(|&p| signal[p] >= h);
    }

    peaks
}

/// Topographic prominence of a peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prominence {
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
}

/// Prominence of each peak, searching the whole signal on both sides
pub fn peak_prominences(signal: &[f64], peaks: &[usize]) -> Vec<Prominence> {
    peaks
        .iter()
        .map(|&peak| {
            let top = signal[peak];

            let mut left_min = top;
            let mut left_base = peak;
            let mut i = peak as isize;
            while i >= 0 && signal[i as usize] <= top {
                if signal[i as usize] < left_min {
                    left_min = signal[i as usize];
                    left_base = i as usize;
                }
                i -= 1;
            }

            let mut right_min = top;
            let mut right_base = peak;
            let mut i = peak;
            while i < signal.len() && signal[i] <= top {
                if signal[i] < right_min {
                    right_min = signal[i];
                    right_base = i;
                }
                i += 1;
            }

            Prominence {
                prominence: top - left_min.max(right_min),
                left_base,
                right_base,
            }
        })
        .collect()
}

/// Width of each peak at `rel_height` of its prominence, with linear
/// interpolation between samples
pub fn peak_widths(signal: &[f64], peaks: &[usize], rel_height: f64) -> Vec<f64> {
    let prominences = peak_prominences(signal, peaks);

    peaks
        .iter()
        .zip(prominences)
        .map(|(&peak, prom)| {
            let height = signal[peak] - prom.prominence * rel_height;

            let mut i = peak;
            while prom.left_base < i && height < signal[i] {
                i -= 1;
            }
            let mut left_ip = i as f64;
            if signal[i] < height {
                left_ip += (height - signal[i]) / (signal[i + 1] - signal[i]);
            }

            let mut i = peak;
            while i < prom.right_base && height < signal[i] {
                i += 1;
            }
            let mut right_ip = i as f64;
            if signal[i] < height {
                right_ip -= (height - signal[i]) / (signal[i - 1] - signal[i]);
            }

            right_ip - left_ip
        })
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Keep-mask for values within `m` median absolute deviations of the median.
///
/// A zero MAD is treated as 1 so identical values are never rejected.
pub fn mad_inliers(values: &[f64], m: f64) -> Vec<bool> {
    let Some(centre) = median(values) else {
        return Vec::new();
    };
    let deviations: Vec<f64> = values.iter().map(|v| (v - centre).abs()).collect();
    let mad = median(&deviations).unwrap_or(0.0);
    let scale = if mad > 0.0 { mad } else { 1.0 };
    deviations.iter().map(|d| d / scale < m).collect()
}
