// src/report.rs - Measurement table read from the scanner overlay

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::rows::TextLine;

/// Measurements the scanner prints next to the spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ReportKey {
    #[serde(rename = "PS")]
    PeakSystolic,
    #[serde(rename = "ED")]
    EndDiastolic,
    #[serde(rename = "S/D")]
    SystolicDiastolicRatio,
    #[serde(rename = "RI")]
    ResistiveIndex,
    #[serde(rename = "TAmax")]
    TimeAveragedMax,
    #[serde(rename = "PI")]
    PulsatilityIndex,
    #[serde(rename = "HR")]
    HeartRate,
    #[serde(rename = "MD")]
    MinimumDiastolic,
}

impl ReportKey {
    pub const ALL: [ReportKey; 8] = [
        ReportKey::PeakSystolic,
        ReportKey::EndDiastolic,
        ReportKey::SystolicDiastolicRatio,
        ReportKey::ResistiveIndex,
        ReportKey::TimeAveragedMax,
        ReportKey::PulsatilityIndex,
        ReportKey::HeartRate,
        ReportKey::MinimumDiastolic,
    ];

    /// Abbreviation as printed on screen
    pub fn label(&self) -> &'static str {
        match self {
            ReportKey::PeakSystolic => "PS",
            ReportKey::EndDiastolic => "ED",
            ReportKey::SystolicDiastolicRatio => "S/D",
            ReportKey::ResistiveIndex => "RI",
            ReportKey::TimeAveragedMax => "TAmax",
            ReportKey::PulsatilityIndex => "PI",
            ReportKey::HeartRate => "HR",
            ReportKey::MinimumDiastolic => "MD",
        }
    }

    fn from_token(token: &str) -> Option<(ReportKey, Option<&str>)> {
        ReportKey::ALL.iter().find_map(|key| {
            match_keyword(token, key.label()).map(|prefix| (*key, prefix))
        })
    }
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Match a token against a keyword, either exactly or as the suffix of a
/// hyphenated token (`Umb-PS`).
///
/// Returns `Some(None)` for an exact match and `Some(Some(prefix))` for a
/// hyphenated one.
pub fn match_keyword<'a>(token: &'a str, keyword: &str) -> Option<Option<&'a str>> {
    if token == keyword {
        return Some(None);
    }
    let (prefix, suffix) = token.rsplit_once('-')?;
    if suffix == keyword && !prefix.is_empty() {
        Some(Some(prefix))
    } else {
        None
    }
}

/// One row of the comparison table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub key: ReportKey,
    /// Vessel prefix such as `Umb` or `Lt Ut`
    pub vessel: Option<String>,
    /// Value printed by the scanner
    pub ocr_value: Option<f64>,
    pub unit: String,
    /// Value recomputed from the digitised waveform
    pub digitised_value: Option<f64>,
    pub abs_difference: Option<f64>,
    pub rel_difference: Option<f64>,
}

impl ReportRow {
    fn new(key: ReportKey) -> Self {
        Self {
            key,
            vessel: None,
            ocr_value: None,
            unit: String::new(),
            digitised_value: None,
            abs_difference: None,
            rel_difference: None,
        }
    }
}

/// Scanner-reported values next to the digitised ones, at most one row per key
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportTable {
    pub rows: Vec<ReportRow>,
}

impl ReportTable {
    /// Read every known measurement out of the OCR lines.
    ///
    /// The first occurrence of a key wins.
    pub fn from_lines(lines: &[TextLine]) -> Self {
        let mut table = ReportTable::default();

        for (line_no, line) in lines.iter().enumerate() {
            let tokens: Vec<&str> = line.tokens().collect();
            let keyed: Vec<(usize, ReportKey, Option<&str>)> = tokens
                .iter()
                .enumerate()
                .filter_map(|(i, t)| ReportKey::from_token(t).map(|(k, p)| (i, k, p)))
                .collect();

            for (n, &(index, key, prefix)) in keyed.iter().enumerate() {
                if table.get(key).is_some() {
                    debug!(key = %key, line = line_no, "duplicate measurement ignored");
                    continue;
                }

                // A key owns the tokens up to the next key on the same line;
                // only the first key can have a vessel name written before it
                let before: &[&str] = if n == 0 { &tokens[..index] } else { &[] };
                let segment_end = keyed.get(n + 1).map(|k| k.0).unwrap_or(tokens.len());

                let mut row = ReportRow::new(key);
                row.vessel = vessel_name(before, prefix);

                match last_number(&tokens[index + 1..segment_end]) {
                    Some((value, unit)) => {
                        row.ocr_value = Some(value);
                        row.unit = unit;
                    }
                    None => warn!(key = %key, line = %line.text(), "no numeric value for measurement"),
                }

                table.rows.push(row);
            }
        }

        table
    }

    pub fn get(&self, key: ReportKey) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.key == key)
    }

    pub fn ocr_value(&self, key: ReportKey) -> Option<f64> {
        self.get(key).and_then(|r| r.ocr_value)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Record a recomputed value, adding a row when the overlay had none
    pub fn set_digitised(&mut self, key: ReportKey, value: f64) {
        let index = match self.rows.iter().position(|r| r.key == key) {
            Some(i) => i,
            None => {
                self.rows.push(ReportRow::new(key));
                self.rows.len() - 1
            }
        };

        let row = &mut self.rows[index];
        row.digitised_value = Some(value);
        if let Some(reported) = row.ocr_value {
            let diff = value - reported;
            row.abs_difference = Some(diff.abs());
            row.rel_difference = (reported != 0.0).then(|| diff.abs() / reported.abs());
            if diff.abs() > f64::EPSILON {
                debug!(key = %key, reported, digitised = value, "measurement differs from overlay");
            }
        }
    }
}

fn vessel_name(before: &[&str], prefix: Option<&str>) -> Option<String> {
    let mut parts: Vec<&str> = before
        .iter()
        .copied()
        .filter(|t| split_number(t).is_none())
        .collect();
    if let Some(p) = prefix {
        parts.push(p);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Last number among `tokens` together with its unit
fn last_number(tokens: &[&str]) -> Option<(f64, String)> {
    tokens.iter().enumerate().rev().find_map(|(i, token)| {
        let (value, glued) = split_number(token)?;
        let unit = if !glued.is_empty() {
            glued.to_string()
        } else {
            tokens
                .get(i + 1)
                .filter(|t| split_number(t).is_none())
                .map(|t| t.to_string())
                .unwrap_or_default()
        };
        Some((value, unit))
    })
}

/// Split a token into a leading number and whatever follows it (`45.3cm/s`)
fn split_number(token: &str) -> Option<(f64, &str)> {
    let bytes = token.as_bytes();
    let mut end = 0;
    if bytes.first() == Some(&b'-') {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    let value = token[..end].parse::<f64>().ok()?;
    Some((value, &token[end..]))
}
