// src/config.rs - Tunable thresholds for every pipeline stage

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{DopplerError, Result};

/// Configuration for the Doppler digitiser
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub input_path: String,
    pub output_base_dir: String,

    #[serde(default = "default_parallel")]
    pub use_parallel: bool,

    /// Path or name of the tesseract executable used by the CLI
    #[serde(default = "default_tesseract_binary")]
    pub tesseract_binary: String,

    #[serde(default = "default_tesseract_language")]
    pub tesseract_language: String,

    // Scan-type gate
    #[serde(default)]
    pub text_filter: TextFilter,

    #[serde(default = "default_gate_keep_fraction")]
    pub gate_keep_fraction: f64,

    #[serde(default = "default_gate_hsv_lower")]
    pub gate_hsv_lower: [u8; 3],

    #[serde(default = "default_gate_hsv_upper")]
    pub gate_hsv_upper: [u8; 3],

    #[serde(default = "default_cylinder_target_rgb")]
    pub cylinder_target_rgb: [u8; 3],

    #[serde(default = "default_cylinder_length")]
    pub cylinder_length: f64,

    #[serde(default = "default_cylinder_radius")]
    pub cylinder_radius: f64,

    #[serde(default = "default_gate_keywords")]
    pub gate_keywords: Vec<String>,

    #[serde(default = "default_gate_psm")]
    pub gate_psm: u32,

    #[serde(default = "default_min_word_confidence")]
    pub min_word_confidence: f32,

    /// Max y-centre distance (pixels) for two OCR words to share a line
    #[serde(default = "default_row_tolerance")]
    pub row_tolerance: f64,

    // Coarse segmentation
    #[serde(default = "default_grey_range_max")]
    pub grey_range_max: u8,

    #[serde(default = "default_grey_brightness_min")]
    pub grey_brightness_min: u8,

    #[serde(default = "default_tall_image_rows")]
    pub tall_image_rows: u32,

    #[serde(default = "default_tall_image_guard_rows")]
    pub tall_image_guard_rows: u32,

    #[serde(default = "default_short_image_guard_rows")]
    pub short_image_guard_rows: u32,

    #[serde(default = "default_min_object_size")]
    pub min_object_size: u32,

    #[serde(default = "default_max_hole_size")]
    pub max_hole_size: u32,

    // Axis ROIs
    #[serde(default = "default_roi_top_margin")]
    pub roi_top_margin: u32,

    #[serde(default = "default_right_legend_exclusion")]
    pub right_legend_exclusion: u32,

    // Refined segmentation
    #[serde(default = "default_refine_threshold")]
    pub refine_threshold: u8,

    #[serde(default = "default_refine_upward_extension")]
    pub refine_upward_extension: u32,

    #[serde(default = "default_refine_max_hole_size")]
    pub refine_max_hole_size: u32,

    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    #[serde(default = "default_inversion_tolerance")]
    pub inversion_tolerance: f64,

    // Tick detection
    #[serde(default = "default_tick_threshold")]
    pub tick_threshold: u8,

    #[serde(default = "default_right_glyph_column_limit")]
    pub right_glyph_column_limit: u32,

    #[serde(default = "default_tick_min_peak_height")]
    pub tick_min_peak_height: f64,

    #[serde(default = "default_tick_mad_multiplier")]
    pub tick_mad_multiplier: f64,

    // Label OCR
    #[serde(default = "default_label_threshold_start")]
    pub label_threshold_start: u8,

    #[serde(default = "default_label_threshold_end")]
    pub label_threshold_end: u8,

    #[serde(default = "default_label_threshold_step")]
    pub label_threshold_step: u8,

    #[serde(default = "default_label_whitelist")]
    pub label_whitelist: String,

    #[serde(default = "default_label_psm")]
    pub label_psm: u32,

    #[serde(default = "default_label_divisor")]
    pub label_divisor: f64,

    #[serde(default = "default_label_min_separation")]
    pub label_min_separation: f64,

    // Calibration
    #[serde(default = "default_curve_margin")]
    pub curve_margin: u32,

    #[serde(default = "default_peak_width_fraction")]
    pub peak_width_fraction: f64,

    #[serde(default = "default_peak_amplitude_fraction")]
    pub peak_amplitude_fraction: f64,
}

/// Colour filter used to isolate the overlay text before OCR
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextFilter {
    /// HSV slice (yellow-ish, saturated, bright)
    #[default]
    Hsv,
    /// Cylinder around a target colour in RGB space
    Cylinder,
}

fn default_parallel() -> bool {
    true
}

fn default_tesseract_binary() -> String {
    "tesseract".to_string()
}

fn default_tesseract_language() -> String {
    "eng".to_string()
}

fn default_gate_keep_fraction() -> f64 {
    0.45
}

fn default_gate_hsv_lower() -> [u8; 3] {
    [1, 100, 100]
}

fn default_gate_hsv_upper() -> [u8; 3] {
    [200, 255, 255]
}

fn default_cylinder_target_rgb() -> [u8; 3] {
    [255, 255, 0] // Overlay yellow
}

fn default_cylinder_length() -> f64 {
    100.0
}

fn default_cylinder_radius() -> f64 {
    100.0
}

fn default_gate_keywords() -> Vec<String> {
    ["PS", "ED", "S/D", "PI", "RI", "TAmax", "HR"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_gate_psm() -> u32 {
    3
}

fn default_min_word_confidence() -> f32 {
    1.0
}

fn default_row_tolerance() -> f64 {
    3.0
}

fn default_grey_range_max() -> u8 {
    100
}

fn default_grey_brightness_min() -> u8 {
    120
}

fn default_tall_image_rows() -> u32 {
    600
}

fn default_tall_image_guard_rows() -> u32 {
    400
}

fn default_short_image_guard_rows() -> u32 {
    20
}

fn default_min_object_size() -> u32 {
    200
}

fn default_max_hole_size() -> u32 {
    200
}

fn default_roi_top_margin() -> u32 {
    25
}

fn default_right_legend_exclusion() -> u32 {
    70
}

fn default_refine_threshold() -> u8 {
    30
}

fn default_refine_upward_extension() -> u32 {
    50
}

fn default_refine_max_hole_size() -> u32 {
    1000
}

fn default_blur_sigma() -> f32 {
    7.0
}

fn default_inversion_tolerance() -> f64 {
    0.25
}

fn default_tick_threshold() -> u8 {
    127
}

fn default_right_glyph_column_limit() -> u32 {
    15
}

fn default_tick_min_peak_height() -> f64 {
    3.0
}

fn default_tick_mad_multiplier() -> f64 {
    8.0
}

fn default_label_threshold_start() -> u8 {
    100
}

fn default_label_threshold_end() -> u8 {
    190
}

fn default_label_threshold_step() -> u8 {
    5
}

fn default_label_whitelist() -> String {
    "-0123456789".to_string()
}

fn default_label_psm() -> u32 {
    11 // sparse text
}

fn default_label_divisor() -> f64 {
    5.0
}

fn default_label_min_separation() -> f64 {
    20.0
}

fn default_curve_margin() -> u32 {
    20
}

fn default_peak_width_fraction() -> f64 {
    0.5
}

fn default_peak_amplitude_fraction() -> f64 {
    0.8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: "./input".to_string(),
            output_base_dir: "./output".to_string(),
            use_parallel: default_parallel(),
            tesseract_binary: default_tesseract_binary(),
            tesseract_language: default_tesseract_language(),
            text_filter: TextFilter::Hsv,
            gate_keep_fraction: default_gate_keep_fraction(),
            gate_hsv_lower: default_gate_hsv_lower(),
            gate_hsv_upper: default_gate_hsv_upper(),
            cylinder_target_rgb: default_cylinder_target_rgb(),
            cylinder_length: default_cylinder_length(),
            cylinder_radius: default_cylinder_radius(),
            gate_keywords: default_gate_keywords(),
            gate_psm: default_gate_psm(),
            min_word_confidence: default_min_word_confidence(),
            row_tolerance: default_row_tolerance(),
            grey_range_max: default_grey_range_max(),
            grey_brightness_min: default_grey_brightness_min(),
            tall_image_rows: default_tall_image_rows(),
            tall_image_guard_rows: default_tall_image_guard_rows(),
            short_image_guard_rows: default_short_image_guard_rows(),
            min_object_size: default_min_object_size(),
            max_hole_size: default_max_hole_size(),
            roi_top_margin: default_roi_top_margin(),
            right_legend_exclusion: default_right_legend_exclusion(),
            refine_threshold: default_refine_threshold(),
            refine_upward_extension: default_refine_upward_extension(),
            refine_max_hole_size: default_refine_max_hole_size(),
            blur_sigma: default_blur_sigma(),
            inversion_tolerance: default_inversion_tolerance(),
            tick_threshold: default_tick_threshold(),
            right_glyph_column_limit: default_right_glyph_column_limit(),
            tick_min_peak_height: default_tick_min_peak_height(),
            tick_mad_multiplier: default_tick_mad_multiplier(),
            label_threshold_start: default_label_threshold_start(),
            label_threshold_end: default_label_threshold_end(),
            label_threshold_step: default_label_threshold_step(),
            label_whitelist: default_label_whitelist(),
            label_psm: default_label_psm(),
            label_divisor: default_label_divisor(),
            label_min_separation: default_label_min_separation(),
            curve_margin: default_curve_margin(),
            peak_width_fraction: default_peak_width_fraction(),
            peak_amplitude_fraction: default_peak_amplitude_fraction(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            DopplerError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| DopplerError::ConfigLoad {
            source: e,
            path: path.to_path_buf(),
        })
    }

    /// Validate configuration values (does not touch the filesystem)
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.gate_keep_fraction) {
            return Err(DopplerError::Config(
                "gate_keep_fraction must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.gate_keywords.is_empty() {
            return Err(DopplerError::Config(
                "gate_keywords must not be empty".to_string(),
            ));
        }

        if self.cylinder_radius <= 0.0 || self.cylinder_length <= 0.0 {
            return Err(DopplerError::Config(
                "cylinder_radius and cylinder_length must be > 0.0".to_string(),
            ));
        }

        if self.row_tolerance <= 0.0 {
            return Err(DopplerError::Config(
                "row_tolerance must be > 0.0".to_string(),
            ));
        }

        if self.blur_sigma <= 0.0 {
            return Err(DopplerError::Config(
                "blur_sigma must be > 0.0".to_string(),
            ));
        }

        if self.inversion_tolerance <= 0.0 || self.inversion_tolerance >= 1.0 {
            return Err(DopplerError::Config(
                "inversion_tolerance must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.label_threshold_step == 0 {
            return Err(DopplerError::Config(
                "label_threshold_step must be > 0".to_string(),
            ));
        }

        if self.label_threshold_start >= self.label_threshold_end {
            return Err(DopplerError::Config(
                "label_threshold_start must be < label_threshold_end".to_string(),
            ));
        }

        if self.label_divisor <= 0.0 {
            return Err(DopplerError::Config(
                "label_divisor must be > 0.0".to_string(),
            ));
        }

        if self.tick_mad_multiplier <= 0.0 {
            return Err(DopplerError::Config(
                "tick_mad_multiplier must be > 0.0".to_string(),
            ));
        }

        if self.peak_width_fraction <= 0.0 || self.peak_amplitude_fraction <= 0.0 {
            return Err(DopplerError::Config(
                "peak_width_fraction and peak_amplitude_fraction must be > 0.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check that the configured input exists
    pub fn validate_paths(&self) -> Result<()> {
        let input_path = PathBuf::from(&self.input_path);
        if !input_path.exists() {
            return Err(DopplerError::InvalidPath(input_path));
        }
        Ok(())
    }

    /// Label binarisation thresholds swept by the tick-label OCR, `[start, end)`
    pub fn label_thresholds(&self) -> impl Iterator<Item = u8> {
        (self.label_threshold_start..self.label_threshold_end)
            .step_by(self.label_threshold_step.max(1) as usize)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            DopplerError::Config(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn label_sweep_excludes_end() {
        let config = Config::default();
        let thresholds: Vec<u8> = config.label_thresholds().collect();
        assert_eq!(thresholds.first(), Some(&100));
        assert_eq!(thresholds.last(), Some(&185));
        assert_eq!(thresholds.len(), 18);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            input_path = "scans"
            output_base_dir = "out"
            text_filter = "cylinder"
            row_tolerance = 5.0
            "#,
        )
        .unwrap();

        assert_eq!(config.text_filter, TextFilter::Cylinder);
        assert_eq!(config.row_tolerance, 5.0);
        assert_eq!(config.min_object_size, 200);
        assert_eq!(config.inversion_tolerance, 0.25);
    }

    #[test]
    fn rejects_inverted_sweep() {
        let config = Config {
            label_threshold_start: 190,
            label_threshold_end: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::default();
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.gate_keywords, config.gate_keywords);
        assert_eq!(loaded.label_whitelist, config.label_whitelist);
    }
}
