// src/ocr.rs - OCR collaborator interface and the tesseract CLI backend

use std::process::Command;

use image::{GrayImage, ImageFormat};
use serde::Serialize;
use tracing::debug;

use crate::errors::{DopplerError, Result};

/// One word reported by an OCR engine, in the coordinates of the image it was given
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrWord {
    pub text: String,
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    /// Engine confidence in [-1, 100]
    pub confidence: f32,
}

impl OcrWord {
    pub fn new(text: &str, left: i32, top: i32, width: u32, height: u32, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            left,
            top,
            width,
            height,
            confidence,
        }
    }

    /// Centre of the bounding box as (x, y)
    pub fn centre(&self) -> (f64, f64) {
        (
            self.left as f64 + self.width as f64 / 2.0,
            self.top as f64 + self.height as f64 / 2.0,
        )
    }
}

/// What to read and how
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    pub image: &'a GrayImage,
    /// Position of `image` inside the full screenshot. Returned boxes are
    /// still relative to `image`.
    pub origin: (u32, u32),
    pub whitelist: Option<&'a str>,
    /// Tesseract page-segmentation mode (3 = auto, 11 = sparse text)
    pub page_segmentation: u32,
}

/// Every OCR backend implements this.
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;
    fn recognize(&self, request: &OcrRequest<'_>) -> Result<Vec<OcrWord>>;
}

/// Runs the `tesseract` executable on a temporary PNG and parses its TSV output
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: String,
    language: String,
}

impl TesseractCli {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            language: "eng".to_string(),
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl TextRecognizer for TesseractCli {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<Vec<OcrWord>> {
        if request.image.width() == 0 || request.image.height() == 0 {
            return Ok(Vec::new());
        }

        let tmp = tempfile::Builder::new().suffix(".png").tempfile()?;
        request.image.save_with_format(tmp.path(), ImageFormat::Png)?;

        let mut command = Command::new(&self.binary);
        command
            .arg(tmp.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--psm")
            .arg(request.page_segmentation.to_string());
        if let Some(whitelist) = request.whitelist {
            command.arg("-c").arg(format!("tessedit_char_whitelist={}", whitelist));
        }
        command.arg("tsv");

        let output = command.output().map_err(|e| {
            DopplerError::Ocr(format!("failed to run '{}': {}", self.binary, e))
        })?;

        if !output.status.success() {
            return Err(DopplerError::Ocr(format!(
                "'{}' exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let words = parse_tsv(&String::from_utf8_lossy(&output.stdout))?;
        debug!(
            origin = ?request.origin,
            psm = request.page_segmentation,
            words = words.len(),
            "tesseract pass complete"
        );
        Ok(words)
    }
}

/// Word-level rows (level 5) of tesseract's TSV output with non-empty text
pub fn parse_tsv(tsv: &str) -> Result<Vec<OcrWord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .from_reader(tsv.as_bytes());

    let mut words = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or("").trim();

        if field(0) != "5" {
            continue;
        }
        let text = field(11);
        if text.is_empty() {
            continue;
        }

        let parse_i32 = |i: usize| field(i).parse::<i32>().unwrap_or(0);
        words.push(OcrWord {
            text: text.to_string(),
            left: parse_i32(6),
            top: parse_i32(7),
            width: parse_i32(8).max(0) as u32,
            height: parse_i32(9).max(0) as u32,
            confidence: field(10).parse::<f32>().unwrap_or(-1.0),
        });
    }

    Ok(words)
}
