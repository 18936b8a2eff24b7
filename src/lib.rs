// src/lib.rs - Library interface for the Doppler waveform digitiser

pub mod calibration;
pub mod config;
pub mod errors;
pub mod gate;
pub mod image_io;
pub mod image_utils;
pub mod indices;
pub mod labels;
pub mod morphology;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod roi;
pub mod rows;
pub mod segmentation;
pub mod signal;
pub mod ticks;

// Re-export commonly used types and functions
pub use errors::{DopplerError, Result};
pub use config::{Config, TextFilter};
pub use pipeline::{digitise, process_image, Digitisation, Flag, Stages};
pub use image_io::{InputImage, load_image, save_image};

// Re-export the collaborator seams
pub use morphology::{ImageOps, ImageprocOps};
pub use ocr::{OcrRequest, OcrWord, TesseractCli, TextRecognizer};

// Re-export result types
pub use calibration::{Calibration, CardiacCycles, WaveformSample};
pub use indices::DerivedIndices;
pub use report::{ReportKey, ReportRow, ReportTable};
