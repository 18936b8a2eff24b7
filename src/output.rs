use std::fs;
use std::path::Path;
use csv::Writer;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::Serialize;

use crate::calibration::WaveformSample;
use crate::errors::{DopplerError, Result};
use crate::image_utils::{mark_points, PixelRect};
use crate::pipeline::Digitisation;
use crate::report::{ReportKey, ReportTable};

const BOX_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const ROI_COLOUR: Rgb<u8> = Rgb([0, 128, 255]);
const TICK_COLOUR: Rgb<u8> = Rgb([0, 255, 255]);
const LABEL_COLOUR: Rgb<u8> = Rgb([255, 0, 255]);
const CURVE_COLOUR: [u8; 3] = [255, 0, 0];

fn format_optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.6}", v)).unwrap_or_default()
}

/// Write the digitised waveform (`t`, `v`) to CSV
pub fn write_waveform_csv<P: AsRef<Path>>(
    samples: &[WaveformSample],
    output_dir: P,
    filename: &str,
) -> Result<()> {
    let output_path = output_dir.as_ref().join("waveform").join(format!("{}.csv", filename));

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| DopplerError::Io(e))?;
    }

    let mut writer = Writer::from_path(&output_path)
        .map_err(|e| DopplerError::CsvOutput(e))?;

    writer.write_record(&["t", "v"]).map_err(|e| DopplerError::CsvOutput(e))?;

    for sample in samples {
        writer.write_record(&[
            format!("{:.6}", sample.t),
            format!("{:.6}", sample.v),
        ]).map_err(|e| DopplerError::CsvOutput(e))?;
    }

    writer.flush().map_err(|e| DopplerError::CsvOutput(csv::Error::from(e)))?;

    Ok(())
}

/// Write the OCR'd report table next to the digitised indices
pub fn write_report_csv<P: AsRef<Path>>(
    table: &ReportTable,
    output_dir: P,
    filename: &str,
) -> Result<()> {
    let output_path = output_dir.as_ref().join("report").join(format!("{}.csv", filename));

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| DopplerError::Io(e))?;
    }

    let mut writer = Writer::from_path(&output_path)
        .map_err(|e| DopplerError::CsvOutput(e))?;

    writer.write_record(&[
        "Key",
        "Vessel",
        "OCR_Value",
        "Unit",
        "Digitised_Value",
        "Abs_Difference",
        "Rel_Difference",
    ]).map_err(|e| DopplerError::CsvOutput(e))?;

    for row in &table.rows {
        writer.write_record(&[
            row.key.label().to_string(),
            row.vessel.clone().unwrap_or_default(),
            format_optional(row.ocr_value),
            row.unit.clone(),
            format_optional(row.digitised_value),
            format_optional(row.abs_difference),
            format_optional(row.rel_difference),
        ]).map_err(|e| DopplerError::CsvOutput(e))?;
    }

    writer.flush().map_err(|e| DopplerError::CsvOutput(csv::Error::from(e)))?;

    Ok(())
}

/// One line of the batch summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSummary {
    pub id: String,
    pub subfolder: String,
    pub flags: String,
    pub samples: usize,
    pub ps_ocr: Option<f64>,
    pub ps_digitised: Option<f64>,
    pub ed_ocr: Option<f64>,
    pub ed_digitised: Option<f64>,
    pub ri_ocr: Option<f64>,
    pub ri_digitised: Option<f64>,
    pub heart_rate: Option<f64>,
    pub axis_residual: Option<f64>,
}

impl ImageSummary {
    pub fn new(filename: &str, subfolder: &str, result: &Digitisation) -> Self {
        let digitised = |key: ReportKey| result.table.get(key).and_then(|r| r.digitised_value);
        let flags: Vec<String> = result.flags.iter().map(|f| f.to_string()).collect();

        Self {
            id: filename.to_string(),
            subfolder: subfolder.to_string(),
            flags: flags.join(";"),
            samples: result.waveform.len(),
            ps_ocr: result.table.ocr_value(ReportKey::PeakSystolic),
            ps_digitised: digitised(ReportKey::PeakSystolic),
            ed_ocr: result.table.ocr_value(ReportKey::EndDiastolic),
            ed_digitised: digitised(ReportKey::EndDiastolic),
            ri_ocr: result.table.ocr_value(ReportKey::ResistiveIndex),
            ri_digitised: digitised(ReportKey::ResistiveIndex),
            heart_rate: result.table.ocr_value(ReportKey::HeartRate),
            axis_residual: result.axis_residual,
        }
    }
}

/// Append summaries to `summary.csv`, creating it with a header if needed
pub fn append_summary<P: AsRef<Path>>(output_dir: P, summaries: &[ImageSummary]) -> Result<()> {
    fs::create_dir_all(output_dir.as_ref()).map_err(|e| DopplerError::Io(e))?;
    let summary_path = output_dir.as_ref().join("summary.csv");

    // Open file in append mode if it exists, otherwise create new
    let mut writer = if summary_path.exists() {
        Writer::from_writer(fs::OpenOptions::new()
            .append(true)
            .open(&summary_path)
            .map_err(|e| DopplerError::Io(e))?)
    } else {
        let mut writer = Writer::from_writer(fs::File::create(&summary_path)
            .map_err(|e| DopplerError::Io(e))?);

        writer.write_record(&[
            "ID",
            "Subfolder",
            "Flags",
            "Samples",
            "PS_OCR",
            "PS_Digitised",
            "ED_OCR",
            "ED_Digitised",
            "RI_OCR",
            "RI_Digitised",
            "HR",
            "Axis_Residual",
        ]).map_err(|e| DopplerError::CsvOutput(e))?;

        writer
    };

    for summary in summaries {
        writer.write_record(&[
            summary.id.clone(),
            summary.subfolder.clone(),
            summary.flags.clone(),
            summary.samples.to_string(),
            format_optional(summary.ps_ocr),
            format_optional(summary.ps_digitised),
            format_optional(summary.ed_ocr),
            format_optional(summary.ed_digitised),
            format_optional(summary.ri_ocr),
            format_optional(summary.ri_digitised),
            format_optional(summary.heart_rate),
            format_optional(summary.axis_residual),
        ]).map_err(|e| DopplerError::CsvOutput(e))?;
    }

    writer.flush().map_err(|e| DopplerError::CsvOutput(csv::Error::from(e)))?;

    Ok(())
}

/// Dump any serialisable value as pretty JSON
pub fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn draw_rect(image: &mut RgbImage, rect: &PixelRect, colour: Rgb<u8>) {
    if rect.is_empty() {
        return;
    }
    let outline = Rect::at(rect.x0 as i32, rect.y0 as i32).of_size(rect.width(), rect.height());
    draw_hollow_rect_mut(image, outline, colour);
}

/// Overlay the intermediate geometry on a copy of the screenshot
pub fn annotate(image: &RgbImage, result: &Digitisation) -> RgbImage {
    let stages = &result.stages;

    let curve: Vec<(u32, u32)> = stages
        .refined
        .as_ref()
        .map(|r| r.curve.samples.iter().map(|s| (s.x, s.y.round().max(0.0) as u32)).collect())
        .unwrap_or_default();
    let mut annotated = mark_points(image, &curve, CURVE_COLOUR, 2);

    if let Some(b) = stages.coarse_bounds {
        draw_rect(&mut annotated, &PixelRect::new(b.x_min, b.x_max + 1, b.y_min, b.y_max + 1), BOX_COLOUR);
    }
    for roi in [stages.left_roi, stages.right_roi].into_iter().flatten() {
        draw_rect(&mut annotated, &roi.rect, ROI_COLOUR);
    }

    for ticks in [&stages.left_ticks, &stages.right_ticks].into_iter().flatten() {
        for (x, y) in ticks.image_centres() {
            draw_cross_mut(&mut annotated, TICK_COLOUR, x.round() as i32, y.round() as i32);
        }
    }

    for labels in [&stages.left_labels, &stages.right_labels].into_iter().flatten() {
        for label in &labels.labels {
            draw_rect(&mut annotated, &label.bbox, LABEL_COLOUR);
        }
    }

    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrWord;
    use crate::pipeline::{Flag, Stages};
    use crate::rows::TextLine;
    use std::collections::BTreeSet;

    fn result() -> Digitisation {
        let words = vec![
            OcrWord::new("PS", 0, 0, 10, 10, 90.0),
            OcrWord::new("60.0", 20, 0, 20, 10, 90.0),
            OcrWord::new("cm/s", 45, 0, 20, 10, 90.0),
        ];
        let mut table = ReportTable::from_lines(&[TextLine { words, y_centre: 5.0 }]);
        table.set_digitised(ReportKey::PeakSystolic, 58.5);

        Digitisation {
            waveform: vec![WaveformSample { t: 0.0, v: 30.0 }, WaveformSample { t: 0.5, v: 60.0 }],
            table,
            flags: [Flag::HRMissing].into_iter().collect::<BTreeSet<_>>(),
            stages: Stages::default(),
            axis_residual: Some(0.25),
        }
    }

    #[test]
    fn waveform_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_waveform_csv(&result().waveform, dir.path(), "scan").unwrap();

        let content = fs::read_to_string(dir.path().join("waveform").join("scan.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["t,v", "0.000000,30.000000", "0.500000,60.000000"]);
    }

    #[test]
    fn report_csv_lists_ocr_and_digitised() {
        let dir = tempfile::tempdir().unwrap();
        write_report_csv(&result().table, dir.path(), "scan").unwrap();

        let content = fs::read_to_string(dir.path().join("report").join("scan.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("PS,,60.000000,cm/s,58.500000,1.500000,"));
    }

    #[test]
    fn summary_header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let summary = ImageSummary::new("scan", "batch", &result());
        assert_eq!(summary.flags, "HRMissing");

        append_summary(dir.path(), &[summary.clone()]).unwrap();
        append_summary(dir.path(), &[summary]).unwrap();

        let content = fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID,Subfolder,Flags"));
        assert!(lines[1].starts_with("scan,batch,HRMissing,2,"));
    }

    #[test]
    fn annotation_keeps_image_size() {
        let image = RgbImage::new(40, 30);
        let annotated = annotate(&image, &result());
        assert_eq!(annotated.dimensions(), (40, 30));
    }
}
