//! Attendance history export: spreadsheet, word-processor document, PDF.

use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;
use turnout_core::AttendanceEvent;

const TITLE: &str = "Attendance History";
const HEADERS: [&str; 4] = ["ID", "Name", "Date", "Time"];

// A4 portrait
const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const LINE_HEIGHT: f32 = 8.0;
const TITLE_SIZE: f32 = 16.0;
const BODY_SIZE: f32 = 12.0;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("cannot infer export format from {0:?}, use .xlsx, .docx or .pdf")]
    UnknownFormat(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("document error: {0}")]
    Docx(String),
    #[error("PDF error: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Xlsx,
    Docx,
    Pdf,
}

impl ExportFormat {
    /// Infer the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("xlsx") => Ok(Self::Xlsx),
            Some("docx") => Ok(Self::Docx),
            Some("pdf") => Ok(Self::Pdf),
            _ => Err(ExportError::UnknownFormat(path.display().to_string())),
        }
    }
}

/// Write `events` to `path` in the given format, replacing any existing file.
pub fn export(events: &[AttendanceEvent], format: ExportFormat, path: &Path) -> Result<(), ExportError> {
    match format {
        ExportFormat::Xlsx => write_xlsx(events, path)?,
        ExportFormat::Docx => write_docx(events, path)?,
        ExportFormat::Pdf => write_pdf(events, path)?,
    }
    tracing::info!(path = %path.display(), ?format, rows = events.len(), "history exported");
    Ok(())
}

fn describe(event: &AttendanceEvent) -> String {
    format!(
        "ID: {}, Name: {}, Date: {}, Time: {}",
        event.id, event.identity, event.date, event.time
    )
}

/// Header row plus one row per event.
fn write_xlsx(events: &[AttendanceEvent], path: &Path) -> Result<(), ExportError> {
    use rust_xlsxwriter::{Format, Workbook};

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Attendance")?;

    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }
    for (i, event) in events.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_number(row, 0, event.id as f64)?;
        sheet.write_string(row, 1, &event.identity)?;
        sheet.write_string(row, 2, &event.date)?;
        sheet.write_string(row, 3, &event.time)?;
    }
    sheet.set_column_width(1, 24)?;
    sheet.set_column_width(2, 12)?;

    workbook.save(path)?;
    Ok(())
}

/// Title heading plus one paragraph per event.
fn write_docx(events: &[AttendanceEvent], path: &Path) -> Result<(), ExportError> {
    use docx_rs::{Docx, Paragraph, Run};

    let mut doc = Docx::new().add_paragraph(
        Paragraph::new()
            .style("Heading1")
            .add_run(Run::new().add_text(TITLE).bold().size(32)),
    );
    for event in events {
        doc = doc.add_paragraph(Paragraph::new().add_run(Run::new().add_text(describe(event))));
    }

    let file = File::create(path)?;
    doc.build()
        .pack(file)
        .map_err(|e| ExportError::Docx(e.to_string()))
}

/// Title plus one line per event, continuing on a fresh A4 page when full.
fn write_pdf(events: &[AttendanceEvent], path: &Path) -> Result<(), ExportError> {
    let (doc, page, layer) = PdfDocument::new(TITLE, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;
    let title_font = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ExportError::Pdf(e.to_string()))?;

    doc.get_page(page).get_layer(layer).use_text(
        TITLE,
        TITLE_SIZE,
        Mm(PAGE_WIDTH / 2.0 - 25.0),
        Mm(PAGE_HEIGHT - MARGIN),
        &title_font,
    );

    let pages = layout_lines(events.len());
    let mut lines = events.iter();
    for (n, rows) in pages.iter().enumerate() {
        let current = if n == 0 {
            doc.get_page(page).get_layer(layer)
        } else {
            let (page, layer) = doc.add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
            doc.get_page(page).get_layer(layer)
        };
        for (&y, event) in rows.iter().zip(lines.by_ref()) {
            write_line(&current, &describe(event), y, &font);
        }
    }
    tracing::debug!(pages = pages.len(), "pdf laid out");

    let mut out = BufWriter::new(File::create(path)?);
    doc.save(&mut out).map_err(|e| ExportError::Pdf(e.to_string()))
}

fn write_line(layer: &PdfLayerReference, text: &str, y: f32, font: &IndirectFontRef) {
    layer.use_text(text, BODY_SIZE, Mm(MARGIN), Mm(y), font);
}

/// Baseline heights (mm) for `count` lines, grouped by page.
///
/// The first page starts below the title; later pages start at the top margin.
fn layout_lines(count: usize) -> Vec<Vec<f32>> {
    let mut pages: Vec<Vec<f32>> = vec![Vec::new()];
    let mut y = PAGE_HEIGHT - MARGIN - LINE_HEIGHT * 2.0;
    for _ in 0..count {
        if y < MARGIN {
            pages.push(Vec::new());
            y = PAGE_HEIGHT - MARGIN;
        }
        if let Some(page) = pages.last_mut() {
            page.push(y);
        }
        y -= LINE_HEIGHT;
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "turnout-export-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn events(n: usize) -> Vec<AttendanceEvent> {
        (1..=n)
            .map(|i| AttendanceEvent {
                id: i as i64,
                identity: if i % 2 == 0 { "Bob".into() } else { "Alice".into() },
                date: "2024-05-01".into(),
                time: format!("09:{:02}:00", i % 60),
            })
            .collect()
    }

    fn zip_magic(path: &Path) -> bool {
        std::fs::read(path).unwrap().starts_with(b"PK\x03\x04")
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("out/history.xlsx")).unwrap(), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_path(Path::new("REPORT.DOCX")).unwrap(), ExportFormat::Docx);
        assert_eq!(ExportFormat::from_path(Path::new("a.pdf")).unwrap(), ExportFormat::Pdf);
        assert!(matches!(
            ExportFormat::from_path(Path::new("history.csv")),
            Err(ExportError::UnknownFormat(_))
        ));
        assert!(ExportFormat::from_path(Path::new("history")).is_err());
    }

    #[test]
    fn test_describe_line() {
        assert_eq!(
            describe(&events(1)[0]),
            "ID: 1, Name: Alice, Date: 2024-05-01, Time: 09:01:00"
        );
    }

    #[test]
    fn test_export_xlsx() {
        let dir = scratch_dir("xlsx");
        let path = dir.join("history.xlsx");
        export(&events(3), ExportFormat::Xlsx, &path).unwrap();
        assert!(zip_magic(&path));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_export_docx() {
        let dir = scratch_dir("docx");
        let path = dir.join("history.docx");
        export(&events(3), ExportFormat::Docx, &path).unwrap();
        assert!(zip_magic(&path));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_export_pdf_with_page_breaks() {
        let dir = scratch_dir("pdf");
        let path = dir.join("history.pdf");
        export(&events(100), ExportFormat::Pdf, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_empty_history_still_exports() {
        let dir = scratch_dir("empty");
        for name in ["h.xlsx", "h.docx", "h.pdf"] {
            let path = dir.join(name);
            let format = ExportFormat::from_path(&path).unwrap();
            export(&[], format, &path).unwrap();
            assert!(std::fs::metadata(&path).unwrap().len() > 0);
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_pdf_layout_breaks_pages() {
        assert_eq!(layout_lines(0), vec![Vec::<f32>::new()]);

        let pages = layout_lines(100);
        assert!(pages.len() > 1);
        assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 100);
        for page in &pages {
            assert!(page.iter().all(|&y| y >= MARGIN && y <= PAGE_HEIGHT - MARGIN));
            assert!(page.windows(2).all(|w| w[0] > w[1]));
        }
        // Later pages hold more lines than the titled first page
        assert!(pages[1].len() > pages[0].len());
    }
}
