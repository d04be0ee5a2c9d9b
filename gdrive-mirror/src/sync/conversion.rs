use clap::ValueEnum;

use super::index::RemoteEntry;

pub const DOCUMENT_MIME_TYPE: &str = "application/vnd.google-apps.document";
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";
pub const PRESENTATION_MIME_TYPE: &str = "application/vnd.google-apps.presentation";
pub const DRAWING_MIME_TYPE: &str = "application/vnd.google-apps.drawing";

/// Native types that carry neither binary content nor a usable export.
pub const NON_DOWNLOADABLE_MIME_TYPES: &[&str] = &[
    "application/vnd.google-apps.audio",
    "application/vnd.google-apps.file",
    "application/vnd.google-apps.folder",
    "application/vnd.google-apps.form",
    "application/vnd.google-apps.fusiontable",
    "application/vnd.google-apps.map",
    "application/vnd.google-apps.photo",
    "application/vnd.google-apps.script",
    "application/vnd.google-apps.shortcut",
    "application/vnd.google-apps.site",
    "application/vnd.google-apps.sites",
    "application/vnd.google-apps.unknown",
    "application/vnd.google-apps.video",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConversionMode {
    #[default]
    OpenDocument,
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportFormat {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

const fn export_format(mime_type: &'static str, extension: &'static str) -> ExportFormat {
    ExportFormat {
        mime_type,
        extension,
    }
}

const PDF: ExportFormat = export_format("application/pdf", ".pdf");
const ODT: ExportFormat = export_format("application/vnd.oasis.opendocument.text", ".odt");
const ODS: ExportFormat = export_format("application/vnd.oasis.opendocument.spreadsheet", ".ods");
// Older listings advertise spreadsheets under the pre-registration type.
const ODS_LEGACY: ExportFormat = export_format("application/x-vnd.oasis.opendocument.spreadsheet", ".ods");
const ODP: ExportFormat = export_format("application/vnd.oasis.opendocument.presentation", ".odp");
const DOCX: ExportFormat = export_format(
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ".docx",
);
const XLSX: ExportFormat = export_format(
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ".xlsx",
);
const PPTX: ExportFormat = export_format(
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ".pptx",
);
const SVG: ExportFormat = export_format("image/svg+xml", ".svg");
const PNG: ExportFormat = export_format("image/png", ".png");

const OPEN_DOCUMENT_TABLE: &[(&str, &[ExportFormat])] = &[
    (DOCUMENT_MIME_TYPE, &[ODT, DOCX, PDF]),
    (SPREADSHEET_MIME_TYPE, &[ODS, ODS_LEGACY, XLSX, PDF]),
    (PRESENTATION_MIME_TYPE, &[ODP, PPTX, PDF]),
    (DRAWING_MIME_TYPE, &[SVG, PNG, PDF]),
];

const PDF_TABLE: &[(&str, &[ExportFormat])] = &[
    (DOCUMENT_MIME_TYPE, &[PDF, ODT]),
    (SPREADSHEET_MIME_TYPE, &[PDF, ODS, ODS_LEGACY]),
    (PRESENTATION_MIME_TYPE, &[PDF, ODP]),
    (DRAWING_MIME_TYPE, &[PDF, PNG]),
];

/// The active mapping from native document types to export formats. Each
/// native type maps to an ordered preference list; the first entry is the
/// configured target and the rest are fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionTable {
    mode: ConversionMode,
}

impl ConversionTable {
    pub fn new(mode: ConversionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    fn table(&self) -> &'static [(&'static str, &'static [ExportFormat])] {
        match self.mode {
            ConversionMode::OpenDocument => OPEN_DOCUMENT_TABLE,
            ConversionMode::Pdf => PDF_TABLE,
        }
    }

    pub fn candidates(&self, mime_type: &str) -> Option<&'static [ExportFormat]> {
        self.table()
            .iter()
            .find(|(native, _)| *native == mime_type)
            .map(|(_, formats)| *formats)
    }

    pub fn is_convertible(&self, mime_type: &str) -> bool {
        self.candidates(mime_type).is_some()
    }

    pub fn preferred(&self, mime_type: &str) -> Option<ExportFormat> {
        self.candidates(mime_type)
            .and_then(|formats| formats.first().copied())
    }

    /// Picks the first candidate format the entry actually offers, together
    /// with its export URL.
    pub fn select<'a>(&self, entry: &'a RemoteEntry) -> Option<(ExportFormat, &'a str)> {
        let targets = entry.export_targets()?;
        self.candidates(&entry.mime_type)?
            .iter()
            .find_map(|format| {
                targets
                    .get(format.mime_type)
                    .map(|href| (*format, href.as_str()))
            })
    }

    /// Extension appended to the local file name of a converted entry: the
    /// selected format's, or the preferred one when nothing is offered.
    pub fn extension_for(&self, entry: &RemoteEntry) -> Option<&'static str> {
        if !self.is_convertible(&entry.mime_type) {
            return None;
        }
        self.select(entry)
            .map(|(format, _)| format)
            .or_else(|| self.preferred(&entry.mime_type))
            .map(|format| format.extension)
    }
}

impl Default for ConversionTable {
    fn default() -> Self {
        Self::new(ConversionMode::default())
    }
}
