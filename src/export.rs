//! Session export
//!
//! Flattens the pages of a session into one downloadable document. Export is a
//! pure read of the session.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::info;

use crate::session::{Page, PageId, ScanSession};
use crate::vision::Region;

/// Separator placed between consecutive pages in text exports
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// Default file name for text exports
pub const DEFAULT_FILE_NAME: &str = "scanned_pages.txt";

/// Export document format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Plain UTF-8 text, pages joined with [`PAGE_BREAK`]
    #[default]
    Text,
    /// JSON array of pages with their regions
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Json => "json",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ExportFormat::Text),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

/// An exported document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub contents: String,
}

impl ExportArtifact {

    /// Write the document to disk
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.contents)
            .with_context(|| format!("Failed to write export to {}", path.display()))?;
        info!(
            "Exported {} bytes ({:?}) to {}",
            self.contents.len(),
            self.format,
            path.display()
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct ExportedPage<'a> {
    id: PageId,
    /// Seconds since the Unix epoch
    captured_at: u64,
    /// Page photo as a data URI
    image: String,
    text: &'a str,
    regions: &'a [Region],
}

/// Join page texts in order with [`PAGE_BREAK`]
pub fn export_text(pages: &[Arc<Page>]) -> String {
    pages
        .iter()
        .map(|p| p.text())
        .collect::<Vec<_>>()
        .join(PAGE_BREAK)
}

fn export_json(pages: &[Arc<Page>]) -> String {
    let exported: Vec<ExportedPage<'_>> = pages
        .iter()
        .map(|p| ExportedPage {
            id: p.id(),
            captured_at: p
                .captured_at()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            image: p.image().to_data_uri(),
            text: p.text(),
            regions: p.regions(),
        })
        .collect();
    // Serializing plain strings and numbers cannot fail
    serde_json::to_string_pretty(&exported).unwrap_or_default()
}

/// Export a snapshot of the session
pub fn export_session(session: &ScanSession, format: ExportFormat) -> ExportArtifact {
    let pages = session.pages();
    let contents = match format {
        ExportFormat::Text => export_text(&pages),
        ExportFormat::Json => export_json(&pages),
    };
    ExportArtifact { format, contents }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageData;
    use crate::vision::BoundingBox;
    use tempfile::TempDir;

    fn session_with(texts: &[&str]) -> ScanSession {
        let session = ScanSession::new();
        for text in texts {
            session.append_page(ImageData::from_bytes(vec![1]), text.to_string(), vec![]);
        }
        session
    }

    #[test]
    fn test_empty_session_exports_empty_document() {
        let session = ScanSession::new();
        assert_eq!(export_session(&session, ExportFormat::Text).contents, "");

        let json = export_session(&session, ExportFormat::Json).contents;
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, serde_json::json!([]));
    }

    #[test]
    fn test_two_pages_are_joined_with_page_break() {
        let session = session_with(&["Hello", "World"]);
        let artifact = export_session(&session, ExportFormat::Text);
        assert_eq!(artifact.contents, "Hello\n\n--- Page Break ---\n\nWorld");
    }

    #[test]
    fn test_single_page_has_no_separator() {
        let session = session_with(&["Only"]);
        assert_eq!(export_session(&session, ExportFormat::Text).contents, "Only");
    }

    #[test]
    fn test_export_follows_deletions_and_does_not_mutate() {
        let session = session_with(&["A", "B", "C"]);
        let b = session.pages()[1].id();
        session.delete_page(b);

        let artifact = export_session(&session, ExportFormat::Text);
        assert_eq!(artifact.contents, format!("A{}C", PAGE_BREAK));
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_json_export_includes_regions() {
        let session = ScanSession::new();
        session.append_page(
            ImageData::from_bytes(vec![1]),
            "Hello".to_string(),
            vec![Region {
                bbox: BoundingBox::new(1, 2, 3, 4),
                confidence: 80.0,
                text: "Hello".to_string(),
            }],
        );

        let artifact = export_session(&session, ExportFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&artifact.contents).unwrap();
        assert_eq!(value[0]["text"], "Hello");
        assert_eq!(value[0]["regions"][0]["bbox"]["x1"], 3);
        assert_eq!(value[0]["regions"][0]["confidence"], 80.0);
        assert_eq!(value[0]["image"], "data:application/octet-stream;base64,AQ==");
        assert!(value[0]["captured_at"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_write_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_FILE_NAME);
        let artifact = export_session(&session_with(&["Hello", "World"]), ExportFormat::Text);

        artifact.write_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), artifact.contents);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(ExportFormat::from_str("TXT"), Some(ExportFormat::Text));
        assert_eq!(ExportFormat::from_str("json"), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::from_str("pdf"), None);
        assert_eq!(ExportFormat::Json.extension(), "json");
    }
}
