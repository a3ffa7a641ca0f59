//! Tesseract OCR backend
//!
//! Runs the `tesseract` command-line tool. Each engine instance owns a private
//! temporary workspace holding the input image and the `txt`/`tsv` outputs; the
//! workspace is deleted when the instance is terminated.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::engine::{EngineError, EngineFactory, EngineParameters, OcrEngine, RawRecognition};
use super::{BoundingBox, Region};
use crate::capture::ImageData;

/// Base name of the tesseract output files inside the workspace
const OUTPUT_BASE: &str = "out";

/// Creates [`TesseractEngine`] instances
#[derive(Debug, Clone)]
pub struct TesseractFactory {
    binary: PathBuf,
}

impl TesseractFactory {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check whether the tesseract binary can be executed
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Languages installed for tesseract (`--list-langs`)
    pub fn available_languages(&self) -> Result<Vec<String>, EngineError> {
        let output = std::process::Command::new(&self.binary)
            .arg("--list-langs")
            .output()
            .map_err(|e| spawn_error(&self.binary, e))?;

        // Older releases print the list on stderr
        let listing = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            String::from_utf8_lossy(&output.stdout).to_string()
        };

        Ok(listing
            .lines()
            .skip(1)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

impl Default for TesseractFactory {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

#[async_trait]
impl EngineFactory for TesseractFactory {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn create(&self, language: &str) -> Result<Box<dyn OcrEngine>, EngineError> {
        validate_language(language)?;

        let workspace = tempfile::Builder::new()
            .prefix("page-scanner-ocr-")
            .tempdir()?;

        Ok(Box::new(TesseractEngine {
            binary: self.binary.clone(),
            language: language.to_string(),
            workspace: Some(workspace),
            params: None,
        }))
    }
}

/// One tesseract engine instance
pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
    workspace: Option<TempDir>,
    params: Option<EngineParameters>,
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn configure(&mut self, params: &EngineParameters) -> Result<(), EngineError> {
        if let Some(whitelist) = &params.whitelist {
            if whitelist.is_empty() || whitelist.contains(|c: char| c == '\n' || c == '\r') {
                return Err(EngineError::InvalidParameters(
                    "whitelist must be a non-empty single line".to_string(),
                ));
            }
        }
        self.params = Some(params.clone());
        Ok(())
    }

    async fn recognize(&mut self, image: &[u8]) -> Result<RawRecognition, EngineError> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| EngineError::Failed("engine used before configure".to_string()))?;
        let workspace = self
            .workspace
            .as_ref()
            .ok_or_else(|| EngineError::Failed("engine already terminated".to_string()))?;

        let extension = ImageData::sniff_extension(image).unwrap_or("png");
        let input = workspace.path().join(format!("input.{}", extension));
        let output_base = workspace.path().join(OUTPUT_BASE);
        tokio::fs::write(&input, image).await?;

        let args = build_args(&input, &output_base, &self.language, params);
        debug!("Running {} with {} argument(s)", self.binary.display(), args.len());

        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(&self.binary, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = tokio::fs::read_to_string(output_base.with_extension("txt")).await?;
        let tsv = tokio::fs::read_to_string(output_base.with_extension("tsv")).await?;

        Ok(RawRecognition {
            text,
            regions: parse_tsv_blocks(&tsv),
        })
    }

    fn terminate(&mut self) {
        if let Some(workspace) = self.workspace.take() {
            if let Err(e) = workspace.close() {
                warn!("Failed to remove OCR workspace: {}", e);
            }
        }
    }
}

impl Drop for TesseractEngine {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_error(binary: &Path, err: std::io::Error) -> EngineError {
    match err.kind() {
        std::io::ErrorKind::NotFound => EngineError::Unavailable(format!(
            "{} not found (install tesseract-ocr)",
            binary.display()
        )),
        _ => EngineError::Io(err),
    }
}

fn validate_language(language: &str) -> Result<(), EngineError> {
    let valid = !language.is_empty()
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+');
    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidParameters(format!(
            "invalid language '{}'",
            language
        )))
    }
}

/// Parts of a `deu+eng` style language string that are not installed
pub fn missing_languages(language: &str, installed: &[String]) -> Vec<String> {
    language
        .split('+')
        .filter(|lang| !installed.iter().any(|i| i == lang))
        .map(str::to_string)
        .collect()
}

/// Command line for one recognition run producing `<output_base>.txt` and `.tsv`
fn build_args(
    input: &Path,
    output_base: &Path,
    language: &str,
    params: &EngineParameters,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        input.into(),
        output_base.into(),
        "-l".into(),
        language.into(),
        "--psm".into(),
        params.segmentation.tesseract_psm().to_string().into(),
        "-c".into(),
        format!(
            "preserve_interword_spaces={}",
            u8::from(params.preserve_interword_spaces)
        )
        .into(),
        // No form feed after the page
        "-c".into(),
        "page_separator=".into(),
    ];

    if let Some(whitelist) = &params.whitelist {
        args.push("-c".into());
        args.push(format!("tessedit_char_whitelist={}", whitelist).into());
    }

    args.push("txt".into());
    args.push("tsv".into());
    args
}

const TSV_LEVEL_BLOCK: u32 = 2;
const TSV_LEVEL_WORD: u32 = 5;

struct TsvRow<'a> {
    level: u32,
    block: (u32, u32),
    line: (u32, u32),
    bbox: BoundingBox,
    confidence: f32,
    text: &'a str,
}

fn parse_tsv_row(line: &str) -> Option<TsvRow<'_>> {
    let fields: Vec<&str> = line.splitn(12, '\t').collect();
    if fields.len() < 11 {
        return None;
    }
    let num = |i: usize| fields[i].trim().parse::<u32>().ok();
    let (left, top, width, height) = (num(6)?, num(7)?, num(8)?, num(9)?);

    Some(TsvRow {
        level: num(0)?,
        block: (num(1)?, num(2)?),
        line: (num(3)?, num(4)?),
        bbox: BoundingBox::new(
            left,
            top,
            left.saturating_add(width),
            top.saturating_add(height),
        ),
        confidence: fields[10].trim().parse().ok()?,
        text: fields.get(11).map(|t| t.trim()).unwrap_or(""),
    })
}

struct BlockAccumulator {
    key: (u32, u32),
    bbox: BoundingBox,
    confidences: Vec<f32>,
    lines: Vec<Vec<String>>,
    current_line: Option<(u32, u32)>,
}

impl BlockAccumulator {
    fn into_region(self) -> Region {
        let confidence = if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().sum::<f32>() / self.confidences.len() as f32
        };
        let text = self
            .lines
            .iter()
            .map(|words| words.join(" "))
            .collect::<Vec<_>>()
            .join("\n");
        Region {
            bbox: self.bbox,
            confidence,
            text,
        }
    }
}

/// Group tesseract TSV output into block regions.
///
/// Block geometry comes from the level-2 rows; block confidence is the mean of
/// its word confidences (0 when the block holds no words).
pub fn parse_tsv_blocks(tsv: &str) -> Vec<Region> {
    let mut blocks: Vec<BlockAccumulator> = Vec::new();

    for row in tsv.lines().skip(1).filter_map(parse_tsv_row) {
        match row.level {
            TSV_LEVEL_BLOCK => blocks.push(BlockAccumulator {
                key: row.block,
                bbox: row.bbox,
                confidences: Vec::new(),
                lines: Vec::new(),
                current_line: None,
            }),
            TSV_LEVEL_WORD => {
                let Some(block) = blocks.iter_mut().rev().find(|b| b.key == row.block) else {
                    continue;
                };
                if row.confidence >= 0.0 {
                    block.confidences.push(row.confidence);
                }
                if row.text.is_empty() {
                    continue;
                }
                if block.current_line != Some(row.line) {
                    block.current_line = Some(row.line);
                    block.lines.push(Vec::new());
                }
                if let Some(words) = block.lines.last_mut() {
                    words.push(row.text.to_string());
                }
            }
            _ => {}
        }
    }

    blocks.into_iter().map(BlockAccumulator::into_region).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t640\t480\t-1\t
2\t1\t1\t0\t0\t0\t10\t20\t200\t50\t-1\t
3\t1\t1\t1\t0\t0\t10\t20\t200\t50\t-1\t
4\t1\t1\t1\t1\t0\t10\t20\t200\t20\t-1\t
5\t1\t1\t1\t1\t1\t10\t20\t80\t20\t90.5\tHello
5\t1\t1\t1\t1\t2\t100\t20\t110\t20\t70.5\tthere
4\t1\t1\t1\t2\t0\t10\t50\t100\t20\t-1\t
5\t1\t1\t1\t2\t1\t10\t50\t100\t20\t80\tworld
2\t1\t2\t0\t0\t0\t300\t400\t20\t20\t-1\t
3\t1\t2\t1\t0\t0\t300\t400\t20\t20\t-1\t
4\t1\t2\t1\t1\t0\t300\t400\t20\t20\t-1\t
5\t1\t2\t1\t1\t1\t300\t400\t20\t20\t2\t~
";

    fn params() -> EngineParameters {
        EngineParameters {
            whitelist: None,
            segmentation: super::super::PageSegMode::SingleBlock,
            preserve_interword_spaces: true,
        }
    }

    #[test]
    fn test_parse_tsv_groups_words_into_blocks() {
        let regions = parse_tsv_blocks(SAMPLE_TSV);
        assert_eq!(regions.len(), 2);

        let first = &regions[0];
        assert_eq!(first.bbox, BoundingBox::new(10, 20, 210, 70));
        assert_eq!(first.text, "Hello there\nworld");
        assert!((first.confidence - 80.333).abs() < 0.01);

        let second = &regions[1];
        assert_eq!(second.bbox, BoundingBox::new(300, 400, 320, 420));
        assert_eq!(second.text, "~");
        assert!((second.confidence - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_tsv_empty_block_has_zero_confidence() {
        let tsv = "header\n2\t1\t1\t0\t0\t0\t0\t0\t5\t5\t-1\t\n";
        let regions = parse_tsv_blocks(tsv);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].confidence, 0.0);
        assert!(regions[0].text.is_empty());
    }

    #[test]
    fn test_parse_tsv_clamps_oversized_geometry() {
        let tsv = "header\n2\t1\t1\t0\t0\t0\t4294967290\t10\t100\t4294967295\t-1\t\n";
        let regions = parse_tsv_blocks(tsv);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bbox, BoundingBox::new(4294967290, 10, u32::MAX, u32::MAX));
    }

    #[test]
    fn test_parse_tsv_ignores_malformed_rows() {
        let tsv = "header\nnot\ta\trow\n";
        assert!(parse_tsv_blocks(tsv).is_empty());
        assert!(parse_tsv_blocks("").is_empty());
    }

    #[test]
    fn test_build_args_without_whitelist() {
        let args = build_args(Path::new("/w/input.png"), Path::new("/w/out"), "eng", &params());
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();

        assert_eq!(&args[..6], ["/w/input.png", "/w/out", "-l", "eng", "--psm", "6"]);
        assert!(args.contains(&"preserve_interword_spaces=1".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("tessedit_char_whitelist")));
        assert_eq!(&args[args.len() - 2..], ["txt", "tsv"]);
    }

    #[test]
    fn test_build_args_with_whitelist() {
        let mut p = params();
        p.whitelist = Some("0123456789".to_string());
        p.preserve_interword_spaces = false;
        p.segmentation = super::super::PageSegMode::SparseText;

        let args = build_args(Path::new("in.png"), Path::new("out"), "deu+eng", &p);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();

        assert!(args.contains(&"tessedit_char_whitelist=0123456789".to_string()));
        assert!(args.contains(&"preserve_interword_spaces=0".to_string()));
        assert!(args.contains(&"11".to_string()));
    }

    #[test]
    fn test_validate_language() {
        assert!(validate_language("eng").is_ok());
        assert!(validate_language("chi_sim+eng").is_ok());
        assert!(validate_language("").is_err());
        assert!(validate_language("eng; rm -rf").is_err());
    }

    #[test]
    fn test_missing_languages() {
        let installed = vec!["eng".to_string(), "osd".to_string()];
        assert!(missing_languages("eng", &installed).is_empty());
        assert_eq!(missing_languages("deu+eng", &installed), vec!["deu"]);
    }

    #[tokio::test]
    async fn test_terminate_removes_workspace() {
        let factory = TesseractFactory::default();
        let mut engine = factory.create("eng").await.unwrap();
        engine.configure(&params()).await.unwrap();
        engine.terminate();

        let result = engine.recognize(b"not an image").await;
        assert!(matches!(result, Err(EngineError::Failed(_))));
        // Second terminate is a no-op
        engine.terminate();
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let factory = TesseractFactory::new("/nonexistent/tesseract");
        assert!(!factory.is_available());

        let mut engine = factory.create("eng").await.unwrap();
        engine.configure(&params()).await.unwrap();
        let result = engine.recognize(b"bytes").await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_rejects_multiline_whitelist() {
        let mut engine = TesseractFactory::default().create("eng").await.unwrap();
        let mut p = params();
        p.whitelist = Some("ab\ncd".to_string());
        assert!(engine.configure(&p).await.is_err());
    }
}
