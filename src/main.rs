//! PageScanner - capture printed pages with a camera and turn them into text
//!
//! Each capture is recognized once, low-confidence regions are dropped, and the
//! pages of a session are exported as a single document.

mod app;
mod capture;
mod config;
mod error;
mod export;
mod session;
mod shared;
mod vision;

#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::ScanApp;
use crate::capture::{list_devices, CameraSource, ImageData, ImageFileSource};
use crate::config::AppConfig;
use crate::error::ScanError;
use crate::export::ExportFormat;
use crate::session::PageId;
use crate::shared::{ChannelObserver, ScanEvent};
use crate::vision::{missing_languages, PageSegMode, TesseractFactory};

/// PageScanner - camera page capture and OCR
#[derive(Parser, Debug)]
#[command(name = "page-scanner")]
#[command(about = "Capture printed pages with a camera, OCR them and export one document")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available cameras and exit
    Devices,

    /// Interactive scanning session with the camera
    Scan {
        /// Video device to use (e.g. /dev/video0)
        #[arg(short, long)]
        device: Option<PathBuf>,

        #[command(flatten)]
        recognition: RecognitionArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Recognize image files as pages of one session
    Import {
        /// Image files, in page order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        recognition: RecognitionArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print the effective configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args, Debug, Default)]
struct RecognitionArgs {
    /// OCR language(s), e.g. "eng" or "deu+eng"
    #[arg(short, long)]
    lang: Option<String>,

    /// Page segmentation mode: auto, single_column, single_block, sparse_text
    #[arg(long, value_parser = parse_psm)]
    psm: Option<PageSegMode>,

    /// Only recognize these characters
    #[arg(long)]
    whitelist: Option<String>,

    /// Drop regions at or below this confidence (0-100)
    #[arg(long)]
    min_confidence: Option<f32>,
}

#[derive(Args, Debug, Default)]
struct OutputArgs {
    /// Export file; printed to stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export format: text or json
    #[arg(short, long, value_parser = parse_format)]
    format: Option<ExportFormat>,
}

fn parse_psm(s: &str) -> Result<PageSegMode, String> {
    PageSegMode::from_str(s).ok_or_else(|| format!("unknown segmentation mode '{}'", s))
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    ExportFormat::from_str(s).ok_or_else(|| format!("unknown export format '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Devices => {
            print_devices(&config);
            Ok(())
        }
        Command::Config { init } => show_config(&config, cli.config, init),
        Command::Scan {
            device,
            recognition,
            output,
        } => {
            if device.is_some() {
                config.capture.device = device;
            }
            apply_recognition_args(&mut config, &recognition);
            run_scan(config, output).await
        }
        Command::Import {
            files,
            recognition,
            output,
        } => {
            apply_recognition_args(&mut config, &recognition);
            run_import(config, files, output).await
        }
    }
}

fn apply_recognition_args(config: &mut AppConfig, args: &RecognitionArgs) {
    if let Some(lang) = &args.lang {
        config.recognition.language = lang.clone();
    }
    if let Some(psm) = args.psm {
        config.recognition.segmentation = psm;
    }
    if let Some(whitelist) = &args.whitelist {
        config.recognition.whitelist = Some(whitelist.clone());
    }
    if let Some(min_confidence) = args.min_confidence {
        config.recognition.min_confidence = min_confidence;
    }
}

fn print_devices(config: &AppConfig) {
    println!("Available cameras:");
    let devices = list_devices();
    if devices.is_empty() {
        println!("  No V4L2 devices detected");
    } else {
        for device in &devices {
            println!("  [{}] {} - {}", device.index, device.path.display(), device.name);
        }
    }

    let factory = TesseractFactory::new(&config.engine.tesseract_path);
    match factory.available_languages() {
        Ok(languages) => println!("OCR languages: {}", languages.join(", ")),
        Err(e) => println!("OCR engine unavailable: {}", e),
    }
}

fn show_config(config: &AppConfig, path: Option<PathBuf>, init: bool) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => config::default_config_path()?,
    };

    if init {
        if path.exists() {
            warn!("Configuration already exists at {:?}", path);
        } else {
            config::save_config(&AppConfig::default(), &path)?;
            info!("Wrote default configuration to {:?}", path);
        }
    }

    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn engine_factory(config: &AppConfig) -> Arc<TesseractFactory> {
    let factory = Arc::new(TesseractFactory::new(&config.engine.tesseract_path));
    if !factory.is_available() {
        warn!(
            "Tesseract not available at {:?}; recognition will fail (install tesseract-ocr)",
            config.engine.tesseract_path
        );
        return factory;
    }
    if let Ok(installed) = factory.available_languages() {
        let missing = missing_languages(&config.recognition.language, &installed);
        if !missing.is_empty() {
            warn!(
                "Language data not installed: {}; recognition will fail",
                missing.join(", ")
            );
        }
    }
    factory
}

fn write_export(app: &ScanApp, output: &OutputArgs) -> Result<()> {
    let format = output.format.unwrap_or(app.config().export.format);
    let artifact = app.export(format);
    match &output.output {
        Some(path) => artifact.write_to(path)?,
        None => print!("{}", artifact.contents),
    }
    Ok(())
}

/// Configured file name with the extension of the chosen format
fn default_export_path(app: &ScanApp, format: Option<ExportFormat>) -> PathBuf {
    let settings = &app.config().export;
    let format = format.unwrap_or(settings.format);
    PathBuf::from(&settings.file_name).with_extension(format.extension())
}

/// Batch-recognize image files through the same pipeline as camera captures
async fn run_import(config: AppConfig, files: Vec<PathBuf>, output: OutputArgs) -> Result<()> {
    let factory = engine_factory(&config);
    let count = files.len();
    let app = ScanApp::new(config, Box::new(ImageFileSource::new(files)), factory);
    app.start_camera().context("Failed to open image files")?;

    let summary = app.capture_batch(count).await;
    app.stop_camera();

    if !summary.skipped.is_empty() {
        warn!("{} of {} image(s) skipped", summary.skipped.len(), count);
    }
    if !app.session().is_empty() {
        write_export(&app, &output)?;
    }
    if let Some(e) = summary.aborted {
        return Err(anyhow::Error::new(e).context(format!(
            "Import stopped after {} page(s)",
            summary.added.len()
        )));
    }
    if app.session().is_empty() {
        bail!("No pages were recognized ({} failure(s))", summary.skipped.len());
    }
    Ok(())
}

const HELP: &str = "Commands:
  <enter> | c     capture a page
  f <file|uri>    add an image file or data URI as a page
  l               list pages
  v [n]           show the text of page n (default: latest)
  d <n>           delete page n
  x               delete all pages
  s [file]        save the session
  r               restart the camera
  q               quit";

fn parse_page_id(arg: Option<&str>) -> Option<PageId> {
    arg?.trim_start_matches('#').parse().ok().map(PageId::new)
}

/// Load an image for `f`: either a `data:` URI or a file path
fn load_image(arg: &str) -> Result<ImageData> {
    if arg.starts_with("data:") {
        return Ok(ImageData::from_data_uri(arg)?);
    }
    let bytes = std::fs::read(arg).with_context(|| format!("Failed to read {}", arg))?;
    Ok(ImageData::from_bytes(bytes))
}

/// Print pipeline events on a separate thread
fn spawn_event_printer(events: Receiver<ScanEvent>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in events {
            match event {
                ScanEvent::ProcessingChanged(true) => println!("Processing page..."),
                ScanEvent::ProcessingChanged(false) => {}
                ScanEvent::TextExtracted(text) => {
                    println!("--- extracted text ---\n{}\n----------------------", text.trim_end())
                }
                ScanEvent::Error(e) => eprintln!("Error: {}", e),
            }
        }
    })
}

/// Interactive camera session driven from stdin
async fn run_scan(config: AppConfig, output: OutputArgs) -> Result<()> {
    let factory = engine_factory(&config);
    let source = CameraSource::new(config.capture.clone());
    let app = ScanApp::new(config, Box::new(source), factory);

    let (observer, events) = ChannelObserver::new();
    let subscription = app.notifier().subscribe(Arc::new(observer));
    let printer = spawn_event_printer(events);
    debug!("{} observer(s) attached", app.notifier().subscriber_count());

    if let Err(e) = app.start_camera() {
        if matches!(e, ScanError::PermissionDenied(_)) {
            bail!("{}. Grant access to the camera (e.g. add your user to the 'video' group)", e);
        }
        return Err(e.into());
    }

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            None | Some("c") => match app.capture_page().await {
                Ok(page) => println!("Added page {}", page.id()),
                // Already reported by the event printer
                Err(e) if e.is_recoverable() => {
                    if !app.is_camera_active() {
                        println!("Camera stopped; press r to restart it");
                    }
                }
                Err(e) => return Err(e.into()),
            },
            Some("f") => match parts.next().map(load_image) {
                Some(Ok(image)) => {
                    if let Ok(page) = app.scan_image(image).await {
                        println!("Added page {}", page.id());
                    }
                }
                Some(Err(e)) => eprintln!("Error: {:#}", e),
                None => println!("usage: f <file|data URI>"),
            },
            Some("l") => {
                for page in app.pages() {
                    let first_line = page.text().lines().next().unwrap_or("");
                    println!(
                        "  {} {} region(s), {} byte {}  {}",
                        page.id(),
                        page.regions().len(),
                        page.image().len(),
                        page.image().mime_type(),
                        first_line
                    );
                }
            }
            Some("v") => match parse_page_id(parts.next()) {
                Some(id) => match app.session().get(id) {
                    Some(page) => println!("{}", page.text()),
                    None => println!("No page {}", id),
                },
                None => match app.runtime().last_text {
                    Some(text) => println!("{}", text),
                    None => println!("usage: v <n>"),
                },
            },
            Some("d") => match parse_page_id(parts.next()) {
                Some(id) => {
                    app.delete_page(id);
                    println!("{} page(s) left", app.session().len());
                }
                None => println!("usage: d <n>"),
            },
            Some("x") => app.session().clear(),
            Some("s") => {
                let target = OutputArgs {
                    output: parts
                        .next()
                        .map(PathBuf::from)
                        .or_else(|| output.output.clone())
                        .or_else(|| Some(default_export_path(&app, output.format))),
                    format: output.format,
                };
                if let Err(e) = write_export(&app, &target) {
                    eprintln!("Error: {:#}", e);
                }
            }
            Some("r") => {
                app.stop_camera();
                if let Err(e) = app.start_camera() {
                    eprintln!("Error: {}", e);
                }
            }
            Some("q") => break,
            Some(_) => println!("{}", HELP),
        }
    }

    // Dropping the last sender ends the printer thread
    subscription.unsubscribe();
    drop(subscription);
    let _ = printer.join();

    app.stop_camera();
    if let Some(error) = app.runtime().last_error {
        debug!("Last pipeline error: {}", error);
    }
    if output.output.is_some() && !app.session().is_empty() {
        write_export(&app, &output)?;
    }
    info!("Scan session {} finished with {} page(s)", app.session().id(), app.session().len());
    Ok(())
}
