//! Application Coordinator
//!
//! Owns the capture source, the recognizer, the session and the notifier for
//! one scanning activity, and runs the capture-to-text pipeline:
//! capture -> recognize -> filter regions -> append page -> notify.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::capture::{CaptureSource, ImageData};
use crate::config::AppConfig;
use crate::error::ScanError;
use crate::export::{export_session, ExportArtifact, ExportFormat};
use crate::session::{Page, PageId, ScanSession};
use crate::shared::{Notifier, RuntimeState};
use crate::vision::{filter_regions, EngineFactory, Recognizer};

/// Main application coordinator
pub struct ScanApp {
    config: AppConfig,
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    recognizer: Recognizer,
    session: ScanSession,
    notifier: Notifier,
    runtime: RwLock<RuntimeState>,
}

/// Result of [`ScanApp::capture_batch`]
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Pages added, in capture order
    pub added: Vec<Arc<Page>>,
    /// Frames that were skipped and why
    pub skipped: Vec<ScanError>,
    /// Failure that ended the batch early
    pub aborted: Option<ScanError>,
}

/// Holds the processing flag for one pipeline run and clears it on every exit path
struct ProcessingGuard<'a> {
    app: &'a ScanApp,
}

impl<'a> ProcessingGuard<'a> {
    fn enter(app: &'a ScanApp) -> Result<Self, ScanError> {
        if !app.runtime.write().try_begin() {
            return Err(ScanError::Busy);
        }
        app.notifier.emit_processing(true);
        Ok(Self { app })
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.app.runtime.write().finish();
        self.app.notifier.emit_processing(false);
    }
}

impl ScanApp {
    /// Create a coordinator with a fresh session and notifier
    pub fn new(
        config: AppConfig,
        source: Box<dyn CaptureSource>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self::with_notifier(config, source, factory, Notifier::new())
    }

    /// Create a coordinator publishing through an existing notifier
    pub fn with_notifier(
        config: AppConfig,
        source: Box<dyn CaptureSource>,
        factory: Arc<dyn EngineFactory>,
        notifier: Notifier,
    ) -> Self {
        let session = ScanSession::new();
        let recognizer = Recognizer::new(factory);
        info!(
            "Scan session {} using {} and {} engine",
            session.id(),
            source.describe(),
            recognizer.engine_name()
        );
        Self {
            config,
            source: Arc::new(Mutex::new(source)),
            recognizer,
            session,
            notifier,
            runtime: RwLock::new(RuntimeState::default()),
        }
    }

    /// Acquire the camera
    pub fn start_camera(&self) -> Result<(), ScanError> {
        let mut source = self.source.lock();
        source.start().map_err(|e| {
            let err = ScanError::from(e);
            error!("Failed to start {}: {}", source.describe(), err);
            self.runtime.write().set_error(err.to_string());
            err
        })?;
        self.runtime.write().clear_error();
        Ok(())
    }

    /// Release the camera (no-op when already stopped)
    pub fn stop_camera(&self) {
        self.source.lock().stop();
    }

    pub fn is_camera_active(&self) -> bool {
        self.source.lock().is_active()
    }

    /// Capture a frame from the camera and add its recognized text as a new page.
    ///
    /// Rejected with [`ScanError::Busy`] while another page is processing. On
    /// failure the session is unchanged and observers receive one error.
    pub async fn capture_page(&self) -> Result<Arc<Page>, ScanError> {
        let guard = ProcessingGuard::enter(self)?;

        // Sampling may wait on the camera, so keep it off the async workers
        let source = self.source.clone();
        let captured = tokio::task::spawn_blocking(move || source.lock().capture()).await;
        let frame = match captured {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(self.fail(ScanError::from(e))),
            Err(e) => return Err(self.fail(ScanError::Capture(e.to_string()))),
        };

        let result = self.process(frame.image).await;
        drop(guard);
        result
    }

    /// Capture `count` frames from a finite source, such as a batch of files.
    ///
    /// Frames that fail to decode or recognize are skipped. Any other failure
    /// stops the batch; pages added before it stay in the session.
    pub async fn capture_batch(&self, count: usize) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for index in 1..=count {
            match self.capture_page().await {
                Ok(page) => {
                    info!("Frame {}/{} added as page {}", index, count, page.id());
                    summary.added.push(page);
                }
                Err(e @ (ScanError::RecognitionFailed(_) | ScanError::Capture(_))) => {
                    warn!("Frame {}/{} skipped: {}", index, count, e);
                    summary.skipped.push(e);
                }
                Err(e) => {
                    summary.aborted = Some(e);
                    break;
                }
            }
        }
        summary
    }

    /// Recognize an already captured image (retry of a page, file import)
    pub async fn scan_image(&self, image: ImageData) -> Result<Arc<Page>, ScanError> {
        let guard = ProcessingGuard::enter(self)?;
        let result = self.process(image).await;
        drop(guard);
        result
    }

    async fn process(&self, image: ImageData) -> Result<Arc<Page>, ScanError> {
        let span = info_span!("recognize", session = %self.session.id(), bytes = image.len());
        let recognition = self
            .recognizer
            .recognize(&image, &self.config.recognition)
            .instrument(span)
            .await;

        let result = match recognition {
            Ok(result) => result,
            Err(e) => return Err(self.fail(ScanError::from(e))),
        };

        let regions = filter_regions(&result.regions, self.config.recognition.min_confidence);
        info!(
            "Kept {} of {} region(s) above confidence {} ({} ms)",
            regions.len(),
            result.regions.len(),
            self.config.recognition.min_confidence,
            result.processing_time_ms
        );

        let page = self.session.append_page(image, result.text, regions);
        {
            let mut runtime = self.runtime.write();
            runtime.clear_error();
            runtime.last_text = Some(page.text().to_string());
        }
        self.notifier.emit_text(page.text());
        Ok(page)
    }

    fn fail(&self, err: ScanError) -> ScanError {
        error!("Page processing failed: {}", err);
        self.runtime.write().set_error(err.to_string());
        self.notifier.emit_error(&err);
        err
    }

    /// Delete a page; deleting an unknown id is a no-op
    pub fn delete_page(&self, id: PageId) -> bool {
        self.session.delete_page(id)
    }

    /// Snapshot of the session's pages in capture order
    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.session.pages()
    }

    /// Export the session in the given format
    pub fn export(&self, format: ExportFormat) -> ExportArtifact {
        export_session(&self.session, format)
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Copy of the current runtime state
    pub fn runtime(&self) -> RuntimeState {
        self.runtime.read().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.runtime.read().is_processing()
    }
}

impl Drop for ScanApp {
    fn drop(&mut self) {
        // Never leave the camera held
        self.source.lock().stop();
    }
}
