//! Scripted capture sources and OCR engines for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::capture::{CaptureError, CaptureSource, CapturedFrame, ImageData};
use crate::vision::{
    BoundingBox, EngineError, EngineFactory, EngineParameters, OcrEngine, RawRecognition, Region,
};

pub fn region(confidence: f32) -> Region {
    Region {
        bbox: BoundingBox::new(0, 0, 100, 20),
        confidence,
        text: format!("block@{}", confidence),
    }
}

/// Engine factory that hands out engines replaying queued outcomes
#[derive(Default)]
pub struct ScriptedFactory {
    outcomes: Mutex<VecDeque<Result<RawRecognition, String>>>,
    pub created: AtomicUsize,
    pub terminated: Arc<AtomicUsize>,
    fail_configure: AtomicBool,
    /// When set, `recognize` waits for a permit before returning
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: &str, regions: Vec<Region>) {
        self.outcomes.lock().push_back(Ok(RawRecognition {
            text: text.to_string(),
            regions,
        }));
    }

    pub fn push_failure(&self, cause: &str) {
        self.outcomes.lock().push_back(Err(cause.to_string()));
    }

    pub fn fail_configure(&self) {
        self.fail_configure.store(true, Ordering::SeqCst);
    }

    /// Make recognitions block until the returned handle is notified
    pub fn hold_recognition(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some(notify.clone());
        notify
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create(&self, _language: &str) -> Result<Box<dyn OcrEngine>, EngineError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine {
            outcome: self.outcomes.lock().pop_front(),
            fail_configure: self.fail_configure.load(Ordering::SeqCst),
            gate: self.gate.lock().clone(),
            terminated: self.terminated.clone(),
            done: false,
        }))
    }
}

struct ScriptedEngine {
    outcome: Option<Result<RawRecognition, String>>,
    fail_configure: bool,
    gate: Option<Arc<Notify>>,
    terminated: Arc<AtomicUsize>,
    done: bool,
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    async fn configure(&mut self, _params: &EngineParameters) -> Result<(), EngineError> {
        if self.fail_configure {
            return Err(EngineError::InvalidParameters("scripted".to_string()));
        }
        Ok(())
    }

    async fn recognize(&mut self, _image: &[u8]) -> Result<RawRecognition, EngineError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.outcome.take() {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(cause)) => Err(EngineError::Failed(cause)),
            None => Ok(RawRecognition::default()),
        }
    }

    fn terminate(&mut self) {
        if !self.done {
            self.done = true;
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Capture source producing placeholder frames, optionally failing
pub struct ScriptedSource {
    active: bool,
    pub deny_permission: bool,
    pub stream_lost: Arc<AtomicBool>,
    pub captures: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    /// Blocks `capture` like a camera waiting for its first frame
    pub capture_delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            active: false,
            deny_permission: false,
            stream_lost: Arc::new(AtomicBool::new(false)),
            captures: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
            capture_delay: None,
        }
    }
}

impl CaptureSource for ScriptedSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.deny_permission {
            return Err(CaptureError::PermissionDenied("scripted".to_string()));
        }
        self.stream_lost.store(false, Ordering::SeqCst);
        self.active = true;
        Ok(())
    }

    fn capture(&mut self) -> Result<CapturedFrame, CaptureError> {
        if !self.active {
            return Err(CaptureError::NotStarted);
        }
        if self.stream_lost.load(Ordering::SeqCst) {
            self.active = false;
            return Err(CaptureError::StreamUnavailable("scripted".to_string()));
        }
        if let Some(delay) = self.capture_delay {
            std::thread::sleep(delay);
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst) as u8;
        Ok(CapturedFrame::new(ImageData::from_bytes(vec![n, 1, 2, 3]), 640, 480))
    }

    fn stop(&mut self) {
        if self.active {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn describe(&self) -> String {
        "scripted source".to_string()
    }
}
