//! Scan session
//!
//! The ordered, in-memory collection of pages captured during one scanning
//! activity. Pages are immutable once appended; the session only grows by
//! appending and shrinks by explicit deletion.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::capture::ImageData;
use crate::vision::Region;

/// Page identifier, unique and increasing within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PageId(u64);

impl PageId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One captured and recognized page
#[derive(Debug)]
pub struct Page {
    id: PageId,
    image: ImageData,
    text: String,
    regions: Vec<Region>,
    captured_at: SystemTime,
}

impl Page {
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Source image the text was recognized from
    pub fn image(&self) -> &ImageData {
        &self.image
    }

    /// Recognized text, verbatim from the engine
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Recognized blocks remaining after confidence filtering
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }
}

/// Ordered collection of pages for the current scanning activity
pub struct ScanSession {
    id: Uuid,
    pages: RwLock<Vec<Arc<Page>>>,
    next_id: AtomicU64,
}

impl ScanSession {
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        debug!("Scan session {} created", id);
        Self {
            id,
            pages: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Session identifier for log correlation
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Append a new page and return it
    pub fn append_page(&self, image: ImageData, text: String, regions: Vec<Region>) -> Arc<Page> {
        // Id is taken under the write lock so ids follow insertion order
        let mut pages = self.pages.write();
        let page = Arc::new(Page {
            id: PageId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            image,
            text,
            regions,
            captured_at: SystemTime::now(),
        });
        pages.push(page.clone());
        info!(
            "Page {} added to session {} ({} page(s))",
            page.id,
            self.id,
            pages.len()
        );
        page
    }

    /// Remove the page with this id; returns whether a page was removed
    pub fn delete_page(&self, id: PageId) -> bool {
        let mut pages = self.pages.write();
        let Some(pos) = pages.iter().position(|p| p.id == id) else {
            debug!("Page {} not in session {}, nothing to delete", id, self.id);
            return false;
        };
        pages.remove(pos);
        info!("Page {} deleted from session {}", id, self.id);
        true
    }

    /// Snapshot of the pages in capture order
    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.pages.read().clone()
    }

    pub fn get(&self, id: PageId) -> Option<Arc<Page>> {
        self.pages.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.read().is_empty()
    }

    /// Drop every page; ids keep increasing afterwards
    pub fn clear(&self) {
        let mut pages = self.pages.write();
        let removed = pages.len();
        pages.clear();
        info!("Session {} cleared ({} page(s) removed)", self.id, removed);
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}
