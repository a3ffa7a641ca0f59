//! Event values forwarded to observers living on other threads

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::notifier::ScanObserver;
use crate::error::ScanError;

/// Events published by the scan pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Processing started (`true`) or finished (`false`)
    ProcessingChanged(bool),
    /// Text extracted from the latest page
    TextExtracted(String),
    /// A capture or recognition failed; the session is unchanged
    Error(ScanError),
}

/// Observer forwarding every event over a channel
pub struct ChannelObserver {
    sender: Sender<ScanEvent>,
}

impl ChannelObserver {
    /// Create an observer together with the receiving end of its channel
    pub fn new() -> (Self, Receiver<ScanEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: ScanEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}

impl ScanObserver for ChannelObserver {
    fn on_processing_changed(&self, processing: bool) {
        self.forward(ScanEvent::ProcessingChanged(processing));
    }

    fn on_text_extracted(&self, text: &str) {
        self.forward(ScanEvent::TextExtracted(text.to_string()));
    }

    fn on_error(&self, error: &ScanError) {
        self.forward(ScanEvent::Error(error.clone()));
    }
}
