//! Transient processing state of the pipeline (never part of the session)

/// Whether a recognition is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingState {
    #[default]
    Idle,
    Processing,
}

/// Runtime state that is not persisted
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    /// Current processing state
    pub processing: ProcessingState,
    /// Last error message (if any)
    pub last_error: Option<String>,
    /// Text of the most recently added page
    pub last_text: Option<String>,
}

impl RuntimeState {
    pub fn is_processing(&self) -> bool {
        self.processing == ProcessingState::Processing
    }

    /// Enter the processing state; returns false when already processing
    pub fn try_begin(&mut self) -> bool {
        if self.is_processing() {
            return false;
        }
        self.processing = ProcessingState::Processing;
        true
    }

    pub fn finish(&mut self) {
        self.processing = ProcessingState::Idle;
    }

    /// Clear any error state
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_gate() {
        let mut state = RuntimeState::default();
        assert!(!state.is_processing());
        assert!(state.try_begin());
        assert!(!state.try_begin());
        state.finish();
        assert!(state.try_begin());
    }

    #[test]
    fn test_error_tracking() {
        let mut state = RuntimeState::default();
        state.set_error("camera unplugged");
        assert_eq!(state.last_error.as_deref(), Some("camera unplugged"));
        state.clear_error();
        assert!(state.last_error.is_none());
    }
}
