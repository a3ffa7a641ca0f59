//! Shared state and messaging between the pipeline and its observers
//!
//! The pipeline publishes processing state, extracted text and errors through a
//! [`Notifier`]; presentation layers subscribe to it and never touch the session
//! directly.

pub mod messages;
pub mod notifier;
pub mod state;

pub use messages::{ChannelObserver, ScanEvent};
pub use notifier::{Notifier, ScanObserver};
pub use state::RuntimeState;
