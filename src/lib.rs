//! Honyaku: Translation Request Orchestration
//!
//! Partitions text fragments into size-bounded batches, serializes each batch for a
//! structured inference endpoint or a conversational chat session, dispatches one request
//! at a time, reconciles possibly malformed responses back to fragment ids, and retries
//! with escalating guidance. Every submitted fragment id comes back translated or
//! explicitly unresolved.

pub mod cache;
pub mod config;
pub mod error;
pub mod language;
pub mod logging;
pub mod planner;
pub mod progress;
pub mod prompt;
pub mod reconcile;
pub mod relay;
pub mod retry;
pub mod testing;
pub mod translator;
pub mod transport;
pub mod types;

pub use config::{ConfigLoader, TranslatorConfig};
pub use error::{ParseError, TranslateError, TransportError};
pub use progress::{ProgressEvent, ProgressSink};
pub use translator::{JobReport, Translator};
pub use transport::{ChatSession, Transport};
pub use types::{Fragment, FragmentId, Resolution, ResolutionMap, UnresolvedReason};
