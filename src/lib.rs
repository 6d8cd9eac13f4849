pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod media;
pub mod telemetry;
pub mod verdict;
pub mod workbench;

pub use analysis::{analyze, GeminiClient, ReasoningService};
pub use error::{AnalysisError, ServiceFailure};
pub use ledger::{Durability, HistoryLedger, HISTORY_CAPACITY};
pub use media::{MediaFile, MediaKind};
pub use verdict::{AnalysisVerdict, HistoryEntry, Label};
