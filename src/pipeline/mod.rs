//! Pipeline Execution
//!
//! - [`orchestrator`]: one run from pre-flight to merged, ordered results
//! - [`host`]: background execution with cancellation and a hard timeout
//! - [`progress`]: snapshot and event streaming
//! - [`report`]: aggregate insights over a terminal run

pub mod host;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod run;

pub use host::{BackgroundExecutionHost, RunHandle};
pub use orchestrator::{PipelineOrchestrator, RunContext, SharedOrchestrator};
pub use progress::{MessageLevel, ProgressEvent, ProgressTracker};
pub use report::{PipelineReport, RowCounts};
pub use run::{PerformanceSummary, PipelineRun, RunSnapshot, RunStatus};
