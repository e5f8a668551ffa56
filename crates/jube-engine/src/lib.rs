//! Engine crate: the Workpackage Store, Scheduler, Analyzer, and
//! Result Composer described in spec Sections 4.3–4.6.

pub mod analyzer;
pub mod error;
pub mod result;
pub mod scheduler;
pub mod store;

pub use analyzer::AnalysisRow;
pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
pub use store::BenchmarkStore;
