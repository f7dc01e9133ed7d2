pub mod analysis;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fsops;
pub mod hasher;
pub mod learning;
pub mod maintenance;
pub mod progress;
pub mod rules;
pub mod scanner;
pub mod storage;
pub mod types;

pub use config::EngineConfig;
pub use engine::{AnalysisReport, SentinelEngine};
pub use error::Error;
pub use executor::{CancelToken, ExecuteOptions, ExecutionMode, ExecutionResult};
pub use progress::{ProgressReporter, SilentReporter};
pub use types::{ActionKind, Recommendation};
