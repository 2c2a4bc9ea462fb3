//! Trait seams consumed by the pipeline: the platform executor, the
//! DOM-level browser driver, and the analytics sink.

pub mod analytics;
pub mod browser;
pub mod executor;

pub use analytics::{AnalyticsSink, PostedEvent};
pub use browser::BrowserDriver;
pub use executor::{ExecutionResult, Executor};
