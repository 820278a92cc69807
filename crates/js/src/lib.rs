//! Engine-agnostic JavaScript facade.
//! This crate centralizes the interfaces shared between script engines and the
//! ad slot orchestrator: the evaluation trait and log levels.

use anyhow::Result;

/// Log levels.
pub mod level;
pub use level::LogLevel;

/// Engine that records scripts instead of evaluating them.
pub mod recording;
pub use recording::{EvaluatedScript, LoggingEngine};

// ============================
// Engine-agnostic JS context trait
// ============================

/// Evaluates the scripts injected into one host document.
pub trait JsEngine {
    /// Evaluate a classic script.
    ///
    /// # Errors
    /// Returns an error if the script throws or fails to compile.
    fn eval_script(&mut self, source: &str, url: &str) -> Result<()>;
    /// Evaluate an ES module's executable form.
    ///
    /// # Errors
    /// Returns an error if the module throws or fails to compile.
    fn eval_module(&mut self, source: &str, url: &str) -> Result<()>;
    /// Run pending microtasks/jobs until idle.
    ///
    /// # Errors
    /// Returns an error if a queued job fails.
    fn run_jobs(&mut self) -> Result<()>;
}
