//! A script engine that never runs code.
//!
//! Used by headless tooling where ad markup should be exercised end to end
//! (parsing, injection, loading) without an embedded interpreter.

use crate::JsEngine;
use anyhow::Result;
use log::debug;

/// One script handed to the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluatedScript {
    /// URL or `inline:` label the script was evaluated under.
    pub url: String,
    /// Length of the source in bytes.
    pub length: usize,
    /// Whether the script was submitted as a module.
    pub module: bool,
}

/// Records every evaluation and logs it at debug level.
#[derive(Debug, Default)]
pub struct LoggingEngine {
    evaluated: Vec<EvaluatedScript>,
    jobs_runs: u64,
}

impl LoggingEngine {
    /// Create an empty engine.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts seen so far, in evaluation order.
    #[inline]
    #[must_use]
    pub fn evaluated(&self) -> &[EvaluatedScript] {
        &self.evaluated
    }

    /// Number of times `run_jobs` was called.
    #[inline]
    #[must_use]
    pub const fn jobs_runs(&self) -> u64 {
        self.jobs_runs
    }

    fn record(&mut self, source: &str, url: &str, module: bool) {
        debug!(
            "[JS]: skipping evaluation of {url} ({} bytes, module={module})",
            source.len()
        );
        self.evaluated.push(EvaluatedScript {
            url: url.to_owned(),
            length: source.len(),
            module,
        });
    }
}

impl JsEngine for LoggingEngine {
    fn eval_script(&mut self, source: &str, url: &str) -> Result<()> {
        self.record(source, url, false);
        Ok(())
    }

    fn eval_module(&mut self, source: &str, url: &str) -> Result<()> {
        self.record(source, url, true);
        Ok(())
    }

    fn run_jobs(&mut self) -> Result<()> {
        self.jobs_runs = self.jobs_runs.saturating_add(1);
        Ok(())
    }
}
