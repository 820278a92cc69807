//! Orchestrator events and where they go.
//!
//! Slots never log directly. They describe what happened as a [`SlotEvent`]
//! and hand it, with a level and the slot's position, to an
//! [`ObservabilitySink`]. [`LogSink`] forwards to the `log` crate.

use crate::gate::GateOutcome;
use crate::lifecycle::ReleaseReport;
use crate::render::PlaceholderReason;
use crate::visibility::TriggerCause;
use core::fmt::{Display, Formatter, Result as FmtResult};
use js::LogLevel;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotEvent {
    /// Waiting for the visibility trigger.
    Armed { slot: String },
    PassStarted { cause: TriggerCause },
    Placeholder { reason: PlaceholderReason },
    InlineExecuted { index: usize },
    InlineFailed { index: usize, error: String },
    /// A non-executable script (JSON data, templates) was attached but not run.
    ScriptNotExecuted { index: usize, script_type: String },
    ScriptInjected { url: String },
    ScriptLoaded { url: String },
    ScriptLoadFailed { url: String, error: String },
    /// The script loaded but threw while running.
    ScriptThrew { url: String, error: String },
    PassCompleted { outcome: GateOutcome },
    PassFailed { message: String },
    /// A pass finished after the slot had moved on.
    StaleCompletion,
    Released { report: ReleaseReport },
}

impl Display for SlotEvent {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Armed { slot } => write!(formatter, "slot {slot} waiting for visibility"),
            Self::PassStarted { cause } => write!(formatter, "loading ad ({cause})"),
            Self::Placeholder { reason } => write!(formatter, "showing placeholder: {reason}"),
            Self::InlineExecuted { index } => write!(formatter, "inline script #{index} executed"),
            Self::InlineFailed { index, error } => {
                write!(formatter, "inline script #{index} threw: {error}")
            }
            Self::ScriptNotExecuted { index, script_type } => {
                write!(formatter, "script #{index} of type {script_type:?} attached without running")
            }
            Self::ScriptInjected { url } => write!(formatter, "loading external script {url}"),
            Self::ScriptLoaded { url } => write!(formatter, "external script loaded: {url}"),
            Self::ScriptLoadFailed { url, error } => {
                write!(formatter, "failed to load ad script {url}: {error}")
            }
            Self::ScriptThrew { url, error } => write!(formatter, "ad script {url} threw: {error}"),
            Self::PassCompleted { outcome } => write!(formatter, "ad loaded, {outcome}"),
            Self::PassFailed { message } => write!(formatter, "failed to load ad: {message}"),
            Self::StaleCompletion => formatter.write_str("discarding completion of a superseded pass"),
            Self::Released { report } => write!(
                formatter,
                "cleaned up {} script(s), {} task(s), {} node(s)",
                report.scripts_removed, report.tasks_aborted, report.mount_cleared
            ),
        }
    }
}

/// Receiver of orchestrator events.
pub trait ObservabilitySink {
    fn record(&self, level: LogLevel, position: &str, event: &SlotEvent);
}

/// Forwards every event to the `log` crate under the `ad_slot` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ObservabilitySink for LogSink {
    fn record(&self, level: LogLevel, position: &str, event: &SlotEvent) {
        log::log!(target: "ad_slot", level.as_log(), "[AdSlot:{position}] {event}");
    }
}
