//! Ad slot orchestrator.
//!
//! An [`AdSlot`] takes third-party advertisement markup, waits until its root
//! element becomes visible (or a fallback timer elapses), re-creates the
//! markup's scripts as live elements in the host document, bounds completion
//! with a timeout and reports the outcome through [`SlotCallbacks`]. Every side
//! effect a pass creates is tracked by a [`ResourceScope`] and undone when the
//! slot unmounts, its configuration changes or it is retried.
//!
//! All of this runs on a single thread: slots must be mounted from inside a
//! [`tokio::task::LocalSet`].

#![allow(
    clippy::missing_docs_in_private_items,
    reason = "Private helpers are documented where the intent is not obvious"
)]
#![allow(clippy::missing_inline_in_public_items, reason = "Not a hot path")]

use core::error::Error;
use core::fmt::{Display, Formatter, Result as FmtResult};
use html::DomError;

pub mod config;
pub mod fetch;
pub mod gate;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod render;
pub mod slot;
pub mod telemetry;
pub mod visibility;

pub use config::{OrchestratorConfig, SlotConfig, load_registry, parse_registry};
pub use fetch::{NetworkFetcher, ScriptFetcher};
pub use gate::{GateOutcome, GateReport, ScriptOutcome, Settlement};
pub use host::Host;
pub use lifecycle::{ReleaseReport, ResourceScope};
pub use render::{
    InvalidTransition, Notification, PassState, PlaceholderReason, RenderedContent, VisualState,
};
pub use slot::{AdSlot, SlotCallbacks, SlotId};
pub use telemetry::{LogSink, ObservabilitySink, SlotEvent};
pub use visibility::{IntersectionWatch, TriggerCause, Viewport};

/// A pass could not be constructed.
///
/// Any of these fails the whole pass: the slot moves to the error state and
/// `on_error` receives the message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassError {
    /// The document refused a mutation while building the pass.
    Dom(DomError),
    /// The slot's mount point is no longer part of the document.
    MountDetached,
}

impl Display for PassError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Dom(err) => write!(formatter, "failed to build ad content: {err}"),
            Self::MountDetached => formatter.write_str("ad slot is no longer attached to the document"),
        }
    }
}

impl Error for PassError {}

impl From<DomError> for PassError {
    fn from(err: DomError) -> Self {
        Self::Dom(err)
    }
}
