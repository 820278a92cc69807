//! Render state machine.
//!
//! A slot's pass moves `Idle -> Pending -> {Completed | Failed}`; the visual
//! state shown to the user is derived from it. Every transition that ends a
//! pass yields exactly one [`Notification`], and a pass can only end once, so a
//! slot never reports twice for the same pass.

use core::error::Error;
use core::fmt::{Display, Formatter, Result as FmtResult};

/// Progress of the current pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PassState {
    /// Waiting for the visibility trigger.
    #[default]
    Idle,
    /// Triggered; scripts are being injected or awaited.
    Pending,
    Completed,
    Failed(String),
}

/// Why a slot shows a placeholder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlaceholderReason {
    NoMarkupConfigured,
    SlotInactive,
}

impl Display for PlaceholderReason {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(match self {
            Self::NoMarkupConfigured => "No Ad Configured",
            Self::SlotInactive => "Inactive",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderedContent {
    Placeholder(PlaceholderReason),
    Ad,
}

/// What the slot currently shows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VisualState {
    Loading,
    Error(String),
    Rendered(RenderedContent),
}

/// The single outward signal a finished pass produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Loaded,
    Error(String),
}

/// An event arrived in a state that has no transition for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: PassState,
    pub event: &'static str,
}

impl Display for InvalidTransition {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        write!(formatter, "cannot apply `{}` while {:?}", self.event, self.from)
    }
}

impl Error for InvalidTransition {}

#[derive(Clone, Debug, Default)]
pub struct SlotStateMachine {
    pass: PassState,
    content: Option<RenderedContent>,
}

impl SlotStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn pass_state(&self) -> &PassState {
        &self.pass
    }

    pub fn visual_state(&self) -> VisualState {
        match (&self.pass, &self.content) {
            (PassState::Completed, Some(content)) => VisualState::Rendered(content.clone()),
            (PassState::Failed(message), _) => VisualState::Error(message.clone()),
            _ => VisualState::Loading,
        }
    }

    fn reject(&self, event: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.pass.clone(),
            event,
        }
    }

    /// The visibility trigger fired.
    ///
    /// # Errors
    /// Fails unless the machine is idle.
    pub fn begin(&mut self) -> Result<(), InvalidTransition> {
        if self.pass != PassState::Idle {
            return Err(self.reject("begin"));
        }
        self.pass = PassState::Pending;
        self.content = None;
        Ok(())
    }

    /// The pass has nothing to inject.
    ///
    /// # Errors
    /// Fails unless a pass is pending.
    pub fn show_placeholder(&mut self, reason: PlaceholderReason) -> Result<Notification, InvalidTransition> {
        self.finish("show_placeholder", RenderedContent::Placeholder(reason))
    }

    /// The completion gate resolved.
    ///
    /// # Errors
    /// Fails unless a pass is pending.
    pub fn complete(&mut self) -> Result<Notification, InvalidTransition> {
        self.finish("complete", RenderedContent::Ad)
    }

    fn finish(&mut self, event: &'static str, content: RenderedContent) -> Result<Notification, InvalidTransition> {
        if self.pass != PassState::Pending {
            return Err(self.reject(event));
        }
        self.pass = PassState::Completed;
        self.content = Some(content);
        Ok(Notification::Loaded)
    }

    /// Building the pass failed.
    ///
    /// # Errors
    /// Fails unless a pass is pending.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<Notification, InvalidTransition> {
        if self.pass != PassState::Pending {
            return Err(self.reject("fail"));
        }
        let message = message.into();
        self.pass = PassState::Failed(message.clone());
        self.content = None;
        Ok(Notification::Error(message))
    }

    /// User-requested retry after a failure.
    ///
    /// # Errors
    /// Fails unless the last pass failed.
    pub fn retry(&mut self) -> Result<(), InvalidTransition> {
        if !matches!(self.pass, PassState::Failed(_)) {
            return Err(self.reject("retry"));
        }
        self.pass = PassState::Idle;
        Ok(())
    }

    /// Forget the current pass; used when the slot's configuration changes.
    pub fn reset(&mut self) {
        self.pass = PassState::Idle;
        self.content = None;
    }
}
