//! The ad slot widget.
//!
//! An [`AdSlot`] owns a `div.ad-slot` root in the host document and a mount
//! point inside it. Mounting arms the visibility trigger; when it fires, a
//! *pass* runs: the markup is parsed, its content goes into the mount point,
//! its scripts are injected, and the completion gate decides when the slot
//! counts as loaded. Changing the configuration, retrying or unmounting tears
//! the current pass down before anything else happens.
//!
//! Each pass carries the generation it was started under. Any asynchronous
//! step that finds a different generation on the slot gives up.
//!
//! Teardown never needs the document to be free. A release that finds it
//! borrowed aborts the pass's tasks at once and keeps the rest pending; the
//! next pass finishes it before it renders anything, and after unmount the
//! slot's cleanup task retries until it goes through.

use crate::PassError;
use crate::config::{OrchestratorConfig, SlotConfig};
use crate::gate::{GateOutcome, Settlement, wait_for_completion};
use crate::host::Host;
use crate::lifecycle::{ReleaseReport, ResourceScope};
use crate::loader::{PassContext, inject_scripts};
use crate::render::{InvalidTransition, Notification, PassState, PlaceholderReason, SlotStateMachine, VisualState};
use crate::telemetry::SlotEvent;
use crate::visibility::{TriggerCause, wait_for_visibility};
use core::fmt::{Display, Formatter, Result as FmtResult};
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use html::{DomError, NodeId, parse_markup};
use js::LogLevel;
use log::{debug, warn};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::spawn_local;
use tokio::time::{Instant, sleep};
use tracing::info_span;

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// How long the cleanup task waits before retrying a deferred release.
const RELEASE_RETRY: Duration = Duration::from_millis(10);

/// Identifier of one slot instance: `ad-<position>-<n>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(String);

impl SlotId {
    /// A fresh id; `n` increases across the whole process.
    pub fn mint(position: &str) -> Self {
        let serial = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
        let position: String = position
            .trim()
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '-' })
            .collect();
        Self(format!("ad-{position}-{serial}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SlotId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(&self.0)
    }
}

/// Outward notifications. Each fires at most once per pass.
#[derive(Clone, Default)]
pub struct SlotCallbacks {
    on_loaded: Option<Rc<dyn Fn()>>,
    on_error: Option<Rc<dyn Fn(&str)>>,
}

impl SlotCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_loaded(mut self, callback: impl Fn() + 'static) -> Self {
        self.on_loaded = Some(Rc::new(callback));
        self
    }

    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(&str) + 'static) -> Self {
        self.on_error = Some(Rc::new(callback));
        self
    }

    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::Loaded => {
                if let Some(callback) = &self.on_loaded {
                    callback();
                }
            }
            Notification::Error(message) => {
                if let Some(callback) = &self.on_error {
                    callback(message);
                }
            }
        }
    }
}

struct SlotInner {
    id: SlotId,
    host: Host,
    settings: OrchestratorConfig,
    config: SlotConfig,
    callbacks: SlotCallbacks,
    root: NodeId,
    mount: NodeId,
    machine: SlotStateMachine,
    scope: Option<ResourceScope>,
    /// Releases that found the document borrowed.
    deferred: Vec<ResourceScope>,
    /// Hands leftovers to the cleanup task once the slot is gone.
    cleanup: UnboundedSender<ResourceScope>,
    generation: u64,
    unmounted: bool,
}

/// How the synchronous half of a pass ended.
enum PassStep {
    /// Nothing more to wait for.
    Finished(Notification),
    /// External scripts are loading.
    Waiting {
        settlements: Vec<Settlement>,
        deadline: Instant,
    },
    /// The slot moved on before the pass started.
    Superseded,
}

impl SlotInner {
    fn record(&self, level: LogLevel, event: &SlotEvent) {
        self.host.record(level, &self.config.position, event);
    }

    /// Release the current pass and invalidate anything still in flight.
    fn teardown(&mut self) -> ReleaseReport {
        self.generation = self.generation.wrapping_add(1);
        self.flush_deferred();
        match self.scope.take() {
            Some(scope) => self.release_scope(scope),
            None => ReleaseReport::default(),
        }
    }

    fn release_scope(&mut self, mut scope: ResourceScope) -> ReleaseReport {
        let report = scope.release();
        if !report.is_empty() {
            self.record(LogLevel::Debug, &SlotEvent::Released { report });
        }
        if !scope.is_released() {
            self.deferred.push(scope);
        }
        report
    }

    /// Retry releases that found the document borrowed.
    fn flush_deferred(&mut self) {
        let (host, position) = (&self.host, &self.config.position);
        self.deferred.retain_mut(|scope| {
            let report = scope.release();
            if !report.is_empty() {
                host.record(LogLevel::Debug, position, &SlotEvent::Released { report });
            }
            !scope.is_released()
        });
    }

    /// Pass whatever is still pending to the cleanup task.
    fn hand_off_deferred(&mut self) {
        for scope in self.deferred.drain(..) {
            if self.cleanup.send(scope).is_err() {
                warn!("cleanup task for {} is gone; dropping a pending release", self.id);
            }
        }
    }

    /// Write the configuration onto the root element. Skipped while the
    /// document is borrowed; every pass syncs again before it starts.
    fn sync_root(&self) {
        let Ok(mut document) = self.host.document.try_borrow_mut() else {
            debug!("document is busy, {} syncs its attributes on the next pass", self.id);
            return;
        };
        let result = document
            .set_attribute(self.root, "data-position", &self.config.position)
            .and_then(|()| document.set_attribute(self.root, "data-ad-loaded", "false"));
        if let Err(err) = result {
            debug!("could not update {}: {err}", self.id);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        !self.unmounted && self.generation == generation
    }

    fn begin_pass(&mut self, generation: u64, cause: TriggerCause) -> PassStep {
        if !self.is_current(generation) {
            return PassStep::Superseded;
        }
        if let Err(err) = self.machine.begin() {
            self.record(LogLevel::Warn, &SlotEvent::PassFailed { message: err.to_string() });
            return PassStep::Superseded;
        }
        self.record(LogLevel::Info, &SlotEvent::PassStarted { cause });
        self.flush_deferred();
        self.sync_root();

        if let Some(reason) = self.config.placeholder_reason() {
            if let Err(err) = self.render_placeholder(reason) {
                return self.fail_pass(&err);
            }
            self.record(LogLevel::Info, &SlotEvent::Placeholder { reason });
            let transition = self.machine.show_placeholder(reason);
            return self.finish(transition);
        }

        let span = info_span!("ad_slot_pass", slot = %self.id, position = %self.config.position);
        let _entered = span.enter();
        let deadline = Instant::now() + self.settings.completion_timeout();
        match self.construct() {
            Ok(settlements) => PassStep::Waiting { settlements, deadline },
            Err(err) => self.fail_pass(&err),
        }
    }

    /// Drop everything the pass built and show the error block instead.
    fn fail_pass(&mut self, err: &PassError) -> PassStep {
        let message = err.to_string();
        self.record(LogLevel::Error, &SlotEvent::PassFailed { message: message.clone() });
        if let Some(scope) = self.scope.take() {
            self.release_scope(scope);
        }
        // The error block goes away with the next release.
        self.scope = Some(ResourceScope::new(Rc::clone(&self.host.document), self.mount));
        let detail = format!("{} Slot", self.config.position);
        let error = format!("Error: {message}");
        let lines = ["Advertisement Failed", detail.as_str(), error.as_str()];
        if let Err(render_err) = self.render_notice("ad-error", &lines) {
            debug!("could not show the error block for {}: {render_err}", self.id);
        }
        let transition = self.machine.fail(message);
        self.finish(transition)
    }

    fn finish(&mut self, transition: Result<Notification, InvalidTransition>) -> PassStep {
        match transition {
            Ok(notification) => {
                if matches!(notification, Notification::Loaded) {
                    self.mark_loaded();
                }
                PassStep::Finished(notification)
            }
            Err(err) => {
                self.record(LogLevel::Warn, &SlotEvent::PassFailed { message: err.to_string() });
                PassStep::Superseded
            }
        }
    }

    fn mark_loaded(&self) {
        let result = self
            .host
            .document
            .borrow_mut()
            .set_attribute(self.root, "data-ad-loaded", "true");
        if let Err(err) = result {
            debug!("could not flag {} as loaded: {err}", self.id);
        }
    }

    fn render_placeholder(&self, reason: PlaceholderReason) -> Result<(), PassError> {
        if !self.host.document.borrow().is_connected(self.mount) {
            return Err(PassError::MountDetached);
        }
        let detail = format!("{} Slot - {reason}", self.config.position);
        Ok(self.render_notice("ad-placeholder", &["Advertisement", detail.as_str()])?)
    }

    /// A `div.<class>` with one line of text per child, appended to the mount.
    fn render_notice(&self, class: &str, lines: &[&str]) -> Result<(), DomError> {
        let mut document = self.host.document.borrow_mut();
        let block = document.create_element("div");
        document.set_attribute(block, "class", class)?;
        for line in lines {
            let row = document.create_element("div");
            let text = document.create_text(line);
            document.append_child(row, text)?;
            document.append_child(block, row)?;
        }
        document.append_child(self.mount, block)
    }

    /// Parse the markup, show its content and inject its scripts.
    fn construct(&mut self) -> Result<Vec<Settlement>, PassError> {
        let markup = self.config.markup().unwrap_or_default();
        let scripts = {
            let mut document = self.host.document.borrow_mut();
            if !document.is_connected(self.mount) {
                return Err(PassError::MountDetached);
            }
            let parsed = parse_markup(&mut document, markup)?;
            document.set_attribute(parsed.container, "id", &format!("{}-content", self.id))?;
            document.set_attribute(parsed.container, "class", "ad-container")?;
            document.append_child(self.mount, parsed.container)?;
            parsed.scripts
        };

        let scope = self.scope.get_or_insert_with(|| {
            ResourceScope::new(Rc::clone(&self.host.document), self.mount)
        });
        let mut pass = PassContext {
            host: &self.host,
            scope,
            slot_id: self.id.as_str(),
            position: &self.config.position,
        };
        Ok(inject_scripts(&mut pass, &scripts)?)
    }

    fn complete_pass(&mut self, generation: u64, outcome: GateOutcome) -> Option<Notification> {
        if !self.is_current(generation) {
            self.record(LogLevel::Debug, &SlotEvent::StaleCompletion);
            return None;
        }
        let level = match outcome {
            GateOutcome::AllSettled(_) => LogLevel::Info,
            GateOutcome::TimedOut(_) => LogLevel::Warn,
        };
        self.record(level, &SlotEvent::PassCompleted { outcome });
        let transition = self.machine.complete();
        match self.finish(transition) {
            PassStep::Finished(notification) => Some(notification),
            PassStep::Waiting { .. } | PassStep::Superseded => None,
        }
    }
}

/// A mounted advertisement slot.
///
/// Dropping the slot unmounts it.
pub struct AdSlot {
    inner: Rc<RefCell<SlotInner>>,
}

impl AdSlot {
    /// Create the slot's elements under `parent` and arm the visibility
    /// trigger.
    ///
    /// # Errors
    /// Fails if the slot's elements cannot be inserted under `parent`.
    ///
    /// # Panics
    /// Must be called from inside a [`tokio::task::LocalSet`].
    pub fn mount(
        host: &Host,
        parent: NodeId,
        config: SlotConfig,
        settings: OrchestratorConfig,
        callbacks: SlotCallbacks,
    ) -> Result<Self, DomError> {
        let id = SlotId::mint(&config.position);
        let (root, mount) = {
            let mut document = host.document.borrow_mut();
            let root = document.create_element("div");
            document.set_attribute(root, "id", id.as_str())?;
            document.set_attribute(root, "class", "ad-slot")?;
            document.set_attribute(root, "data-position", &config.position)?;
            let mount = document.create_element("div");
            document.set_attribute(mount, "class", "ad-mount")?;
            document.append_child(root, mount)?;
            document.append_child(parent, root)?;
            (root, mount)
        };

        let (cleanup, pending) = unbounded_channel();
        spawn_local(finish_releases(id.clone(), pending));
        let slot = Self {
            inner: Rc::new(RefCell::new(SlotInner {
                id,
                host: host.clone(),
                settings,
                config,
                callbacks,
                root,
                mount,
                machine: SlotStateMachine::new(),
                scope: None,
                deferred: Vec::new(),
                cleanup,
                generation: 0,
                unmounted: false,
            })),
        };
        arm(&slot.inner, false);
        Ok(slot)
    }

    /// Replace the configuration. An identical configuration is ignored;
    /// anything else tears down the current pass and waits for visibility
    /// again.
    pub fn update(&self, config: SlotConfig) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.unmounted || inner.config == config {
                return;
            }
            inner.teardown();
            inner.machine.reset();
            inner.config = config;
            inner.sync_root();
        }
        arm(&self.inner, false);
    }

    /// Start a fresh pass after a failure, without waiting for visibility.
    ///
    /// # Errors
    /// Fails unless the last pass failed.
    pub fn retry(&self) -> Result<(), InvalidTransition> {
        {
            let mut inner = self.inner.borrow_mut();
            inner.machine.retry()?;
            inner.teardown();
        }
        arm(&self.inner, true);
        Ok(())
    }

    /// Tear down the slot and remove it from the document.
    pub fn unmount(self) {
        drop(self);
    }

    pub fn visual_state(&self) -> VisualState {
        self.inner.borrow().machine.visual_state()
    }

    pub fn pass_state(&self) -> PassState {
        self.inner.borrow().machine.pass_state().clone()
    }

    pub fn id(&self) -> SlotId {
        self.inner.borrow().id.clone()
    }

    /// The `div.ad-slot` element the visibility trigger observes.
    pub fn root(&self) -> NodeId {
        self.inner.borrow().root
    }

    /// Where ad content and placeholders are rendered.
    pub fn mount_point(&self) -> NodeId {
        self.inner.borrow().mount
    }

    pub fn config(&self) -> SlotConfig {
        self.inner.borrow().config.clone()
    }

    /// Script elements the current pass has attached to the document.
    pub fn injected_scripts(&self) -> Vec<NodeId> {
        self.inner
            .borrow()
            .scope
            .as_ref()
            .map(ResourceScope::scripts)
            .unwrap_or_default()
    }
}

impl Drop for AdSlot {
    fn drop(&mut self) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            warn!("ad slot dropped while busy; its resources are released with it");
            return;
        };
        if inner.unmounted {
            return;
        }
        inner.teardown();
        inner.unmounted = true;
        inner.host.viewport.forget(inner.root);
        let mut widget = ResourceScope::new(Rc::clone(&inner.host.document), inner.mount);
        widget.acquire_widget(inner.root);
        inner.release_scope(widget);
        inner.hand_off_deferred();
    }
}

/// Keep retrying releases handed over by an unmounted slot. Ends once the
/// slot is gone and nothing is left to release.
async fn finish_releases(id: SlotId, mut pending: UnboundedReceiver<ResourceScope>) {
    while let Some(mut scope) = pending.recv().await {
        while !scope.is_released() {
            sleep(RELEASE_RETRY).await;
            let report = scope.release();
            if scope.is_released() {
                debug!("finished deferred release for {id}: {report:?}");
            }
        }
    }
}

/// Start a new generation and spawn the task that runs its pass.
fn arm(inner: &Rc<RefCell<SlotInner>>, immediate: bool) {
    let mut slot = inner.borrow_mut();
    slot.generation = slot.generation.wrapping_add(1);
    let generation = slot.generation;
    let trigger = (!immediate).then(|| {
        (
            slot.host.viewport.observe(slot.root),
            slot.settings.visibility_threshold,
            slot.settings.fallback_delay(),
        )
    });

    let weak = Rc::downgrade(inner);
    let task = spawn_local(async move {
        let cause = match trigger {
            Some((watch, threshold, fallback)) => wait_for_visibility(watch, threshold, fallback).await,
            None => TriggerCause::Retry,
        };
        run_pass(&weak, generation, cause).await;
    });

    let mut scope = ResourceScope::new(Rc::clone(&slot.host.document), slot.mount);
    scope.acquire_task(task.abort_handle());
    slot.scope = Some(scope);
    let event = SlotEvent::Armed {
        slot: slot.id.to_string(),
    };
    slot.record(LogLevel::Debug, &event);
}

async fn run_pass(weak: &Weak<RefCell<SlotInner>>, generation: u64, cause: TriggerCause) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let step = inner.borrow_mut().begin_pass(generation, cause);
    let (settlements, deadline) = match step {
        PassStep::Finished(notification) => {
            dispatch(&inner, &notification);
            return;
        }
        PassStep::Superseded => return,
        PassStep::Waiting { settlements, deadline } => (settlements, deadline),
    };
    drop(inner);

    let outcome = wait_for_completion(settlements, deadline).await;
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let notification = inner.borrow_mut().complete_pass(generation, outcome);
    if let Some(notification) = notification {
        dispatch(&inner, &notification);
    }
}

/// Invoke the caller's callback with no slot borrow held, so it may call
/// back into the slot.
fn dispatch(inner: &Rc<RefCell<SlotInner>>, notification: &Notification) {
    let callbacks = inner.borrow().callbacks.clone();
    callbacks.notify(notification);
}
