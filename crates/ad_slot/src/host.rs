//! Everything a slot needs from the page it lives in.

use crate::fetch::ScriptFetcher;
use crate::telemetry::{LogSink, ObservabilitySink, SlotEvent};
use crate::visibility::Viewport;
use html::Document;
use js::{JsEngine, LogLevel};
use std::cell::RefCell;
use std::rc::Rc;
use url::Url;

/// Shared page collaborators. Cheap to clone; every clone refers to the same
/// document, engine and viewport.
#[derive(Clone)]
pub struct Host {
    pub document: Rc<RefCell<Document>>,
    pub engine: Rc<RefCell<dyn JsEngine>>,
    pub fetcher: Rc<dyn ScriptFetcher>,
    pub viewport: Viewport,
    pub sink: Rc<dyn ObservabilitySink>,
    /// Base for resolving relative and protocol-relative script URLs.
    pub base_url: Url,
}

impl Host {
    /// A host with a fresh viewport that logs through [`LogSink`].
    pub fn new(
        document: Rc<RefCell<Document>>,
        engine: Rc<RefCell<dyn JsEngine>>,
        fetcher: Rc<dyn ScriptFetcher>,
        base_url: Url,
    ) -> Self {
        Self {
            document,
            engine,
            fetcher,
            viewport: Viewport::new(),
            sink: Rc::new(LogSink),
            base_url,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Rc<dyn ObservabilitySink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub(crate) fn record(&self, level: LogLevel, position: &str, event: &SlotEvent) {
        self.sink.record(level, position, event);
    }
}
