#![allow(dead_code, reason = "Each test binary uses a different subset of the helpers")]

use ad_slot::{AdSlot, Host, ObservabilitySink, OrchestratorConfig, ScriptFetcher, SlotCallbacks, SlotConfig, SlotEvent};
use anyhow::{Result, anyhow};
use core::future::Future;
use core::time::Duration;
use futures::FutureExt as _;
use futures::future::{LocalBoxFuture, pending};
use html::{Document, NodeId};
use js::{JsEngine, LogLevel};
use serde_json::{Value, json};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tokio::task::LocalSet;
use tokio::time::sleep;
use url::Url;

pub const BASE_URL: &str = "https://publisher.example/episodes/";

pub fn init_logging() {
    let _unused = env_logger::builder().is_test(true).try_init();
}

/// Run `future` on a fresh local set, so slots can spawn their tasks.
pub async fn on_local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}

/// Let the paused clock move forward by `millis`.
pub async fn advance(millis: u64) {
    sleep(Duration::from_millis(millis)).await;
}

/// Snapshot of a `div.<class>` block holding one line of text per row.
pub fn notice(class: &str, lines: &[&str]) -> Value {
    let rows: Vec<Value> = lines
        .iter()
        .map(|line| {
            json!({
                "type": "element",
                "tag": "div",
                "attrs": {},
                "children": [{ "type": "text", "text": line }],
            })
        })
        .collect();
    json!({ "type": "element", "tag": "div", "attrs": { "class": class }, "children": rows })
}

/// Snapshot of a slot's mount point holding `children`.
pub fn mount_with(children: &[Value]) -> Value {
    json!({ "type": "element", "tag": "div", "attrs": { "class": "ad-mount" }, "children": children })
}

/// Understands two statements: `bump("name")` increments a counter and
/// `throw "message"` fails the evaluation.
#[derive(Debug, Default)]
pub struct CountingEngine {
    evaluated: Vec<(String, String)>,
    modules: Vec<String>,
    counters: HashMap<String, u32>,
    jobs_runs: u32,
}

impl CountingEngine {
    pub fn counter(&self, name: &str) -> u32 {
        self.counters.get(name).copied().unwrap_or_default()
    }

    /// Labels scripts were evaluated under, in order.
    pub fn labels(&self) -> Vec<String> {
        self.evaluated.iter().map(|(label, _)| label.clone()).collect()
    }

    pub fn sources(&self) -> Vec<String> {
        self.evaluated.iter().map(|(_, source)| source.clone()).collect()
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub const fn jobs_runs(&self) -> u32 {
        self.jobs_runs
    }

    fn run(&mut self, source: &str, label: &str) -> Result<()> {
        self.evaluated.push((label.to_owned(), source.to_owned()));
        for statement in source.split(';').map(str::trim).filter(|statement| !statement.is_empty()) {
            if let Some(name) = statement
                .strip_prefix("bump(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                let counter = self.counters.entry(name.trim_matches('"').to_owned()).or_default();
                *counter = counter.saturating_add(1);
            } else if let Some(message) = statement.strip_prefix("throw ") {
                return Err(anyhow!("Uncaught {}", message.trim_matches('"')));
            }
        }
        Ok(())
    }
}

impl JsEngine for CountingEngine {
    fn eval_script(&mut self, source: &str, url: &str) -> Result<()> {
        self.run(source, url)
    }

    fn eval_module(&mut self, source: &str, url: &str) -> Result<()> {
        self.modules.push(url.to_owned());
        self.run(source, url)
    }

    fn run_jobs(&mut self) -> Result<()> {
        self.jobs_runs = self.jobs_runs.saturating_add(1);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub enum Reply {
    Body(String),
    Fail(String),
    Delayed(Duration, String),
    /// Never settles.
    Hang,
}

/// Serves canned replies by absolute URL; anything else is a 404.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: RefCell<HashMap<String, Reply>>,
    requests: RefCell<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn route(&self, url: &str, reply: Reply) {
        self.routes.borrow_mut().insert(url.to_owned(), reply);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl ScriptFetcher for ScriptedFetcher {
    fn fetch(&self, url: &Url) -> LocalBoxFuture<'static, Result<String>> {
        self.requests.borrow_mut().push(url.to_string());
        let reply = self.routes.borrow().get(url.as_str()).cloned();
        let url = url.clone();
        async move {
            match reply {
                None => Err(anyhow!("Failed to fetch URL: {url} (Status: 404 Not Found)")),
                Some(Reply::Body(source)) => Ok(source),
                Some(Reply::Fail(message)) => Err(anyhow!(message)),
                Some(Reply::Delayed(delay, source)) => {
                    sleep(delay).await;
                    Ok(source)
                }
                Some(Reply::Hang) => pending().await,
            }
        }
        .boxed_local()
    }
}

/// Keeps every event and also logs it, so failing tests show the trail.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: RefCell<Vec<(LogLevel, String, SlotEvent)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SlotEvent> {
        self.events.borrow().iter().map(|(_, _, event)| event.clone()).collect()
    }

    pub fn count(&self, predicate: impl Fn(&SlotEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|(_, _, event)| predicate(event)).count()
    }

    pub fn at_level(&self, level: LogLevel) -> usize {
        self.events.borrow().iter().filter(|(recorded, _, _)| *recorded == level).count()
    }
}

impl ObservabilitySink for RecordingSink {
    fn record(&self, level: LogLevel, position: &str, event: &SlotEvent) {
        log::log!(level.as_log(), "[AdSlot:{position}] {event}");
        self.events
            .borrow_mut()
            .push((level, position.to_owned(), event.clone()));
    }
}

/// Collects what a slot reported through its callbacks.
#[derive(Clone, Debug, Default)]
pub struct Notifications {
    loaded: Rc<Cell<u32>>,
    errors: Rc<RefCell<Vec<String>>>,
}

impl Notifications {
    pub fn callbacks(&self) -> SlotCallbacks {
        let loaded = Rc::clone(&self.loaded);
        let errors = Rc::clone(&self.errors);
        SlotCallbacks::new()
            .on_loaded(move || loaded.set(loaded.get().saturating_add(1)))
            .on_error(move |message| errors.borrow_mut().push(message.to_owned()))
    }

    pub fn loaded(&self) -> u32 {
        self.loaded.get()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }
}

/// A document, engine, fetcher and sink wired into one [`Host`].
pub struct Harness {
    pub document: Rc<RefCell<Document>>,
    pub engine: Rc<RefCell<CountingEngine>>,
    pub fetcher: Rc<ScriptedFetcher>,
    pub sink: Rc<RecordingSink>,
    pub host: Host,
}

impl Harness {
    pub fn new() -> Result<Self> {
        init_logging();
        let document = Rc::new(RefCell::new(Document::new()));
        let engine = Rc::new(RefCell::new(CountingEngine::default()));
        let fetcher = Rc::new(ScriptedFetcher::default());
        let sink = Rc::new(RecordingSink::default());
        let host = Host::new(
            Rc::clone(&document),
            Rc::<RefCell<CountingEngine>>::clone(&engine),
            Rc::<ScriptedFetcher>::clone(&fetcher),
            Url::parse(BASE_URL)?,
        )
        .with_sink(Rc::<RecordingSink>::clone(&sink));
        Ok(Self {
            document,
            engine,
            fetcher,
            sink,
            host,
        })
    }

    pub fn body(&self) -> Result<NodeId> {
        Ok(self.document.borrow().body()?)
    }

    /// Mount under `<body>` with default timing.
    pub fn mount(&self, config: SlotConfig, callbacks: SlotCallbacks) -> Result<AdSlot> {
        let body = self.body()?;
        Ok(AdSlot::mount(&self.host, body, config, OrchestratorConfig::default(), callbacks)?)
    }

    /// Scroll the slot fully into view.
    pub fn show(&self, slot: &AdSlot) {
        self.host.viewport.set_intersection(slot.root(), 1.0);
    }

    /// `<script>` elements currently in `<head>`.
    pub fn head_scripts(&self) -> Result<Vec<NodeId>> {
        let document = self.document.borrow();
        let head = document.head()?;
        Ok(document.elements_by_tag(head, "script"))
    }

    pub fn snapshot(&self, node: NodeId) -> Value {
        self.document.borrow().snapshot(node)
    }

    pub fn text(&self, node: NodeId) -> String {
        self.document.borrow().text_content(node)
    }

    pub fn counter(&self, name: &str) -> u32 {
        self.engine.borrow().counter(name)
    }
}
