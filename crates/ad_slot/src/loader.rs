//! Script classifier and loader.
//!
//! Scripts lifted out of ad markup are inert. The loader re-creates each one
//! as a live element in the document head, where it would have run had the
//! markup been part of the page. Inline scripts run on the spot, in document
//! order. External scripts are fetched by a spawned task and report back
//! through a [`Settlement`]. Everything attached or spawned is recorded in the
//! pass's [`ResourceScope`].

use crate::gate::{ScriptOutcome, Settlement};
use crate::host::Host;
use crate::lifecycle::ResourceScope;
use crate::telemetry::SlotEvent;
use html::{DomError, NodeId, ScriptDescriptor, ScriptKind, ScriptSource};
use js::LogLevel;
use tokio::sync::oneshot;
use tokio::task::spawn_local;
use url::Url;

/// The pass a script belongs to.
pub struct PassContext<'pass> {
    pub host: &'pass Host,
    pub scope: &'pass mut ResourceScope,
    /// Used to label inline scripts for the engine.
    pub slot_id: &'pass str,
    pub position: &'pass str,
}

impl PassContext<'_> {
    fn record(&self, level: LogLevel, event: &SlotEvent) {
        self.host.record(level, self.position, event);
    }
}

/// Inject every script in document order.
///
/// Inline scripts have all run by the time this returns. The returned
/// settlements belong to the external scripts, in document order.
///
/// # Errors
/// Fails if the document refuses one of the insertions; scripts injected
/// before the failure stay tracked in the scope.
pub fn inject_scripts(pass: &mut PassContext<'_>, scripts: &[ScriptDescriptor]) -> Result<Vec<Settlement>, DomError> {
    let mut settlements = Vec::new();
    for (index, script) in scripts.iter().enumerate() {
        match script.kind {
            ScriptSource::Inline => {
                inject_inline(pass, index, script)?;
            }
            ScriptSource::External => {
                if let Some(settlement) = inject_external(pass, index, script)? {
                    settlements.push(settlement);
                }
            }
        }
    }
    Ok(settlements)
}

/// Attach an inline script to the head and run it.
///
/// An empty body attaches nothing. A script that throws is reported to the
/// sink and otherwise ignored.
///
/// # Errors
/// Fails if the document has no head or refuses the insertion.
pub fn inject_inline(
    pass: &mut PassContext<'_>,
    index: usize,
    script: &ScriptDescriptor,
) -> Result<Option<NodeId>, DomError> {
    let Some(body) = script.inline_body.as_deref().filter(|body| !body.is_empty()) else {
        return Ok(None);
    };

    let node = {
        let mut document = pass.host.document.borrow_mut();
        let head = document.head()?;
        let element = document.create_element("script");
        if let Some(script_type) = script.script_type() {
            document.set_attribute(element, "type", script_type)?;
        }
        let text = document.create_text(body);
        document.append_child(element, text)?;
        document.append_child(head, element)?;
        element
    };
    pass.scope.acquire_script(node);

    let label = format!("inline:{}-{index}", pass.slot_id);
    let kind = script.script_kind();
    let result = {
        let mut engine = pass.host.engine.borrow_mut();
        let evaluated = match kind {
            ScriptKind::Classic => Some(engine.eval_script(body, &label)),
            ScriptKind::Module => Some(engine.eval_module(body, &label)),
            ScriptKind::Data => None,
        };
        evaluated.map(|result| result.and_then(|()| engine.run_jobs()))
    };
    match result {
        None => pass.record(
            LogLevel::Debug,
            &SlotEvent::ScriptNotExecuted {
                index,
                script_type: script.script_type().unwrap_or_default().to_owned(),
            },
        ),
        Some(Ok(())) => pass.record(LogLevel::Debug, &SlotEvent::InlineExecuted { index }),
        Some(Err(err)) => pass.record(
            LogLevel::Warn,
            &SlotEvent::InlineFailed {
                index,
                error: format!("{err:#}"),
            },
        ),
    }
    Ok(Some(node))
}

/// Attach an external script to the head and start loading it.
///
/// Every attribute is copied and `async` is forced on. Non-executable types
/// are attached but never fetched and settle as loaded straight away. Returns
/// `None` for a descriptor without a source.
///
/// # Errors
/// Fails if the document has no head or refuses the insertion.
pub fn inject_external(
    pass: &mut PassContext<'_>,
    index: usize,
    script: &ScriptDescriptor,
) -> Result<Option<Settlement>, DomError> {
    let Some(source) = script.source_url.as_deref() else {
        return Ok(None);
    };

    let node = {
        let mut document = pass.host.document.borrow_mut();
        let head = document.head()?;
        let element = document.create_element("script");
        for (name, value) in &script.attributes {
            document.set_attribute(element, name, value)?;
        }
        document.set_attribute(element, "async", "")?;
        document.append_child(head, element)?;
        element
    };
    pass.scope.acquire_script(node);

    let kind = script.script_kind();
    if kind == ScriptKind::Data {
        pass.record(
            LogLevel::Debug,
            &SlotEvent::ScriptNotExecuted {
                index,
                script_type: script.script_type().unwrap_or_default().to_owned(),
            },
        );
        return Ok(Some(Settlement::ready(ScriptOutcome::Loaded)));
    }

    let resolved = pass
        .host
        .base_url
        .join(source)
        .map_err(|err| format!("invalid script URL {source:?}: {err}"));
    let display = resolved
        .as_ref()
        .map_or_else(|_| source.to_owned(), Url::to_string);
    pass.record(LogLevel::Debug, &SlotEvent::ScriptInjected { url: display.clone() });

    let (done, settlement) = Settlement::channel();
    let load = ExternalLoad {
        host: pass.host.clone(),
        node,
        module: kind == ScriptKind::Module,
        position: pass.position.to_owned(),
        display,
    };
    let task = spawn_local(load.run(resolved, done));
    pass.scope.acquire_task(task.abort_handle());
    Ok(Some(settlement))
}

struct ExternalLoad {
    host: Host,
    node: NodeId,
    module: bool,
    position: String,
    display: String,
}

impl ExternalLoad {
    async fn run(self, url: Result<Url, String>, done: oneshot::Sender<ScriptOutcome>) {
        let outcome = match url {
            Err(message) => ScriptOutcome::Failed(message),
            Ok(url) => match self.host.fetcher.fetch(&url).await {
                Ok(source) => self.evaluate(&url, &source),
                Err(err) => ScriptOutcome::Failed(format!("{err:#}")),
            },
        };

        match &outcome {
            ScriptOutcome::Loaded => self.record(
                LogLevel::Info,
                &SlotEvent::ScriptLoaded {
                    url: self.display.clone(),
                },
            ),
            ScriptOutcome::Failed(error) => self.record(
                LogLevel::Warn,
                &SlotEvent::ScriptLoadFailed {
                    url: self.display.clone(),
                    error: error.clone(),
                },
            ),
        }
        // Nobody is listening once the gate has timed out.
        let _unused = done.send(outcome);
    }

    fn evaluate(&self, url: &Url, source: &str) -> ScriptOutcome {
        if !self.host.document.borrow().is_connected(self.node) {
            return ScriptOutcome::Failed("script element was removed before it loaded".to_owned());
        }
        let result = {
            let mut engine = self.host.engine.borrow_mut();
            let evaluated = if self.module {
                engine.eval_module(source, url.as_str())
            } else {
                engine.eval_script(source, url.as_str())
            };
            evaluated.and_then(|()| engine.run_jobs())
        };
        if let Err(err) = result {
            self.record(
                LogLevel::Warn,
                &SlotEvent::ScriptThrew {
                    url: self.display.clone(),
                    error: format!("{err:#}"),
                },
            );
        }
        ScriptOutcome::Loaded
    }

    fn record(&self, level: LogLevel, event: &SlotEvent) {
        self.host.record(level, &self.position, event);
    }
}
