//! Headless preview of a slot registry.
//!
//! Usage: `slot_preview <registry.json> [base-url]`
//!
//! Mounts every slot from the registry into an empty document, marks them all
//! visible and logs what each one ended up showing. Scripts are fetched for
//! real but only recorded, never executed.

use ad_slot::{AdSlot, Host, NetworkFetcher, OrchestratorConfig, SlotCallbacks, SlotConfig, VisualState, load_registry};
use anyhow::{Result, anyhow};
use core::time::Duration;
use html::Document;
use js::LoggingEngine;
use log::{error, info};
use std::cell::RefCell;
use std::env;
use std::path::Path;
use std::rc::Rc;
use tokio::runtime::Builder;
use tokio::task::LocalSet;
use tokio::time::sleep;
use url::Url;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let registry = args
        .next()
        .ok_or_else(|| anyhow!("usage: slot_preview <registry.json> [base-url]"))?;
    let base_url = Url::parse(&args.next().unwrap_or_else(|| "http://localhost/".to_owned()))?;
    let slots = load_registry(Path::new(&registry))?;
    let settings = OrchestratorConfig::from_env();
    info!("previewing {} slot(s) from {registry} with {settings:?}", slots.len());

    let runtime = Builder::new_current_thread().enable_all().build()?;
    LocalSet::new().block_on(&runtime, preview(slots, settings, base_url))
}

async fn preview(slots: Vec<SlotConfig>, settings: OrchestratorConfig, base_url: Url) -> Result<()> {
    let document = Rc::new(RefCell::new(Document::new()));
    let engine = Rc::new(RefCell::new(LoggingEngine::new()));
    let host = Host::new(
        Rc::clone(&document),
        Rc::<RefCell<LoggingEngine>>::clone(&engine),
        Rc::new(NetworkFetcher),
        base_url,
    );
    let body = document.borrow().body()?;

    let mut mounted = Vec::with_capacity(slots.len());
    for config in slots {
        let position = config.position.clone();
        let callbacks = SlotCallbacks::new()
            .on_error(move |message| error!("{position}: {message}"));
        let slot = AdSlot::mount(&host, body, config, settings.clone(), callbacks)?;
        host.viewport.set_intersection(slot.root(), 1.0);
        mounted.push(slot);
    }

    while mounted
        .iter()
        .any(|slot| slot.visual_state() == VisualState::Loading)
    {
        sleep(Duration::from_millis(50)).await;
    }

    for slot in &mounted {
        info!(
            "{}: {:?}, {} script(s) injected",
            slot.id(),
            slot.visual_state(),
            slot.injected_scripts().len()
        );
    }
    let engine = engine.borrow();
    info!(
        "{} script(s) recorded, jobs run {} time(s)",
        engine.evaluated().len(),
        engine.jobs_runs()
    );
    Ok(())
}
