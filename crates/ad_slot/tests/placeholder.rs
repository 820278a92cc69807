use ad_slot::{AdSlot, PassState, PlaceholderReason, RenderedContent, SlotConfig, SlotEvent, VisualState, parse_registry};
use anyhow::{Error, Result};

mod common;
use common::{Harness, Notifications, advance, mount_with, notice, on_local};

#[tokio::test(start_paused = true)]
async fn missing_markup_renders_placeholder() -> Result<()> {
    on_local(async {
        let harness = Harness::new()?;
        let notifications = Notifications::default();
        let slot = harness.mount(SlotConfig::new("header"), notifications.callbacks())?;
        assert_eq!(slot.visual_state(), VisualState::Loading);
        assert_eq!(slot.pass_state(), PassState::Idle);

        harness.show(&slot);
        advance(10).await;

        assert_eq!(
            slot.visual_state(),
            VisualState::Rendered(RenderedContent::Placeholder(PlaceholderReason::NoMarkupConfigured))
        );
        assert_eq!(notifications.loaded(), 1);
        assert!(notifications.errors().is_empty());
        assert!(harness.head_scripts()?.is_empty());
        assert!(slot.injected_scripts().is_empty());
        assert_eq!(
            harness.snapshot(slot.mount_point()),
            mount_with(&[notice("ad-placeholder", &["Advertisement", "header Slot - No Ad Configured"])])
        );
        let document = harness.document.borrow();
        assert_eq!(document.attribute(slot.root(), "data-ad-loaded"), Some("true"));
        assert_eq!(document.attribute(slot.root(), "data-position"), Some("header"));
        assert_eq!(document.attribute(slot.root(), "class"), Some("ad-slot"));
        Ok::<(), Error>(())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn inactive_slot_never_runs_its_scripts() -> Result<()> {
    on_local(async {
        let harness = Harness::new()?;
        let notifications = Notifications::default();
        let config = SlotConfig::new("sidebar")
            .with_markup(r#"<div>ad</div><script>bump("counter")</script><script src="https://cdn.example/ad.js"></script>"#)
            .with_active(false);
        let slot = harness.mount(config, notifications.callbacks())?;
        harness.show(&slot);
        advance(6000).await;

        assert_eq!(
            slot.visual_state(),
            VisualState::Rendered(RenderedContent::Placeholder(PlaceholderReason::SlotInactive))
        );
        assert_eq!(harness.counter("counter"), 0);
        assert!(harness.engine.borrow().labels().is_empty());
        assert!(harness.fetcher.requests().is_empty());
        assert!(harness.head_scripts()?.is_empty());
        assert_eq!(harness.text(slot.mount_point()), "Advertisementsidebar Slot - Inactive");
        assert_eq!(notifications.loaded(), 1);
        assert!(notifications.errors().is_empty());
        Ok::<(), Error>(())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn placeholder_waits_for_the_trigger() -> Result<()> {
    on_local(async {
        let harness = Harness::new()?;
        let notifications = Notifications::default();
        let slot = harness.mount(SlotConfig::new("footer"), notifications.callbacks())?;

        advance(500).await;
        assert_eq!(slot.pass_state(), PassState::Idle);
        assert_eq!(notifications.loaded(), 0);
        assert_eq!(harness.text(slot.mount_point()), "");

        advance(600).await;
        assert_eq!(slot.pass_state(), PassState::Completed);
        assert_eq!(notifications.loaded(), 1);
        assert_eq!(
            harness.sink.count(|event| matches!(event, SlotEvent::Placeholder { .. })),
            1
        );
        Ok::<(), Error>(())
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn registry_slots_mount_independently() -> Result<()> {
    on_local(async {
        let harness = Harness::new()?;
        let slots = parse_registry(
            r#"[
                { "position": "header", "adCode": "<div>top</div><script>bump(\"header\")</script>" },
                { "position": "sidebar", "adCode": "<div>side</div>", "isActive": false },
                { "position": "footer" }
            ]"#,
        )?;

        let mut mounted = Vec::new();
        for config in slots {
            let slot = harness.mount(config, Notifications::default().callbacks())?;
            harness.show(&slot);
            mounted.push(slot);
        }
        advance(10).await;

        let states: Vec<VisualState> = mounted.iter().map(AdSlot::visual_state).collect();
        assert_eq!(
            states,
            [
                VisualState::Rendered(RenderedContent::Ad),
                VisualState::Rendered(RenderedContent::Placeholder(PlaceholderReason::SlotInactive)),
                VisualState::Rendered(RenderedContent::Placeholder(PlaceholderReason::NoMarkupConfigured)),
            ]
        );
        assert_eq!(harness.counter("header"), 1);
        assert_ne!(mounted[0].id(), mounted[1].id());
        assert!(mounted[0].id().as_str().starts_with("ad-header-"));
        Ok::<(), Error>(())
    })
    .await
}
