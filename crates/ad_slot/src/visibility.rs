//! Visibility trigger.
//!
//! The host publishes each element's viewport intersection ratio through a
//! [`Viewport`]. A slot waits until its root crosses the threshold or the
//! fallback delay elapses, whichever comes first.

use core::fmt::{Display, Formatter, Result as FmtResult};
use core::time::Duration;
use futures::future::pending;
use html::NodeId;
use log::trace;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tokio::sync::watch;
use tokio::time::sleep;

/// Intersection ratios of observed elements, as reported by the host.
///
/// Cloning yields another handle to the same viewport.
#[derive(Clone, Debug, Default)]
pub struct Viewport {
    ratios: Rc<RefCell<HashMap<NodeId, watch::Sender<f64>>>>,
}

impl Viewport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `target`. The target stays tracked until [`Self::forget`];
    /// dropping the watch only ends this registration.
    pub fn observe(&self, target: NodeId) -> IntersectionWatch {
        let mut ratios = self.ratios.borrow_mut();
        let sender = ratios
            .entry(target)
            .or_insert_with(|| watch::channel(0.0).0);
        IntersectionWatch {
            target,
            ratio: sender.subscribe(),
        }
    }

    /// Report how much of `target` is visible, from `0.0` to `1.0`.
    ///
    /// Reports for elements nobody observes are dropped.
    pub fn set_intersection(&self, target: NodeId, ratio: f64) {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        let ratios = self.ratios.borrow();
        let Some(sender) = ratios.get(&target) else {
            trace!("ignoring intersection report for untracked {target:?}");
            return;
        };
        sender.send_replace(ratio);
    }

    pub fn is_tracking(&self, target: NodeId) -> bool {
        self.ratios.borrow().contains_key(&target)
    }

    /// Last reported ratio for `target`.
    pub fn intersection(&self, target: NodeId) -> f64 {
        self.ratios
            .borrow()
            .get(&target)
            .map_or(0.0, |sender| *sender.borrow())
    }

    /// Number of live watches on `target`.
    pub fn observer_count(&self, target: NodeId) -> usize {
        self.ratios
            .borrow()
            .get(&target)
            .map_or(0, watch::Sender::receiver_count)
    }

    /// Stop tracking `target`; outstanding watches never fire.
    pub fn forget(&self, target: NodeId) {
        self.ratios.borrow_mut().remove(&target);
    }
}

/// A registration on one element's intersection ratio.
#[derive(Debug)]
pub struct IntersectionWatch {
    target: NodeId,
    ratio: watch::Receiver<f64>,
}

impl IntersectionWatch {
    pub const fn target(&self) -> NodeId {
        self.target
    }

    /// Resolve once the element is at least `threshold` visible.
    ///
    /// Never resolves if the viewport stops tracking the element first.
    pub async fn entered(&mut self, threshold: f64) {
        let visible = self
            .ratio
            .wait_for(|ratio| *ratio > 0.0 && *ratio >= threshold)
            .await;
        if visible.is_err() {
            pending::<()>().await;
        }
    }
}

/// What started a pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerCause {
    Intersection,
    Fallback,
    Retry,
}

impl Display for TriggerCause {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        formatter.write_str(match self {
            Self::Intersection => "intersection",
            Self::Fallback => "fallback timer",
            Self::Retry => "retry",
        })
    }
}

/// Wait for the element to become visible, or for `fallback` to elapse.
///
/// The watch is consumed, so whichever side loses stops observing.
pub async fn wait_for_visibility(mut watch: IntersectionWatch, threshold: f64, fallback: Duration) -> TriggerCause {
    tokio::select! {
        biased;
        () = watch.entered(threshold) => TriggerCause::Intersection,
        () = sleep(fallback) => TriggerCause::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use html::Document;
    use tokio::task::{LocalSet, spawn_local};
    use tokio::time::Instant;

    fn node() -> NodeId {
        let mut document = Document::empty();
        document.create_element("div")
    }

    #[tokio::test(start_paused = true)]
    async fn intersection_beats_fallback() {
        let viewport = Viewport::new();
        let target = node();
        let watch = viewport.observe(target);
        let reporter = viewport.clone();
        LocalSet::new()
            .run_until(async move {
                let trigger = spawn_local(wait_for_visibility(watch, 0.1, Duration::from_millis(1000)));
                sleep(Duration::from_millis(200)).await;
                reporter.set_intersection(target, 0.5);
                assert_eq!(trigger.await.ok(), Some(TriggerCause::Intersection));
            })
            .await;
        assert_eq!(viewport.observer_count(target), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_fires_when_never_visible() {
        let viewport = Viewport::new();
        let target = node();
        let started = Instant::now();
        let cause = wait_for_visibility(viewport.observe(target), 0.1, Duration::from_millis(1000)).await;
        assert_eq!(cause, TriggerCause::Fallback);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(viewport.observer_count(target), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ratio_below_threshold_does_not_count() {
        let viewport = Viewport::new();
        let target = node();
        let watch = viewport.observe(target);
        viewport.set_intersection(target, 0.05);
        let cause = wait_for_visibility(watch, 0.1, Duration::from_millis(300)).await;
        assert_eq!(cause, TriggerCause::Fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn already_visible_fires_immediately() {
        let viewport = Viewport::new();
        let target = node();
        let watch = viewport.observe(target);
        viewport.set_intersection(target, 3.0);
        assert!((viewport.intersection(target) - 1.0).abs() < f64::EPSILON);
        let started = Instant::now();
        let cause = wait_for_visibility(watch, 0.1, Duration::from_millis(1000)).await;
        assert_eq!(cause, TriggerCause::Intersection);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn forget_drops_the_registration() {
        let viewport = Viewport::new();
        let target = node();
        let watch = viewport.observe(target);
        assert_eq!(watch.target(), target);
        assert_eq!(viewport.observer_count(target), 1);
        viewport.forget(target);
        assert_eq!(viewport.observer_count(target), 0);
    }

    #[test]
    fn reports_for_forgotten_targets_are_dropped() {
        let viewport = Viewport::new();
        let target = node();
        viewport.set_intersection(target, 1.0);
        assert!(!viewport.is_tracking(target));

        let _watch = viewport.observe(target);
        viewport.forget(target);
        viewport.set_intersection(target, 1.0);
        assert!(!viewport.is_tracking(target));
        assert!(viewport.intersection(target).abs() < f64::EPSILON);
    }
}
