//! Lifecycle management for the side effects of one pass.
//!
//! A [`ResourceScope`] records every script element a pass attaches and every
//! task it spawns. Releasing the scope aborts the tasks that are still running,
//! removes those elements from wherever they ended up and empties the slot's
//! mount point.
//!
//! Aborting needs nothing but the handles, so it always happens. The document
//! work waits until nobody else holds the document; until then the scope stays
//! unreleased and a later [`ResourceScope::release`] finishes the job.

use html::{Document, NodeId};
use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::task::AbortHandle;

/// A side effect and, implicitly, how to undo it.
#[derive(Debug)]
pub enum Resource {
    /// A live `<script>` element attached outside the slot's subtree.
    AttachedScript { node: NodeId },
    /// A spawned task: the visibility trigger or a script load.
    Task(AbortHandle),
    /// The slot's own root, removed together with everything under it.
    Widget { node: NodeId },
}

/// What a release undid.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub scripts_removed: usize,
    pub tasks_aborted: usize,
    /// Nodes removed from the mount point.
    pub mount_cleared: usize,
}

impl ReleaseReport {
    pub const fn is_empty(&self) -> bool {
        self.scripts_removed == 0 && self.tasks_aborted == 0 && self.mount_cleared == 0
    }
}

/// Owner of one pass's side effects.
///
/// Dropping the scope releases it.
#[derive(Debug)]
pub struct ResourceScope {
    document: Rc<RefCell<Document>>,
    mount: NodeId,
    resources: Vec<Resource>,
    released: bool,
}

impl ResourceScope {
    pub fn new(document: Rc<RefCell<Document>>, mount: NodeId) -> Self {
        Self {
            document,
            mount,
            resources: Vec::new(),
            released: false,
        }
    }

    pub fn acquire_script(&mut self, node: NodeId) {
        self.resources.push(Resource::AttachedScript { node });
    }

    pub fn acquire_task(&mut self, handle: AbortHandle) {
        self.resources.push(Resource::Task(handle));
    }

    pub fn acquire_widget(&mut self, node: NodeId) {
        self.resources.push(Resource::Widget { node });
    }

    /// Script elements currently tracked, in acquisition order.
    pub fn scripts(&self) -> Vec<NodeId> {
        self.resources
            .iter()
            .filter_map(|resource| match resource {
                Resource::AttachedScript { node } => Some(*node),
                Resource::Task(_) | Resource::Widget { .. } => None,
            })
            .collect()
    }

    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Undo everything acquired so far.
    ///
    /// Elements that were already removed are skipped. Once a release has
    /// gone through, calling this again returns an empty report. If the
    /// document is borrowed elsewhere only the tasks are aborted and the scope
    /// stays unreleased.
    pub fn release(&mut self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if self.released {
            return report;
        }
        report.tasks_aborted = self.abort_tasks();
        let Ok(mut document) = self.document.try_borrow_mut() else {
            warn!("document is busy, deferring removal of {} node(s)", self.resources.len());
            return report;
        };

        for resource in self.resources.drain(..) {
            match resource {
                Resource::AttachedScript { node } => {
                    if document.detach(node) {
                        report.scripts_removed = report.scripts_removed.saturating_add(1);
                    }
                    document.remove_subtree(node);
                }
                Resource::Widget { node } => document.remove_subtree(node),
                Resource::Task(_) => {}
            }
        }
        report.mount_cleared = document.clear_children(self.mount);
        self.released = true;
        debug!("released pass resources: {report:?}");
        report
    }

    fn abort_tasks(&mut self) -> usize {
        let mut aborted = 0_usize;
        self.resources.retain(|resource| {
            let Resource::Task(handle) = resource else {
                return true;
            };
            if !handle.is_finished() {
                handle.abort();
                aborted = aborted.saturating_add(1);
            }
            false
        });
        aborted
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.release();
    }
}
