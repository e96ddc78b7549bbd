use std::{
    cell::RefCell,
    collections::HashSet,
    fmt,
    mem::take,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;
use parse_display::Display;
use slabmap::SlabMap;


/// How delivery passes are started.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Default)]
pub enum SchedulerMode {
    /// Passes run only when [`Scheduler::flush`] or [`Scheduler::run_pass`] is called.
    #[default]
    #[display("manual")]
    Manual,

    /// The first notification after an idle period spawns one pass on the thread-local `rt_local` executor.
    ///
    /// Stores using this mode must be updated from within a running `rt_local` executor.
    #[display("local executor")]
    LocalExecutor,
}

/// Batches store notifications into delivery passes.
///
/// A `Scheduler` is shared by every store created with it.
/// Any number of updates made between two passes result in one notification per touched store,
/// delivered in the order the stores were first touched.
///
/// The scheduler also tracks which computed values are being evaluated, to detect cyclic dependencies.
#[derive_ex(Clone, Default)]
#[default(Self::new())]
pub struct Scheduler(Rc<SchedulerNode>);

impl Scheduler {
    pub fn new() -> Self {
        Self::with_mode(SchedulerMode::Manual)
    }
    pub fn with_mode(mode: SchedulerMode) -> Self {
        Self(Rc::new(SchedulerNode {
            mode,
            data: RefCell::new(SchedulerData {
                targets: SlabMap::new(),
                pending: Vec::new(),
                delivering: false,
                queued: false,
            }),
            evaluating: RefCell::new(HashSet::new()),
        }))
    }

    pub fn mode(&self) -> SchedulerMode {
        self.0.mode
    }

    /// Runs delivery passes until no store is waiting for notification.
    ///
    /// Returns `true` if any pass was run.
    /// Does nothing when called from a listener during a pass; the outer pass schedules the follow-up work.
    pub fn flush(&self) -> bool {
        let mut handled = false;
        while self.run_pass() {
            handled = true;
        }
        handled
    }

    /// Runs at most one delivery pass.
    ///
    /// Stores notified while the pass is running are delivered in the next pass.
    pub fn run_pass(&self) -> bool {
        let targets = {
            let mut d = self.0.data.borrow_mut();
            if d.delivering {
                return false;
            }
            d.queued = false;
            if d.pending.is_empty() {
                return false;
            }
            d.delivering = true;
            let keys = take(&mut d.pending);
            let mut targets = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(target) = d.targets.get_mut(key) {
                    target.is_pending = false;
                    if let Some(node) = target.node.upgrade() {
                        targets.push(node);
                    }
                }
            }
            targets
        };
        let _guard = DeliveringGuard(self);
        tracing::trace!(stores = targets.len(), "delivering notifications");
        for target in &targets {
            target.deliver();
        }
        true
    }

    /// Returns `true` if no store is waiting for notification and no pass is running.
    pub fn is_idle(&self) -> bool {
        let d = self.0.data.borrow();
        d.pending.is_empty() && !d.delivering
    }

    /// Number of stores waiting for the next pass.
    pub fn pending_len(&self) -> usize {
        self.0.data.borrow().pending.len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn register(&self, node: Weak<dyn NotifyTarget>) -> usize {
        self.0.data.borrow_mut().targets.insert(Target {
            node,
            is_pending: false,
        })
    }
    pub(crate) fn unregister(&self, key: usize) {
        let Ok(mut d) = self.0.data.try_borrow_mut() else {
            return;
        };
        if let Some(target) = d.targets.remove(key) {
            if target.is_pending {
                d.pending.retain(|k| *k != key);
            }
        }
    }

    /// Marks the store registered as `key` as waiting for notification.
    ///
    /// Returns `true` if it was not already waiting, i.e. this is the first change of the batch.
    pub(crate) fn schedule(&self, key: usize) -> bool {
        let spawn = {
            let mut d = self.0.data.borrow_mut();
            let Some(target) = d.targets.get_mut(key) else {
                return false;
            };
            if target.is_pending {
                return false;
            }
            target.is_pending = true;
            d.pending.push(key);
            d.request_pass()
        };
        if spawn {
            self.spawn_pass();
        }
        true
    }

    fn spawn_pass(&self) {
        if self.0.mode == SchedulerMode::LocalExecutor {
            let this = self.clone();
            rt_local::spawn_local(async move {
                this.run_pass();
            })
            .detach();
        }
    }

    /// Adds `id` to the set of computed values being evaluated.
    ///
    /// Returns `None` if `id` is already being evaluated.
    pub(crate) fn enter_evaluation(&self, id: usize) -> Option<EvaluationGuard> {
        if self.0.evaluating.borrow_mut().insert(id) {
            Some(EvaluationGuard {
                scheduler: self.clone(),
                id,
            })
        } else {
            None
        }
    }
}
impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.0.data.borrow();
        f.debug_struct("Scheduler")
            .field("mode", &self.0.mode)
            .field("stores", &d.targets.len())
            .field("pending", &d.pending.len())
            .field("delivering", &d.delivering)
            .finish()
    }
}

struct SchedulerNode {
    mode: SchedulerMode,
    data: RefCell<SchedulerData>,
    evaluating: RefCell<HashSet<usize>>,
}

struct SchedulerData {
    targets: SlabMap<Target>,
    pending: Vec<usize>,
    delivering: bool,
    queued: bool,
}
impl SchedulerData {
    /// Returns `true` if a new pass has to be started.
    fn request_pass(&mut self) -> bool {
        if self.delivering || self.queued {
            return false;
        }
        self.queued = true;
        true
    }
}

struct Target {
    node: Weak<dyn NotifyTarget>,
    is_pending: bool,
}

pub(crate) trait NotifyTarget: 'static {
    fn deliver(&self);
}

struct DeliveringGuard<'a>(&'a Scheduler);

impl Drop for DeliveringGuard<'_> {
    fn drop(&mut self) {
        let spawn = {
            let mut d = self.0 .0.data.borrow_mut();
            d.delivering = false;
            !d.pending.is_empty() && d.request_pass()
        };
        if spawn {
            self.0.spawn_pass();
        }
    }
}

pub(crate) struct EvaluationGuard {
    scheduler: Scheduler,
    id: usize,
}
impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        self.scheduler.0.evaluating.borrow_mut().remove(&self.id);
    }
}
