use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;

use crate::{Fields, Result, Scheduler, Snapshot, Store, StoreError, Subscription};

#[cfg(test)]
mod tests;

/// Stores a [`Computed`] can be derived from.
pub trait ComputedSources: 'static {
    /// Snapshots passed to the getter.
    type States;

    fn states(&self) -> Self::States;

    /// Scheduler shared by the sources, if there is any source.
    fn scheduler(&self) -> Option<Scheduler>;

    /// Calls `f` whenever any source notifies.
    fn subscribe(&self, f: Rc<dyn Fn()>) -> Vec<Subscription>;
}

impl<T: Fields> ComputedSources for Store<T> {
    type States = Snapshot<T>;

    fn states(&self) -> Self::States {
        self.state()
    }
    fn scheduler(&self) -> Option<Scheduler> {
        Some(Store::scheduler(self).clone())
    }
    fn subscribe(&self, f: Rc<dyn Fn()>) -> Vec<Subscription> {
        vec![Store::subscribe(self, move |_| f())]
    }
}

impl<T: Fields> ComputedSources for Vec<Store<T>> {
    type States = Vec<Snapshot<T>>;

    fn states(&self) -> Self::States {
        self.iter().map(|s| s.state()).collect()
    }
    fn scheduler(&self) -> Option<Scheduler> {
        self.first().map(|s| s.scheduler().clone())
    }
    fn subscribe(&self, f: Rc<dyn Fn()>) -> Vec<Subscription> {
        self.iter()
            .map(|s| {
                let f = f.clone();
                s.subscribe(move |_| f())
            })
            .collect()
    }
}

macro_rules! impl_computed_sources_for_tuple {
    ($($t:ident $i:tt),*) => {
        impl<$($t: Fields),*> ComputedSources for ($(Store<$t>,)*) {
            type States = ($(Snapshot<$t>,)*);

            fn states(&self) -> Self::States {
                ($(self.$i.state(),)*)
            }
            fn scheduler(&self) -> Option<Scheduler> {
                Some(self.0.scheduler().clone())
            }
            fn subscribe(&self, f: Rc<dyn Fn()>) -> Vec<Subscription> {
                vec![$({
                    let f = f.clone();
                    self.$i.subscribe(move |_| f())
                }),*]
            }
        }
    };
}
impl_computed_sources_for_tuple!(A 0, B 1);
impl_computed_sources_for_tuple!(A 0, B 1, C 2);

/// Creates a value derived from `sources`.
///
/// `getter` runs lazily, on the first [`value`](Computed::value) call after creation
/// or after a source notified.
pub fn computed<S, V>(sources: S, getter: impl Fn(&S::States) -> V + 'static) -> Computed<V>
where
    S: ComputedSources,
    V: 'static,
{
    try_computed(sources, move |states| Ok(getter(states)))
}

/// Same as [`computed`], for getters that can fail.
///
/// Errors from `getter` are returned from [`value`](Computed::value) and are not cached.
pub fn try_computed<S, V>(
    sources: S,
    getter: impl Fn(&S::States) -> Result<V> + 'static,
) -> Computed<V>
where
    S: ComputedSources,
    V: 'static,
{
    let scheduler = sources.scheduler().unwrap_or_default();
    Computed(Rc::new_cyclic(|this: &Weak<ComputedNode<V>>| {
        let this = this.clone();
        let subscriptions = sources.subscribe(Rc::new(move || {
            if let Some(node) = this.upgrade() {
                node.invalidate();
            }
        }));
        ComputedNode {
            scheduler,
            getter: Box::new(move || getter(&sources.states())),
            cache: RefCell::new(None),
            subscriptions: RefCell::new(subscriptions),
            is_disposed: Cell::new(false),
        }
    }))
}

/// Lazily cached value derived from one or more stores.
///
/// The cache is cleared when a source notifies, which happens in the scheduler's delivery pass.
/// Reads between an update and the next pass return the value computed before the update.
#[derive_ex(Clone, bound())]
pub struct Computed<V: 'static>(Rc<ComputedNode<V>>);

impl<V: 'static> Computed<V> {
    /// Returns the cached value, computing it first on a cache miss.
    ///
    /// Fails with [`StoreError::Disposed`] after [`dispose`](Self::dispose),
    /// and with [`StoreError::Circular`] if called again while this value is being computed.
    pub fn value(&self) -> Result<V>
    where
        V: Clone,
    {
        let node = &self.0;
        if node.is_disposed.get() {
            return Err(StoreError::Disposed);
        }
        if let Some(value) = &*node.cache.borrow() {
            return Ok(value.clone());
        }
        let Some(_guard) = node.scheduler.enter_evaluation(self.id()) else {
            tracing::warn!("cyclic dependency detected while computing a value");
            return Err(StoreError::Circular);
        };
        let value = (node.getter)()?;
        if !node.is_disposed.get() {
            *node.cache.borrow_mut() = Some(value.clone());
        }
        Ok(value)
    }

    /// Unsubscribes from the sources and drops the cache.
    ///
    /// Further reads fail. Calling this more than once has no effect.
    pub fn dispose(&self) {
        if self.0.is_disposed.replace(true) {
            return;
        }
        self.0.cache.borrow_mut().take();
        let subscriptions = self.0.subscriptions.take();
        drop(subscriptions);
    }

    pub fn is_cached(&self) -> bool {
        self.0.cache.borrow().is_some()
    }
    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed.get()
    }
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}
impl<V: fmt::Debug + 'static> fmt::Debug for Computed<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_disposed() {
            return write!(f, "<disposed>");
        }
        match self.0.cache.try_borrow() {
            Ok(cache) => match &*cache {
                Some(value) => fmt::Debug::fmt(value, f),
                None => write!(f, "<not computed>"),
            },
            Err(_) => write!(f, "<computing>"),
        }
    }
}

struct ComputedNode<V: 'static> {
    scheduler: Scheduler,
    getter: Box<dyn Fn() -> Result<V>>,
    cache: RefCell<Option<V>>,
    subscriptions: RefCell<Vec<Subscription>>,
    is_disposed: Cell<bool>,
}
impl<V: 'static> ComputedNode<V> {
    fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.try_borrow_mut() {
            cache.take();
        }
    }
}
