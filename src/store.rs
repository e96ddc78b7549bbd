use std::{
    cell::{Cell, RefCell},
    fmt,
    mem::replace,
    ops::Deref,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll},
};

use derive_ex::derive_ex;
use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver},
    Stream, StreamExt,
};
use serde::{Serialize, Serializer};

use crate::{
    scheduler::NotifyTarget, DeepClone, Fields, Patch, Registration, Result, Scheduler,
    StoreError, Subscription, Value,
};


/// Immutable view of one committed state.
///
/// A snapshot keeps showing the state it was taken from, even after the store is updated.
/// There is no way to mutate the state through it.
#[derive_ex(Clone, bound())]
pub struct Snapshot<T>(Rc<T>);

impl<T> Snapshot<T> {
    /// Returns `true` if both snapshots were taken from the same commit.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.0, &other.0)
    }
}
impl<T> Deref for Snapshot<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl<T: fmt::Debug> fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
impl<T: PartialEq> PartialEq for Snapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}
impl<T: PartialEq> PartialEq<T> for Snapshot<T> {
    fn eq(&self, other: &T) -> bool {
        *self.0 == *other
    }
}
impl<T: Serialize> Serialize for Snapshot<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        T::serialize(&self.0, serializer)
    }
}

/// The canonical merge passed to [`Middleware`].
pub type Next<T> = fn(&T, &Patch) -> Result<T>;

/// Transforms the merged state of an update before it is committed.
///
/// Receives the running state (the output of the canonical merge or of the previous middleware),
/// the update as produced by the caller, and the canonical merge.
pub trait Middleware<T>: 'static {
    fn call(&self, state: T, update: &Patch, next: Next<T>) -> Result<T>;
}
impl<T, F> Middleware<T> for F
where
    F: Fn(T, &Patch, Next<T>) -> Result<T> + 'static,
{
    fn call(&self, state: T, update: &Patch, next: Next<T>) -> Result<T> {
        self(state, update, next)
    }
}

/// Result of a [`Validator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,

    /// Rejected. Without a message, the update fails with [`StoreError::DEFAULT_VALIDATION_MESSAGE`].
    Invalid(Option<String>),
}
impl From<bool> for Validity {
    fn from(value: bool) -> Self {
        if value {
            Validity::Valid
        } else {
            Validity::Invalid(None)
        }
    }
}
impl From<&str> for Validity {
    fn from(value: &str) -> Self {
        Validity::Invalid(Some(value.to_string()))
    }
}
impl From<String> for Validity {
    fn from(value: String) -> Self {
        Validity::Invalid(Some(value))
    }
}
impl From<std::result::Result<(), String>> for Validity {
    fn from(value: std::result::Result<(), String>) -> Self {
        match value {
            Ok(()) => Validity::Valid,
            Err(message) => Validity::Invalid(Some(message)),
        }
    }
}

/// Checks a pending update before it is applied.
pub trait Validator: 'static {
    fn validate(&self, update: &Patch) -> Validity;
}
impl<F, R> Validator for F
where
    F: Fn(&Patch) -> R + 'static,
    R: Into<Validity>,
{
    fn validate(&self, update: &Patch) -> Validity {
        self(update).into()
    }
}

/// Initial middleware and validators of a store.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct StoreOptions<T: 'static> {
    middleware: Vec<Rc<dyn Middleware<T>>>,
    validators: Vec<Rc<dyn Validator>>,
}

impl<T: 'static> StoreOptions<T> {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
            validators: Vec::new(),
        }
    }
    pub fn middleware(mut self, middleware: impl Middleware<T>) -> Self {
        self.middleware.push(Rc::new(middleware));
        self
    }
    pub fn validator(mut self, validator: impl Validator) -> Self {
        self.validators.push(Rc::new(validator));
        self
    }
}

/// Takes over [`Store::update`] while installed.
pub(crate) trait Redirect<T: 'static>: 'static {
    fn update(&self, store: &Store<T>, patch: Patch) -> Result<()>;

    /// Address of the object that installed the redirect.
    fn owner(&self) -> usize;
}

/// Observable container of a state of type `T`.
///
/// Cloning a `Store` creates another handle to the same store.
#[derive_ex(Clone, bound())]
pub struct Store<T: 'static>(Rc<StoreNode<T>>);

impl<T: Fields> Store<T> {
    pub fn new(scheduler: &Scheduler, state: T) -> Self {
        Self::with_options(scheduler, state, StoreOptions::new())
    }
    pub fn with_options(scheduler: &Scheduler, state: T, options: StoreOptions<T>) -> Self {
        let next_id = Cell::new(0);
        let middleware = options
            .middleware
            .into_iter()
            .map(|value| Entry::new(&next_id, value))
            .collect();
        let validators = options
            .validators
            .into_iter()
            .map(|value| Entry::new(&next_id, value))
            .collect();
        Self(Rc::new_cyclic(|this: &Weak<StoreNode<T>>| {
            let target: Weak<dyn NotifyTarget> = this.clone();
            StoreNode {
                key: scheduler.register(target),
                scheduler: scheduler.clone(),
                state: RefCell::new(Rc::new(state)),
                batch_base: RefCell::new(None),
                listeners: RefCell::new(Vec::new()),
                middleware: RefCell::new(middleware),
                validators: RefCell::new(validators),
                redirect: RefCell::new(None),
                next_id,
            }
        }))
    }

    /// Returns an immutable view of the current state.
    pub fn state(&self) -> Snapshot<T> {
        Snapshot(self.0.state.borrow().clone())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.0.scheduler
    }

    pub fn add_middleware(&self, middleware: impl Middleware<T>) -> Registration {
        self.add_middlewares([Rc::new(middleware) as Rc<dyn Middleware<T>>])
    }
    /// Adds several middleware at once. The returned registration removes all of them.
    pub fn add_middlewares(
        &self,
        middleware: impl IntoIterator<Item = Rc<dyn Middleware<T>>>,
    ) -> Registration {
        let ids = self.0.push_entries(&self.0.middleware, middleware);
        Registration::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.middleware.borrow_mut().retain(|e| !ids.contains(&e.id))
        })
    }

    pub fn add_validator(&self, validator: impl Validator) -> Registration {
        self.add_validators([Rc::new(validator) as Rc<dyn Validator>])
    }
    /// Adds several validators at once. The returned registration removes all of them.
    pub fn add_validators(
        &self,
        validators: impl IntoIterator<Item = Rc<dyn Validator>>,
    ) -> Registration {
        let ids = self.0.push_entries(&self.0.validators, validators);
        Registration::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.validators.borrow_mut().retain(|e| !ids.contains(&e.id))
        })
    }

    /// Runs every validator against `update` in registration order and fails on the first rejection.
    pub fn validate_update(&self, update: &Patch) -> Result<()> {
        let validators = Entry::values(&self.0.validators);
        for validator in validators {
            if let Validity::Invalid(message) = validator.validate(update) {
                let message = message
                    .unwrap_or_else(|| StoreError::DEFAULT_VALIDATION_MESSAGE.to_string());
                tracing::debug!(%message, "update rejected by validator");
                return Err(StoreError::Validation(message));
            }
        }
        Ok(())
    }

    /// Applies the patch returned by `f`.
    ///
    /// The patch is validated, merged into the current state, passed through the middleware chain and committed.
    /// Listeners are notified in the next delivery pass.
    /// On error nothing is committed.
    pub fn update(&self, f: impl FnOnce(&T) -> Patch) -> Result<()> {
        self.try_update(|state| Ok(f(state)))
    }

    /// Same as [`update`](Self::update), for patch producers that can fail.
    pub fn try_update(&self, f: impl FnOnce(&T) -> Result<Patch>) -> Result<()> {
        let patch = f(&*self.state())?;
        let redirect = self.0.redirect.borrow().clone();
        match redirect {
            Some(redirect) => redirect.update(self, patch),
            None => self.apply_patch(&patch),
        }
    }

    /// Replaces the state with the result of `apply`.
    ///
    /// If `apply` fails, the state is replaced with `rollback` applied to the state from before the transaction,
    /// and the error from `apply` is returned.
    /// Validators and middleware are not run.
    pub fn transaction<E>(
        &self,
        apply: impl FnOnce(&T) -> std::result::Result<T, E>,
        rollback: impl FnOnce(&T) -> T,
    ) -> std::result::Result<(), E> {
        let snapshot = self.state();
        match apply(&*snapshot) {
            Ok(state) => {
                self.commit(state);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("transaction failed, rolling back");
                self.commit(rollback(&*snapshot));
                Err(e)
            }
        }
    }

    /// Runs a transaction whose rollback restores the fields the patch touches.
    ///
    /// Fields the state did not have are restored as `Value::Null`.
    pub fn simple_transaction(&self, f: impl FnOnce(&T) -> Patch) -> Result<()> {
        let snapshot = self.state();
        let forward = f(&*snapshot);
        let backward: Patch = forward
            .keys()
            .map(|key| (key, snapshot.field(key).unwrap_or(Value::Null)))
            .collect();
        self.transaction(
            |state| state.merge(&forward),
            |state| state.merge(&backward).unwrap_or_else(|_| state.clone()),
        )
    }

    /// Replaces the state, bypassing validators, middleware and the mixer.
    pub fn reset(&self, state: T) {
        self.commit(state);
    }

    pub fn reset_default(&self)
    where
        T: Default,
    {
        self.reset(T::default());
    }

    /// Returns a deep copy of the current state.
    pub fn clone_state(&self) -> T {
        T::deep_clone(&self.0.state.borrow())
    }

    /// Registers `f` to be called with the new state after each delivery pass that includes this store.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        self.subscribe_rc(Rc::new(f))
    }

    /// Same as [`subscribe`](Self::subscribe).
    ///
    /// Subscribing the same `Rc` twice registers it once.
    pub fn subscribe_rc(&self, f: Rc<dyn Fn(&T)>) -> Subscription {
        self.push_listener(Listener::Current(f))
    }

    /// Registers `f` to be called with the new state and the state from before the batch.
    pub fn subscribe_with_previous(&self, f: impl Fn(&T, &T) + 'static) -> Subscription {
        self.push_listener(Listener::WithPrevious(Rc::new(f)))
    }

    /// Returns a stream yielding the state after each delivery pass that includes this store.
    pub fn changes(&self) -> Changes<T> {
        let (sender, receiver) = unbounded();
        let node = Rc::downgrade(&self.0);
        let subscription = self.subscribe(move |_| {
            if let Some(node) = node.upgrade() {
                let _ = sender.unbounded_send(Snapshot(node.state.borrow().clone()));
            }
        });
        Changes {
            receiver,
            _subscription: subscription,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.0.listeners.borrow().len()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn push_listener(&self, listener: Listener<T>) -> Subscription {
        let id = {
            let mut listeners = self.0.listeners.borrow_mut();
            if let Some(e) = listeners.iter().find(|e| e.value.is_same(&listener)) {
                e.id
            } else {
                let entry = Entry::new(&self.0.next_id, listener);
                let id = entry.id;
                listeners.push(entry);
                id
            }
        };
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            node.listeners.borrow_mut().retain(|e| e.id != id)
        })
    }

    /// Validates and commits `patch`, bypassing any redirect.
    pub(crate) fn apply_patch(&self, patch: &Patch) -> Result<()> {
        self.validate_update(patch)?;
        self.commit_patch(patch)
    }

    /// Merges `patch`, runs the middleware chain and commits the result without validation.
    pub(crate) fn commit_patch(&self, patch: &Patch) -> Result<()> {
        let state = self.stage_patch(patch)?;
        self.commit(state);
        Ok(())
    }

    /// Returns the state `patch` would produce, without committing it.
    pub(crate) fn stage_patch(&self, patch: &Patch) -> Result<T> {
        let mut state = self.state().merge(patch)?;
        for middleware in Entry::values(&self.0.middleware) {
            state = middleware.call(state, patch, T::merge)?;
        }
        Ok(state)
    }

    pub(crate) fn commit(&self, state: T) {
        let old = replace(&mut *self.0.state.borrow_mut(), Rc::new(state));
        if self.0.scheduler.schedule(self.0.key) {
            *self.0.batch_base.borrow_mut() = Some(old);
        }
    }

    pub(crate) fn set_redirect(&self, redirect: Rc<dyn Redirect<T>>) {
        *self.0.redirect.borrow_mut() = Some(redirect);
    }
    /// Removes the redirect if it was installed by `owner`.
    pub(crate) fn clear_redirect(&self, owner: usize) {
        let mut redirect = self.0.redirect.borrow_mut();
        if redirect.as_ref().is_some_and(|r| r.owner() == owner) {
            redirect.take();
        }
    }
    /// Owner of the installed redirect, if any.
    pub(crate) fn redirect_owner(&self) -> Option<usize> {
        self.0.redirect.borrow().as_ref().map(|r| r.owner())
    }
}
impl<T: fmt::Debug + 'static> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.state.try_borrow() {
            Ok(state) => fmt::Debug::fmt(&**state, f),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}

/// Stream returned by [`Store::changes`].
pub struct Changes<T> {
    receiver: UnboundedReceiver<Snapshot<T>>,
    _subscription: Subscription,
}
impl<T> Stream for Changes<T> {
    type Item = Snapshot<T>;
    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

struct StoreNode<T: 'static> {
    scheduler: Scheduler,
    key: usize,
    state: RefCell<Rc<T>>,
    batch_base: RefCell<Option<Rc<T>>>,
    listeners: RefCell<Vec<Entry<Listener<T>>>>,
    middleware: RefCell<Vec<Entry<Rc<dyn Middleware<T>>>>>,
    validators: RefCell<Vec<Entry<Rc<dyn Validator>>>>,
    redirect: RefCell<Option<Rc<dyn Redirect<T>>>>,
    next_id: Cell<u64>,
}
impl<T: 'static> StoreNode<T> {
    fn push_entries<V>(
        &self,
        entries: &RefCell<Vec<Entry<V>>>,
        values: impl IntoIterator<Item = V>,
    ) -> Vec<u64> {
        let mut entries = entries.borrow_mut();
        let mut ids = Vec::new();
        for value in values {
            let entry = Entry::new(&self.next_id, value);
            ids.push(entry.id);
            entries.push(entry);
        }
        ids
    }
}
impl<T: 'static> NotifyTarget for StoreNode<T> {
    fn deliver(&self) {
        let state = self.state.borrow().clone();
        let previous = self
            .batch_base
            .borrow_mut()
            .take()
            .unwrap_or_else(|| state.clone());
        for listener in Entry::values(&self.listeners) {
            match listener {
                Listener::Current(f) => f(&state),
                Listener::WithPrevious(f) => f(&state, &previous),
            }
        }
    }
}
impl<T: 'static> Drop for StoreNode<T> {
    fn drop(&mut self) {
        self.scheduler.unregister(self.key);
    }
}

struct Entry<V> {
    id: u64,
    value: V,
}
impl<V> Entry<V> {
    fn new(next_id: &Cell<u64>, value: V) -> Self {
        let id = next_id.get();
        next_id.set(id + 1);
        Self { id, value }
    }
}
impl<V: Clone> Entry<V> {
    /// Copies the values out so that callbacks run without the list being borrowed.
    fn values(entries: &RefCell<Vec<Self>>) -> Vec<V> {
        entries.borrow().iter().map(|e| e.value.clone()).collect()
    }
}

#[derive_ex(Clone, bound())]
enum Listener<T: 'static> {
    Current(Rc<dyn Fn(&T)>),
    WithPrevious(Rc<dyn Fn(&T, &T)>),
}
impl<T: 'static> Listener<T> {
    fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Listener::Current(a), Listener::Current(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            (Listener::WithPrevious(a), Listener::WithPrevious(b)) => {
                Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }
}
