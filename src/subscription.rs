use std::{
    any::Any,
    cell::Cell,
    mem::take,
    rc::{Rc, Weak},
};


/// Handle of a listener registration.
///
/// The listener is removed when the `Subscription` is dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, unsubscribe: impl FnOnce(Rc<T>) + 'static) -> Self {
        Subscription(RawSubscription::from_weak_fn(this, unsubscribe))
    }

    /// Removes the listener now.
    pub fn unsubscribe(self) {}

    /// Keeps the listener registered for as long as its source lives.
    pub fn detach(mut self) {
        self.0 = RawSubscription::Empty;
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        take(&mut self.0).call();
    }
}

/// Handle of a middleware or validator registration.
///
/// Unlike [`Subscription`], dropping a `Registration` keeps the registration in place.
/// Call [`remove`](Self::remove) to undo it.
#[derive(Default)]
pub struct Registration(Cell<RawSubscription>);

impl Registration {
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Registration(Cell::new(RawSubscription::Fn(Box::new(f))))
    }
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, remove: impl FnOnce(Rc<T>) + 'static) -> Self {
        Registration(Cell::new(RawSubscription::from_weak_fn(this, remove)))
    }

    /// Undoes the registration. Calling this more than once has no effect.
    pub fn remove(&self) {
        self.0.take().call();
    }

    pub fn is_removed(&self) -> bool {
        let raw = self.0.take();
        let is_removed = matches!(raw, RawSubscription::Empty);
        self.0.set(raw);
        is_removed
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    WeakFn {
        this: Weak<dyn Any>,
        f: Box<dyn FnOnce(Weak<dyn Any>)>,
    },
}

impl RawSubscription {
    fn from_weak_fn<T: 'static>(this: Weak<T>, f: impl FnOnce(Rc<T>) + 'static) -> Self {
        RawSubscription::WeakFn {
            this,
            f: Box::new(move |this| {
                if let Some(this) = this.upgrade() {
                    if let Ok(this) = this.downcast() {
                        f(this)
                    }
                }
            }),
        }
    }
    fn call(self) {
        match self {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::WeakFn { this, f } => f(this),
        }
    }
}
