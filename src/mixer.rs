use std::{
    cell::Cell,
    fmt,
    ops::Deref,
    rc::{Rc, Weak},
};

use crate::{store::Redirect, Fields, Patch, Record, Result, Scheduler, Store, StoreOptions};

use self::sealed::SourceLink as _;


/// A store that can take part in [`mix_stores`].
///
/// Implemented for every [`Store`].
pub trait MixSource: sealed::SourceLink {}

impl<T: Fields> MixSource for Store<T> {}

/// Connects a source store to its mixer. Only created by [`mix_stores`].
pub struct MixLink {
    mixer: Weak<MixerNode>,
    index: usize,
}

mod sealed {
    use super::*;

    pub trait SourceLink: 'static {
        fn clone_source(&self) -> Box<dyn MixSource>;
        fn record(&self) -> Record;

        /// Entries of `patch` for keys this store has, with a different value.
        fn delta(&self, patch: &Patch) -> Patch;
        fn validate(&self, delta: &Patch) -> Result<()>;

        /// Runs the merge and middleware for `delta` and returns the commit of the result.
        fn stage(&self, delta: &Patch) -> Result<Box<dyn FnOnce()>>;
        fn link(&self, link: MixLink);
        fn unlink(&self, owner: usize);
        fn is_linked_to(&self, owner: usize) -> bool;
    }
}

impl<T: Fields> sealed::SourceLink for Store<T> {
    fn clone_source(&self) -> Box<dyn MixSource> {
        Box::new(self.clone())
    }
    fn record(&self) -> Record {
        self.state().to_record()
    }
    fn delta(&self, patch: &Patch) -> Patch {
        let state = self.state();
        patch.filtered(|key, value| state.field(key).is_some_and(|current| current != *value))
    }
    fn validate(&self, delta: &Patch) -> Result<()> {
        self.validate_update(delta)
    }
    fn stage(&self, delta: &Patch) -> Result<Box<dyn FnOnce()>> {
        let state = self.stage_patch(delta)?;
        let this = self.clone();
        Ok(Box::new(move || this.commit(state)))
    }
    fn link(&self, link: MixLink) {
        self.set_redirect(Rc::new(SourceRedirect(link)));
    }
    fn unlink(&self, owner: usize) {
        self.clear_redirect(owner);
    }
    fn is_linked_to(&self, owner: usize) -> bool {
        self.redirect_owner() == Some(owner)
    }
}

/// Combines `sources` into one store whose state is the union of their states.
///
/// When several sources have the same key, the last one wins.
/// Until [`MixedStore::cleanup`] is called or the `MixedStore` is dropped,
/// an update to the mixed store or to any source is validated in every affected store
/// and then committed to the mixed store and to each source whose values it changes.
///
/// A store can take part in one mixer at a time. Mixing it again moves it to the new mixer,
/// and the old mixer stops writing to it.
pub fn mix_stores(
    scheduler: &Scheduler,
    sources: &[&dyn MixSource],
    options: StoreOptions<Record>,
) -> MixedStore {
    let mut state = Record::new();
    for source in sources {
        for (key, value) in source.record() {
            state.insert(key, value);
        }
    }
    let node = Rc::new(MixerNode {
        mixed: Store::with_options(scheduler, state, options),
        sources: sources.iter().map(|s| s.clone_source()).collect(),
        is_cleaned_up: Cell::new(false),
    });
    let mixer = Rc::downgrade(&node);
    node.mixed.set_redirect(Rc::new(MixedRedirect(mixer.clone())));
    for (index, source) in node.sources.iter().enumerate() {
        source.link(MixLink {
            mixer: mixer.clone(),
            index,
        });
    }
    MixedStore(node)
}

/// Store returned by [`mix_stores`].
pub struct MixedStore(Rc<MixerNode>);

impl MixedStore {
    /// Stops propagating updates between the mixed store and its sources.
    ///
    /// Afterwards the mixed store and the sources are independent stores.
    /// Calling this more than once has no effect.
    pub fn cleanup(&self) {
        self.0.cleanup();
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.0.is_cleaned_up.get()
    }

    pub fn store(&self) -> &Store<Record> {
        &self.0.mixed
    }
}
impl Deref for MixedStore {
    type Target = Store<Record>;
    fn deref(&self) -> &Self::Target {
        &self.0.mixed
    }
}
impl fmt::Debug for MixedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixedStore")
            .field("state", &self.0.mixed)
            .field("sources", &self.0.sources.len())
            .field("is_cleaned_up", &self.0.is_cleaned_up.get())
            .finish()
    }
}
impl Drop for MixedStore {
    fn drop(&mut self) {
        self.0.cleanup();
    }
}

struct MixerNode {
    mixed: Store<Record>,
    sources: Vec<Box<dyn MixSource>>,
    is_cleaned_up: Cell<bool>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Origin {
    Mixed,
    Source(usize),
}

impl MixerNode {
    fn owner(this: &Weak<Self>) -> usize {
        this.as_ptr() as usize
    }
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    /// Commits `patch`, already validated by the store it entered at, everywhere it applies.
    ///
    /// Nothing is committed unless every affected store accepts its part.
    fn propagate(&self, patch: &Patch, origin: Origin) -> Result<()> {
        let id = self.id();
        let deltas: Vec<(usize, Patch)> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, source)| source.is_linked_to(id))
            .map(|(index, source)| (index, source.delta(patch)))
            .filter(|(_, delta)| !delta.is_empty())
            .collect();

        if origin != Origin::Mixed {
            self.mixed.validate_update(patch)?;
        }
        for (index, delta) in &deltas {
            if origin != Origin::Source(*index) {
                self.sources[*index].validate(delta)?;
            }
        }

        let mixed = self.mixed.stage_patch(patch)?;
        let commits = deltas
            .iter()
            .map(|(index, delta)| self.sources[*index].stage(delta))
            .collect::<Result<Vec<_>>>()?;
        tracing::trace!(sources = commits.len(), "propagating mixed update");
        self.mixed.commit(mixed);
        for commit in commits {
            commit();
        }
        Ok(())
    }

    fn cleanup(self: &Rc<Self>) {
        if self.is_cleaned_up.replace(true) {
            return;
        }
        let owner = Self::owner(&Rc::downgrade(self));
        self.mixed.clear_redirect(owner);
        for source in &self.sources {
            source.unlink(owner);
        }
        tracing::debug!(sources = self.sources.len(), "mixer cleaned up");
    }
}

struct MixedRedirect(Weak<MixerNode>);

impl Redirect<Record> for MixedRedirect {
    fn update(&self, store: &Store<Record>, patch: Patch) -> Result<()> {
        let Some(mixer) = self.0.upgrade() else {
            return store.apply_patch(&patch);
        };
        store.validate_update(&patch)?;
        mixer.propagate(&patch, Origin::Mixed)
    }
    fn owner(&self) -> usize {
        MixerNode::owner(&self.0)
    }
}

struct SourceRedirect(MixLink);

impl<T: Fields> Redirect<T> for SourceRedirect {
    fn update(&self, store: &Store<T>, patch: Patch) -> Result<()> {
        let Some(mixer) = self.0.mixer.upgrade() else {
            return store.apply_patch(&patch);
        };
        store.validate_update(&patch)?;
        mixer.propagate(&patch, Origin::Source(self.0.index))
    }
    fn owner(&self) -> usize {
        MixerNode::owner(&self.0.mixer)
    }
}
