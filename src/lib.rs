//! A small reactive state container.
//!
//! A [`Store`] holds a state, checks updates with validators, transforms them with middleware,
//! and notifies listeners once per delivery pass of its [`Scheduler`].
//! [`computed`] derives lazily cached values from stores,
//! and [`mix_stores`] keeps several stores in sync through one combined store.
//!
//! ```
//! use statemix::{patch, Fields, Scheduler, Store};
//!
//! #[derive(Clone, Debug, PartialEq, Fields)]
//! struct Counter {
//!     count: i64,
//! }
//!
//! let sc = Scheduler::new();
//! let store = Store::new(&sc, Counter { count: 0 });
//! let _s = store.subscribe(|s| println!("count = {}", s.count));
//!
//! store.update(|s| patch! { "count" => s.count + 1 })?;
//! store.update(|s| patch! { "count" => s.count + 1 })?;
//! sc.flush(); // prints "count = 2" once
//! # Ok::<(), statemix::StoreError>(())
//! ```
extern crate self as statemix;

mod computed;
mod deep_clone;
mod error;
mod fields;
mod mixer;
mod scheduler;
mod store;
mod subscription;
mod value;

pub use computed::*;
pub use deep_clone::*;
pub use error::*;
pub use fields::*;
pub use mixer::*;
pub use scheduler::*;
pub use store::*;
pub use subscription::*;
pub use value::*;

pub use statemix_macros::Fields;
