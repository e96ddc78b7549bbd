use std::{cell::RefCell, rc::Rc};

use assert_call::{call, CallRecorder};

use super::*;
use crate::{patch, record, Record, Value};

#[derive(Clone, Debug, Default, PartialEq, crate::Fields)]
struct Cart {
    price: i64,
    count: i64,
}

#[test]
fn value() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 3, count: 2 });
    let total = computed(cart, |c| c.price * c.count);
    assert_eq!(total.value(), Ok(6));
}

#[test]
fn lazy_until_read() {
    let mut cr = CallRecorder::new();
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 3, count: 2 });
    let total = computed(cart, |c| {
        call!("get");
        c.price * c.count
    });
    cr.verify(());
    assert!(!total.is_cached());
    assert_eq!(total.value(), Ok(6));
    cr.verify("get");
    assert!(total.is_cached());
}

#[test]
fn recomputes_once_per_invalidation() {
    let mut cr = CallRecorder::new();
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 3, count: 2 });
    let total = computed(cart.clone(), |c| {
        call!("get");
        c.price * c.count
    });
    assert_eq!(total.value(), Ok(6));
    assert_eq!(total.value(), Ok(6));
    cr.verify("get");

    for count in 3..6 {
        cart.update(|_| patch! { "count" => count }).unwrap();
        sc.flush();
    }
    cr.verify(());
    assert!(!total.is_cached());
    assert_eq!(total.value(), Ok(15));
    assert_eq!(total.value(), Ok(15));
    cr.verify("get");
}

#[test]
fn cache_is_kept_until_delivery() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 3, count: 2 });
    let total = computed(cart.clone(), |c| c.price * c.count);
    assert_eq!(total.value(), Ok(6));

    cart.update(|_| patch! { "count" => 10 }).unwrap();
    assert_eq!(total.value(), Ok(6));
    sc.flush();
    assert_eq!(total.value(), Ok(30));
}

#[test]
fn tuple_sources() {
    let sc = Scheduler::new();
    let a = Store::new(&sc, record! { "x" => 2 });
    let b = Store::new(&sc, Cart { price: 5, count: 1 });
    let c = computed((a.clone(), b.clone()), |(a, b)| {
        a.get("x").and_then(Value::as_i64).unwrap_or(0) + b.price
    });
    assert_eq!(c.value(), Ok(7));

    b.update(|_| patch! { "price" => 10 }).unwrap();
    sc.flush();
    assert_eq!(c.value(), Ok(12));
}

#[test]
fn triple_sources() {
    let sc = Scheduler::new();
    let a = Store::new(&sc, Cart { price: 1, count: 1 });
    let b = Store::new(&sc, Cart { price: 2, count: 1 });
    let c = Store::new(&sc, Cart { price: 3, count: 1 });
    let sum = computed((a, b, c.clone()), |(a, b, c)| a.price + b.price + c.price);
    assert_eq!(sum.value(), Ok(6));
    c.update(|_| patch! { "price" => 30 }).unwrap();
    sc.flush();
    assert_eq!(sum.value(), Ok(33));
}

#[test]
fn vec_sources() {
    let sc = Scheduler::new();
    let stores: Vec<Store<Record>> = (1..=3)
        .map(|n| Store::new(&sc, record! { "n" => n }))
        .collect();
    let sum = computed(stores.clone(), |states| {
        states
            .iter()
            .filter_map(|s| s.get("n").and_then(Value::as_i64))
            .sum::<i64>()
    });
    assert_eq!(sum.value(), Ok(6));
    stores[1].update(|_| patch! { "n" => 20 }).unwrap();
    sc.flush();
    assert_eq!(sum.value(), Ok(24));
}

#[test]
fn empty_vec_sources() {
    let c = computed(Vec::<Store<Record>>::new(), |states| states.len());
    assert_eq!(c.value(), Ok(0));
}

#[test]
fn dispose() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart::default());
    let total = computed(cart.clone(), |c| c.price * c.count);
    assert_eq!(cart.listener_count(), 1);
    assert_eq!(total.value(), Ok(0));

    total.dispose();
    assert!(total.is_disposed());
    assert!(!total.is_cached());
    assert_eq!(cart.listener_count(), 0);
    assert_eq!(total.value(), Err(StoreError::Disposed));

    total.dispose();
    assert_eq!(total.value(), Err(StoreError::Disposed));
}

#[test]
fn drop_unsubscribes() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart::default());
    let total = computed(cart.clone(), |c| c.price);
    assert_eq!(cart.listener_count(), 1);
    drop(total);
    assert_eq!(cart.listener_count(), 0);
}

#[test]
fn getter_error_is_not_cached() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 0, count: 1 });
    let unit = try_computed(cart.clone(), |c| {
        if c.price == 0 {
            Err(StoreError::rejected("free"))
        } else {
            Ok(c.price / c.count)
        }
    });
    assert_eq!(unit.value(), Err(StoreError::Rejected("free".into())));
    assert!(!unit.is_cached());

    cart.update(|_| patch! { "price" => 4 }).unwrap();
    sc.flush();
    assert_eq!(unit.value(), Ok(4));
}

#[test]
fn self_cycle_is_detected() {
    let sc = Scheduler::new();
    let store = Store::new(&sc, record! { "x" => 1 });
    let slot: Rc<RefCell<Option<Computed<i64>>>> = Rc::new(RefCell::new(None));
    let c = try_computed(store, {
        let slot = slot.clone();
        move |_| match &*slot.borrow() {
            Some(this) => this.value(),
            None => Ok(0),
        }
    });
    *slot.borrow_mut() = Some(c.clone());

    assert_eq!(c.value(), Err(StoreError::Circular));
    assert_eq!(c.value(), Err(StoreError::Circular));
    slot.borrow_mut().take();
}

#[test]
fn mutual_cycle_is_detected() {
    let sc = Scheduler::new();
    let store = Store::new(&sc, record! { "x" => 1 });
    let slot_b: Rc<RefCell<Option<Computed<i64>>>> = Rc::new(RefCell::new(None));
    let a = try_computed(store.clone(), {
        let slot_b = slot_b.clone();
        move |_| match &*slot_b.borrow() {
            Some(b) => b.value(),
            None => Ok(0),
        }
    });
    let b = try_computed(store, {
        let a = a.clone();
        move |_| a.value()
    });
    *slot_b.borrow_mut() = Some(b.clone());

    assert_eq!(a.value(), Err(StoreError::Circular));
    assert_eq!(b.value(), Err(StoreError::Circular));
    slot_b.borrow_mut().take();
}

#[test]
fn nested_computeds_without_cycle() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 2, count: 3 });
    let total = computed(cart.clone(), |c| c.price * c.count);
    let doubled = try_computed(cart.clone(), {
        let total = total.clone();
        move |_| Ok(total.value()? * 2)
    });
    assert_eq!(doubled.value(), Ok(12));
    cart.update(|_| patch! { "count" => 4 }).unwrap();
    sc.flush();
    assert_eq!(doubled.value(), Ok(16));
}

#[test]
fn evaluation_is_released_after_panic() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 0, count: 0 });
    let c = computed(cart.clone(), |c| {
        if c.price == 0 {
            panic!("no price");
        }
        c.price
    });
    let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.value()));
    assert!(r.is_err());

    cart.update(|_| patch! { "price" => 1 }).unwrap();
    sc.flush();
    assert_eq!(c.value(), Ok(1));
}

#[test]
fn debug() {
    let sc = Scheduler::new();
    let cart = Store::new(&sc, Cart { price: 2, count: 3 });
    let total = computed(cart, |c| c.price * c.count);
    assert_eq!(format!("{total:?}"), "<not computed>");
    total.value().unwrap();
    assert_eq!(format!("{total:?}"), "6");
    total.dispose();
    assert_eq!(format!("{total:?}"), "<disposed>");
}
