use std::{collections::BTreeMap, rc::Rc};

use crate::{Opaque, Patch, Record, Value};


/// Structural copy that shares nothing with the original.
///
/// Unlike `Clone`, `Rc` contents are copied too.
/// Data that cannot be copied (see [`Opaque::shared`]) is shared instead and a warning is logged.
pub trait DeepClone: Sized {
    fn deep_clone(&self) -> Self;
}

macro_rules! impl_deep_clone_by_clone {
    ($($t:ty),*) => {
        $(
            impl DeepClone for $t {
                fn deep_clone(&self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}
impl_deep_clone_by_clone!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String
);

impl<T: DeepClone> DeepClone for Option<T> {
    fn deep_clone(&self) -> Self {
        self.as_ref().map(T::deep_clone)
    }
}
impl<T: DeepClone> DeepClone for Vec<T> {
    fn deep_clone(&self) -> Self {
        self.iter().map(T::deep_clone).collect()
    }
}
impl<T: DeepClone> DeepClone for Box<T> {
    fn deep_clone(&self) -> Self {
        Box::new((**self).deep_clone())
    }
}
impl<T: DeepClone> DeepClone for Rc<T> {
    fn deep_clone(&self) -> Self {
        Rc::new((**self).deep_clone())
    }
}
impl<K: Clone + Ord, V: DeepClone> DeepClone for BTreeMap<K, V> {
    fn deep_clone(&self) -> Self {
        self.iter().map(|(k, v)| (k.clone(), v.deep_clone())).collect()
    }
}

/// The value contained data that could not be copied.
struct NotCloneable {
    type_name: &'static str,
}

impl Value {
    fn try_deep_clone(&self) -> Result<Value, NotCloneable> {
        Ok(match self {
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(Value::try_deep_clone)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(record) => Value::Map(record.deep_clone()),
            Value::Opaque(v) => Value::Opaque(try_clone_opaque(v)?),
            v => v.clone(),
        })
    }
}
fn try_clone_opaque(v: &Opaque) -> Result<Opaque, NotCloneable> {
    v.try_deep_clone().ok_or(NotCloneable {
        type_name: v.type_name(),
    })
}

impl DeepClone for Opaque {
    fn deep_clone(&self) -> Self {
        try_clone_opaque(self).unwrap_or_else(|e| {
            tracing::warn!(
                type_name = e.type_name,
                "value could not be deep-cloned, copying the reference instead"
            );
            self.clone()
        })
    }
}

fn deep_clone_field(field: &str, value: &Value) -> Value {
    match value.try_deep_clone() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                field,
                type_name = e.type_name,
                "value could not be deep-cloned, copying the reference instead"
            );
            value.clone()
        }
    }
}

impl DeepClone for Value {
    fn deep_clone(&self) -> Self {
        deep_clone_field("<root>", self)
    }
}
impl DeepClone for Record {
    fn deep_clone(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.clone(), deep_clone_field(k, v)))
            .collect()
    }
}
impl DeepClone for Patch {
    fn deep_clone(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.clone(), deep_clone_field(k, v)))
            .collect()
    }
}
