use crate::{DeepClone, Opaque, Patch, Record, Result, StoreError, Value};


/// A record type that can be held by a [`Store`](crate::Store).
///
/// Fields are addressed by name so that partial updates ([`Patch`]) and store mixing can work on any state type.
/// Implemented by [`Record`] and by structs using `#[derive(Fields)]`.
pub trait Fields: Clone + DeepClone + 'static {
    /// Names of all fields, in declaration order.
    fn field_names(&self) -> Vec<String>;

    /// Current value of the field `name`, or `None` if there is no such field.
    fn field(&self, name: &str) -> Option<Value>;

    /// Returns a copy with every entry of `patch` applied.
    ///
    /// This is the canonical merge passed to middleware as `next`.
    fn merge(&self, patch: &Patch) -> Result<Self>;

    fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    fn to_record(&self) -> Record {
        self.field_names()
            .into_iter()
            .filter_map(|name| {
                let value = self.field(&name)?;
                Some((name, value))
            })
            .collect()
    }
}

impl Fields for Record {
    fn field_names(&self) -> Vec<String> {
        self.keys().map(str::to_string).collect()
    }
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
    fn merge(&self, patch: &Patch) -> Result<Self> {
        Ok(self.merged(patch))
    }
    fn has_field(&self, name: &str) -> bool {
        self.contains_key(name)
    }
    fn to_record(&self) -> Record {
        self.clone()
    }
}

/// Conversion between a struct field and [`Value`], used by `#[derive(Fields)]`.
pub trait FieldValue: Sized {
    /// Describes the accepted values in [`StoreError::FieldType`].
    const EXPECTED: &'static str;

    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;

    fn from_field(field: &str, value: &Value) -> Result<Self> {
        Self::from_value(value).ok_or_else(|| StoreError::field_type(field, Self::EXPECTED))
    }
}

macro_rules! impl_field_value_int {
    ($($t:ty),*) => {
        $(
            impl FieldValue for $t {
                const EXPECTED: &'static str = concat!("an integer in the range of `", stringify!($t), "`");
                fn to_value(&self) -> Value {
                    Value::from(*self)
                }
                fn from_value(value: &Value) -> Option<Self> {
                    <$t>::try_from(value.as_i64()?).ok()
                }
            }
        )*
    };
}
impl_field_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FieldValue for f64 {
    const EXPECTED: &'static str = "a number";
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}
impl FieldValue for f32 {
    const EXPECTED: &'static str = "a number";
    fn to_value(&self) -> Value {
        Value::from(*self)
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}
impl FieldValue for bool {
    const EXPECTED: &'static str = "a bool";
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}
impl FieldValue for String {
    const EXPECTED: &'static str = "a string";
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}
impl FieldValue for Value {
    const EXPECTED: &'static str = "any value";
    fn to_value(&self) -> Value {
        self.clone()
    }
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}
impl FieldValue for Record {
    const EXPECTED: &'static str = "a map";
    fn to_value(&self) -> Value {
        Value::Map(self.clone())
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_record().cloned()
    }
}
impl FieldValue for Opaque {
    const EXPECTED: &'static str = "an opaque value";
    fn to_value(&self) -> Value {
        Value::Opaque(self.clone())
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_opaque().cloned()
    }
}
impl<T: FieldValue> FieldValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, T::to_value)
    }
    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}
impl<T: FieldValue> FieldValue for Vec<T> {
    const EXPECTED: &'static str = "a list";
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(T::to_value).collect())
    }
    fn from_value(value: &Value) -> Option<Self> {
        value.as_list()?.iter().map(T::from_value).collect()
    }
}
