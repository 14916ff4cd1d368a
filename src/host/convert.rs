//! Conversions between Rust values and [`NativeValue`].

use std::collections::{BTreeMap, HashMap};

use super::value::{Instance, NativeValue};
use crate::error::DispatchError;

/// Types that can be handed to the reasoning core
pub trait ToNative {
    fn to_native(self) -> NativeValue;
}

/// Types that can be read back out of a [`NativeValue`]
pub trait FromNative: Sized {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError>;
}

fn type_error(expected: &str, got: &NativeValue) -> DispatchError {
    DispatchError::TypeError {
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

impl ToNative for NativeValue {
    fn to_native(self) -> NativeValue {
        self
    }
}

impl ToNative for Instance {
    fn to_native(self) -> NativeValue {
        NativeValue::Instance(self)
    }
}

impl ToNative for bool {
    fn to_native(self) -> NativeValue {
        NativeValue::Boolean(self)
    }
}

impl ToNative for i64 {
    fn to_native(self) -> NativeValue {
        NativeValue::Integer(self)
    }
}

impl ToNative for i32 {
    fn to_native(self) -> NativeValue {
        NativeValue::Integer(i64::from(self))
    }
}

impl ToNative for u32 {
    fn to_native(self) -> NativeValue {
        NativeValue::Integer(i64::from(self))
    }
}

impl ToNative for f64 {
    fn to_native(self) -> NativeValue {
        NativeValue::Float(self)
    }
}

impl ToNative for String {
    fn to_native(self) -> NativeValue {
        NativeValue::String(self)
    }
}

impl ToNative for &str {
    fn to_native(self) -> NativeValue {
        NativeValue::String(self.to_string())
    }
}

impl<T: ToNative> ToNative for Vec<T> {
    fn to_native(self) -> NativeValue {
        NativeValue::List(self.into_iter().map(ToNative::to_native).collect())
    }
}

impl<T: ToNative> ToNative for BTreeMap<String, T> {
    fn to_native(self) -> NativeValue {
        NativeValue::Map(self.into_iter().map(|(k, v)| (k, v.to_native())).collect())
    }
}

impl<T: ToNative> ToNative for HashMap<String, T> {
    fn to_native(self) -> NativeValue {
        NativeValue::Map(self.into_iter().map(|(k, v)| (k, v.to_native())).collect())
    }
}

impl FromNative for NativeValue {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        Ok(value)
    }
}

impl FromNative for Instance {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        match value {
            NativeValue::Instance(instance) => Ok(instance),
            other => Err(type_error("Instance", &other)),
        }
    }
}

impl FromNative for bool {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        match value {
            NativeValue::Boolean(b) => Ok(b),
            other => Err(type_error("Boolean", &other)),
        }
    }
}

impl FromNative for i64 {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        match value {
            NativeValue::Integer(i) => Ok(i),
            other => Err(type_error("Integer", &other)),
        }
    }
}

impl FromNative for f64 {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        match value {
            NativeValue::Float(f) => Ok(f),
            NativeValue::Integer(i) => Ok(i as f64),
            other => Err(type_error("Float", &other)),
        }
    }
}

impl FromNative for String {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        match value {
            NativeValue::String(s) => Ok(s),
            other => Err(type_error("String", &other)),
        }
    }
}

impl<T: FromNative> FromNative for Vec<T> {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        match value {
            NativeValue::List(items) => items.into_iter().map(T::from_native).collect(),
            other => Err(type_error("List", &other)),
        }
    }
}

impl<T: FromNative> FromNative for BTreeMap<String, T> {
    fn from_native(value: NativeValue) -> Result<Self, DispatchError> {
        match value {
            NativeValue::Map(fields) => fields
                .into_iter()
                .map(|(k, v)| Ok((k, T::from_native(v)?)))
                .collect(),
            other => Err(type_error("Dictionary", &other)),
        }
    }
}
