//! Query results as host values.

use std::collections::BTreeMap;

use super::session::Session;
use crate::error::{DispatchError, Result};
use crate::host::{FromNative, NativeValue};

/// Bindings of one result, decoded to host values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    bindings: BTreeMap<String, NativeValue>,
}

impl ResultSet {
    pub fn new(bindings: BTreeMap<String, NativeValue>) -> Self {
        Self { bindings }
    }

    pub fn get(&self, variable: &str) -> Option<&NativeValue> {
        self.bindings.get(variable)
    }

    /// The binding of `variable`, converted
    pub fn get_typed<T: FromNative>(&self, variable: &str) -> std::result::Result<T, DispatchError> {
        match self.bindings.get(variable) {
            Some(value) => T::from_native(value.clone()),
            None => Err(DispatchError::runtime(format!(
                "no binding for variable '{}'",
                variable
            ))),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NativeValue)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, NativeValue> {
        self.bindings
    }
}

/// A running query; iterate it for results.
///
/// Dropping a `Query` before it is exhausted releases the core-side query.
#[derive(Debug)]
pub struct Query {
    session: Session,
}

impl Query {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Messages of the `Debug` events seen so far
    pub fn messages(&self) -> &[String] {
        self.session.messages()
    }
}

impl Iterator for Query {
    type Item = Result<ResultSet>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.session.next_decoded()?.map(ResultSet::new))
    }
}
