//! Numbers on the wire.
//!
//! Integers and floats are kept apart (the core distinguishes `Integer` from
//! `Float` in `isa` checks) but compare numerically with each other. Non-finite
//! floats travel as the strings `"Infinity"`, `"-Infinity"` and `"NaN"`.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A numeric term
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Numeric {
    Integer(i64),
    Float(#[serde(with = "float_repr")] f64),
}

impl Numeric {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Numeric::Integer(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }
}

impl PartialEq for Numeric {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl PartialOrd for Numeric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Numeric::Integer(a), Numeric::Integer(b)) => Some(a.cmp(b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

impl From<i64> for Numeric {
    fn from(i: i64) -> Self {
        Numeric::Integer(i)
    }
}

impl From<f64> for Numeric {
    fn from(f: f64) -> Self {
        Numeric::Float(f)
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::Integer(i) => write!(f, "{}", i),
            Numeric::Float(x) if x.is_nan() => f.write_str("nan"),
            Numeric::Float(x) if x.is_infinite() && *x > 0.0 => f.write_str("inf"),
            Numeric::Float(x) if x.is_infinite() => f.write_str("-inf"),
            Numeric::Float(x) if x.fract() == 0.0 => write!(f, "{:.1}", x),
            Numeric::Float(x) => write!(f, "{}", x),
        }
    }
}

mod float_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if *value == f64::INFINITY {
            serializer.serialize_str("Infinity")
        } else if *value == f64::NEG_INFINITY {
            serializer.serialize_str("-Infinity")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => match text.as_str() {
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(D::Error::custom(format!(
                    "expected a floating point number, got \"{}\"",
                    other
                ))),
            },
        }
    }
}
