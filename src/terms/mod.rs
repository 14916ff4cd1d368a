//! Terms: the values exchanged with the reasoning core, and their codec.

pub mod codec;
pub mod numeric;
pub mod term;

pub use codec::{decode, decode_str, encode, from_native, to_native};
pub use numeric::Numeric;
pub use term::{
    Call, Dictionary, ExternalInstance, InstanceLiteral, Operation, Operator, Pattern, Symbol,
    Term, Value,
};
