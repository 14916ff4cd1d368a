//! Host-side objects: values, classes, the instance registry and dispatch.

pub mod class;
pub mod convert;
pub mod dispatch;
pub mod registry;
pub mod value;

pub use class::{
    CallOutput, ClassBuilder, ClassDescriptor, ConstructorArgs, FieldType, NativeIter,
    RelationKind, Types,
};
pub use convert::{FromNative, ToNative};
pub use dispatch::{CallOutcome, Dispatcher};
pub use registry::{ClassTable, IdAllocator, InstanceHandle, Registry};
pub use value::{Instance, NativeValue};
