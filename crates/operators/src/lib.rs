//! `operators` crate: the `Operator` trait, the operator registry and the
//! built-in operator implementations.
//!
//! Every unit of work a workflow node can name (built-in or remote) must
//! implement [`Operator`]. The engine resolves operators by name through
//! [`OperatorRegistry`] and dispatches them through [`RegisteredOperator`],
//! which validates the input against the operator's [`InputSchema`] first.

pub mod builtin;
pub mod error;
pub mod mock;
pub mod registry;
pub mod schema;
pub mod traits;

pub use error::{OperatorError, RegistryError};
pub use registry::{OperatorRegistry, RegisteredOperator};
pub use schema::InputSchema;
pub use traits::{Operator, OperatorContext, Payload};
