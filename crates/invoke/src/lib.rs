//! Invocation layer: uniform, fault-isolating plugin calls.

mod invoker;
mod validate;

pub use invoker::{Invoker, InvokerConfig};
pub use validate::validate_output;
