//! Stack VM for compiled loader programs.
//!
//! Executes the instruction records produced by [`crate::compiler`] one after
//! another. The same semantics are embedded in the VM delivery stub (see
//! `loader::envelope`); this copy backs the admin dry-run endpoint.

pub mod machine;
pub mod value;

pub use machine::{Vm, VmError, DEFAULT_MAX_STACK};
pub use value::Value;
