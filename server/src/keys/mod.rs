//! License keys: admin CRUD and the validity check used by the delivery gate.

pub mod crud;
pub mod validate;

pub use validate::{validate_key, KeyError};
