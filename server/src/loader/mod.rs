//! Ephemeral-route loader: route creation, the ordered delivery gate, the
//! delivery envelope and admin management of the stored programs.

pub mod create;
pub mod deliver;
pub mod envelope;
pub mod environment;
pub mod gate;
pub mod program;
pub mod usage;

pub use envelope::{LayeredBase64, PayloadWrapper};
pub use environment::{EnvVarProbe, EnvironmentProbe, StaticProbe};
pub use gate::{Delivery, DeliveryGate, DeliveryRequest, Rejection};
