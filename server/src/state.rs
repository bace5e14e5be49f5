use std::sync::Arc;

use crate::config::LoaderConfig;
use crate::loader::{EnvironmentProbe, PayloadWrapper};
use crate::store::Store;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Backing store for keys, block list, kill switch, routes and programs
    pub store: Arc<dyn Store>,
    /// Consulted at route creation and at the start of every delivery
    pub probe: Arc<dyn EnvironmentProbe>,
    /// Turns a stored program into the delivered body
    pub wrapper: Arc<dyn PayloadWrapper>,
    pub loader: LoaderConfig,
}
