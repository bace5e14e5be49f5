//! Suspicious-environment probe consulted before route creation and at the
//! start of every delivery.
//!
//! This is a weak, best-effort signal. Anything that can read the server's
//! environment can also change it, so a probe that stays quiet proves nothing.
//! It exists so operators can refuse service while a known hooking or
//! injection mechanism is active, and is not an access-control boundary.

/// Pluggable predicate over the serving environment.
pub trait EnvironmentProbe: Send + Sync {
    /// True when the environment looks instrumented or hooked.
    fn is_suspicious(&self) -> bool;
}

/// Trips when any of the configured process environment variables is set to
/// a non-empty value (for example `LD_PRELOAD`).
#[derive(Debug, Clone, Default)]
pub struct EnvVarProbe {
    names: Vec<String>,
}

impl EnvVarProbe {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// First configured variable that is currently set.
    pub fn tripped_by(&self) -> Option<&str> {
        self.names
            .iter()
            .find(|name| std::env::var_os(name).is_some_and(|v| !v.is_empty()))
            .map(String::as_str)
    }
}

impl EnvironmentProbe for EnvVarProbe {
    fn is_suspicious(&self) -> bool {
        match self.tripped_by() {
            Some(name) => {
                tracing::warn!(variable = name, "Environment probe tripped");
                true
            }
            None => false,
        }
    }
}

/// Probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl EnvironmentProbe for StaticProbe {
    fn is_suspicious(&self) -> bool {
        self.0
    }
}
