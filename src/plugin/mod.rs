//! Probe and callback capabilities
//!
//! The engine never loads code by name at run time. Probes and callbacks are
//! statically linked values registered in a [`PluginRegistry`]; the
//! configuration names which pair to use, and the registry resolves that
//! pair into [`Capabilities`] before any worker starts.

mod builtin;
mod result;

pub use builtin::{DelayProbe, HelloWorldProbe, JsonCallback, PrintCallback, SilentCallback, TcpConnectProbe};
pub use result::{Outcome, ProbeResult};

use crate::error::{ConfigError, ConfigResult};
use crate::worker::OutputSink;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the callback used when none is configured
pub const DEFAULT_CALLBACK: &str = "silent";

/// A routine run once per seed.
///
/// Many calls are interleaved on one thread, so implementations must only
/// suspend at `.await` points and must not rely on shared mutable state.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, seed: &str) -> anyhow::Result<Value>;
}

/// A routine invoked exactly once per resolved seed.
///
/// Every line written to `out` becomes an `OutputLine` on the output channel.
pub trait Callback: Send + Sync {
    fn on_result(&self, result: &ProbeResult, out: &OutputSink<'_>);
}

/// The resolved probe/callback pair a worker runs with
#[derive(Clone)]
pub struct Capabilities {
    pub probe: Arc<dyn Probe>,
    pub callback: Arc<dyn Callback>,
}

struct Entry<T: ?Sized> {
    value: Arc<T>,
    about: &'static str,
}

/// Name -> capability lookup table
#[derive(Default)]
pub struct PluginRegistry {
    probes: BTreeMap<String, Entry<dyn Probe>>,
    callbacks: BTreeMap<String, Entry<dyn Callback>>,
}

impl PluginRegistry {
    /// Registry with nothing in it
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled sample plugins
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_probe(
            "helloworld",
            "greets a `name,age` seed",
            Arc::new(HelloWorldProbe),
        );
        registry.register_probe(
            "tcp_connect",
            "opens a TCP connection to a `host[:port]` seed",
            Arc::new(TcpConnectProbe::default()),
        );
        registry.register_probe(
            "delay",
            "sleeps for the seed's number of milliseconds",
            Arc::new(DelayProbe),
        );
        registry.register_callback(
            "print",
            "one `seed/data/exception` line per result",
            Arc::new(PrintCallback),
        );
        registry.register_callback("json", "each result as a JSON line", Arc::new(JsonCallback));
        registry.register_callback(DEFAULT_CALLBACK, "no output", Arc::new(SilentCallback));
        registry
    }

    pub fn register_probe(&mut self, name: &str, about: &'static str, probe: Arc<dyn Probe>) {
        self.probes.insert(name.to_string(), Entry { value: probe, about });
    }

    pub fn register_callback(&mut self, name: &str, about: &'static str, callback: Arc<dyn Callback>) {
        self.callbacks
            .insert(name.to_string(), Entry { value: callback, about });
    }

    /// Look up a probe by name
    pub fn probe(&self, name: &str) -> ConfigResult<Arc<dyn Probe>> {
        self.probes
            .get(name)
            .map(|e| Arc::clone(&e.value))
            .ok_or_else(|| ConfigError::UnknownProbe(name.to_string()))
    }

    /// Look up a callback by name; `None` selects the silent default
    pub fn callback(&self, name: Option<&str>) -> ConfigResult<Arc<dyn Callback>> {
        let name = name.unwrap_or(DEFAULT_CALLBACK);
        self.callbacks
            .get(name)
            .map(|e| Arc::clone(&e.value))
            .ok_or_else(|| ConfigError::UnknownCallback(name.to_string()))
    }

    /// Resolve a probe/callback pair
    pub fn resolve(&self, probe: &str, callback: Option<&str>) -> ConfigResult<Capabilities> {
        Ok(Capabilities {
            probe: self.probe(probe)?,
            callback: self.callback(callback)?,
        })
    }

    /// Registered probes as `(name, description)`
    pub fn probes(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.probes.iter().map(|(name, e)| (name.as_str(), e.about))
    }

    /// Registered callbacks as `(name, description)`
    pub fn callbacks(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.callbacks.iter().map(|(name, e)| (name.as_str(), e.about))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = PluginRegistry::builtin();
        assert!(registry.probe("helloworld").is_ok());
        assert!(registry.callback(None).is_ok());
        assert!(registry.callback(Some("print")).is_ok());

        assert!(matches!(
            registry.probe("mongodb"),
            Err(ConfigError::UnknownProbe(name)) if name == "mongodb"
        ));
        assert!(matches!(
            registry.resolve("helloworld", Some("nope")),
            Err(ConfigError::UnknownCallback(_))
        ));
    }

    #[test]
    fn test_listing_is_sorted() {
        let registry = PluginRegistry::builtin();
        let names: Vec<&str> = registry.probes().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["delay", "helloworld", "tcp_connect"]);
    }
}
