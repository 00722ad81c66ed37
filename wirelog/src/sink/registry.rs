use super::{connect, SharedSink};
use crate::{
    configuration::HarnessSettings,
    error::{Error, Result},
};
use std::{collections::HashMap, fmt, sync::Arc};

/// Name-based lookup of log sinks, so callers do not care whether a sink is
/// in-process or a remote collector.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, SharedSink>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            sinks: HashMap::new(),
        }
    }

    /// Connects every sink declared in `settings`.
    pub fn from_settings(settings: &HarnessSettings) -> Result<Self> {
        let mut registry = Self::new();
        for (name, sink_settings) in &settings.sinks {
            registry.bind(name.as_str(), connect(sink_settings, settings.sink_timeout())?);
        }

        Ok(registry)
    }

    /// Binds `sink` under `name`, replacing any previous binding.
    pub fn bind<S: Into<String>>(&mut self, name: S, sink: SharedSink) -> Option<SharedSink> {
        self.sinks.insert(name.into(), sink)
    }

    pub fn lookup(&self, name: &str) -> Result<SharedSink> {
        self.sinks
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| Error::SinkNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("SinkRegistry").field("sinks", &names).finish()
    }
}
