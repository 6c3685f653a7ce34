//! Warning sink for swallowed durable-store failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tagcache_log::Level;

/// Receives warnings with key/value context, e.g. `{tag, key}`.
pub trait Logger: Send + Sync {
    /// Record a warning.
    fn warning(&self, message: &str, context: &[(&str, &str)]);
}

/// [`Logger`] that writes through `tagcache-log`.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    target: String,
}

impl StructuredLogger {
    /// Log under the given target.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("tagcache::registry")
    }
}

impl Logger for StructuredLogger {
    fn warning(&self, message: &str, context: &[(&str, &str)]) {
        tagcache_log::log_with_fields(Level::Warn, &self.target, message, context);
    }
}

/// Durable-store failure handling, shared by a manager and its bound registry
/// so that builder changes on the manager reach the registry.
pub(crate) struct FailurePolicy {
    debug: AtomicBool,
    logger: RwLock<Option<Arc<dyn Logger>>>,
}

impl FailurePolicy {
    pub(crate) fn new(debug: bool, logger: Option<Arc<dyn Logger>>) -> Self {
        Self {
            debug: AtomicBool::new(debug),
            logger: RwLock::new(logger),
        }
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Acquire)
    }

    pub(crate) fn set_debug(&self, debug: bool) {
        self.debug.store(debug, Ordering::Release);
    }

    pub(crate) fn logger(&self) -> Option<Arc<dyn Logger>> {
        match self.logger.read() {
            Ok(logger) => logger.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set_logger(&self, logger: Option<Arc<dyn Logger>>) {
        match self.logger.write() {
            Ok(mut slot) => *slot = logger,
            Err(poisoned) => *poisoned.into_inner() = logger,
        }
    }

    /// Independent copy with the same settings.
    pub(crate) fn detached(&self) -> Self {
        Self::new(self.is_debug(), self.logger())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Logger;
    use std::sync::Mutex;

    /// Captures warnings for assertions.
    #[derive(Default)]
    pub struct RecordingLogger {
        pub entries: Mutex<Vec<(String, Vec<(String, String)>)>>,
    }

    impl RecordingLogger {
        pub fn entries(&self) -> Vec<(String, Vec<(String, String)>)> {
            self.entries.lock().map(|e| e.clone()).unwrap_or_default()
        }
    }

    impl Logger for RecordingLogger {
        fn warning(&self, message: &str, context: &[(&str, &str)]) {
            if let Ok(mut entries) = self.entries.lock() {
                entries.push((
                    message.to_string(),
                    context
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ));
            }
        }
    }
}
