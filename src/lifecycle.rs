//! Resource teardown
//!
//! Anything that owns a session, pool or file handle implements [`Closeable`]
//! and is registered once at start-up. On shutdown the registry closes every
//! resource in reverse registration order.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// A resource that must be released on shutdown
#[async_trait]
pub trait Closeable: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Release the resource.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown fails; the registry logs it and moves on.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Ordered set of resources closed together on shutdown
#[derive(Default)]
pub struct ShutdownRegistry {
    resources: Vec<Arc<dyn Closeable>>,
}

impl ShutdownRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource to be closed on shutdown
    pub fn register(&mut self, resource: Arc<dyn Closeable>) {
        self.resources.push(resource);
    }

    /// Number of registered resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing has been registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Close every resource, newest first. A failing resource does not stop
    /// the others from closing.
    ///
    /// Returns the number of resources that failed to close.
    pub async fn close_all(self) -> usize {
        let mut failures = 0;
        for resource in self.resources.iter().rev() {
            match resource.close().await {
                Ok(()) => info!("Closed {}", resource.name()),
                Err(e) => {
                    failures += 1;
                    error!("Failed to close {}: {:#}", resource.name(), e);
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        fail: bool,
        closed: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Closeable for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.closed.lock().expect("lock").push(self.name);
            if self.fail {
                anyhow::bail!("{} refused to close", self.name);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_all_reverse_order_and_keeps_going() {
        let closed = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ShutdownRegistry::new();
        for (name, fail) in [("ledger", false), ("price-client", true), ("chat", false)] {
            registry.register(Arc::new(Recorder {
                name,
                fail,
                closed: closed.clone(),
            }));
        }
        assert_eq!(registry.len(), 3);

        let failures = registry.close_all().await;

        assert_eq!(failures, 1);
        let order = closed.lock().expect("lock").clone();
        assert_eq!(order, vec!["chat", "price-client", "ledger"]);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = ShutdownRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.close_all().await, 0);
    }
}
