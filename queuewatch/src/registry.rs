//! Name based lookup of the queues this process monitors and controls.
use std::{collections::BTreeMap, sync::Arc};

use crate::{broker::Broker, gateway::JobQueueGateway, QueueWatchError, Result};

/// Maps queue names to their [`JobQueueGateway`].
///
/// The registry is populated once at startup and then shared read-only, typically behind an
/// [`Arc`]. Names are kept sorted so that everything iterating the registry (health aggregation,
/// dashboard reports) does so in a stable order.
#[derive(Debug, Clone, Default)]
pub struct QueueRegistry {
    queues: BTreeMap<String, JobQueueGateway>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry with one gateway per name, all backed by the same broker.
    pub fn from_names<I>(broker: Arc<dyn Broker>, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut registry = Self::new();
        for name in names {
            registry.insert(JobQueueGateway::new(name, broker.clone()));
        }
        registry
    }

    /// Registers a gateway under `name`, returning the gateway it replaced if any.
    ///
    /// `name` must be the queue the gateway targets, so that health, metrics and alerts all refer
    /// to a queue by one name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        gateway: JobQueueGateway,
    ) -> Result<Option<JobQueueGateway>> {
        let name = name.into();
        if name != gateway.name() {
            tracing::warn!(
                queue = %name,
                gateway = gateway.name(),
                "Refusing to register gateway for {} as {name}",
                gateway.name()
            );
            return Err(QueueWatchError::QueueNameMismatch {
                name,
                gateway: gateway.name().to_owned(),
            });
        }
        Ok(self.insert(gateway))
    }

    fn insert(&mut self, gateway: JobQueueGateway) -> Option<JobQueueGateway> {
        let name = gateway.name().to_owned();
        let previous = self.queues.insert(name.clone(), gateway);
        if previous.is_some() {
            tracing::warn!(queue = %name, "Queue {name} registered twice, replacing the earlier gateway");
        } else {
            tracing::debug!(queue = %name, "Registered queue {name}");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<&JobQueueGateway> {
        self.queues.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobQueueGateway)> {
        self.queues.iter().map(|(name, gateway)| (name.as_str(), gateway))
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;
    use crate::broker::memory::InMemoryBroker;

    fn broker() -> Arc<dyn Broker> {
        Arc::new(InMemoryBroker::with_queues(["email", "reports"]))
    }

    #[test]
    fn names_are_sorted() {
        let registry = QueueRegistry::from_names(broker(), ["reports", "email"]);

        assert_eq!(registry.names(), vec!["email", "reports"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_unknown() {
        let registry = QueueRegistry::from_names(broker(), ["email"]);

        assert!(registry.get("email").is_some());
        assert!(registry.get("sms").is_none());
        assert!(!registry.contains("sms"));
    }

    #[test]
    fn register_twice_keeps_latest() {
        let broker = broker();
        let mut registry = QueueRegistry::new();

        let first = JobQueueGateway::new("email", broker.clone());
        let second = JobQueueGateway::new("email", broker);

        assert_matches!(registry.register("email", first), Ok(None));
        assert_matches!(registry.register("email", second), Ok(Some(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["email"]);
    }

    #[test]
    fn register_under_another_name_is_rejected() {
        let mut registry = QueueRegistry::from_names(broker(), ["email"]);

        let result = registry.register("email", JobQueueGateway::new("email-v2", broker()));

        assert_matches!(
            result,
            Err(QueueWatchError::QueueNameMismatch { name, gateway })
                if name == "email" && gateway == "email-v2"
        );
        assert_eq!(registry.get("email").unwrap().name(), "email");
        assert!(!registry.contains("email-v2"));
    }

    #[test]
    fn empty() {
        let registry = QueueRegistry::from_names(broker(), Vec::<String>::new());

        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}
